//! Store a greeting and read it back
//!
//! With `--shard` and one or more `--contract` hex strings the example talks
//! to real hosts. Without them it starts a shard and three hosts on
//! loopback first.
//!
//! ```text
//! cargo run -p renterfs-client --example hello
//! cargo run -p renterfs-client --example hello -- --shard 10.0.0.5:9980 \
//!     --contract "$(xxd -ps -s 12 -l 96 renter.contract | tr -d '\n')"
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use ed25519_dalek::SigningKey;
use renterfs_client::{ClientConfig, FileSystem, HostSet};
use renterfs_core::contract::Contract;
use renterfs_network::{HostServer, ShardServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hello")]
#[command(about = "Write a file to contracted hosts and read it back")]
struct Cli {
    /// Shard address (starts a loopback cluster when omitted)
    #[arg(long, env = "RENTERFS_SHARD")]
    shard: Option<String>,

    /// 96-byte contract as hex, repeatable
    #[arg(long)]
    contract: Vec<String>,

    /// Metadata root
    #[arg(long, default_value = "renterfs-meta")]
    root: PathBuf,

    /// Config file
    #[arg(short, long, env = "RENTERFS_CONFIG")]
    config: Option<PathBuf>,

    /// Hosts that must hold every chunk
    #[arg(long, default_value = "2")]
    min_hosts: usize,

    /// Name to store the greeting under
    #[arg(long, default_value = "foo.txt")]
    name: String,
}

struct LocalCluster {
    shard: ShardServer,
    hosts: Vec<HostServer>,
}

async fn start_local_cluster(n: u8) -> Result<(LocalCluster, Vec<Contract>)> {
    let shard = ShardServer::start("127.0.0.1:0".parse()?, 1).await?;
    let mut hosts = Vec::new();
    let mut contracts = Vec::new();

    for i in 1..=n {
        let key = SigningKey::from_bytes(&[i; 32]);
        let mut bytes = Vec::with_capacity(96);
        bytes.extend_from_slice(key.verifying_key().as_bytes());
        bytes.extend_from_slice(&[i; 32]);
        bytes.extend_from_slice(&[0xAB; 32]);
        let contract = Contract::parse(&bytes)?;

        let host = HostServer::start(key, "127.0.0.1:0".parse()?).await?;
        host.register_contract(contract.id(), contract.renter_public_key(), 1_000, 1 << 30);
        shard.register_host(host.host_key(), host.local_addr().to_string());
        info!(host = %host.host_key(), addr = %host.local_addr(), "Started loopback host");

        hosts.push(host);
        contracts.push(contract);
    }
    Ok((LocalCluster { shard, hosts }, contracts))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?.with_env_overrides(),
        None => ClientConfig::default().with_env_overrides(),
    };

    let (local, shard_addr, contracts) = match cli.shard {
        Some(addr) => {
            if cli.contract.is_empty() {
                bail!("--shard needs at least one --contract");
            }
            let contracts = cli
                .contract
                .iter()
                .map(|hex| Contract::from_hex(hex.trim()))
                .collect::<Result<Vec<_>, _>>()
                .context("invalid contract")?;
            (None, addr, contracts)
        }
        None => {
            let (cluster, contracts) = start_local_cluster(3).await?;
            let addr = cluster.shard.local_addr().to_string();
            (Some(cluster), addr, contracts)
        }
    };

    let hosts = Arc::new(HostSet::open(&shard_addr, config.host_set.clone()).await?);
    for contract in contracts {
        hosts.add_contract(contract).await?;
    }
    info!(hosts = hosts.len(), "Host set ready");

    let fs = FileSystem::open(&cli.root, hosts.clone(), config.store.clone())?;
    if fs.exists(&cli.name)? {
        bail!("{} already exists under {:?}", cli.name, cli.root);
    }

    let mut writer = fs.create(&cli.name, cli.min_hosts).await?;
    let written = writer.write(b"Hello from C!").await?;
    writer.close().await?;
    info!(bytes = written, name = %cli.name, "Stored");

    let mut reader = fs.open_file(&cli.name).await?;
    let mut buf = [0u8; 32];
    let n = reader.read(&mut buf).await?;
    println!("{}", String::from_utf8_lossy(&buf[..n]));

    fs.close()?;
    hosts.close().await?;
    if let Some(cluster) = local {
        for host in cluster.hosts {
            host.shutdown().await;
        }
        cluster.shard.shutdown().await;
    }
    Ok(())
}
