//! Loopback cluster shared by the integration tests

#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use renterfs_client::HostSetConfig;
use renterfs_core::contract::Contract;
use renterfs_network::{HostServer, ShardServer};

pub const CHAIN_HEIGHT: u64 = 100;
pub const END_HEIGHT: u64 = 10_000;

/// A contract between the renter identified by `seed` and `host`
pub fn contract_for(host: &SigningKey, id: u8, seed: u8) -> Contract {
    let mut bytes = Vec::with_capacity(96);
    bytes.extend_from_slice(host.verifying_key().as_bytes());
    bytes.extend_from_slice(&[id; 32]);
    bytes.extend_from_slice(&[seed; 32]);
    Contract::parse(&bytes).unwrap()
}

/// Timings small enough that failing hosts are given up on quickly
pub fn fast_config() -> HostSetConfig {
    HostSetConfig {
        connect_timeout_ms: 500,
        op_timeout_ms: 2_000,
        max_retries: 1,
        retry_delay_ms: 10,
        failure_threshold: 3,
        recovery_timeout_ms: 60_000,
        straggler_grace_ms: 200,
    }
}

pub struct Cluster {
    pub shard: ShardServer,
    pub hosts: Vec<HostServer>,
    pub keys: Vec<SigningKey>,
    pub contracts: Vec<Contract>,
}

impl Cluster {
    /// Start a shard and `n` hosts, each holding a contract with the renter
    pub async fn start(n: usize) -> Self {
        Self::start_with_capacity(n, 64 << 20).await
    }

    pub async fn start_with_capacity(n: usize, capacity: u64) -> Self {
        let shard = ShardServer::start("127.0.0.1:0".parse().unwrap(), CHAIN_HEIGHT)
            .await
            .unwrap();

        let mut hosts = Vec::with_capacity(n);
        let mut keys = Vec::with_capacity(n);
        let mut contracts = Vec::with_capacity(n);
        for i in 0..n {
            let seed = i as u8 + 1;
            let key = SigningKey::from_bytes(&[seed; 32]);
            let contract = contract_for(&key, seed, 200);
            let host = HostServer::start(key.clone(), "127.0.0.1:0".parse().unwrap())
                .await
                .unwrap();
            host.register_contract(
                contract.id(),
                contract.renter_public_key(),
                END_HEIGHT,
                capacity,
            );
            shard.register_host(host.host_key(), host.local_addr().to_string());

            hosts.push(host);
            keys.push(key);
            contracts.push(contract);
        }

        Self {
            shard,
            hosts,
            keys,
            contracts,
        }
    }

    pub fn shard_addr(&self) -> String {
        self.shard.local_addr().to_string()
    }

    pub async fn total_fragments(&self) -> u64 {
        let mut total = 0;
        for host in &self.hosts {
            total += host.fragment_count().await.unwrap();
        }
        total
    }

    pub async fn shutdown(self) {
        for host in self.hosts {
            host.shutdown().await;
        }
        self.shard.shutdown().await;
    }
}
