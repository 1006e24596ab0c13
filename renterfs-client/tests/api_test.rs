//! Blocking library surface, driven from plain threads
//!
//! The loopback servers run on their own runtime; the library calls block
//! on the shared runtime inside `api`.

mod common;

use common::{fast_config, Cluster};
use renterfs_client::api::{self, Whence};
use renterfs_client::StoreConfig;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn cluster(n: usize) -> (Runtime, Cluster) {
    let rt = Runtime::new().unwrap();
    let cluster = rt.block_on(Cluster::start(n));
    (rt, cluster)
}

fn host_set(cluster: &Cluster) -> api::HostSetHandle {
    let hs = api::open_host_set_with(&cluster.shard_addr(), fast_config()).unwrap();
    for contract in &cluster.contracts {
        let bytes = contract.to_bytes();
        let parsed = api::init_contract(&bytes).unwrap();
        assert!(api::add_host(hs, parsed));
    }
    hs
}

#[test]
fn test_hello_from_c() {
    let (rt, cluster) = cluster(3);
    let dir = TempDir::new().unwrap();
    let hs = host_set(&cluster);
    let store = api::open_store_with(dir.path(), hs, StoreConfig::default()).unwrap();

    let f = api::create_file(store, "foo.txt", 2).unwrap();
    assert_eq!(api::write_file(f, b"Hello from C!"), 13);
    assert!(api::close_file(f));

    let f = api::open_file(store, "foo.txt").unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(api::read_file(f, &mut buf), 13);
    assert_eq!(&buf[..13], b"Hello from C!");
    assert_eq!(api::read_file(f, &mut buf), 0);

    assert_eq!(api::seek_file(f, 6, Whence::Set), 6);
    assert_eq!(api::read_file(f, &mut buf), 7);
    assert_eq!(&buf[..7], b"from C!");
    assert_eq!(api::seek_file(f, -2, Whence::End), 11);
    assert_eq!(api::seek_file(f, -1, Whence::Set), -1);
    assert!(api::close_file(f));

    assert!(api::close_store(store));
    assert!(api::close_host_set(hs));
    rt.block_on(cluster.shutdown());
}

#[test]
fn test_two_of_three_hosts_dead() {
    let (rt, cluster) = cluster(3);
    let dir = TempDir::new().unwrap();
    let hs = host_set(&cluster);
    let store = api::open_store_with(dir.path(), hs, StoreConfig::default()).unwrap();

    let f = api::create_file(store, "foo.txt", 2).unwrap();
    cluster.hosts[1].set_online(false);
    cluster.hosts[2].set_online(false);

    assert_eq!(api::write_file(f, b"Hello from C!"), -1);
    let message = api::last_error().unwrap();
    assert!(message.starts_with("write_file: "));
    assert!(!message.is_empty());

    // Closing after the failed write commits nothing and frees the name
    assert!(!api::close_file(f));
    assert!(api::last_error().unwrap().starts_with("close_file: "));
    assert!(api::open_file(store, "foo.txt").is_none());
    assert!(api::last_error().unwrap().starts_with("open_file: "));

    let f = api::create_file(store, "foo.txt", 1).unwrap();
    assert!(api::close_file(f));

    assert!(api::close_store(store));
    let _ = api::close_host_set(hs);
    rt.block_on(cluster.shutdown());
}

#[test]
fn test_double_close_keeps_metadata() {
    let (rt, cluster) = cluster(2);
    let dir = TempDir::new().unwrap();
    let hs = host_set(&cluster);
    let store = api::open_store_with(dir.path(), hs, StoreConfig::default()).unwrap();

    let f = api::create_file(store, "once.txt", 2).unwrap();
    assert_eq!(api::write_file(f, b"exactly once"), 12);
    assert!(api::close_file(f));
    assert!(!api::close_file(f));
    assert!(api::last_error().unwrap().starts_with("close_file: "));
    assert_eq!(api::write_file(f, b"more"), -1);

    let r = api::open_file(store, "once.txt").unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(api::read_file(r, &mut buf), 12);
    assert_eq!(&buf[..12], b"exactly once");
    assert!(api::close_file(r));

    assert!(api::close_store(store));
    assert!(!api::close_store(store));
    assert!(api::close_host_set(hs));
    assert!(!api::close_host_set(hs));
    rt.block_on(cluster.shutdown());
}

#[test]
fn test_create_rejections() {
    let (rt, cluster) = cluster(2);
    let dir = TempDir::new().unwrap();
    let hs = host_set(&cluster);
    let store = api::open_store_with(dir.path(), hs, StoreConfig::default()).unwrap();

    assert!(api::create_file(store, "wide.txt", 3).is_none());
    assert!(api::last_error().unwrap().contains("Not enough usable hosts"));

    let f = api::create_file(store, "dup.txt", 1).unwrap();
    assert!(api::create_file(store, "dup.txt", 1).is_none());
    assert!(api::last_error().unwrap().contains("already exists"));
    assert_eq!(api::seek_file(f, 0, Whence::Set), -1);
    assert!(api::close_file(f));

    // Same host, another contract id
    let other = common::contract_for(&cluster.keys[0], 77, 200);
    assert!(!api::add_host(hs, other));
    assert!(api::last_error().unwrap().starts_with("add_host: "));

    assert!(api::close_store(store));
    assert!(api::close_host_set(hs));
    rt.block_on(cluster.shutdown());
}
