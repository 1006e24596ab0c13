//! Integration tests for host sessions and the shard client
//!
//! Runs the reference servers on loopback and drives them through the
//! client types.

use bytes::Bytes;
use ed25519_dalek::SigningKey;
use renterfs_core::contract::Contract;
use renterfs_core::error::RenterError;
use renterfs_core::fragment::FragmentRoot;
use renterfs_network::{HostServer, HostSession, ShardClient, ShardServer};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

fn contract_bytes(host: &SigningKey, id: u8, seed: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(96);
    bytes.extend_from_slice(host.verifying_key().as_bytes());
    bytes.extend_from_slice(&[id; 32]);
    bytes.extend_from_slice(&[seed; 32]);
    bytes
}

async fn start_host(seed: u8) -> (HostServer, Contract) {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let contract = Contract::parse(&contract_bytes(&key, seed, seed.wrapping_add(100))).unwrap();
    let host = HostServer::start(key, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    host.register_contract(contract.id(), contract.renter_public_key(), 1_000, 1 << 20);
    (host, contract)
}

#[tokio::test]
async fn test_session_fragment_operations() {
    let (host, contract) = start_host(1).await;
    let addr = host.local_addr().to_string();

    let mut session = HostSession::open(&addr, &contract, TIMEOUT).await.unwrap();
    assert_eq!(session.host_key(), contract.host_key());
    assert_eq!(session.terms().end_height, 1_000);
    assert_eq!(session.terms().remaining_storage, 1 << 20);

    let data = Bytes::from_static(b"fragment bytes for the host");
    let root = session.upload(data.clone()).await.unwrap();
    assert_eq!(root, FragmentRoot::from_data(&data));
    assert_eq!(host.fragment_count().await.unwrap(), 1);

    let full = session.download(root, 0, 0).await.unwrap();
    assert_eq!(full, data);
    let partial = session.download(root, 9, 5).await.unwrap();
    assert_eq!(partial.as_ref(), b"bytes");

    session.ping().await.unwrap();

    assert_eq!(session.delete(vec![root]).await.unwrap(), 1);
    assert_eq!(host.fragment_count().await.unwrap(), 0);
    assert!(session.download(root, 0, 0).await.is_err());

    session.close().await.unwrap();
    assert_eq!(host.session_count(), 1);
    host.shutdown().await;
}

#[tokio::test]
async fn test_unknown_contract_rejected() {
    let (host, _) = start_host(2).await;
    let addr = host.local_addr().to_string();

    // Same host key, contract id the host never agreed to
    let key = SigningKey::from_bytes(&[2u8; 32]);
    let stranger = Contract::parse(&contract_bytes(&key, 77, 78)).unwrap();

    let err = HostSession::open(&addr, &stranger, TIMEOUT).await.err().unwrap();
    assert!(matches!(err, RenterError::ContractRejected { .. }));
    host.shutdown().await;
}

#[tokio::test]
async fn test_wrong_host_identity_rejected() {
    let (host, _) = start_host(3).await;
    let addr = host.local_addr().to_string();

    // Contract names a different host key than the one listening at addr
    let other = SigningKey::from_bytes(&[4u8; 32]);
    let contract = Contract::parse(&contract_bytes(&other, 3, 103)).unwrap();

    assert!(HostSession::open(&addr, &contract, TIMEOUT).await.is_err());
    host.shutdown().await;
}

#[tokio::test]
async fn test_offline_host_drops_sessions() {
    let (host, contract) = start_host(5).await;
    let addr = host.local_addr().to_string();

    let mut session = HostSession::open(&addr, &contract, TIMEOUT).await.unwrap();
    session.ping().await.unwrap();

    host.set_online(false);
    let err = session.ping().await.err().unwrap();
    assert!(err.is_transient());
    assert!(HostSession::open(&addr, &contract, TIMEOUT).await.is_err());

    host.set_online(true);
    let mut session = HostSession::open(&addr, &contract, TIMEOUT).await.unwrap();
    session.ping().await.unwrap();
    host.shutdown().await;
}

#[tokio::test]
async fn test_contract_capacity_enforced() {
    let key = SigningKey::from_bytes(&[6u8; 32]);
    let contract = Contract::parse(&contract_bytes(&key, 6, 106)).unwrap();
    let host = HostServer::start(key, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    host.register_contract(contract.id(), contract.renter_public_key(), 1_000, 16);

    let mut session = HostSession::open(&host.local_addr().to_string(), &contract, TIMEOUT)
        .await
        .unwrap();
    session.upload(Bytes::from(vec![1u8; 10])).await.unwrap();
    let err = session.upload(Bytes::from(vec![2u8; 10])).await.err().unwrap();
    assert!(matches!(err, RenterError::HostUnavailable(_)));
    host.shutdown().await;
}

#[tokio::test]
async fn test_identical_fragments_shared_until_last_delete() {
    let key = SigningKey::from_bytes(&[8u8; 32]);
    let first = Contract::parse(&contract_bytes(&key, 8, 108)).unwrap();
    let second = Contract::parse(&contract_bytes(&key, 9, 109)).unwrap();
    let host = HostServer::start(key, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    host.register_contract(first.id(), first.renter_public_key(), 1_000, 16);
    host.register_contract(second.id(), second.renter_public_key(), 1_000, 16);
    let addr = host.local_addr().to_string();

    let padding = Bytes::from(vec![0u8; 10]);
    let mut a = HostSession::open(&addr, &first, TIMEOUT).await.unwrap();
    let mut b = HostSession::open(&addr, &second, TIMEOUT).await.unwrap();

    // Re-uploading the same bytes is not charged twice against 16 bytes
    let root = a.upload(padding.clone()).await.unwrap();
    assert_eq!(a.upload(padding.clone()).await.unwrap(), root);
    assert_eq!(b.upload(padding.clone()).await.unwrap(), root);
    assert_eq!(host.fragment_count().await.unwrap(), 1);

    assert_eq!(b.delete(vec![root]).await.unwrap(), 1);
    assert_eq!(a.download(root, 0, 0).await.unwrap(), padding);

    // Deleting a root the contract no longer holds is a no-op
    assert_eq!(b.delete(vec![root]).await.unwrap(), 0);

    assert_eq!(a.delete(vec![root]).await.unwrap(), 1);
    assert_eq!(a.download(root, 0, 0).await.unwrap(), padding);
    assert_eq!(a.delete(vec![root]).await.unwrap(), 1);
    assert_eq!(host.fragment_count().await.unwrap(), 0);
    assert!(a.download(root, 0, 0).await.is_err());

    a.close().await.unwrap();
    b.close().await.unwrap();
    host.shutdown().await;
}

#[tokio::test]
async fn test_shard_resolves_hosts() {
    let (host, contract) = start_host(7).await;
    let shard = ShardServer::start("127.0.0.1:0".parse().unwrap(), 42)
        .await
        .unwrap();
    shard.register_host(host.host_key(), host.local_addr().to_string());

    let (client, height) = ShardClient::connect(&shard.local_addr().to_string(), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(height, 42);

    let addr = client.resolve_host(contract.host_key()).await.unwrap();
    assert_eq!(addr, host.local_addr().to_string());

    let unknown = SigningKey::from_bytes(&[8u8; 32]);
    let unknown = renterfs_core::HostKey::from_verifying_key(&unknown.verifying_key());
    assert!(matches!(
        client.resolve_host(unknown).await,
        Err(RenterError::HostUnavailable(_))
    ));

    shard.set_chain_height(50);
    assert_eq!(client.chain_height().await.unwrap(), 50);

    shard.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn test_shard_unreachable() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    assert!(ShardClient::connect(&addr, TIMEOUT).await.is_err());
}
