//! Reference host and shard servers
//!
//! Small in-process servers speaking the renterfs protocol. Tests and the
//! demo run them on loopback; `set_online(false)` makes a host drop its
//! sessions and refuse new ones, which is how host failures are simulated.

use crate::framing::FramedConnection;
use crate::protocol::{
    HostRequest, HostResponse, HostTerms, ShardRequest, ShardResponse, HOST_AUTH_DOMAIN,
    PROTOCOL_VERSION, RENTER_AUTH_DOMAIN,
};
use bytes::Bytes;
use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::RwLock;
use renterfs_core::contract::{ContractId, HostKey};
use renterfs_core::crypto::{generate_challenge, sign_challenge, verify_challenge};
use renterfs_core::error::{RenterError, Result};
use renterfs_core::fragment::FragmentRoot;
use renterfs_storage::backend::{AsyncWrapper, StorageBackend};
use renterfs_storage::memory::MemoryBackend;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// A contract as the host sees it
#[derive(Debug, Clone)]
struct HostedContract {
    renter_key: VerifyingKey,
    end_height: u64,
    /// Bytes the renter may still store
    remaining: u64,
}

struct HostState {
    signing_key: SigningKey,
    host_key: HostKey,
    contracts: RwLock<HashMap<ContractId, HostedContract>>,
    storage: Arc<dyn StorageBackend>,
    refs: tokio::sync::Mutex<FragmentRefs>,
    online: AtomicBool,
    sessions: AtomicU64,
}

/// Reference storage host
pub struct HostServer {
    state: Arc<HostState>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HostServer {
    /// Start a host with in-memory fragment storage
    pub async fn start(signing_key: SigningKey, listen_addr: SocketAddr) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = Arc::new(AsyncWrapper(MemoryBackend::new()));
        Self::start_with_storage(signing_key, listen_addr, storage).await
    }

    /// Start a host backed by `storage`
    pub async fn start_with_storage(
        signing_key: SigningKey,
        listen_addr: SocketAddr,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let host_key = HostKey::from_verifying_key(&signing_key.verifying_key());

        let state = Arc::new(HostState {
            signing_key,
            host_key,
            contracts: RwLock::new(HashMap::new()),
            storage,
            refs: tokio::sync::Mutex::new(FragmentRefs::default()),
            online: AtomicBool::new(true),
            sessions: AtomicU64::new(0),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(state.clone(), listener, shutdown_rx));

        info!(host = %host_key, addr = %local_addr, "Host server listening");
        Ok(Self {
            state,
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn host_key(&self) -> HostKey {
        self.state.host_key
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept sessions for a contract
    pub fn register_contract(
        &self,
        id: ContractId,
        renter_key: VerifyingKey,
        end_height: u64,
        capacity: u64,
    ) {
        self.state.contracts.write().insert(
            id,
            HostedContract {
                renter_key,
                end_height,
                remaining: capacity,
            },
        );
    }

    /// Take the host offline (drop sessions, refuse connections) or back online
    pub fn set_online(&self, online: bool) {
        info!(host = %self.state.host_key, online, "Host availability changed");
        self.state.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }

    /// Sessions that completed the handshake since start
    pub fn session_count(&self) -> u64 {
        self.state.sessions.load(Ordering::Relaxed)
    }

    /// Number of fragments currently stored
    pub async fn fragment_count(&self) -> Result<u64> {
        Ok(self.state.storage.stats().await?.fragment_count)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
        info!(host = %self.state.host_key, "Host server stopped");
    }
}

async fn accept_loop(
    state: Arc<HostState>,
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                if !state.online.load(Ordering::SeqCst) {
                    debug!(peer = %peer, "Host offline, refusing connection");
                    drop(stream);
                    continue;
                }
                let state = state.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    let conn = FramedConnection::new(stream);
                    if let Err(e) = serve_session(state, conn, shutdown_rx).await {
                        debug!(peer = %peer, error = %e, "Session ended with error");
                    }
                });
            }
        }
    }
}

/// Handshake, then serve requests until Goodbye, disconnect, shutdown or
/// the host going offline
async fn serve_session(
    state: Arc<HostState>,
    mut conn: FramedConnection,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let Some(contract_id) = handshake(&state, &mut conn).await? else {
        return Ok(());
    };
    state.sessions.fetch_add(1, Ordering::Relaxed);

    loop {
        let req = tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            req = conn.recv_opt::<HostRequest>() => req?,
        };
        let Some(req) = req else {
            return Ok(());
        };

        if !state.online.load(Ordering::SeqCst) {
            debug!(host = %state.host_key, "Host offline, dropping session");
            return Ok(());
        }

        let resp = match req {
            HostRequest::Upload { data } => upload(&state, contract_id, data).await,
            HostRequest::Download {
                root,
                offset,
                length,
            } => download(&state, root, offset, length).await,
            HostRequest::Delete { roots } => delete(&state, contract_id, roots).await,
            HostRequest::Ping => HostResponse::Pong,
            HostRequest::Goodbye => return Ok(()),
            HostRequest::Hello { .. } | HostRequest::Auth { .. } => {
                HostResponse::Error("session already established".to_string())
            }
        };
        conn.send(&resp).await?;
    }
}

#[instrument(skip_all, fields(host = %state.host_key))]
async fn handshake(state: &HostState, conn: &mut FramedConnection) -> Result<Option<ContractId>> {
    let (version, contract_id, renter_key, renter_challenge) = match conn.recv().await? {
        HostRequest::Hello {
            version,
            contract_id,
            renter_key,
            challenge,
        } => (version, contract_id, renter_key, challenge),
        _ => {
            conn.send(&HostResponse::Rejected("expected Hello".into()))
                .await?;
            return Ok(None);
        }
    };

    if version != PROTOCOL_VERSION {
        conn.send(&HostResponse::Rejected(format!(
            "unsupported protocol version {}",
            version
        )))
        .await?;
        return Ok(None);
    }

    let contract = state.contracts.read().get(&contract_id).cloned();
    let Some(contract) = contract else {
        conn.send(&HostResponse::Rejected(format!(
            "unknown contract {}",
            contract_id
        )))
        .await?;
        return Ok(None);
    };
    if contract.renter_key.to_bytes() != renter_key {
        conn.send(&HostResponse::Rejected("renter key does not match contract".into()))
            .await?;
        return Ok(None);
    }

    let host_challenge = generate_challenge();
    let signature = sign_challenge(
        &state.signing_key,
        HOST_AUTH_DOMAIN,
        contract_id.as_bytes(),
        &renter_challenge,
    );
    conn.send(&HostResponse::Challenge {
        host_key: state.host_key,
        signature: signature.to_vec(),
        challenge: host_challenge,
    })
    .await?;

    let signature = match conn.recv().await? {
        HostRequest::Auth { signature } => signature,
        _ => {
            conn.send(&HostResponse::Rejected("expected Auth".into()))
                .await?;
            return Ok(None);
        }
    };
    let verified = <[u8; 64]>::try_from(signature.as_slice())
        .map_err(|_| RenterError::InvalidSignature("bad length".into()))
        .and_then(|sig| {
            verify_challenge(
                &contract.renter_key,
                RENTER_AUTH_DOMAIN,
                contract_id.as_bytes(),
                &host_challenge,
                &sig,
            )
        });
    if let Err(e) = verified {
        warn!(contract = %contract_id, error = %e, "Renter authentication failed");
        conn.send(&HostResponse::Rejected("authentication failed".into()))
            .await?;
        return Ok(None);
    }

    conn.send(&HostResponse::Ready(HostTerms {
        remaining_storage: contract.remaining,
        end_height: contract.end_height,
    }))
    .await?;
    debug!(contract = %contract_id, "Session authenticated");
    Ok(Some(contract_id))
}

async fn upload(state: &HostState, contract_id: ContractId, data: Bytes) -> HostResponse {
    let size = data.len() as u64;
    let root = FragmentRoot::from_data(&data);

    // Held across the storage call so a concurrent delete cannot free the root
    let mut refs = state.refs.lock().await;
    let charged = !refs.holds(contract_id, root);
    if charged {
        let mut contracts = state.contracts.write();
        let Some(contract) = contracts.get_mut(&contract_id) else {
            return HostResponse::Error("contract no longer hosted".into());
        };
        if contract.remaining < size {
            return HostResponse::Error(format!(
                "contract storage exhausted: {} bytes left",
                contract.remaining
            ));
        }
        contract.remaining -= size;
    }

    if !refs.is_stored(root) {
        if let Err(e) = state.storage.put(root, data).await {
            if charged {
                if let Some(contract) = state.contracts.write().get_mut(&contract_id) {
                    contract.remaining += size;
                }
            }
            return HostResponse::Error(e.to_string());
        }
    }
    refs.acquire(contract_id, root, size);
    HostResponse::Uploaded(root)
}

async fn download(state: &HostState, root: FragmentRoot, offset: u64, length: u64) -> HostResponse {
    let data = match state.storage.get(root).await {
        Ok(Some(data)) => data,
        Ok(None) => return HostResponse::Error(format!("fragment {} not found", root)),
        Err(e) => return HostResponse::Error(e.to_string()),
    };

    let start = offset as usize;
    if start > data.len() {
        return HostResponse::Error(format!(
            "offset {} beyond fragment of {} bytes",
            offset,
            data.len()
        ));
    }
    let end = if length == 0 {
        data.len()
    } else {
        start.saturating_add(length as usize).min(data.len())
    };
    HostResponse::Data(data.slice(start..end))
}

/// Drop one reference per listed root; storage is freed with the last one
async fn delete(state: &HostState, contract_id: ContractId, roots: Vec<FragmentRoot>) -> HostResponse {
    let mut refs = state.refs.lock().await;
    let mut released = 0u64;
    let mut freed = 0u64;
    for root in roots {
        match refs.release(contract_id, root) {
            Release::NotHeld => continue,
            Release::StillHeld => {}
            Release::Dropped { size, last } => {
                freed += size;
                if last {
                    if let Err(e) = state.storage.delete(root).await {
                        warn!(root = %root, error = %e, "Fragment released but not removed");
                    }
                }
            }
        }
        released += 1;
    }
    if let Some(contract) = state.contracts.write().get_mut(&contract_id) {
        contract.remaining += freed;
    }
    HostResponse::Deleted(released)
}

/// Stored fragment shared by one or more contracts
struct StoredFragment {
    size: u64,
    contracts: u64,
}

enum Release {
    /// The contract never uploaded the root, or already deleted it
    NotHeld,
    /// The contract uploaded the root more times than it deleted it
    StillHeld,
    /// The contract's last reference went; `last` when no contract holds it
    Dropped { size: u64, last: bool },
}

/// Reference counts on content-addressed fragments
///
/// Identical fragments share one root. A contract pays for a root once and
/// holds one reference per upload; the bytes are freed when no contract
/// holds any.
#[derive(Default)]
struct FragmentRefs {
    held: HashMap<(ContractId, FragmentRoot), u64>,
    stored: HashMap<FragmentRoot, StoredFragment>,
}

impl FragmentRefs {
    fn holds(&self, contract: ContractId, root: FragmentRoot) -> bool {
        self.held.contains_key(&(contract, root))
    }

    fn is_stored(&self, root: FragmentRoot) -> bool {
        self.stored.contains_key(&root)
    }

    fn acquire(&mut self, contract: ContractId, root: FragmentRoot, size: u64) {
        let count = self.held.entry((contract, root)).or_insert(0);
        if *count == 0 {
            self.stored
                .entry(root)
                .or_insert(StoredFragment { size, contracts: 0 })
                .contracts += 1;
        }
        *count += 1;
    }

    fn release(&mut self, contract: ContractId, root: FragmentRoot) -> Release {
        let Some(count) = self.held.get_mut(&(contract, root)) else {
            return Release::NotHeld;
        };
        *count -= 1;
        if *count > 0 {
            return Release::StillHeld;
        }
        self.held.remove(&(contract, root));

        let Some(stored) = self.stored.get_mut(&root) else {
            return Release::Dropped { size: 0, last: true };
        };
        stored.contracts -= 1;
        let size = stored.size;
        let last = stored.contracts == 0;
        if last {
            self.stored.remove(&root);
        }
        Release::Dropped { size, last }
    }
}

struct ShardState {
    chain_height: AtomicU64,
    hosts: RwLock<HashMap<HostKey, String>>,
}

/// Reference shard (host directory)
pub struct ShardServer {
    state: Arc<ShardState>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ShardServer {
    pub async fn start(listen_addr: SocketAddr, chain_height: u64) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(ShardState {
            chain_height: AtomicU64::new(chain_height),
            hosts: RwLock::new(HashMap::new()),
        });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        let state = accept_state.clone();
                        let rx = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_shard(state, FramedConnection::new(stream), rx).await {
                                debug!(peer = %peer, error = %e, "Shard connection ended with error");
                            }
                        });
                    }
                }
            }
        });

        info!(addr = %local_addr, chain_height, "Shard server listening");
        Ok(Self {
            state,
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Announce a host's address
    pub fn register_host(&self, host: HostKey, addr: impl Into<String>) {
        self.state.hosts.write().insert(host, addr.into());
    }

    pub fn set_chain_height(&self, height: u64) {
        self.state.chain_height.store(height, Ordering::SeqCst);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

async fn serve_shard(
    state: Arc<ShardState>,
    mut conn: FramedConnection,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let req = tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            req = conn.recv_opt::<ShardRequest>() => req?,
        };
        let Some(req) = req else {
            return Ok(());
        };
        let resp = match req {
            ShardRequest::ChainHeight => {
                ShardResponse::ChainHeight(state.chain_height.load(Ordering::SeqCst))
            }
            ShardRequest::ResolveHost(host) => {
                ShardResponse::HostAddress(state.hosts.read().get(&host).cloned())
            }
        };
        conn.send(&resp).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(id: u8) -> ContractId {
        ContractId::from_bytes([id; 32])
    }

    #[test]
    fn test_shared_root_freed_by_last_reference() {
        let mut refs = FragmentRefs::default();
        let root = FragmentRoot::from_data(&[0u8; 5]);
        let (a, b) = (contract(1), contract(2));

        refs.acquire(a, root, 5);
        refs.acquire(a, root, 5);
        refs.acquire(b, root, 5);
        assert!(refs.holds(a, root));

        assert!(matches!(refs.release(a, root), Release::StillHeld));
        assert!(matches!(
            refs.release(a, root),
            Release::Dropped { size: 5, last: false }
        ));
        assert!(matches!(refs.release(a, root), Release::NotHeld));
        assert!(refs.is_stored(root));

        assert!(matches!(
            refs.release(b, root),
            Release::Dropped { size: 5, last: true }
        ));
        assert!(!refs.is_stored(root));
    }

    #[test]
    fn test_release_of_unheld_root() {
        let mut refs = FragmentRefs::default();
        let root = FragmentRoot::from_data(b"never uploaded");
        assert!(matches!(refs.release(contract(3), root), Release::NotHeld));
    }
}
