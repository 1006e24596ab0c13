//! Host set: sessions with every contracted host
//!
//! The set is populated from a shard (host directory) and one contract per
//! host. Each host carries a session, the terms it reported and a circuit
//! breaker. Fragment operations go through [`HostSet::with_retry`], which
//! bounds each attempt with the operation timeout, reconnects broken
//! sessions and backs off exponentially.

use crate::config::HostSetConfig;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use renterfs_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use renterfs_core::contract::{Contract, HostKey};
use renterfs_core::error::{RenterError, Result};
use renterfs_core::fragment::FragmentRoot;
use renterfs_network::protocol::HostTerms;
use renterfs_network::session::HostSession;
use renterfs_network::shard::ShardClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// One contracted host
struct HostEntry {
    contract: Contract,
    addr: String,
    /// `None` after a transport failure until the next attempt reconnects
    session: Mutex<Option<HostSession>>,
    terms: RwLock<HostTerms>,
    breaker: CircuitBreaker,
}

/// Health snapshot of one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostHealth {
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub total_failures: u64,
    pub terms: HostTerms,
}

pub struct HostSet {
    shard: ShardClient,
    config: HostSetConfig,
    hosts: RwLock<HashMap<HostKey, Arc<HostEntry>>>,
    chain_height: AtomicU64,
    closed: AtomicBool,
}

impl HostSet {
    /// Connect to the shard at `shard_addr`
    #[instrument(skip(config))]
    pub async fn open(shard_addr: &str, config: HostSetConfig) -> Result<Self> {
        config.validate()?;
        let (shard, height) = ShardClient::connect(shard_addr, config.connect_timeout()).await?;

        info!(chain_height = height, "Host set opened");
        Ok(Self {
            shard,
            config,
            hosts: RwLock::new(HashMap::new()),
            chain_height: AtomicU64::new(height),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &HostSetConfig {
        &self.config
    }

    pub fn shard_addr(&self) -> &str {
        self.shard.addr()
    }

    /// Chain height as last reported by the shard
    pub fn chain_height(&self) -> u64 {
        self.chain_height.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    pub fn host_keys(&self) -> Vec<HostKey> {
        self.hosts.read().keys().copied().collect()
    }

    fn entry(&self, host: HostKey) -> Result<Arc<HostEntry>> {
        self.hosts
            .read()
            .get(&host)
            .cloned()
            .ok_or_else(|| RenterError::HostUnavailable(format!("{} is not in the host set", host)))
    }

    async fn open_session(&self, addr: &str, contract: &Contract) -> Result<HostSession> {
        let opening = HostSession::open(addr, contract, self.config.connect_timeout());
        tokio::time::timeout(self.config.op_timeout(), opening)
            .await
            .map_err(|_| RenterError::ConnectionTimeout {
                peer: addr.to_string(),
            })?
    }

    /// Add a host by its contract
    ///
    /// Re-adding the same contract validates the existing session. A
    /// different contract for a host already in the set is a conflict.
    #[instrument(skip(self, contract), fields(host = %contract.host_key()))]
    pub async fn add_contract(&self, contract: Contract) -> Result<()> {
        if self.is_closed() {
            return Err(RenterError::HandleClosed);
        }

        let host_key = contract.host_key();
        let existing = self.hosts.read().get(&host_key).cloned();
        if let Some(entry) = existing {
            if entry.contract.id() != contract.id() {
                return Err(RenterError::ContractConflict {
                    host: host_key.to_string(),
                    existing: entry.contract.id().to_string(),
                });
            }
            debug!("Contract already present, validating session");
            return self.ping(host_key).await;
        }

        let height = self.shard.chain_height().await?;
        self.chain_height.store(height, Ordering::Relaxed);

        let addr = self.shard.resolve_host(host_key).await?;
        let session = self.open_session(&addr, &contract).await?;
        let terms = session.terms();

        let rejection = if terms.end_height <= height {
            Some(format!(
                "contract expired at height {} (chain height {})",
                terms.end_height, height
            ))
        } else if terms.remaining_storage == 0 {
            Some("no remaining storage".to_string())
        } else {
            None
        };
        if let Some(reason) = rejection {
            let _ = session.close().await;
            return Err(RenterError::ContractRejected {
                host: host_key.to_string(),
                reason,
            });
        }

        let entry = Arc::new(HostEntry {
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: self.config.failure_threshold,
                recovery_timeout: self.config.recovery_timeout(),
                name: host_key.to_string(),
            }),
            addr: addr.clone(),
            session: Mutex::new(Some(session)),
            terms: RwLock::new(terms),
            contract,
        });

        // Another caller may have added the host while we were connecting
        let raced = {
            let mut hosts = self.hosts.write();
            match hosts.get(&host_key) {
                Some(other) => Some(other.contract.id()),
                None => {
                    hosts.insert(host_key, entry.clone());
                    None
                }
            }
        };
        if let Some(other_id) = raced {
            if let Some(session) = entry.session.lock().await.take() {
                let _ = session.close().await;
            }
            if other_id != entry.contract.id() {
                return Err(RenterError::ContractConflict {
                    host: host_key.to_string(),
                    existing: other_id.to_string(),
                });
            }
            return Ok(());
        }

        info!(
            addr = %addr,
            remaining_storage = terms.remaining_storage,
            end_height = terms.end_height,
            "Host added"
        );
        Ok(())
    }

    /// Hosts currently eligible for fragment placement, healthiest first
    pub fn usable_hosts(&self) -> Vec<HostKey> {
        let height = self.chain_height();
        let mut usable: Vec<(u64, u64, HostKey)> = self
            .hosts
            .read()
            .iter()
            .filter(|(_, e)| e.terms.read().end_height > height && e.breaker.allow_request())
            .map(|(k, e)| {
                (
                    e.breaker.consecutive_failures(),
                    e.breaker.total_failures(),
                    *k,
                )
            })
            .collect();
        usable.sort();
        usable.into_iter().map(|(_, _, k)| k).collect()
    }

    pub fn health(&self, host: HostKey) -> Option<HostHealth> {
        let entry = self.hosts.read().get(&host).cloned()?;
        let terms = *entry.terms.read();
        Some(HostHealth {
            state: entry.breaker.state(),
            consecutive_failures: entry.breaker.consecutive_failures(),
            total_failures: entry.breaker.total_failures(),
            terms,
        })
    }

    /// Count a failure the host set could not see itself, such as a
    /// fragment that fails root verification
    pub fn record_failure(&self, host: HostKey) {
        if let Ok(entry) = self.entry(host) {
            entry.breaker.record_failure();
        }
    }

    /// Run `op` against the host's session with timeout, reconnect and
    /// exponential backoff
    pub async fn with_retry<T, F>(&self, host: HostKey, op: F) -> Result<T>
    where
        F: Fn(&mut HostSession) -> BoxFuture<'_, Result<T>>,
    {
        let entry = self.entry(host)?;
        let mut last_error = None;
        let mut delay = self.config.retry_delay();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                warn!(
                    host = %host,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying host operation"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            if !entry.breaker.allow_request() {
                return Err(last_error.unwrap_or_else(|| {
                    RenterError::HostUnavailable(format!("{} is out of rotation", host))
                }));
            }

            let mut guard = entry.session.lock().await;
            if guard.is_none() {
                match self.open_session(&entry.addr, &entry.contract).await {
                    Ok(session) => {
                        *entry.terms.write() = session.terms();
                        *guard = Some(session);
                    }
                    Err(e) => {
                        warn!(host = %host, attempt, error = %e, "Reconnect failed");
                        entry.breaker.record_failure();
                        let retry = e.is_transient();
                        last_error = Some(e);
                        if retry {
                            continue;
                        }
                        break;
                    }
                }
            }
            // Held outside the slot while in use: if this future is dropped
            // mid-request the half-used connection goes with it
            let Some(mut session) = guard.take() else {
                continue;
            };

            let result =
                match tokio::time::timeout(self.config.op_timeout(), op(&mut session)).await {
                    Ok(r) => r,
                    Err(_) => Err(RenterError::ConnectionTimeout {
                        peer: entry.addr.clone(),
                    }),
                };

            match result {
                Ok(value) => {
                    *entry.terms.write() = session.terms();
                    *guard = Some(session);
                    entry.breaker.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    warn!(host = %host, attempt, error = %e, "Host operation failed");
                    entry.breaker.record_failure();
                    let retry = e.is_transient();
                    // Framing state is unknown after a transport error
                    if !retry {
                        *guard = Some(session);
                    }
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RenterError::HostUnavailable(format!("{}: operation failed", host))
        }))
    }

    /// Store a fragment on `host`
    pub async fn upload_fragment(&self, host: HostKey, data: Bytes) -> Result<FragmentRoot> {
        self.with_retry(host, |s| Box::pin(s.upload(data.clone())))
            .await
    }

    /// Read part of a fragment from `host`; `length == 0` reads to the end
    pub async fn download_fragment(
        &self,
        host: HostKey,
        root: FragmentRoot,
        offset: u64,
        length: u64,
    ) -> Result<Bytes> {
        self.with_retry(host, |s| Box::pin(s.download(root, offset, length)))
            .await
    }

    /// Ask `host` to drop fragments
    pub async fn delete_fragments(&self, host: HostKey, roots: Vec<FragmentRoot>) -> Result<u64> {
        self.with_retry(host, |s| Box::pin(s.delete(roots.clone())))
            .await
    }

    pub async fn ping(&self, host: HostKey) -> Result<()> {
        self.with_retry(host, |s| Box::pin(s.ping())).await
    }

    /// Close every session
    ///
    /// Local state is released even when some hosts fail to say goodbye;
    /// those hosts are named in the returned error. Closing twice is a no-op.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let entries: Vec<(HostKey, Arc<HostEntry>)> = self.hosts.write().drain().collect();
        let mut failed = Vec::new();

        for (host, entry) in entries {
            let Some(session) = entry.session.lock().await.take() else {
                continue;
            };
            let closing = tokio::time::timeout(self.config.op_timeout(), session.close()).await;
            match closing {
                Ok(Ok(())) => debug!(host = %host, "Session closed"),
                Ok(Err(e)) => {
                    warn!(host = %host, error = %e, "Session did not close cleanly");
                    failed.push(host.to_string());
                }
                Err(_) => {
                    warn!(host = %host, "Session close timed out");
                    failed.push(host.to_string());
                }
            }
        }
        self.shard.disconnect().await;

        if failed.is_empty() {
            info!("Host set closed");
            Ok(())
        } else {
            Err(RenterError::Network(format!(
                "sessions not closed cleanly: {}",
                failed.join(", ")
            )))
        }
    }
}
