//! Shard client
//!
//! The shard is the directory a host set starts from: it reports the
//! current chain height and maps host keys to network addresses.

use crate::framing::FramedConnection;
use crate::protocol::{ShardRequest, ShardResponse};
use renterfs_core::contract::HostKey;
use renterfs_core::error::{RenterError, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub struct ShardClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<FramedConnection>>,
}

impl ShardClient {
    /// Connect to a shard and confirm it answers a chain height query
    #[instrument(skip(timeout))]
    pub async fn connect(addr: &str, timeout: Duration) -> Result<(Self, u64)> {
        let client = Self {
            addr: addr.to_string(),
            timeout,
            conn: Mutex::new(None),
        };
        let height = client.chain_height().await?;
        info!(height, "Connected to shard");
        Ok((client, height))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// One request/response exchange, reconnecting once on a broken connection
    async fn request(&self, req: &ShardRequest) -> Result<ShardResponse> {
        let mut guard = self.conn.lock().await;

        for attempt in 0..2 {
            if guard.is_none() {
                *guard = Some(FramedConnection::connect(&self.addr, self.timeout).await?);
            }
            let Some(conn) = guard.as_mut() else {
                continue;
            };

            let exchange = async {
                conn.send(req).await?;
                conn.recv::<ShardResponse>().await
            };
            let result = match tokio::time::timeout(self.timeout, exchange).await {
                Ok(r) => r,
                Err(_) => Err(RenterError::ConnectionTimeout {
                    peer: self.addr.clone(),
                }),
            };

            match result {
                Ok(ShardResponse::Error(msg)) => {
                    return Err(RenterError::Protocol(format!("Shard error: {}", msg)))
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt == 0 => {
                    warn!(addr = %self.addr, error = %e, "Shard connection lost, reconnecting");
                    *guard = None;
                }
                Err(e) => {
                    *guard = None;
                    return Err(e);
                }
            }
        }

        Err(RenterError::Network(format!(
            "Shard {} unreachable",
            self.addr
        )))
    }

    /// Current chain height
    pub async fn chain_height(&self) -> Result<u64> {
        match self.request(&ShardRequest::ChainHeight).await? {
            ShardResponse::ChainHeight(h) => Ok(h),
            other => Err(RenterError::Protocol(format!(
                "Unexpected shard response to ChainHeight: {:?}",
                other
            ))),
        }
    }

    /// Network address of a host
    #[instrument(skip(self), fields(host = %host))]
    pub async fn resolve_host(&self, host: HostKey) -> Result<String> {
        match self.request(&ShardRequest::ResolveHost(host)).await? {
            ShardResponse::HostAddress(Some(addr)) => {
                debug!(addr = %addr, "Resolved host");
                Ok(addr)
            }
            ShardResponse::HostAddress(None) => Err(RenterError::HostUnavailable(format!(
                "{} is not known to the shard",
                host
            ))),
            other => Err(RenterError::Protocol(format!(
                "Unexpected shard response to ResolveHost: {:?}",
                other
            ))),
        }
    }

    /// Drop the cached connection
    pub async fn disconnect(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            let _ = conn.close().await;
        }
    }
}
