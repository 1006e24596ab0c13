//! Authenticated renter-to-host session
//!
//! A session is bound to one contract. Opening it proves both identities:
//! the host signs the renter's nonce with the key named in the contract,
//! and the renter signs the host's nonce with the contract's renter key.

use crate::framing::FramedConnection;
use crate::protocol::{
    HostRequest, HostResponse, HostTerms, HOST_AUTH_DOMAIN, PROTOCOL_VERSION, RENTER_AUTH_DOMAIN,
};
use bytes::Bytes;
use renterfs_core::contract::{Contract, ContractId, HostKey};
use renterfs_core::crypto::{generate_challenge, sign_challenge, verify_challenge};
use renterfs_core::error::{RenterError, Result};
use renterfs_core::fragment::FragmentRoot;
use std::time::Duration;
use tracing::{debug, info, instrument};

fn signature_bytes(sig: &[u8]) -> Result<[u8; 64]> {
    sig.try_into().map_err(|_| {
        RenterError::InvalidSignature(format!("expected 64 bytes, got {}", sig.len()))
    })
}

/// An open session with a storage host
pub struct HostSession {
    conn: FramedConnection,
    host_key: HostKey,
    contract_id: ContractId,
    addr: String,
    terms: HostTerms,
}

impl HostSession {
    /// Connect to `addr` and run the session handshake for `contract`
    #[instrument(skip(contract, connect_timeout), fields(host = %contract.host_key()))]
    pub async fn open(addr: &str, contract: &Contract, connect_timeout: Duration) -> Result<Self> {
        let mut conn = FramedConnection::connect(addr, connect_timeout).await?;
        let host_key = contract.host_key();
        let contract_id = contract.id();

        let renter_challenge = generate_challenge();
        conn.send(&HostRequest::Hello {
            version: PROTOCOL_VERSION,
            contract_id,
            renter_key: contract.renter_public_key().to_bytes(),
            challenge: renter_challenge,
        })
        .await?;

        let host_challenge = match conn.recv::<HostResponse>().await? {
            HostResponse::Challenge {
                host_key: claimed,
                signature,
                challenge,
            } => {
                if claimed != host_key {
                    return Err(RenterError::ContractRejected {
                        host: host_key.to_string(),
                        reason: format!("peer identified as {}", claimed),
                    });
                }
                verify_challenge(
                    &host_key.verifying_key()?,
                    HOST_AUTH_DOMAIN,
                    contract_id.as_bytes(),
                    &renter_challenge,
                    &signature_bytes(&signature)?,
                )?;
                challenge
            }
            HostResponse::Rejected(reason) => {
                return Err(RenterError::ContractRejected {
                    host: host_key.to_string(),
                    reason,
                })
            }
            other => {
                return Err(RenterError::Protocol(format!(
                    "expected Challenge, got {}",
                    other.kind()
                )))
            }
        };

        let signature = sign_challenge(
            contract.renter_key(),
            RENTER_AUTH_DOMAIN,
            contract_id.as_bytes(),
            &host_challenge,
        );
        conn.send(&HostRequest::Auth {
            signature: signature.to_vec(),
        })
        .await?;

        let terms = match conn.recv::<HostResponse>().await? {
            HostResponse::Ready(terms) => terms,
            HostResponse::Rejected(reason) => {
                return Err(RenterError::ContractRejected {
                    host: host_key.to_string(),
                    reason,
                })
            }
            other => {
                return Err(RenterError::Protocol(format!(
                    "expected Ready, got {}",
                    other.kind()
                )))
            }
        };

        info!(
            addr = %addr,
            remaining_storage = terms.remaining_storage,
            end_height = terms.end_height,
            "Host session established"
        );

        Ok(Self {
            conn,
            host_key,
            contract_id,
            addr: addr.to_string(),
            terms,
        })
    }

    pub fn host_key(&self) -> HostKey {
        self.host_key
    }

    pub fn contract_id(&self) -> ContractId {
        self.contract_id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Terms the host reported when the session opened
    pub fn terms(&self) -> HostTerms {
        self.terms
    }

    async fn call(&mut self, req: &HostRequest) -> Result<HostResponse> {
        self.conn.send(req).await?;
        match self.conn.recv::<HostResponse>().await? {
            HostResponse::Error(msg) => Err(RenterError::HostUnavailable(format!(
                "{}: {}",
                self.host_key, msg
            ))),
            resp => Ok(resp),
        }
    }

    /// Store a fragment, returning the root the host computed
    #[instrument(skip(self, data), fields(host = %self.host_key, size = data.len()))]
    pub async fn upload(&mut self, data: Bytes) -> Result<FragmentRoot> {
        let expected = FragmentRoot::from_data(&data);
        let size = data.len() as u64;

        match self.call(&HostRequest::Upload { data }).await? {
            HostResponse::Uploaded(root) if root == expected => {
                self.terms.remaining_storage = self.terms.remaining_storage.saturating_sub(size);
                debug!(root = %root, "Fragment uploaded");
                Ok(root)
            }
            HostResponse::Uploaded(root) => Err(RenterError::RootMismatch {
                expected: expected.to_base58(),
                actual: root.to_base58(),
            }),
            other => Err(RenterError::Protocol(format!(
                "expected Uploaded, got {}",
                other.kind()
            ))),
        }
    }

    /// Read `length` bytes of a fragment starting at `offset`
    ///
    /// `length == 0` reads to the end of the fragment. Callers verify the
    /// data against the root themselves when they read whole fragments.
    #[instrument(skip(self), fields(host = %self.host_key, root = %root))]
    pub async fn download(&mut self, root: FragmentRoot, offset: u64, length: u64) -> Result<Bytes> {
        match self
            .call(&HostRequest::Download {
                root,
                offset,
                length,
            })
            .await?
        {
            HostResponse::Data(data) => {
                debug!(size = data.len(), "Fragment downloaded");
                Ok(data)
            }
            other => Err(RenterError::Protocol(format!(
                "expected Data, got {}",
                other.kind()
            ))),
        }
    }

    /// Ask the host to drop fragments; returns how many it removed
    #[instrument(skip(self, roots), fields(host = %self.host_key, count = roots.len()))]
    pub async fn delete(&mut self, roots: Vec<FragmentRoot>) -> Result<u64> {
        match self.call(&HostRequest::Delete { roots }).await? {
            HostResponse::Deleted(n) => Ok(n),
            other => Err(RenterError::Protocol(format!(
                "expected Deleted, got {}",
                other.kind()
            ))),
        }
    }

    /// Liveness check
    pub async fn ping(&mut self) -> Result<()> {
        match self.call(&HostRequest::Ping).await? {
            HostResponse::Pong => Ok(()),
            other => Err(RenterError::Protocol(format!(
                "expected Pong, got {}",
                other.kind()
            ))),
        }
    }

    /// End the session
    #[instrument(skip(self), fields(host = %self.host_key))]
    pub async fn close(mut self) -> Result<()> {
        self.conn.send(&HostRequest::Goodbye).await?;
        self.conn.close().await?;
        debug!("Host session closed");
        Ok(())
    }
}
