//! renterfs wire messages
//!
//! Two services speak this protocol over length-delimited TCP frames, each
//! frame carrying one bincode-encoded message:
//!
//! - the shard, a directory answering chain height and host address queries
//! - storage hosts, which run an authenticated session per contract
//!
//! A host session opens with a mutual challenge/response:
//!
//! ```text
//! renter                                  host
//!   | Hello { contract, renter key, nonce } |
//!   |-------------------------------------->|
//!   |  Challenge { host key, sig, nonce }   |
//!   |<--------------------------------------|
//!   |           Auth { sig }                |
//!   |-------------------------------------->|
//!   |     Ready { terms } | Rejected        |
//!   |<--------------------------------------|
//! ```

use bytes::Bytes;
use renterfs_core::contract::{ContractId, HostKey};
use renterfs_core::crypto::CHALLENGE_SIZE;
use renterfs_core::fragment::FragmentRoot;
use renterfs_core::MAX_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

/// Protocol version sent in `Hello`
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest frame accepted on either side
pub const MAX_FRAME_SIZE: usize = MAX_CHUNK_SIZE + 1024 * 1024;

/// Signature domain of the renter's proof of contract ownership
pub const RENTER_AUTH_DOMAIN: &[u8] = b"renterfs/renter-auth/v1";

/// Signature domain of the host's proof of identity
pub const HOST_AUTH_DOMAIN: &[u8] = b"renterfs/host-auth/v1";

/// Requests accepted by the shard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShardRequest {
    ChainHeight,
    ResolveHost(HostKey),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShardResponse {
    ChainHeight(u64),
    /// `None` when the shard has never heard of the host
    HostAddress(Option<String>),
    Error(String),
}

/// Contract terms reported by a host when a session opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTerms {
    /// Bytes the host will still accept under this contract
    pub remaining_storage: u64,
    /// Chain height at which the contract expires
    pub end_height: u64,
}

/// Requests a renter sends to a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostRequest {
    Hello {
        version: u16,
        contract_id: ContractId,
        renter_key: [u8; 32],
        challenge: [u8; CHALLENGE_SIZE],
    },
    /// Renter signature over the host's challenge (64 bytes)
    Auth { signature: Vec<u8> },
    Upload { data: Bytes },
    /// Partial read; `length == 0` reads to the end of the fragment
    Download {
        root: FragmentRoot,
        offset: u64,
        length: u64,
    },
    Delete { roots: Vec<FragmentRoot> },
    Ping,
    Goodbye,
}

/// Responses a host sends to a renter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostResponse {
    Challenge {
        host_key: HostKey,
        /// Host signature over the renter's challenge (64 bytes)
        signature: Vec<u8>,
        challenge: [u8; CHALLENGE_SIZE],
    },
    Ready(HostTerms),
    Rejected(String),
    Uploaded(FragmentRoot),
    Data(Bytes),
    /// Number of fragments actually removed
    Deleted(u64),
    Pong,
    Error(String),
}

impl HostResponse {
    /// Short name for logs and unexpected-message errors
    pub fn kind(&self) -> &'static str {
        match self {
            HostResponse::Challenge { .. } => "Challenge",
            HostResponse::Ready(_) => "Ready",
            HostResponse::Rejected(_) => "Rejected",
            HostResponse::Uploaded(_) => "Uploaded",
            HostResponse::Data(_) => "Data",
            HostResponse::Deleted(_) => "Deleted",
            HostResponse::Pong => "Pong",
            HostResponse::Error(_) => "Error",
        }
    }
}
