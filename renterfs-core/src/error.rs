//! Error types for renterfs
//!
//! Provides a unified error type for contract parsing, host sessions and
//! the redundant file store.

use thiserror::Error;

/// Result type alias for renterfs operations
pub type Result<T> = std::result::Result<T, RenterError>;

/// Unified error type for renterfs
#[derive(Error, Debug)]
pub enum RenterError {
    // ===== Contract Errors =====
    #[error("Invalid contract: {0}")]
    InvalidContract(String),

    #[error("Invalid contract length: expected {expected} bytes, got {actual}")]
    InvalidContractLength { expected: usize, actual: usize },

    #[error("Contract conflict for host {host}: already added with contract {existing}")]
    ContractConflict { host: String, existing: String },

    #[error("Contract rejected by host {host}: {reason}")]
    ContractRejected { host: String, reason: String },

    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("Shard size mismatch: expected {expected}, got {actual}")]
    ShardSizeMismatch { expected: usize, actual: usize },

    #[error("Redundancy not met for chunk {chunk}: {achieved} of {required} hosts acknowledged")]
    RedundancyShortfall {
        chunk: usize,
        achieved: usize,
        required: usize,
    },

    // ===== Cryptography Errors =====
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("Fragment root mismatch: expected {expected}, got {actual}")]
    RootMismatch { expected: String, actual: String },

    #[error("Invalid fragment root: {0}")]
    InvalidRoot(String),

    // ===== Storage Errors =====
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage full: {used} / {capacity} bytes")]
    StorageFull { used: u64, capacity: u64 },

    #[error("Fragment not found: {0}")]
    FragmentNotFound(String),

    // ===== Network Errors =====
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection timeout to {peer}")]
    ConnectionTimeout { peer: String },

    #[error("Host unavailable: {0}")]
    HostUnavailable(String),

    #[error("Not enough usable hosts: have {available}, need {required}")]
    NotEnoughHosts { available: usize, required: usize },

    // ===== File Store Errors =====
    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("File {0} not committed: every write failed before a chunk was stored")]
    NotCommitted(String),

    #[error("Handle already closed")]
    HandleClosed,

    #[error("Invalid seek: {0}")]
    InvalidSeek(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RenterError {
    /// Whether retrying the same operation against the same host may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RenterError::Network(_)
                | RenterError::ConnectionTimeout { .. }
                | RenterError::Io(_)
                | RenterError::Protocol(_)
        )
    }
}

impl From<reed_solomon_erasure::Error> for RenterError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        RenterError::ErasureCoding(err.to_string())
    }
}

impl From<bincode::Error> for RenterError {
    fn from(err: bincode::Error) -> Self {
        RenterError::Serialization(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for RenterError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        RenterError::InvalidSignature(err.to_string())
    }
}
