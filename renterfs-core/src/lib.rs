//! renterfs Core Library
//!
//! Core abstractions for storing files on contracted storage hosts.
//! This crate provides:
//! - The 96-byte storage contract codec
//! - Reed-Solomon erasure coding of file chunks
//! - Cryptographic primitives (Blake3 fragment roots, AES-GCM chunk
//!   encryption, ed25519 session signatures)
//! - A per-host circuit breaker
//! - Common error handling

pub mod circuit_breaker;
pub mod contract;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod fragment;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use contract::{Contract, ContractId, HostKey, CONTRACT_SIZE};
pub use crypto::{decrypt_from_bytes, encrypt_to_bytes, EncryptionKey};
pub use erasure::{ErasureConfig, ErasureEncoder, ShardData};
pub use error::{RenterError, Result};
pub use fragment::FragmentRoot;

/// Upper bound on fragments per chunk (GF(2^8) Reed-Solomon)
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Chunk size constants
pub const MIN_CHUNK_SIZE: usize = 4 * 1024; // 4 KB
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024; // 4 MB
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024; // 64 MB

/// Chunks at least this large are split across the rayon pool when encoded
pub const PARALLEL_ENCODE_THRESHOLD: usize = 1024 * 1024;
