//! renterfs Storage
//!
//! - `StorageBackend` / `StorageBackendSync` traits for host fragment storage
//! - `MemoryBackend` used by reference hosts
//! - `MetadataStore`, the sled-backed record of files and fragment placement

pub mod backend;
pub mod memory;
pub mod metadata;

pub use backend::{AsyncWrapper, BackendFuture, StorageBackend, StorageBackendSync, StorageStats};
pub use memory::MemoryBackend;
pub use metadata::{ChunkRecord, FileRecord, MetadataStore, ShardPlacement};
