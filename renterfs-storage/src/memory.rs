//! In-memory fragment backend
//!
//! Used by reference hosts in tests and the demo. Not persistent.

use crate::backend::{StorageBackendSync, StorageStats};
use bytes::Bytes;
use parking_lot::RwLock;
use renterfs_core::error::{RenterError, Result};
use renterfs_core::fragment::FragmentRoot;
use std::collections::HashMap;

#[derive(Default)]
struct Fragments {
    by_root: HashMap<FragmentRoot, Bytes>,
    bytes_used: u64,
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Fragments>,
    /// 0 = unlimited
    capacity: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            inner: RwLock::default(),
            capacity,
        }
    }

    /// Drop every stored fragment
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_root.clear();
        inner.bytes_used = 0;
    }
}

impl StorageBackendSync for MemoryBackend {
    fn put(&self, root: FragmentRoot, data: Bytes) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.by_root.contains_key(&root) {
            return Ok(());
        }

        let len = data.len() as u64;
        if self.capacity > 0 && inner.bytes_used + len > self.capacity {
            return Err(RenterError::StorageFull {
                used: inner.bytes_used,
                capacity: self.capacity,
            });
        }
        inner.bytes_used += len;
        inner.by_root.insert(root, data);
        Ok(())
    }

    fn get(&self, root: FragmentRoot) -> Result<Option<Bytes>> {
        Ok(self.inner.read().by_root.get(&root).cloned())
    }

    fn delete(&self, root: FragmentRoot) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.by_root.remove(&root) {
            Some(old) => {
                inner.bytes_used -= old.len() as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> Result<StorageStats> {
        let inner = self.inner.read();
        Ok(StorageStats {
            fragment_count: inner.by_root.len() as u64,
            bytes_used: inner.bytes_used,
            bytes_capacity: self.capacity,
        })
    }

    fn list_fragments(&self) -> Result<Vec<FragmentRoot>> {
        Ok(self.inner.read().by_root.keys().copied().collect())
    }
}
