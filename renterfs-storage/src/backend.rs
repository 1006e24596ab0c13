//! Fragment backend traits
//!
//! Hosts keep the fragments renters upload behind [`StorageBackend`].
//! Fragments are content addressed by their [`FragmentRoot`], so a put of a
//! root that is already present is a no-op.

use bytes::Bytes;
use renterfs_core::error::Result;
use renterfs_core::fragment::FragmentRoot;
use std::future::Future;
use std::pin::Pin;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Occupancy of a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub fragment_count: u64,
    pub bytes_used: u64,
    /// 0 = unlimited
    pub bytes_capacity: u64,
}

impl StorageStats {
    pub fn bytes_available(&self) -> u64 {
        match self.bytes_capacity {
            0 => u64::MAX,
            cap => cap.saturating_sub(self.bytes_used),
        }
    }
}

/// Async fragment store used by the host server
pub trait StorageBackend: Send + Sync {
    fn put(&self, root: FragmentRoot, data: Bytes) -> BackendFuture<'_, ()>;

    fn get(&self, root: FragmentRoot) -> BackendFuture<'_, Option<Bytes>>;

    /// Returns whether the fragment existed
    fn delete(&self, root: FragmentRoot) -> BackendFuture<'_, bool>;

    fn stats(&self) -> BackendFuture<'_, StorageStats>;
}

/// Blocking fragment store
pub trait StorageBackendSync: Send + Sync {
    fn put(&self, root: FragmentRoot, data: Bytes) -> Result<()>;

    fn get(&self, root: FragmentRoot) -> Result<Option<Bytes>>;

    fn delete(&self, root: FragmentRoot) -> Result<bool>;

    fn stats(&self) -> Result<StorageStats>;

    fn list_fragments(&self) -> Result<Vec<FragmentRoot>>;
}

/// Exposes a blocking backend through [`StorageBackend`]
pub struct AsyncWrapper<T: StorageBackendSync>(pub T);

impl<T: StorageBackendSync + 'static> StorageBackend for AsyncWrapper<T> {
    fn put(&self, root: FragmentRoot, data: Bytes) -> BackendFuture<'_, ()> {
        Box::pin(async move { self.0.put(root, data) })
    }

    fn get(&self, root: FragmentRoot) -> BackendFuture<'_, Option<Bytes>> {
        Box::pin(async move { self.0.get(root) })
    }

    fn delete(&self, root: FragmentRoot) -> BackendFuture<'_, bool> {
        Box::pin(async move { self.0.delete(root) })
    }

    fn stats(&self) -> BackendFuture<'_, StorageStats> {
        Box::pin(async move { self.0.stats() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[tokio::test]
    async fn test_async_wrapper() {
        let backend: Box<dyn StorageBackend> = Box::new(AsyncWrapper(MemoryBackend::new()));
        let data = Bytes::from_static(b"fragment");
        let root = FragmentRoot::from_data(&data);

        backend.put(root, data.clone()).await.unwrap();
        assert_eq!(backend.get(root).await.unwrap(), Some(data));
        assert_eq!(backend.stats().await.unwrap().fragment_count, 1);
        assert!(backend.delete(root).await.unwrap());
        assert_eq!(backend.get(root).await.unwrap(), None);
    }

    #[test]
    fn test_bytes_available() {
        let stats = StorageStats {
            bytes_used: 40,
            bytes_capacity: 100,
            ..Default::default()
        };
        assert_eq!(stats.bytes_available(), 60);
        assert_eq!(StorageStats::default().bytes_available(), u64::MAX);
    }
}
