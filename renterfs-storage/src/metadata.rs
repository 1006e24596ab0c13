//! Sled-based file metadata store
//!
//! One record per file: its size, redundancy parameters, encryption key and
//! the placement of every fragment of every chunk. Records are written when
//! a writer closes, so a name only becomes visible once all of its chunks
//! met their redundancy target.

use renterfs_core::contract::HostKey;
use renterfs_core::crypto::EncryptionKey;
use renterfs_core::erasure::ErasureConfig;
use renterfs_core::error::{RenterError, Result};
use renterfs_core::fragment::FragmentRoot;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const FILES_TREE: &str = "files";
const NAMES_TREE: &str = "files_by_name";

/// Where one fragment of a chunk lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPlacement {
    /// Erasure shard index
    pub index: u8,
    pub host: HostKey,
    pub root: FragmentRoot,
}

/// One chunk of a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Plaintext bytes carried by this chunk
    pub plain_len: u64,
    /// Length of the encrypted chunk fed to the erasure coder
    pub encoded_len: u64,
    /// Size of every fragment of this chunk
    pub shard_size: u64,
    /// Acknowledged fragments, sorted by shard index
    pub placements: Vec<ShardPlacement>,
}

impl ChunkRecord {
    /// Every fragment root of the chunk, grouped by host
    pub fn roots_by_host(&self) -> Vec<(HostKey, Vec<FragmentRoot>)> {
        let mut grouped: Vec<(HostKey, Vec<FragmentRoot>)> = Vec::new();
        for p in &self.placements {
            match grouped.iter_mut().find(|(h, _)| *h == p.host) {
                Some((_, roots)) => roots.push(p.root),
                None => grouped.push((p.host, vec![p.root])),
            }
        }
        grouped
    }
}

/// Persisted description of a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,

    pub name: String,

    /// Total plaintext size in bytes
    pub size: u64,

    /// Hosts that must acknowledge every chunk
    pub min_hosts: usize,

    /// Fragments needed to rebuild a chunk
    pub data_shards: usize,

    /// Fragments produced per chunk
    pub total_shards: usize,

    /// Per-file AES-256-GCM key
    pub key: EncryptionKey,

    pub chunks: Vec<ChunkRecord>,

    pub created_at: i64,

    pub modified_at: i64,
}

impl FileRecord {
    pub fn new(
        name: impl Into<String>,
        min_hosts: usize,
        data_shards: usize,
        total_shards: usize,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            size: 0,
            min_hosts,
            data_shards,
            total_shards,
            key: EncryptionKey::generate(),
            chunks: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Erasure layout shared by all chunks of the file
    pub fn erasure_config(&self) -> Result<ErasureConfig> {
        ErasureConfig::new(
            self.data_shards,
            self.total_shards.saturating_sub(self.data_shards),
        )
    }

    /// Append a durable chunk
    pub fn push_chunk(&mut self, chunk: ChunkRecord) {
        self.size += chunk.plain_len;
        self.chunks.push(chunk);
    }

    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().timestamp();
    }
}

/// Sled-backed store of file records, keyed by name
pub struct MetadataStore {
    db: sled::Db,
}

impl MetadataStore {
    /// Open or create a metadata store rooted at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = ?path.as_ref(), "Opening metadata store");

        let db = sled::open(path.as_ref())
            .map_err(|e| RenterError::Storage(format!("Failed to open metadata root: {}", e)))?;

        Ok(Self { db })
    }

    /// Open an in-memory store (for testing)
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| RenterError::Storage(format!("Failed to open metadata root: {}", e)))?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| RenterError::Storage(e.to_string()))
    }

    fn put_value<K: AsRef<[u8]>, V: Serialize>(
        &self,
        tree: &sled::Tree,
        key: K,
        value: &V,
    ) -> Result<()> {
        let encoded = bincode::serialize(value)?;
        tree.insert(key, encoded)
            .map_err(|e| RenterError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get_value<K: AsRef<[u8]>, V: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: K,
    ) -> Result<Option<V>> {
        match tree.get(key).map_err(|e| RenterError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a file record, replacing any previous record with the same name
    pub fn put_file(&self, file: &FileRecord) -> Result<()> {
        let files = self.tree(FILES_TREE)?;
        let names = self.tree(NAMES_TREE)?;

        if let Some(old_id) = names
            .get(file.name.as_bytes())
            .map_err(|e| RenterError::Storage(e.to_string()))?
        {
            if old_id.as_ref() != file.id.as_bytes() {
                files
                    .remove(old_id)
                    .map_err(|e| RenterError::Storage(e.to_string()))?;
            }
        }

        self.put_value(&files, file.id.as_bytes(), file)?;
        names
            .insert(file.name.as_bytes(), file.id.as_bytes())
            .map_err(|e| RenterError::Storage(e.to_string()))?;

        debug!(file_id = %file.id, name = %file.name, size = file.size, "Stored file record");
        Ok(())
    }

    /// Look up a file record by name
    pub fn get_file(&self, name: &str) -> Result<Option<FileRecord>> {
        let names = self.tree(NAMES_TREE)?;
        match names
            .get(name.as_bytes())
            .map_err(|e| RenterError::Storage(e.to_string()))?
        {
            Some(id_bytes) => {
                let files = self.tree(FILES_TREE)?;
                self.get_value(&files, id_bytes)
            }
            None => Ok(None),
        }
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.tree(NAMES_TREE)?
            .contains_key(name.as_bytes())
            .map_err(|e| RenterError::Storage(e.to_string()))
    }

    /// Remove a file record, returning it if it existed
    pub fn delete_file(&self, name: &str) -> Result<Option<FileRecord>> {
        let record = self.get_file(name)?;
        if let Some(file) = &record {
            self.tree(NAMES_TREE)?
                .remove(name.as_bytes())
                .map_err(|e| RenterError::Storage(e.to_string()))?;
            self.tree(FILES_TREE)?
                .remove(file.id.as_bytes())
                .map_err(|e| RenterError::Storage(e.to_string()))?;
        }
        Ok(record)
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut files = Vec::new();
        for item in self.tree(FILES_TREE)?.iter() {
            let (_, value) = item.map_err(|e| RenterError::Storage(e.to_string()))?;
            files.push(bincode::deserialize(&value)?);
        }
        Ok(files)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| RenterError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn host(seed: u8) -> HostKey {
        HostKey::from_verifying_key(&SigningKey::from_bytes(&[seed; 32]).verifying_key())
    }

    fn chunk(plain_len: u64, hosts: &[HostKey]) -> ChunkRecord {
        ChunkRecord {
            plain_len,
            encoded_len: plain_len + 28,
            shard_size: 16,
            placements: hosts
                .iter()
                .enumerate()
                .map(|(i, h)| ShardPlacement {
                    index: i as u8,
                    host: *h,
                    root: FragmentRoot::from_data(&[i as u8]),
                })
                .collect(),
        }
    }

    #[test]
    fn test_put_get_by_name() {
        let store = MetadataStore::open_temporary().unwrap();
        let hosts = [host(1), host(2), host(3)];

        let mut file = FileRecord::new("foo.txt", 2, 2, 3);
        file.push_chunk(chunk(13, &hosts));
        store.put_file(&file).unwrap();

        let retrieved = store.get_file("foo.txt").unwrap().unwrap();
        assert_eq!(retrieved.id, file.id);
        assert_eq!(retrieved.size, 13);
        assert_eq!(retrieved.chunks.len(), 1);
        assert_eq!(retrieved.chunks[0].placements.len(), 3);
        assert_eq!(retrieved.key.as_bytes(), file.key.as_bytes());
        assert!(store.exists("foo.txt").unwrap());
        assert!(store.get_file("bar.txt").unwrap().is_none());
    }

    #[test]
    fn test_replace_same_name() {
        let store = MetadataStore::open_temporary().unwrap();

        store.put_file(&FileRecord::new("a", 1, 1, 1)).unwrap();
        let second = FileRecord::new("a", 1, 1, 1);
        store.put_file(&second).unwrap();

        let files = store.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, second.id);
    }

    #[test]
    fn test_delete_file() {
        let store = MetadataStore::open_temporary().unwrap();
        store.put_file(&FileRecord::new("gone", 1, 1, 2)).unwrap();

        assert!(store.delete_file("gone").unwrap().is_some());
        assert!(!store.exists("gone").unwrap());
        assert!(store.delete_file("gone").unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = MetadataStore::open(dir.path()).unwrap();
            let file = FileRecord::new("durable", 2, 2, 3);
            store.put_file(&file).unwrap();
            store.flush().unwrap();
            file.id
        };

        let store = MetadataStore::open(dir.path()).unwrap();
        assert_eq!(store.get_file("durable").unwrap().unwrap().id, id);
    }

    #[test]
    fn test_roots_by_host() {
        let a = host(1);
        let b = host(2);
        let record = chunk(10, &[a, b, a]);

        let grouped = record.roots_by_host();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, a);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].1.len(), 1);
    }

    #[test]
    fn test_erasure_config() {
        let file = FileRecord::new("x", 2, 2, 3);
        let config = file.erasure_config().unwrap();
        assert_eq!(config.data_shards, 2);
        assert_eq!(config.parity_shards, 1);
    }
}
