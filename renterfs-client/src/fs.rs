//! Redundant file store
//!
//! Named files whose contents are split into chunks, encrypted with a
//! per-file key, erasure coded and spread over the hosts of a [`HostSet`].
//! File records live in a sled database under the store's root directory.

use crate::config::{ClientConfig, StoreConfig};
use crate::file::{FileReader, FileWriter};
use crate::hostset::HostSet;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use renterfs_core::contract::{Contract, HostKey};
use renterfs_core::crypto::{decrypt_from_bytes, encrypt_to_bytes};
use renterfs_core::erasure::{ErasureEncoder, ShardData};
use renterfs_core::error::{RenterError, Result};
use renterfs_core::fragment::FragmentRoot;
use renterfs_core::{MAX_TOTAL_SHARDS, PARALLEL_ENCODE_THRESHOLD};
use renterfs_storage::metadata::{ChunkRecord, FileRecord, MetadataStore, ShardPlacement};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Options for a new file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOptions {
    /// Distinct hosts that must acknowledge every chunk
    pub min_hosts: usize,
    /// Fragments needed to rebuild a chunk; defaults to `min_hosts`
    pub data_shards: Option<usize>,
}

impl FileOptions {
    pub fn new(min_hosts: usize) -> Self {
        Self {
            min_hosts,
            data_shards: None,
        }
    }

    pub fn with_data_shards(mut self, data_shards: usize) -> Self {
        self.data_shards = Some(data_shards);
        self
    }
}

pub(crate) struct FsInner {
    pub(crate) hosts: Arc<HostSet>,
    pub(crate) meta: MetadataStore,
    pub(crate) config: StoreConfig,
    root: PathBuf,
    /// Names with an open writer
    writing: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl FsInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RenterError::HandleClosed);
        }
        Ok(())
    }

    pub(crate) fn release_name(&self, name: &str) {
        self.writing.lock().remove(name);
    }

    /// Encrypt, encode and place one chunk
    ///
    /// Succeeds once `min_hosts` distinct hosts hold a fragment. Uploads
    /// still running at that point get `straggler_grace` to finish. When
    /// success becomes impossible the outstanding uploads are awaited, every
    /// fragment stored for the chunk is deleted and the chunk fails.
    #[instrument(skip(self, record, encoder, plaintext), fields(file = %record.name, size = plaintext.len()))]
    pub(crate) async fn store_chunk(
        &self,
        record: &FileRecord,
        encoder: &ErasureEncoder,
        chunk_index: usize,
        plaintext: &[u8],
    ) -> Result<ChunkRecord> {
        let required = record.min_hosts;
        let encrypted = encrypt_to_bytes(plaintext, &record.key)?;
        let shards = if encrypted.len() >= PARALLEL_ENCODE_THRESHOLD {
            encoder.encode_parallel(&encrypted)?
        } else {
            encoder.encode(&encrypted)?
        };
        let shard_size = shards.first().map(|s| s.size()).unwrap_or(0) as u64;

        let candidates = self.hosts.usable_hosts();
        if candidates.len() < required {
            return Err(RenterError::NotEnoughHosts {
                available: candidates.len(),
                required,
            });
        }
        let primary = candidates.len().min(shards.len());
        let mut spares: VecDeque<HostKey> = candidates[primary..].iter().copied().collect();

        let mut in_flight = FuturesUnordered::new();
        for (shard, host) in shards.iter().zip(candidates[..primary].iter()) {
            in_flight.push(upload_one(&self.hosts, shard.index, *host, shard.data.clone()));
        }

        let mut acks: Vec<ShardPlacement> = Vec::with_capacity(shards.len());
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            if in_flight.is_empty() {
                break;
            }
            if acks.len() + in_flight.len() < required {
                // Let the rest land so the rollback can find them
                while let Some((index, host, result)) = in_flight.next().await {
                    if let Ok(root) = result {
                        acks.push(ShardPlacement { index, host, root });
                    }
                }
                break;
            }
            if acks.len() >= required && deadline.is_none() {
                deadline = Some(tokio::time::Instant::now() + self.hosts.config().straggler_grace());
            }

            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, in_flight.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(pending = in_flight.len(), "Abandoning straggling uploads");
                        break;
                    }
                },
                None => in_flight.next().await,
            };
            let Some((index, host, result)) = next else {
                break;
            };

            match result {
                Ok(root) => acks.push(ShardPlacement { index, host, root }),
                Err(e) => {
                    warn!(host = %host, shard = index, error = %e, "Fragment upload failed");
                    if let Some(spare) = spares.pop_front() {
                        if let Some(shard) = shards.get(index as usize) {
                            debug!(host = %spare, shard = index, "Retrying fragment on spare host");
                            in_flight.push(upload_one(&self.hosts, index, spare, shard.data.clone()));
                        }
                    }
                }
            }
        }
        drop(in_flight);

        if acks.len() < required {
            warn!(
                chunk = chunk_index,
                achieved = acks.len(),
                required,
                "Chunk redundancy not met, discarding fragments"
            );
            self.discard(&acks).await;
            return Err(RenterError::RedundancyShortfall {
                chunk: chunk_index,
                achieved: acks.len(),
                required,
            });
        }

        acks.sort_by_key(|p| p.index);
        debug!(chunk = chunk_index, fragments = acks.len(), "Chunk stored");
        Ok(ChunkRecord {
            plain_len: plaintext.len() as u64,
            encoded_len: encrypted.len() as u64,
            shard_size,
            placements: acks,
        })
    }

    /// Best-effort removal of fragments that will never be referenced
    pub(crate) async fn discard(&self, placements: &[ShardPlacement]) {
        let chunk = ChunkRecord {
            plain_len: 0,
            encoded_len: 0,
            shard_size: 0,
            placements: placements.to_vec(),
        };
        let deletions = chunk
            .roots_by_host()
            .into_iter()
            .map(|(host, roots)| async move {
                if let Err(e) = self.hosts.delete_fragments(host, roots).await {
                    debug!(host = %host, error = %e, "Orphaned fragments left on host");
                }
            });
        futures::future::join_all(deletions).await;
    }

    /// Fetch and verify enough fragments to rebuild one chunk
    #[instrument(skip(self, record, encoder), fields(file = %record.name))]
    pub(crate) async fn fetch_chunk(
        &self,
        record: &FileRecord,
        encoder: &ErasureEncoder,
        chunk_index: usize,
    ) -> Result<Bytes> {
        let chunk = record.chunks.get(chunk_index).ok_or_else(|| {
            RenterError::Internal(format!("chunk {} out of range", chunk_index))
        })?;
        let needed = record.data_shards;

        // Healthy hosts first, the rest as fallbacks
        let usable = self.hosts.usable_hosts();
        let mut order: Vec<&ShardPlacement> = chunk.placements.iter().collect();
        order.sort_by_key(|p| usable.iter().position(|h| *h == p.host).unwrap_or(usize::MAX));
        let mut untried: VecDeque<&ShardPlacement> = order.into_iter().collect();

        let mut slots: Vec<Option<ShardData>> = vec![None; record.total_shards];
        let mut have = 0usize;
        let mut in_flight = FuturesUnordered::new();
        while in_flight.len() < needed {
            match untried.pop_front() {
                Some(p) => in_flight.push(download_one(&self.hosts, p.index, p.host, p.root)),
                None => break,
            }
        }

        while have < needed {
            if have + in_flight.len() + untried.len() < needed {
                break;
            }
            let Some((index, host, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(data) => {
                    let slot = slots.get_mut(index as usize).ok_or_else(|| {
                        RenterError::Internal(format!("shard index {} out of range", index))
                    })?;
                    if slot.is_none() {
                        *slot = Some(ShardData::new(
                            index,
                            data,
                            index as usize >= record.data_shards,
                        ));
                        have += 1;
                    }
                }
                Err(e) => {
                    warn!(host = %host, shard = index, error = %e, "Fragment download failed");
                    if let Some(p) = untried.pop_front() {
                        in_flight.push(download_one(&self.hosts, p.index, p.host, p.root));
                    }
                }
            }
        }
        drop(in_flight);

        if have < needed {
            return Err(RenterError::InsufficientShards {
                available: have,
                required: needed,
            });
        }

        let encrypted = encoder.decode(&slots, chunk.encoded_len as usize)?;
        let plaintext = decrypt_from_bytes(&encrypted, &record.key)?;
        if plaintext.len() as u64 != chunk.plain_len {
            return Err(RenterError::Internal(format!(
                "chunk {} decoded to {} bytes, expected {}",
                chunk_index,
                plaintext.len(),
                chunk.plain_len
            )));
        }
        Ok(Bytes::from(plaintext))
    }
}

async fn upload_one(
    hosts: &HostSet,
    index: u8,
    host: HostKey,
    data: Bytes,
) -> (u8, HostKey, Result<FragmentRoot>) {
    (index, host, hosts.upload_fragment(host, data).await)
}

async fn download_one(
    hosts: &HostSet,
    index: u8,
    host: HostKey,
    root: FragmentRoot,
) -> (u8, HostKey, Result<Bytes>) {
    let result = match hosts.download_fragment(host, root, 0, 0).await {
        Ok(data) => match root.verify(&data) {
            Ok(()) => Ok(data),
            Err(e) => {
                hosts.record_failure(host);
                Err(e)
            }
        },
        Err(e) => Err(e),
    };
    (index, host, result)
}

/// A file store over a host set
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<FsInner>,
}

impl FileSystem {
    /// Open (or create) the store rooted at `root`
    ///
    /// The store keeps a reference to `hosts` but never closes it.
    #[instrument(skip(hosts, config), fields(root = ?root.as_ref()))]
    pub fn open(root: impl AsRef<Path>, hosts: Arc<HostSet>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            RenterError::Storage(format!("Cannot create metadata root {:?}: {}", root, e))
        })?;
        let meta = MetadataStore::open(&root)?;

        info!("File store opened");
        Ok(Self {
            inner: Arc::new(FsInner {
                hosts,
                meta,
                config,
                root,
                writing: Mutex::new(HashSet::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Connect to a shard, add every contract and open the store at `root`
    ///
    /// Contracts the host set rejects are skipped with a warning. The host
    /// set is reachable through [`FileSystem::host_set`] and stays open
    /// after the store is closed.
    #[instrument(skip(contracts, config), fields(root = ?root.as_ref()))]
    pub async fn connect(
        root: impl AsRef<Path>,
        shard_addr: &str,
        contracts: impl IntoIterator<Item = Contract>,
        config: ClientConfig,
    ) -> Result<Self> {
        let hosts = Arc::new(HostSet::open(shard_addr, config.host_set).await?);
        for contract in contracts {
            let host = contract.host_key();
            if let Err(e) = hosts.add_contract(contract).await {
                warn!(host = %host, error = %e, "Skipping contract");
            }
        }
        Self::open(root, hosts, config.store)
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn host_set(&self) -> &Arc<HostSet> {
        &self.inner.hosts
    }

    /// Create a file that every chunk of which must reach `min_hosts` hosts
    pub async fn create(&self, name: &str, min_hosts: usize) -> Result<FileWriter> {
        self.create_with(name, FileOptions::new(min_hosts)).await
    }

    #[instrument(skip(self), fields(name = %name))]
    pub async fn create_with(&self, name: &str, options: FileOptions) -> Result<FileWriter> {
        self.inner.ensure_open()?;
        if name.is_empty() || name.contains('\0') {
            return Err(RenterError::InvalidFileName(name.to_string()));
        }

        let min_hosts = options.min_hosts;
        if min_hosts == 0 {
            return Err(RenterError::Configuration(
                "min_hosts must be at least 1".to_string(),
            ));
        }
        let data_shards = options.data_shards.unwrap_or(min_hosts);
        if data_shards == 0 || data_shards > min_hosts {
            return Err(RenterError::Configuration(format!(
                "data_shards must be between 1 and min_hosts ({}), got {}",
                min_hosts, data_shards
            )));
        }

        let usable = self.inner.hosts.usable_hosts().len();
        if usable < min_hosts {
            return Err(RenterError::NotEnoughHosts {
                available: usable,
                required: min_hosts,
            });
        }
        let total_shards = usable.min(MAX_TOTAL_SHARDS);

        {
            let mut writing = self.inner.writing.lock();
            if writing.contains(name) || self.inner.meta.exists(name)? {
                return Err(RenterError::FileExists(name.to_string()));
            }
            writing.insert(name.to_string());
        }

        let record = FileRecord::new(name, min_hosts, data_shards, total_shards);
        let encoder = match record
            .erasure_config()
            .and_then(ErasureEncoder::with_config)
        {
            Ok(encoder) => encoder,
            Err(e) => {
                self.inner.release_name(name);
                return Err(e);
            }
        };

        info!(min_hosts, data_shards, total_shards, "File created");
        Ok(FileWriter::new(self.inner.clone(), record, encoder))
    }

    /// Open an existing file for reading
    #[instrument(skip(self), fields(name = %name))]
    pub async fn open_file(&self, name: &str) -> Result<FileReader> {
        self.inner.ensure_open()?;
        let record = self
            .inner
            .meta
            .get_file(name)?
            .ok_or_else(|| RenterError::FileNotFound(name.to_string()))?;
        let encoder = ErasureEncoder::with_config(record.erasure_config()?)?;

        debug!(size = record.size, chunks = record.chunks.len(), "File opened");
        Ok(FileReader::new(self.inner.clone(), record, encoder))
    }

    /// Create `name` holding `data` and commit it
    ///
    /// Nothing is committed unless every chunk reaches `min_hosts` hosts.
    pub async fn upload(&self, name: &str, data: &[u8], min_hosts: usize) -> Result<()> {
        let mut writer = self.create(name, min_hosts).await?;
        writer.write(data).await?;
        writer.close().await
    }

    /// Read the whole of a committed file
    pub async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let mut reader = self.open_file(name).await?;
        let data = reader.read_to_end().await?;
        reader.close();
        Ok(data)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.inner.meta.exists(name)
    }

    /// Names of all committed files
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .inner
            .meta
            .list_files()?
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Flush metadata and close the store; the host set stays open
    pub fn close(self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.meta.flush()?;
        info!(root = ?self.inner.root, "File store closed");
        Ok(())
    }
}
