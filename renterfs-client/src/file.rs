//! File handles
//!
//! A [`FileWriter`] appends to a file that is not yet committed. Every
//! `write` stores its chunks before returning; the file record only becomes
//! visible to readers when the writer is closed. A [`FileReader`] reads a
//! committed file from any offset.

use crate::fs::FsInner;
use bytes::Bytes;
use renterfs_core::erasure::ErasureEncoder;
use renterfs_core::error::{RenterError, Result};
use renterfs_storage::metadata::{FileRecord, ShardPlacement};
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Append-only handle on a file being created
pub struct FileWriter {
    fs: Arc<FsInner>,
    record: FileRecord,
    encoder: ErasureEncoder,
    committed: bool,
    /// A `write` returned an error
    failed: bool,
}

impl FileWriter {
    pub(crate) fn new(fs: Arc<FsInner>, record: FileRecord, encoder: ErasureEncoder) -> Self {
        Self {
            fs,
            record,
            encoder,
            committed: false,
            failed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Bytes durably stored so far
    pub fn len(&self) -> u64 {
        self.record.size
    }

    pub fn is_empty(&self) -> bool {
        self.record.size == 0
    }

    pub fn min_hosts(&self) -> usize {
        self.record.min_hosts
    }

    /// Store `data` as one or more chunks
    ///
    /// Fails at the first chunk that does not reach `min_hosts` hosts.
    /// Chunks of this call stored before the failure stay part of the file
    /// and are committed by [`FileWriter::close`].
    #[instrument(skip(self, data), fields(file = %self.record.name, len = data.len()))]
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.fs.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }

        for piece in data.chunks(self.fs.config.chunk_size) {
            let index = self.record.chunks.len();
            let stored = self
                .fs
                .store_chunk(&self.record, &self.encoder, index, piece)
                .await;
            match stored {
                Ok(chunk) => self.record.push_chunk(chunk),
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }

        debug!(size = self.record.size, "Write stored");
        Ok(data.len())
    }

    /// Commit the file record
    ///
    /// A file whose writes all failed before any chunk was stored is not
    /// committed: the name is released and `NotCommitted` returned.
    #[instrument(skip(self), fields(file = %self.record.name))]
    pub async fn close(mut self) -> Result<()> {
        self.fs.ensure_open()?;
        if self.failed && self.record.chunks.is_empty() {
            warn!("No chunk stored before the write failed, file not committed");
            return Err(RenterError::NotCommitted(self.record.name.clone()));
        }
        self.record.touch();
        self.fs.meta.put_file(&self.record)?;
        self.fs.meta.flush()?;
        self.committed = true;

        info!(
            size = self.record.size,
            chunks = self.record.chunks.len(),
            "File committed"
        );
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        self.fs.release_name(&self.record.name);
        if self.committed || self.record.chunks.is_empty() {
            return;
        }

        let placements: Vec<ShardPlacement> = self
            .record
            .chunks
            .iter()
            .flat_map(|c| c.placements.iter().cloned())
            .collect();
        warn!(
            file = %self.record.name,
            fragments = placements.len(),
            "Writer dropped without close, discarding fragments"
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let fs = self.fs.clone();
            handle.spawn(async move { fs.discard(&placements).await });
        }
    }
}

/// Read handle on a committed file
pub struct FileReader {
    fs: Arc<FsInner>,
    record: FileRecord,
    encoder: ErasureEncoder,
    /// Plaintext offset at which each chunk starts
    offsets: Vec<u64>,
    position: u64,
    cached: Option<(usize, Bytes)>,
}

impl FileReader {
    pub(crate) fn new(fs: Arc<FsInner>, record: FileRecord, encoder: ErasureEncoder) -> Self {
        let mut offsets = Vec::with_capacity(record.chunks.len());
        let mut at = 0u64;
        for chunk in &record.chunks {
            offsets.push(at);
            at += chunk.plain_len;
        }
        Self {
            fs,
            record,
            encoder,
            offsets,
            position: 0,
            cached: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn len(&self) -> u64 {
        self.record.size
    }

    pub fn is_empty(&self) -> bool {
        self.record.size == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn chunk_at(&self, pos: u64) -> usize {
        self.offsets.partition_point(|&start| start <= pos).saturating_sub(1)
    }

    async fn load_chunk(&mut self, index: usize) -> Result<Bytes> {
        if let Some((cached, data)) = &self.cached {
            if *cached == index {
                return Ok(data.clone());
            }
        }
        let data = self
            .fs
            .fetch_chunk(&self.record, &self.encoder, index)
            .await?;
        self.cached = Some((index, data.clone()));
        Ok(data)
    }

    /// Fill `buf` from the current position; returns 0 at end of file
    #[instrument(skip(self, buf), fields(file = %self.record.name, pos = self.position))]
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.fs.ensure_open()?;
        let mut filled = 0;

        while filled < buf.len() && self.position < self.record.size {
            let index = self.chunk_at(self.position);
            let data = self.load_chunk(index).await?;
            let within = (self.position - self.offsets[index]) as usize;
            let available = data.len().saturating_sub(within);
            if available == 0 {
                return Err(RenterError::Internal(format!(
                    "chunk {} ends before offset {}",
                    index, self.position
                )));
            }

            let n = available.min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&data[within..within + n]);
            filled += n;
            self.position += n as u64;
        }
        Ok(filled)
    }

    /// Read from the current position to the end of the file
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = self.record.size.saturating_sub(self.position) as usize;
        let mut out = vec![0u8; remaining];
        let mut filled = 0;
        while filled < out.len() {
            let n = self.read(&mut out[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Move the read position; positions past the end read as EOF
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.record.size.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            RenterError::InvalidSeek(format!("{:?} from position {}", pos, self.position))
        })?;
        self.position = target;
        Ok(target)
    }

    pub fn close(self) {
        debug!(file = %self.record.name, "Reader closed");
    }
}
