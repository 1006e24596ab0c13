//! Reed-Solomon coding of file chunks
//!
//! Each sealed chunk is coded into `data_shards + parity_shards`
//! fragments, one per host. Any `data_shards` fragments reconstruct the
//! chunk. A layout without parity degrades to plain striping, which is what
//! a file spread over exactly `min_hosts` hosts uses.

use crate::error::{RenterError, Result};
use crate::MAX_TOTAL_SHARDS;
use bytes::Bytes;
use rayon::prelude::*;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

/// Fragment layout of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Fragments needed to rebuild a chunk (k)
    pub data_shards: usize,
    /// Redundant fragments (m)
    pub parity_shards: usize,
}

impl ErasureConfig {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        let total = data_shards + parity_shards;
        if data_shards == 0 {
            return Err(RenterError::Configuration(
                "a chunk needs at least one data shard".to_string(),
            ));
        }
        if total > MAX_TOTAL_SHARDS {
            return Err(RenterError::Configuration(format!(
                "{} shards requested, the field supports {}",
                total, MAX_TOTAL_SHARDS
            )));
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Fragment length for a chunk of `data_size` bytes
    pub fn shard_size(&self, data_size: usize) -> usize {
        data_size.div_ceil(self.data_shards).max(1)
    }
}

/// One fragment of a coded chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardData {
    /// Position in the layout; data shards come first
    pub index: u8,
    pub data: Bytes,
    pub is_parity: bool,
}

impl ShardData {
    pub fn new(index: u8, data: Bytes, is_parity: bool) -> Self {
        Self {
            index,
            data,
            is_parity,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

pub struct ErasureEncoder {
    config: ErasureConfig,
    /// `None` when there is no parity to compute
    codec: Option<ReedSolomon>,
}

impl ErasureEncoder {
    pub fn with_config(config: ErasureConfig) -> Result<Self> {
        let codec = match config.parity_shards {
            0 => None,
            parity => Some(ReedSolomon::new(config.data_shards, parity)?),
        };
        Ok(Self { config, codec })
    }

    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    /// Cut `data` into zero-padded data shards followed by blank parity
    fn split(&self, data: &[u8], parallel: bool) -> Vec<Vec<u8>> {
        let size = self.config.shard_size(data.len());
        let total = self.config.total_shards();

        let cut = |i: usize| -> Vec<u8> {
            let mut shard = vec![0u8; size];
            if i < self.config.data_shards {
                let start = (i * size).min(data.len());
                let end = (start + size).min(data.len());
                shard[..end - start].copy_from_slice(&data[start..end]);
            }
            shard
        };

        if parallel {
            (0..total).into_par_iter().map(cut).collect()
        } else {
            (0..total).map(cut).collect()
        }
    }

    fn finish(&self, mut shards: Vec<Vec<u8>>) -> Result<Vec<ShardData>> {
        if let Some(codec) = &self.codec {
            codec.encode(&mut shards)?;
        }
        let data_shards = self.config.data_shards;
        Ok(shards
            .into_iter()
            .enumerate()
            .map(|(i, shard)| ShardData::new(i as u8, Bytes::from(shard), i >= data_shards))
            .collect())
    }

    /// Code `data` into `total_shards` fragments
    pub fn encode(&self, data: &[u8]) -> Result<Vec<ShardData>> {
        self.finish(self.split(data, false))
    }

    /// Like [`encode`](Self::encode), splitting across the rayon pool
    pub fn encode_parallel(&self, data: &[u8]) -> Result<Vec<ShardData>> {
        self.finish(self.split(data, true))
    }

    /// Rebuild the first `original_size` bytes from the fragments present
    ///
    /// `shards` has one slot per fragment; missing ones are `None`.
    pub fn decode(&self, shards: &[Option<ShardData>], original_size: usize) -> Result<Bytes> {
        let total = self.config.total_shards();
        let needed = self.config.data_shards;
        if shards.len() != total {
            return Err(RenterError::ShardSizeMismatch {
                expected: total,
                actual: shards.len(),
            });
        }

        let mut slots: Vec<Option<Vec<u8>>> = shards
            .iter()
            .map(|slot| slot.as_ref().map(|s| s.data.to_vec()))
            .collect();
        let present = slots.iter().flatten().count();
        if present < needed {
            return Err(RenterError::InsufficientShards {
                available: present,
                required: needed,
            });
        }

        let missing_data = slots[..needed].iter().any(Option::is_none);
        if missing_data {
            match &self.codec {
                Some(codec) => codec.reconstruct_data(&mut slots)?,
                None => {
                    return Err(RenterError::InsufficientShards {
                        available: present,
                        required: total,
                    })
                }
            }
        }

        let mut out = Vec::with_capacity(original_size);
        for slot in &slots[..needed] {
            let shard = slot.as_deref().ok_or_else(|| {
                RenterError::ErasureCoding("data shard missing after reconstruction".to_string())
            })?;
            out.extend_from_slice(shard);
        }
        if out.len() < original_size {
            return Err(RenterError::ShardSizeMismatch {
                expected: original_size,
                actual: out.len(),
            });
        }
        out.truncate(original_size);
        Ok(Bytes::from(out))
    }
}
