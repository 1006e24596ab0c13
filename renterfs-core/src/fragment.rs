//! Fragment roots
//!
//! A fragment is one erasure-coded shard of a chunk as stored on a host.
//! Fragments are addressed by the Blake3 hash of their bytes; hosts return
//! the root they computed on upload and the renter checks it on download.

use crate::error::{RenterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fragments at least this large are hashed across the rayon pool
const PARALLEL_HASH_THRESHOLD: usize = 128 * 1024;

/// Content-addressed fragment identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentRoot([u8; 32]);

impl FragmentRoot {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the root of fragment data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = if data.len() >= PARALLEL_HASH_THRESHOLD {
            let mut hasher = blake3::Hasher::new();
            hasher.update_rayon(data);
            hasher.finalize()
        } else {
            blake3::hash(data)
        };
        Self(*hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check that `data` hashes to this root
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::from_data(data);
        if actual != *self {
            return Err(RenterError::RootMismatch {
                expected: self.to_base58(),
                actual: actual.to_base58(),
            });
        }
        Ok(())
    }

    /// Convert to base58 string (for logs and display)
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Parse from base58 string
    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| RenterError::InvalidRoot(e.to_string()))?;

        if bytes.len() != 32 {
            return Err(RenterError::InvalidRoot(format!(
                "Invalid length: expected 32, got {}",
                bytes.len()
            )));
        }

        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for FragmentRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_base58();
        write!(f, "FragmentRoot({})", &encoded[..encoded.len().min(8)])
    }
}

impl fmt::Display for FragmentRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_base58_roundtrip() {
        let root = FragmentRoot::from_data(b"hello world");
        let recovered = FragmentRoot::from_base58(&root.to_base58()).unwrap();
        assert_eq!(root, recovered);
    }

    #[test]
    fn test_root_verification() {
        let root = FragmentRoot::from_data(b"fragment");
        assert!(root.verify(b"fragment").is_ok());
        assert!(matches!(
            root.verify(b"tampered"),
            Err(RenterError::RootMismatch { .. })
        ));
    }

    #[test]
    fn test_large_fragment_root_matches_blake3() {
        let data = vec![7u8; PARALLEL_HASH_THRESHOLD * 4];
        let root = FragmentRoot::from_data(&data);
        assert_eq!(root.as_bytes(), blake3::hash(&data).as_bytes());
    }

    #[test]
    fn test_invalid_base58() {
        assert!(FragmentRoot::from_base58("0OIl").is_err());
        assert!(FragmentRoot::from_base58("abc").is_err());
    }
}
