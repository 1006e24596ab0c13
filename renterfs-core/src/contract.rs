//! Storage contract codec
//!
//! A contract is carried as a fixed 96-byte record:
//!
//! ```text
//! 0        32             64              96
//! | host key | contract id | renter seed   |
//! ```
//!
//! The record is the 96-byte slice starting at offset 12 of a 192-byte
//! on-disk contract file (`xxd -ps -s 12 -l 96 my.contract`). Parsing is
//! all-or-nothing: any invalid field rejects the whole record.

use crate::error::{RenterError, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the canonical contract record
pub const CONTRACT_SIZE: usize = 96;

/// Size of an on-disk contract file
pub const CONTRACT_FILE_SIZE: usize = 192;

/// Offset of the canonical record inside an on-disk contract file
pub const CONTRACT_FILE_HEADER: usize = 12;

/// Ed25519 public key identifying a storage host
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey([u8; 32]);

impl HostKey {
    /// Create a host key, validating that it is a usable ed25519 point
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| {
            RenterError::InvalidContract(format!("host key is not a valid ed25519 point: {}", e))
        })?;
        if key.is_weak() {
            return Err(RenterError::InvalidContract(
                "host key is a small-order point".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    /// Create a host key from a verifying key
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Decompress into an ed25519 verifying key
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        Ok(VerifyingKey::from_bytes(&self.0)?)
    }

    /// Hex encoding of the key
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| RenterError::InvalidContract(format!("invalid host key hex: {}", e)))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            RenterError::InvalidContract(format!(
                "invalid host key length: expected 32, got {}",
                bytes.len()
            ))
        })?;
        Self::from_bytes(arr)
    }
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519:{}", self.to_hex())
    }
}

/// Identifier of a storage contract
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId([u8; 32]);

impl ContractId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A storage contract with one host
///
/// Holds the host's identity, the contract id and the renter's signing key.
/// Terms (remaining capacity, expiry) are reported by the host when a
/// session is opened.
#[derive(Clone)]
pub struct Contract {
    host_key: HostKey,
    id: ContractId,
    renter_key: SigningKey,
}

impl Contract {
    /// Parse the canonical 96-byte record
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CONTRACT_SIZE {
            return Err(RenterError::InvalidContractLength {
                expected: CONTRACT_SIZE,
                actual: bytes.len(),
            });
        }

        let mut host = [0u8; 32];
        let mut id = [0u8; 32];
        let mut seed = [0u8; 32];
        host.copy_from_slice(&bytes[0..32]);
        id.copy_from_slice(&bytes[32..64]);
        seed.copy_from_slice(&bytes[64..96]);

        let host_key = HostKey::from_bytes(host)?;
        if id == [0u8; 32] {
            return Err(RenterError::InvalidContract(
                "contract id is all zeros".to_string(),
            ));
        }
        if seed == [0u8; 32] {
            return Err(RenterError::InvalidContract(
                "renter key seed is all zeros".to_string(),
            ));
        }

        Ok(Self {
            host_key,
            id: ContractId(id),
            renter_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Parse the hex encoding of the canonical record
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| RenterError::InvalidContract(format!("invalid hex: {}", e)))?;
        Self::parse(&bytes)
    }

    /// Extract and parse the record from a full on-disk contract file
    pub fn from_contract_file(file: &[u8]) -> Result<Self> {
        if file.len() != CONTRACT_FILE_SIZE {
            return Err(RenterError::InvalidContractLength {
                expected: CONTRACT_FILE_SIZE,
                actual: file.len(),
            });
        }
        Self::parse(&file[CONTRACT_FILE_HEADER..CONTRACT_FILE_HEADER + CONTRACT_SIZE])
    }

    /// Canonical 96-byte encoding
    pub fn to_bytes(&self) -> [u8; CONTRACT_SIZE] {
        let mut out = [0u8; CONTRACT_SIZE];
        out[0..32].copy_from_slice(self.host_key.as_bytes());
        out[32..64].copy_from_slice(self.id.as_bytes());
        out[64..96].copy_from_slice(&self.renter_key.to_bytes());
        out
    }

    pub fn host_key(&self) -> HostKey {
        self.host_key
    }

    pub fn id(&self) -> ContractId {
        self.id
    }

    /// Signing key used to authenticate sessions under this contract
    pub fn renter_key(&self) -> &SigningKey {
        &self.renter_key
    }

    pub fn renter_public_key(&self) -> VerifyingKey {
        self.renter_key.verifying_key()
    }
}

impl PartialEq for Contract {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Contract {}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("host_key", &self.host_key)
            .field("id", &self.id)
            .field("renter_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid_host_key() -> [u8; 32] {
        SigningKey::from_bytes(&[7u8; 32]).verifying_key().to_bytes()
    }

    fn record(host: [u8; 32], id: [u8; 32], seed: [u8; 32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(CONTRACT_SIZE);
        out.extend_from_slice(&host);
        out.extend_from_slice(&id);
        out.extend_from_slice(&seed);
        out
    }

    /// Repeated-byte keys that do not decompress to a curve point
    fn invalid_host_keys() -> Vec<[u8; 32]> {
        (0u8..=255)
            .map(|b| [b; 32])
            .filter(|k| VerifyingKey::from_bytes(k).is_err())
            .collect()
    }

    #[test]
    fn test_parse_fields() {
        let bytes = record(valid_host_key(), [2u8; 32], [3u8; 32]);
        let contract = Contract::parse(&bytes).unwrap();

        assert_eq!(contract.host_key().as_bytes(), &valid_host_key());
        assert_eq!(contract.id().as_bytes(), &[2u8; 32]);
        assert_eq!(contract.renter_key().to_bytes(), [3u8; 32]);
        assert_eq!(
            contract.renter_public_key(),
            SigningKey::from_bytes(&[3u8; 32]).verifying_key()
        );
        assert_eq!(contract.to_bytes().as_slice(), bytes.as_slice());
    }

    #[test]
    fn test_wrong_length_rejected() {
        for len in [0, 95, 97, 192] {
            let result = Contract::parse(&vec![1u8; len]);
            assert!(matches!(
                result,
                Err(RenterError::InvalidContractLength { expected: 96, actual }) if actual == len
            ));
        }
    }

    #[test]
    fn test_invalid_host_key_rejected() {
        let invalid = invalid_host_keys();
        assert!(!invalid.is_empty());
        for key in invalid {
            let bytes = record(key, [2u8; 32], [3u8; 32]);
            assert!(matches!(
                Contract::parse(&bytes),
                Err(RenterError::InvalidContract(_))
            ));
        }
    }

    #[test]
    fn test_small_order_host_key_rejected() {
        // Compressed identity point
        let mut identity = [0u8; 32];
        identity[0] = 1;
        let bytes = record(identity, [2u8; 32], [3u8; 32]);
        assert!(Contract::parse(&bytes).is_err());
    }

    #[test]
    fn test_zero_id_and_seed_rejected() {
        let zero_id = record(valid_host_key(), [0u8; 32], [3u8; 32]);
        assert!(Contract::parse(&zero_id).is_err());

        let zero_seed = record(valid_host_key(), [2u8; 32], [0u8; 32]);
        assert!(Contract::parse(&zero_seed).is_err());
    }

    #[test]
    fn test_contract_file_extraction() {
        let mut file = vec![0xAAu8; CONTRACT_FILE_SIZE];
        let canonical = record(valid_host_key(), [4u8; 32], [5u8; 32]);
        file[CONTRACT_FILE_HEADER..CONTRACT_FILE_HEADER + CONTRACT_SIZE]
            .copy_from_slice(&canonical);

        let contract = Contract::from_contract_file(&file).unwrap();
        assert_eq!(contract.to_bytes().as_slice(), canonical.as_slice());

        // Truncated files are rejected outright
        assert!(Contract::from_contract_file(&file[..150]).is_err());
    }

    #[test]
    fn test_from_hex() {
        let canonical = record(valid_host_key(), [4u8; 32], [5u8; 32]);
        let encoded = hex::encode(&canonical);

        let contract = Contract::from_hex(&format!("{}\n", encoded)).unwrap();
        assert_eq!(contract.to_bytes().as_slice(), canonical.as_slice());

        assert!(Contract::from_hex("zz").is_err());
        assert!(Contract::from_hex(&encoded[..190]).is_err());
    }

    #[test]
    fn test_debug_redacts_renter_key() {
        let contract = Contract::parse(&record(valid_host_key(), [2u8; 32], [3u8; 32])).unwrap();
        let debug = format!("{:?}", contract);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&hex::encode([3u8; 32])));
    }

    #[test]
    fn test_host_key_hex_roundtrip() {
        let key = HostKey::from_bytes(valid_host_key()).unwrap();
        assert_eq!(HostKey::from_hex(&key.to_hex()).unwrap(), key);
        assert!(key.to_string().starts_with("ed25519:"));
    }

    proptest! {
        #[test]
        fn prop_valid_records_parse_exactly(
            seed in any::<[u8; 32]>(),
            host_seed in any::<[u8; 32]>(),
            id in any::<[u8; 32]>(),
        ) {
            prop_assume!(seed != [0u8; 32] && id != [0u8; 32]);
            let host = SigningKey::from_bytes(&host_seed).verifying_key().to_bytes();
            let bytes = record(host, id, seed);

            let contract = Contract::parse(&bytes).unwrap();
            let host_key = contract.host_key();
            let contract_id = contract.id();
            prop_assert_eq!(host_key.as_bytes(), &host);
            prop_assert_eq!(contract_id.as_bytes(), &id);
            prop_assert_eq!(contract.renter_key().to_bytes(), seed);
            prop_assert_eq!(contract.to_bytes().to_vec(), bytes);
        }

        #[test]
        fn prop_parse_agrees_with_field_rules(bytes in proptest::collection::vec(any::<u8>(), 96)) {
            let mut host = [0u8; 32];
            host.copy_from_slice(&bytes[..32]);
            let host_ok = VerifyingKey::from_bytes(&host).map(|k| !k.is_weak()).unwrap_or(false);
            let id_ok = bytes[32..64].iter().any(|b| *b != 0);
            let seed_ok = bytes[64..].iter().any(|b| *b != 0);

            prop_assert_eq!(Contract::parse(&bytes).is_ok(), host_ok && id_ok && seed_ok);
        }

        #[test]
        fn prop_wrong_length_never_parses(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
            prop_assume!(bytes.len() != CONTRACT_SIZE);
            prop_assert!(Contract::parse(&bytes).is_err());
        }
    }
}
