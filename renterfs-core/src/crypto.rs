//! Chunk encryption and handshake signatures
//!
//! File chunks are sealed with AES-256-GCM under a per-file key before they
//! are erasure coded, so hosts only ever see ciphertext fragments. Sessions
//! are authenticated by ed25519 signatures over a random challenge bound to
//! the contract id.

use crate::error::{RenterError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed chunk carries beyond its plaintext (nonce + tag)
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

pub const CHALLENGE_SIZE: usize = 32;

/// AES-256-GCM file key
///
/// Every file gets its own key, stored in the file's metadata record.
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

fn cipher(key: &EncryptionKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| RenterError::Encryption(e.to_string()))
}

/// Seal a chunk as `nonce || ciphertext || tag`
pub fn encrypt_to_bytes(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let mut sealed = vec![0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut sealed);

    let ciphertext = cipher(key)?
        .encrypt(Nonce::from_slice(&sealed), plaintext)
        .map_err(|e| RenterError::Encryption(e.to_string()))?;
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt data produced by [`encrypt_to_bytes`]
pub fn decrypt_from_bytes(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if data.len() < ENCRYPTION_OVERHEAD {
        return Err(RenterError::Decryption(format!(
            "sealed chunk is {} bytes, shorter than the {} byte envelope",
            data.len(),
            ENCRYPTION_OVERHEAD
        )));
    }

    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| RenterError::Decryption("chunk failed authentication".to_string()))
}

/// Generate a random handshake challenge
pub fn generate_challenge() -> [u8; CHALLENGE_SIZE] {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Build the message signed during the handshake.
///
/// The domain separates renter and host signatures so one can never be
/// replayed as the other.
fn challenge_message(domain: &[u8], contract_id: &[u8; 32], challenge: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain.len() + 32 + challenge.len());
    msg.extend_from_slice(domain);
    msg.extend_from_slice(contract_id);
    msg.extend_from_slice(challenge);
    msg
}

/// Sign a handshake challenge
pub fn sign_challenge(
    key: &SigningKey,
    domain: &[u8],
    contract_id: &[u8; 32],
    challenge: &[u8],
) -> [u8; 64] {
    key.sign(&challenge_message(domain, contract_id, challenge))
        .to_bytes()
}

/// Verify a handshake challenge signature
pub fn verify_challenge(
    key: &VerifyingKey,
    domain: &[u8],
    contract_id: &[u8; 32],
    challenge: &[u8],
    signature: &[u8; 64],
) -> Result<()> {
    let signature = Signature::from_bytes(signature);
    key.verify(&challenge_message(domain, contract_id, challenge), &signature)?;
    Ok(())
}
