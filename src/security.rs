//! Export crypto for dailylog backups
//!
//! Password-based authenticated encryption for the portable backup document:
//! PBKDF2-HMAC-SHA256 (100,000 iterations, random 16-byte salt) derives a
//! 256-bit key, AES-256-GCM with a random 12-byte nonce encrypts and
//! authenticates. Pure and stateless; concurrent invocations share nothing.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: wrong password or corrupted data")]
    Decryption,
    #[error("invalid nonce length: {0} bytes")]
    InvalidNonce(usize),
}

/// Raw pieces of an encrypted backup payload. The ciphertext carries the
/// GCM authentication tag at its tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedParts {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Derive a symmetric key from a password and salt.
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt a serialized backup document with a user password.
///
/// Salt and nonce are freshly generated on every call, so encrypting the
/// same plaintext twice yields different ciphertext.
pub fn encrypt_backup(plaintext: &[u8], password: &str) -> Result<EncryptedParts, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut key = derive_key(password, &salt);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let result = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()));

    // Zeroize the derived key after use
    key.zeroize();

    Ok(EncryptedParts {
        salt: salt.to_vec(),
        nonce: nonce_bytes.to_vec(),
        ciphertext: result?,
    })
}

/// Decrypt an encrypted backup payload.
///
/// A wrong password or tampered ciphertext fails tag verification and
/// returns `CryptoError::Decryption`; no partial plaintext is ever produced.
pub fn decrypt_backup(parts: &EncryptedParts, password: &str) -> Result<Vec<u8>, CryptoError> {
    if parts.nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonce(parts.nonce.len()));
    }

    let mut key = derive_key(password, &parts.salt);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let result = cipher
        .decrypt(Nonce::from_slice(&parts.nonce), parts.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption);

    key.zeroize();

    result
}
