//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - SHA-256 hashing for block inputs
//! - Human-readable ledger tokens and block nonces
//! - AES-256-GCM encryption for sensitive payload fields

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Datelike, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;

/// Marker prepended to every ciphertext produced by [`FieldCipher`]
pub const CIPHERTEXT_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TOKEN_RANDOM_LEN: usize = 8;

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(hash_bytes(data))
}

/// Generate a ledger token: `{PREFIX}-{year}-{8 random alphanumerics}`
///
/// Not unique on its own; the store rejects duplicates and the caller retries.
pub fn generate_token(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..TOKEN_RANDOM_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();

    format!(
        "{}-{}-{}",
        prefix.to_ascii_uppercase(),
        Utc::now().year(),
        random
    )
}

/// Random salt for a new block
pub fn generate_nonce() -> u64 {
    rand::random()
}

/// AES-256-GCM cipher for sensitive identifying fields
///
/// Output format: `enc:v1:` + base64(`nonce || ciphertext || tag`).
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Create from a raw 32-byte key
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Create from a base64-encoded 32-byte key
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Config(format!("Field key is not valid base64: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config("Field key must be 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    /// Load the key from an environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        let encoded = std::env::var(var)
            .map_err(|_| Error::Config(format!("Field key variable {} is not set", var)))?;
        Self::from_base64_key(&encoded)
    }

    /// Random key (tests and local development)
    pub fn generate() -> Self {
        Self::new(&rand::random::<[u8; 32]>())
    }

    /// Encrypt a field value
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let encrypted = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Crypto("Encryption failed".to_string()))?;

        let mut data = Vec::with_capacity(NONCE_LEN + encrypted.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&encrypted);

        Ok(format!("{}{}", CIPHERTEXT_PREFIX, STANDARD.encode(data)))
    }

    /// Decrypt a value produced by [`FieldCipher::encrypt`]
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let encoded = ciphertext
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| Error::Crypto("Missing ciphertext marker".to_string()))?;

        let data = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("Ciphertext is not valid base64: {}", e)))?;

        if data.len() <= NONCE_LEN {
            return Err(Error::Crypto("Ciphertext too short".to_string()));
        }

        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        let decrypted = self
            .cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|_| Error::Crypto("Authentication failed".to_string()))?;

        String::from_utf8(decrypted)
            .map_err(|_| Error::Crypto("Plaintext is not UTF-8".to_string()))
    }

    /// Whether a value carries the ciphertext marker
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(CIPHERTEXT_PREFIX)
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").field("key", &"<redacted>").finish()
    }
}
