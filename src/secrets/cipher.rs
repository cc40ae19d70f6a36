//! AES-256-GCM sealing for cached secrets and persisted backups.
//!
//! The 256-bit key is derived from configured master material with SHA-256
//! under a domain tag, so the same master value never doubles as the audit
//! HMAC key. Every seal draws a fresh 96-bit nonce; the sealed layout is
//! `nonce || ciphertext || tag`.

use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, instrument};
use zeroize::Zeroizing;

use super::error::{Result, SecretsError};
use super::types::SecretString;

/// Size of AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

const CACHE_KEY_DOMAIN: &[u8] = b"keyward:cache-key:v1";

/// Derives a 32-byte key from `material` under `domain`.
pub(crate) fn derive_key(domain: &[u8], material: &str) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update([0u8]);
    hasher.update(material.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Authenticated cipher keyed from the configured master secret.
///
/// Cheap to clone; the key is shared and read-only after construction.
#[derive(Clone)]
pub struct SecretCipher {
    key_bytes: Arc<Zeroizing<[u8; 32]>>,
    rng: Arc<SystemRandom>,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").field("key", &"[REDACTED]").finish()
    }
}

impl SecretCipher {
    /// Build a cipher from master key material.
    pub fn from_master(master: &SecretString) -> Result<Self> {
        if master.is_empty() {
            return Err(SecretsError::config_error("encryption key source cannot be empty"));
        }

        Ok(Self {
            key_bytes: Arc::new(derive_key(CACHE_KEY_DOMAIN, master.expose_secret())),
            rng: Arc::new(SystemRandom::new()),
        })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            SecretsError::encryption_failure("failed to generate random nonce")
        })?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes[..])
            .map_err(|_| SecretsError::encryption_failure("failed to create encryption key"))?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = plaintext.to_vec();
        in_out.reserve(TAG_SIZE);
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| SecretsError::encryption_failure("AEAD seal failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    /// Decrypt a payload produced by [`SecretCipher::seal`].
    ///
    /// Any malformed input or tag mismatch is a `DecryptionFailure`.
    #[instrument(skip(self, sealed), fields(sealed_len = sealed.len()))]
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecretsError::decryption_failure(format!(
                "payload of {} bytes is shorter than nonce and tag",
                sealed.len()
            )));
        }

        let (nonce_part, ciphertext) = sealed.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce_part);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes[..])
            .map_err(|_| SecretsError::decryption_failure("failed to create decryption key"))?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = ciphertext.to_vec();
        let plaintext = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| SecretsError::decryption_failure("authentication tag mismatch"))?;

        Ok(plaintext.to_vec())
    }

    /// Seal a secret value.
    pub fn seal_secret(&self, value: &SecretString) -> Result<Vec<u8>> {
        self.seal(value.expose_secret().as_bytes())
    }

    /// Open a sealed secret value.
    pub fn open_secret(&self, sealed: &[u8]) -> Result<SecretString> {
        let plaintext = Zeroizing::new(self.open(sealed)?);
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| SecretsError::decryption_failure("plaintext is not valid UTF-8"))?;
        Ok(SecretString::new(text))
    }

    /// Seal a secret value and encode it as standard base64 for text columns.
    pub fn seal_secret_base64(&self, value: &SecretString) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.seal_secret(value)?))
    }

    /// Inverse of [`SecretCipher::seal_secret_base64`].
    pub fn open_secret_base64(&self, encoded: &str) -> Result<SecretString> {
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SecretsError::decryption_failure(format!("invalid base64: {}", e)))?;
        self.open_secret(&sealed)
    }
}
