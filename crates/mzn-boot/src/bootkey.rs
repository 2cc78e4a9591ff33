// SPDX-License-Identifier: MIT OR Apache-2.0
//! The ephemeral boot key.
//!
//! A fresh 256-bit symmetric key is generated at every boot. Its identifier
//! is the first 16 hex characters of the SHA-256 of the key material. The
//! key itself never leaves process memory and is never persisted; everything
//! it signs is therefore verifiable only within the session that minted it.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Length of the derived public key identifier, in hex characters.
const KEY_ID_HEX_LEN: usize = 16;

/// Ephemeral per-process symmetric signing key.
pub struct BootKey {
    key: [u8; 32],
    key_id: String,
}

impl BootKey {
    /// Generate a fresh random boot key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::from_bytes(key)
    }

    /// Build a key from explicit bytes (test fixtures).
    #[must_use]
    pub fn from_bytes(key: [u8; 32]) -> Self {
        let digest = Sha256::digest(key);
        let key_id = hex::encode(digest)[..KEY_ID_HEX_LEN].to_string();
        Self { key, key_id }
    }

    /// Public identifier of this key (`boot_key_id`).
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// HMAC-SHA256 over `payload`.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Hex-encoded [`sign`](Self::sign).
    #[must_use]
    pub fn sign_hex(&self, payload: &[u8]) -> String {
        hex::encode(self.sign(payload))
    }

    /// Constant-time verification of a signature over `payload`.
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }

    /// Verify a hex-encoded signature.
    #[must_use]
    pub fn verify_hex(&self, payload: &[u8], signature_hex: &str) -> bool {
        match hex::decode(signature_hex) {
            Ok(sig) => self.verify(payload, &sig),
            Err(_) => false,
        }
    }
}

// The key material must never appear in logs.
impl std::fmt::Debug for BootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}
