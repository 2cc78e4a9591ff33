// SPDX-License-Identifier: MIT OR Apache-2.0
//! Beam body encryption: AES-256-GCM under a PBKDF2-derived key.
//!
//! The key is derived from the operator passphrase with PBKDF2-SHA256 at
//! 100 000 iterations over the store's own random salt (persisted in the
//! store header, never shared between stores).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// PBKDF2 iteration count.
const PBKDF2_ROUNDS: u32 = 100_000;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// An encrypted beam body as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBody {
    /// Base64 nonce.
    pub nonce_b64: String,
    /// Base64 ciphertext (including the GCM tag).
    pub ct_b64: String,
}

/// Errors from sealing/opening beam bodies.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Encryption or decryption failed (wrong passphrase or corrupt data).
    #[error("beam body cipher failure")]
    Cipher,
    /// Stored material is not valid base64.
    #[error("beam body encoding invalid: {0}")]
    Encoding(#[from] base64::DecodeError),
    /// Decrypted bytes are not valid UTF-8.
    #[error("beam body is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Passphrase-derived cipher bound to one store's salt.
pub struct BodyCipher {
    key: [u8; 32],
}

impl BodyCipher {
    /// Derive the cipher from a passphrase and the store salt.
    #[must_use]
    pub fn derive(passphrase: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
        Self { key }
    }

    /// Encrypt a body with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// [`CryptoError::Cipher`] on encryption failure.
    pub fn seal(&self, plaintext: &str) -> Result<SealedBody, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Cipher)?;
        Ok(SealedBody {
            nonce_b64: B64.encode(nonce_bytes),
            ct_b64: B64.encode(ct),
        })
    }

    /// Decrypt a sealed body.
    ///
    /// # Errors
    ///
    /// See [`CryptoError`].
    pub fn open(&self, sealed: &SealedBody) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce_bytes = B64.decode(&sealed.nonce_b64)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::Cipher);
        }
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = B64.decode(&sealed.ct_b64)?;
        let pt = cipher.decrypt(nonce, ct.as_ref()).map_err(|_| CryptoError::Cipher)?;
        Ok(String::from_utf8(pt)?)
    }
}

/// Generate a fresh random store salt.
#[must_use]
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
