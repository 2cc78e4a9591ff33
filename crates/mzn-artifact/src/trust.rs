// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trusted signer records and the boot-time trust store.
//!
//! The trust store is loaded once at boot (from a JSON file or the
//! `MATHISON_TRUST_STORE` environment value) and is immutable thereafter.

use crate::manifest::SignatureAlg;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One trusted signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSigner {
    /// Stable key identifier referenced by manifests.
    pub key_id: String,
    /// Algorithm this key is valid for.
    pub alg: SignatureAlg,
    /// Base64-encoded public key (Ed25519) or shared key (HMAC).
    pub public_key_b64: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// When the signer was added to the store.
    pub added_at: DateTime<Utc>,
}

/// Errors from trust store loading.
#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    /// The trust store file could not be read.
    #[error("failed to read trust store {path}: {source}")]
    Io {
        /// Path requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The trust store content is not a valid signer array.
    #[error("failed to parse trust store: {0}")]
    Parse(#[from] serde_json::Error),
    /// The store contains two signers with the same `key_id`.
    #[error("duplicate key_id in trust store: {key_id}")]
    DuplicateKey {
        /// Duplicated key identifier.
        key_id: String,
    },
    /// The store contains no signers at all.
    #[error("trust store is empty")]
    Empty,
}

/// Immutable set of trusted signers, keyed by `key_id`.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    signers: BTreeMap<String, TrustedSigner>,
}

impl TrustStore {
    /// Build a store from an explicit signer list.
    ///
    /// # Errors
    ///
    /// - [`TrustStoreError::Empty`] for an empty list.
    /// - [`TrustStoreError::DuplicateKey`] for repeated `key_id`s.
    pub fn from_signers(signers: Vec<TrustedSigner>) -> Result<Self, TrustStoreError> {
        if signers.is_empty() {
            return Err(TrustStoreError::Empty);
        }
        let mut map = BTreeMap::new();
        for s in signers {
            if map.contains_key(&s.key_id) {
                return Err(TrustStoreError::DuplicateKey { key_id: s.key_id });
            }
            map.insert(s.key_id.clone(), s);
        }
        Ok(Self { signers: map })
    }

    /// Parse a store from a JSON array of signers.
    ///
    /// # Errors
    ///
    /// See [`TrustStore::from_signers`] and [`TrustStoreError::Parse`].
    pub fn from_json(json: &str) -> Result<Self, TrustStoreError> {
        let signers: Vec<TrustedSigner> = serde_json::from_str(json)?;
        Self::from_signers(signers)
    }

    /// Load a store from a JSON file on disk.
    ///
    /// # Errors
    ///
    /// See [`TrustStore::from_json`] and [`TrustStoreError::Io`].
    pub fn load(path: &Path) -> Result<Self, TrustStoreError> {
        let json = std::fs::read_to_string(path).map_err(|source| TrustStoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Look up a signer by key ID.
    #[must_use]
    pub fn get(&self, key_id: &str) -> Option<&TrustedSigner> {
        self.signers.get(key_id)
    }

    /// Number of trusted signers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signers.len()
    }

    /// Returns `true` when no signers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}
