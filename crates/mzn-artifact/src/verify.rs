// SPDX-License-Identifier: MIT OR Apache-2.0
//! The artifact verifier.
//!
//! Checks run in a fixed order and the first hard failure marks the manifest
//! unverified: signer known → algorithm matches → content hash matches →
//! signature valid. Verified manifests are memoized by `artifact_id`; the
//! memo map is write-rare and read-frequent, so a `RwLock` guards it.

use crate::manifest::{ArtifactManifest, SignatureAlg};
use crate::trust::TrustStore;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of verifying one `(manifest, content)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// `true` only when every check passed.
    pub verified: bool,
    /// Hard failures, in check order.
    pub errors: Vec<String>,
    /// Advisory findings that do not block verification.
    pub warnings: Vec<String>,
}

impl Verification {
    fn failed(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            verified: false,
            errors,
            warnings,
        }
    }
}

/// Verifies artifact manifests against the boot trust store.
#[derive(Debug)]
pub struct ArtifactVerifier {
    trust: TrustStore,
    verified: RwLock<BTreeMap<String, ArtifactManifest>>,
}

impl ArtifactVerifier {
    /// Create a verifier over the given trust store.
    #[must_use]
    pub fn new(trust: TrustStore) -> Self {
        Self {
            trust,
            verified: RwLock::new(BTreeMap::new()),
        }
    }

    /// Verify `content_bytes` against `manifest`.
    ///
    /// On success the manifest is memoized; re-verifying the same
    /// `artifact_id` later is a cheap lookup via
    /// [`is_verified`](Self::is_verified).
    pub fn verify(&self, manifest: &ArtifactManifest, content_bytes: &[u8]) -> Verification {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let Some(signer) = self.trust.get(&manifest.key_id) else {
            errors.push(format!("signer key '{}' not in trust store", manifest.key_id));
            return Verification::failed(errors, warnings);
        };

        if signer.alg != manifest.signature.alg {
            errors.push(format!(
                "algorithm mismatch: signer declares {:?}, manifest declares {:?}",
                signer.alg, manifest.signature.alg
            ));
            return Verification::failed(errors, warnings);
        }

        let content_hash = mzn_core::sha256_hex(content_bytes);
        if content_hash != manifest.content_hash {
            errors.push(format!(
                "content hash mismatch: computed {content_hash}, manifest declares {}",
                manifest.content_hash
            ));
            return Verification::failed(errors, warnings);
        }

        let sig_bytes = match B64.decode(&manifest.signature.sig_b64) {
            Ok(b) => b,
            Err(e) => {
                errors.push(format!("signature is not valid base64: {e}"));
                return Verification::failed(errors, warnings);
            }
        };
        let key_bytes = match B64.decode(&signer.public_key_b64) {
            Ok(b) => b,
            Err(e) => {
                errors.push(format!("signer key is not valid base64: {e}"));
                return Verification::failed(errors, warnings);
            }
        };

        let sig_ok = match manifest.signature.alg {
            SignatureAlg::Ed25519 => verify_ed25519(&key_bytes, content_bytes, &sig_bytes, &mut errors),
            SignatureAlg::HmacSha256 => verify_hmac(&key_bytes, content_bytes, &sig_bytes, &mut errors),
        };
        if !sig_ok {
            return Verification::failed(errors, warnings);
        }

        if manifest.compat.is_empty() {
            warnings.push("manifest declares no compat range".to_string());
        }

        debug!(target: "mzn.artifact", artifact_id = %manifest.artifact_id, "verified");
        self.verified
            .write()
            .expect("verified map lock poisoned")
            .insert(manifest.artifact_id.clone(), manifest.clone());

        Verification {
            verified: true,
            errors,
            warnings,
        }
    }

    /// Returns `true` if `artifact_id` passed verification earlier in this
    /// process.
    #[must_use]
    pub fn is_verified(&self, artifact_id: &str) -> bool {
        self.verified
            .read()
            .expect("verified map lock poisoned")
            .contains_key(artifact_id)
    }

    /// The memoized manifest for `artifact_id`, if verified.
    #[must_use]
    pub fn verified_manifest(&self, artifact_id: &str) -> Option<ArtifactManifest> {
        self.verified
            .read()
            .expect("verified map lock poisoned")
            .get(artifact_id)
            .cloned()
    }
}

fn verify_ed25519(key: &[u8], content: &[u8], sig: &[u8], errors: &mut Vec<String>) -> bool {
    let key_arr: [u8; 32] = match key.try_into() {
        Ok(a) => a,
        Err(_) => {
            errors.push(format!("ed25519 key must be 32 bytes, got {}", key.len()));
            return false;
        }
    };
    let vk = match VerifyingKey::from_bytes(&key_arr) {
        Ok(k) => k,
        Err(e) => {
            errors.push(format!("ed25519 key rejected: {e}"));
            return false;
        }
    };
    let signature = match Signature::from_slice(sig) {
        Ok(s) => s,
        Err(e) => {
            errors.push(format!("ed25519 signature malformed: {e}"));
            return false;
        }
    };
    match vk.verify(content, &signature) {
        Ok(()) => true,
        Err(e) => {
            errors.push(format!("ed25519 signature invalid: {e}"));
            false
        }
    }
}

fn verify_hmac(key: &[u8], content: &[u8], sig: &[u8], errors: &mut Vec<String>) -> bool {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(e) => {
            errors.push(format!("hmac key rejected: {e}"));
            return false;
        }
    };
    mac.update(content);
    match mac.verify_slice(sig) {
        Ok(()) => true,
        Err(_) => {
            errors.push("hmac signature invalid".to_string());
            false
        }
    }
}
