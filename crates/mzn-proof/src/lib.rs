// SPDX-License-Identifier: MIT OR Apache-2.0
//! Governance proofs: a per-request hash accumulator signed with the boot
//! key.
//!
//! Each pipeline stage contributes `SHA-256(canonical({stage, input, output,
//! ts}))`; the proof is the HMAC-signed hash of the canonical stage-hash map.
//! Proofs only verify within the boot session that built them — prior-session
//! proofs fail with [`ProofError::DifferentBootSession`] by design.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use mzn_boot::BootKey;
use mzn_core::Verdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Proof
// ---------------------------------------------------------------------------

/// Cryptographic record that a request traversed the governed pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceProof {
    /// Request this proof belongs to.
    pub request_id: Uuid,
    /// Hash of the original request body.
    pub request_hash: String,
    /// Per-stage hashes, keyed by stage name.
    pub stage_hashes: BTreeMap<String, String>,
    /// SHA-256 over the canonical stage-hash map.
    pub cumulative_hash: String,
    /// Hex HMAC-SHA256 of `cumulative_hash` under the boot key.
    pub signature: String,
    /// Session that produced the proof.
    pub boot_key_id: String,
    /// When the proof was built.
    pub timestamp: DateTime<Utc>,
    /// Final pipeline verdict.
    pub verdict: Verdict,
}

/// Errors from building or verifying proofs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// No stage hash was recorded before build/verify.
    #[error("proof contains no stage hashes")]
    Empty,
    /// The proof was built under a different boot session.
    #[error("proof was signed in a different boot session ({boot_key_id})")]
    DifferentBootSession {
        /// Session that signed the proof.
        boot_key_id: String,
    },
    /// Recomputing the cumulative hash gave a different value.
    #[error("cumulative hash mismatch")]
    CumulativeMismatch,
    /// The signature does not verify under the current boot key.
    #[error("proof signature invalid")]
    SignatureInvalid,
}

fn cumulative_hash(stage_hashes: &BTreeMap<String, String>) -> String {
    let canonical =
        mzn_core::canonical_string(stage_hashes).expect("stage hash map serializes");
    mzn_core::sha256_hex(canonical.as_bytes())
}

/// Verify a proof against the current boot key.
///
/// # Errors
///
/// See [`ProofError`] variants; any error means the proof must be treated
/// as invalid.
pub fn verify(proof: &GovernanceProof, boot_key: &BootKey) -> Result<(), ProofError> {
    if proof.boot_key_id != boot_key.key_id() {
        return Err(ProofError::DifferentBootSession {
            boot_key_id: proof.boot_key_id.clone(),
        });
    }
    if proof.stage_hashes.is_empty() {
        return Err(ProofError::Empty);
    }
    if cumulative_hash(&proof.stage_hashes) != proof.cumulative_hash {
        return Err(ProofError::CumulativeMismatch);
    }
    if !boot_key.verify_hex(proof.cumulative_hash.as_bytes(), &proof.signature) {
        return Err(ProofError::SignatureInvalid);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Stateful accumulator building one proof per request.
#[derive(Debug)]
pub struct ProofBuilder {
    request_id: Uuid,
    request_hash: String,
    stage_hashes: BTreeMap<String, String>,
}

impl ProofBuilder {
    /// Start a proof for `request_id` over the given request body.
    #[must_use]
    pub fn new<T: Serialize>(request_id: Uuid, request: &T) -> Self {
        let request_hash =
            mzn_core::canonical_hash(request).unwrap_or_else(|_| mzn_core::sha256_hex(b""));
        Self {
            request_id,
            request_hash,
            stage_hashes: BTreeMap::new(),
        }
    }

    /// Record one stage's hash over its input and output.
    pub fn add_stage<I: Serialize, O: Serialize>(&mut self, stage: &str, input: &I, output: &O) {
        let record = serde_json::json!({
            "stage": stage,
            "input": serde_json::to_value(input).unwrap_or(serde_json::Value::Null),
            "output": serde_json::to_value(output).unwrap_or(serde_json::Value::Null),
            "ts": Utc::now(),
        });
        let hash = mzn_core::canonical_hash(&record).expect("stage record serializes");
        self.stage_hashes.insert(stage.to_string(), hash);
    }

    /// Stages recorded so far.
    #[must_use]
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.stage_hashes.keys().map(String::as_str)
    }

    /// Hash of the original request body.
    #[must_use]
    pub fn request_hash(&self) -> &str {
        &self.request_hash
    }

    /// Sign and finalize the proof.
    ///
    /// # Errors
    ///
    /// [`ProofError::Empty`] when no stage was recorded — the builder refuses
    /// empty proofs.
    pub fn build(self, boot_key: &BootKey, verdict: Verdict) -> Result<GovernanceProof, ProofError> {
        if self.stage_hashes.is_empty() {
            return Err(ProofError::Empty);
        }
        let cumulative = cumulative_hash(&self.stage_hashes);
        let signature = boot_key.sign_hex(cumulative.as_bytes());
        Ok(GovernanceProof {
            request_id: self.request_id,
            request_hash: self.request_hash,
            stage_hashes: self.stage_hashes,
            cumulative_hash: cumulative,
            signature,
            boot_key_id: boot_key.key_id().to_string(),
            timestamp: Utc::now(),
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn built_proof(boot_key: &BootKey) -> GovernanceProof {
        let mut b = ProofBuilder::new(Uuid::new_v4(), &json!({"body": "hello"}));
        b.add_stage("cif_ingress", &json!({"body": "hello"}), &json!({"sanitized": true}));
        b.add_stage("cdi_action", &json!({"action": "tool.invoke"}), &json!({"allow": true}));
        b.add_stage("handler", &json!({}), &json!({"result": 1}));
        b.add_stage("cdi_output", &json!({"result": 1}), &json!({"allow": true}));
        b.add_stage("cif_egress", &json!({"result": 1}), &json!({"scrubbed": false}));
        b.build(boot_key, Verdict::Allow).unwrap()
    }

    #[test]
    fn full_pipeline_proof_verifies() {
        let key = BootKey::generate();
        let proof = built_proof(&key);
        assert_eq!(proof.stage_hashes.len(), 5);
        verify(&proof, &key).unwrap();
    }

    #[test]
    fn empty_proof_refused() {
        let key = BootKey::generate();
        let b = ProofBuilder::new(Uuid::new_v4(), &json!({}));
        assert_eq!(b.build(&key, Verdict::Deny).unwrap_err(), ProofError::Empty);
    }

    #[test]
    fn single_stage_denial_proof_is_valid() {
        let key = BootKey::generate();
        let mut b = ProofBuilder::new(Uuid::new_v4(), &json!({"bad": true}));
        b.add_stage("cif_ingress", &json!({"bad": true}), &json!({"violation": "too large"}));
        let proof = b.build(&key, Verdict::Deny).unwrap();
        verify(&proof, &key).unwrap();
        assert_eq!(proof.verdict, Verdict::Deny);
    }

    #[test]
    fn tampered_stage_hash_fails() {
        let key = BootKey::generate();
        let mut proof = built_proof(&key);
        proof
            .stage_hashes
            .insert("handler".to_string(), "0".repeat(64));
        assert_eq!(verify(&proof, &key).unwrap_err(), ProofError::CumulativeMismatch);
    }

    #[test]
    fn tampered_signature_fails() {
        let key = BootKey::generate();
        let mut proof = built_proof(&key);
        proof.signature = "0".repeat(64);
        assert_eq!(verify(&proof, &key).unwrap_err(), ProofError::SignatureInvalid);
    }

    #[test]
    fn prior_session_proof_fails_by_design() {
        let old_key = BootKey::generate();
        let proof = built_proof(&old_key);
        let new_key = BootKey::generate();
        assert!(matches!(
            verify(&proof, &new_key).unwrap_err(),
            ProofError::DifferentBootSession { .. }
        ));
    }

    #[test]
    fn stage_rerecording_overwrites() {
        let key = BootKey::generate();
        let mut b = ProofBuilder::new(Uuid::new_v4(), &json!({}));
        b.add_stage("handler", &json!({}), &json!({"attempt": 1}));
        b.add_stage("handler", &json!({}), &json!({"attempt": 2}));
        let proof = b.build(&key, Verdict::Allow).unwrap();
        assert_eq!(proof.stage_hashes.len(), 1);
    }

    #[test]
    fn request_hash_is_canonical() {
        let a = ProofBuilder::new(Uuid::new_v4(), &json!({"a": 1, "b": 2}));
        let b = ProofBuilder::new(Uuid::new_v4(), &json!({"b": 2, "a": 1}));
        assert_eq!(a.request_hash(), b.request_hash());
    }

    #[test]
    fn proof_serde_roundtrip() {
        let key = BootKey::generate();
        let proof = built_proof(&key);
        let json = serde_json::to_string(&proof).unwrap();
        let back: GovernanceProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
        verify(&back, &key).unwrap();
    }
}
