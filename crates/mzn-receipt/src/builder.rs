// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fluent builder for constructing [`Receipt`]s.

use crate::{Decision, Receipt};
use chrono::Utc;
use mzn_proof::GovernanceProof;
use uuid::Uuid;

/// Fluent builder for constructing [`Receipt`]s ergonomically.
///
/// The chain fields (`prev_receipt_hash`, `this_hash`, `session_index`) are
/// left unset; the receipt store fills them at append time.
#[derive(Debug)]
pub struct ReceiptBuilder {
    action_id: String,
    decision: Decision,
    stage: String,
    job_id: Option<String>,
    request_id: Option<Uuid>,
    reason_code: Option<String>,
    content_hash: String,
    proof: Option<GovernanceProof>,
    genome_id: String,
    genome_version: String,
}

impl ReceiptBuilder {
    /// Start a receipt for the given action and decision.
    #[must_use]
    pub fn new(action_id: impl Into<String>, decision: Decision) -> Self {
        Self {
            action_id: action_id.into(),
            decision,
            stage: "pipeline".to_string(),
            job_id: None,
            request_id: None,
            reason_code: None,
            content_hash: mzn_core::sha256_hex(b""),
            proof: None,
            genome_id: "unset".to_string(),
            genome_version: "unset".to_string(),
        }
    }

    /// Set the stage marker.
    #[must_use]
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Attach a job ID.
    #[must_use]
    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Attach a request ID.
    #[must_use]
    pub fn request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Set the reason code.
    #[must_use]
    pub fn reason_code(mut self, code: impl Into<String>) -> Self {
        self.reason_code = Some(code.into());
        self
    }

    /// Set the content hash of the produced output.
    #[must_use]
    pub fn content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }

    /// Attach the governance proof.
    #[must_use]
    pub fn proof(mut self, proof: GovernanceProof) -> Self {
        self.proof = Some(proof);
        self
    }

    /// Record the genome in force.
    #[must_use]
    pub fn genome(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.genome_id = id.into();
        self.genome_version = version.into();
        self
    }

    /// Consume the builder and produce a [`Receipt`] for the given session.
    #[must_use]
    pub fn build(self, boot_key_id: impl Into<String>) -> Receipt {
        Receipt {
            receipt_id: Uuid::new_v4(),
            job_id: self.job_id,
            request_id: self.request_id,
            timestamp: Utc::now(),
            stage: self.stage,
            action_id: self.action_id,
            decision: self.decision,
            reason_code: self.reason_code,
            content_hash: self.content_hash,
            proof: self.proof,
            prev_receipt_hash: None,
            this_hash: None,
            genome_id: self.genome_id,
            genome_version: self.genome_version,
            boot_key_id: boot_key_id.into(),
            session_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let r = ReceiptBuilder::new("tool.invoke", Decision::Allow).build("boot-1");
        assert_eq!(r.action_id, "tool.invoke");
        assert_eq!(r.decision, Decision::Allow);
        assert_eq!(r.stage, "pipeline");
        assert_eq!(r.boot_key_id, "boot-1");
        assert!(r.this_hash.is_none());
        assert!(r.prev_receipt_hash.is_none());
        assert_eq!(r.session_index, 0);
    }

    #[test]
    fn builder_sets_all_fields() {
        let req = Uuid::new_v4();
        let r = ReceiptBuilder::new("job.run", Decision::Deny)
            .stage("STAGE_TIMEOUT")
            .job_id("job-7")
            .request_id(req)
            .reason_code("TIMEOUT")
            .content_hash("ff".repeat(32))
            .genome("genome-main", "1.0.0")
            .build("boot-2");
        assert_eq!(r.stage, "STAGE_TIMEOUT");
        assert_eq!(r.job_id.as_deref(), Some("job-7"));
        assert_eq!(r.request_id, Some(req));
        assert_eq!(r.reason_code.as_deref(), Some("TIMEOUT"));
        assert_eq!(r.genome_id, "genome-main");
        assert_eq!(r.genome_version, "1.0.0");
    }

    #[test]
    fn distinct_builds_have_distinct_ids() {
        let a = ReceiptBuilder::new("storage.read", Decision::Allow).build("b");
        let b = ReceiptBuilder::new("storage.read", Decision::Allow).build("b");
        assert_ne!(a.receipt_id, b.receipt_id);
    }
}
