// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Receipt canonicalization, hashing, chain verification, and storage."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Every governed decision and action emits a [`Receipt`]. Receipts are
//! append-only and hash-chained: within a session each receipt's
//! `prev_receipt_hash` equals the previous receipt's `this_hash`, and a
//! synthetic `SESSION_START` receipt links each new session to the previous
//! session's terminal hash.

mod builder;
mod chain;
mod store;

pub use builder::ReceiptBuilder;
pub use chain::{ChainError, verify_chain, verify_chain_range};
pub use store::JsonlReceiptStore;

use chrono::{DateTime, Utc};
use mzn_error::MathisonError;
use mzn_proof::GovernanceProof;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage marker used by the synthetic receipt opening each session chain.
pub const STAGE_SESSION_START: &str = "SESSION_START";

/// Decision recorded in a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// The action was allowed and executed.
    Allow,
    /// The action was denied.
    Deny,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique receipt identifier.
    pub receipt_id: Uuid,
    /// Job this receipt belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Request this receipt belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    /// When the receipt was created.
    pub timestamp: DateTime<Utc>,
    /// Stage marker (`"pipeline"`, `"STAGE_COMPLETE"`, `"SESSION_START"`, …).
    pub stage: String,
    /// Action the receipt records.
    pub action_id: String,
    /// Decision taken.
    pub decision: Decision,
    /// Stable reason code for denials and notable events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Hash of the produced content (response body, stage output, …).
    pub content_hash: String,
    /// Governance proof, when the receipt closes a governed pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<GovernanceProof>,
    /// Hash of the previous receipt in the chain; filled by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_receipt_hash: Option<String>,
    /// This receipt's own hash; filled by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub this_hash: Option<String>,
    /// Genome in force when the receipt was emitted.
    pub genome_id: String,
    /// Genome version in force.
    pub genome_version: String,
    /// Boot session that emitted the receipt.
    pub boot_key_id: String,
    /// Position within the session's chain, starting at 0.
    pub session_index: u64,
}

/// Produce the canonical JSON representation of a receipt.
///
/// The `this_hash` field is forced to `null` before serialization so that
/// the output is independent of any previously stored hash. Keys are sorted
/// and output carries no insignificant whitespace.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the receipt cannot be serialized.
pub fn canonicalize(receipt: &Receipt) -> Result<String, serde_json::Error> {
    let mut v = serde_json::to_value(receipt)?;
    if let serde_json::Value::Object(map) = &mut v {
        map.insert("this_hash".to_string(), serde_json::Value::Null);
    }
    mzn_core::canonical_string(&v)
}

/// Compute the hex-encoded SHA-256 hash of the canonical receipt form.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the receipt cannot be serialized.
pub fn compute_hash(receipt: &Receipt) -> Result<String, serde_json::Error> {
    Ok(mzn_core::sha256_hex(canonicalize(receipt)?.as_bytes()))
}

/// Verify that a receipt's stored `this_hash` matches the recomputed hash.
///
/// A receipt without a stored hash (not yet appended) verifies trivially.
#[must_use]
pub fn verify_hash(receipt: &Receipt) -> bool {
    match &receipt.this_hash {
        None => true,
        Some(stored) => match compute_hash(receipt) {
            Ok(recomputed) => *stored == recomputed,
            Err(_) => false,
        },
    }
}

/// Narrow sink interface consumed by governance and the job engine.
///
/// Implemented by the receipt store; defined here so that governance crates
/// never depend on a concrete storage backend.
pub trait ReceiptSink: Send + Sync {
    /// Append a receipt, filling `prev_receipt_hash`, `this_hash`, and
    /// `session_index`, and return the stored form.
    ///
    /// # Errors
    ///
    /// Implementations surface storage failures as [`MathisonError`]s.
    fn append(&self, receipt: Receipt) -> Result<Receipt, MathisonError>;
}
