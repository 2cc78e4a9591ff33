// SPDX-License-Identifier: MIT OR Apache-2.0
//! Beam wire types and mutation intents.

use crate::crypto::SealedBody;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known beam ID holding the identity root.
pub const SELF_ROOT_ID: &str = "SELF_ROOT";

/// Identity fragment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeamKind {
    /// The identity root and self-description fragments.
    #[serde(rename = "SELF")]
    SelfKind,
    /// Standing policy fragments.
    #[serde(rename = "POLICY")]
    Policy,
    /// Care commitments.
    #[serde(rename = "CARE")]
    Care,
    /// Relationships.
    #[serde(rename = "RELATION")]
    Relation,
    /// Projects.
    #[serde(rename = "PROJECT")]
    Project,
    /// Skills.
    #[serde(rename = "SKILL")]
    Skill,
    /// Facts.
    #[serde(rename = "FACT")]
    Fact,
    /// Free-form notes.
    #[serde(rename = "NOTE")]
    Note,
}

impl BeamKind {
    /// SELF, POLICY, and CARE beams require explicit human approval to
    /// tombstone.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::SelfKind | Self::Policy | Self::Care)
    }
}

/// Beam lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeamStatus {
    /// Live; participates in persona compilation when pinned.
    Active,
    /// Retired from active use but retained.
    Retired,
    /// Awaiting tombstone approval.
    PendingTombstone,
    /// Tombstoned; excluded from persona compilation.
    Tombstoned,
}

/// Public beam metadata (the body is sealed separately).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beam {
    /// Beam identifier.
    pub beam_id: String,
    /// Fragment kind.
    pub kind: BeamKind,
    /// Title.
    pub title: String,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Lifecycle status.
    pub status: BeamStatus,
    /// Whether the beam participates in persona compilation.
    pub pinned: bool,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A beam as persisted: metadata plus the sealed (or tombstone-marked) body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBeam {
    /// Public metadata.
    pub meta: Beam,
    /// Encrypted body; `None` once compaction replaced it with a marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<SealedBody>,
    /// Marker left by compaction for old tombstoned beams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_marker: Option<String>,
}

/// Mutation operations a handler may propose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeamOp {
    /// Create or replace an ACTIVE beam.
    Put,
    /// ACTIVE → RETIRED.
    Retire,
    /// Pin an ACTIVE beam.
    Pin,
    /// Unpin an ACTIVE beam.
    Unpin,
    /// Any → TOMBSTONED.
    Tombstone,
    /// Remove a TOMBSTONED beam entirely.
    Purge,
}

/// A proposed mutation; the store is the only code that applies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreBeamIntent {
    /// Operation.
    pub op: BeamOp,
    /// Target beam.
    pub beam_id: String,
    /// Kind (PUT only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BeamKind>,
    /// Title (PUT only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tags (PUT only).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Plaintext body (PUT only; sealed at rest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Pinned flag (PUT only).
    #[serde(default)]
    pub pinned: bool,
    /// Reason code; required for RETIRE and TOMBSTONE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Approval reference for guarded destructive operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_ref: Option<String>,
}

impl StoreBeamIntent {
    /// Minimal PUT intent.
    #[must_use]
    pub fn put(beam_id: &str, kind: BeamKind, title: &str, body: &str) -> Self {
        Self {
            op: BeamOp::Put,
            beam_id: beam_id.to_string(),
            kind: Some(kind),
            title: Some(title.to_string()),
            tags: Vec::new(),
            body: Some(body.to_string()),
            pinned: false,
            reason_code: None,
            approval_ref: None,
        }
    }

    /// Minimal TOMBSTONE intent.
    #[must_use]
    pub fn tombstone(beam_id: &str, reason_code: &str) -> Self {
        Self {
            op: BeamOp::Tombstone,
            beam_id: beam_id.to_string(),
            kind: None,
            title: None,
            tags: Vec::new(),
            body: None,
            pinned: false,
            reason_code: Some(reason_code.to_string()),
            approval_ref: None,
        }
    }
}

/// One audit event recorded per applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeamAuditEvent {
    /// When the mutation applied.
    pub ts: DateTime<Utc>,
    /// Operation.
    pub op: BeamOp,
    /// Target beam.
    pub beam_id: String,
    /// Reason code supplied with the intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Approval reference supplied with the intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_kinds() {
        assert!(BeamKind::SelfKind.is_protected());
        assert!(BeamKind::Policy.is_protected());
        assert!(BeamKind::Care.is_protected());
        assert!(!BeamKind::Fact.is_protected());
        assert!(!BeamKind::Note.is_protected());
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(serde_json::to_string(&BeamKind::SelfKind).unwrap(), "\"SELF\"");
        assert_eq!(serde_json::to_string(&BeamKind::Relation).unwrap(), "\"RELATION\"");
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&BeamStatus::PendingTombstone).unwrap(),
            "\"PENDING_TOMBSTONE\""
        );
    }

    #[test]
    fn intent_serde_roundtrip() {
        let intent = StoreBeamIntent::put("b-1", BeamKind::Fact, "a fact", "body text");
        let json = serde_json::to_string(&intent).unwrap();
        let back: StoreBeamIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, intent);
    }
}
