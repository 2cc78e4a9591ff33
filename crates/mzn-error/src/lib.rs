// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable reason codes for Mathison.
//!
//! Every externally visible failure carries a [`ReasonCode`] — a
//! machine-readable `SCREAMING_SNAKE_CASE` string that is guaranteed not to
//! change across patch releases — plus a human-readable message, optional
//! violations, and arbitrary key-value context. Use the builder returned by
//! [`MathisonError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that a [`ReasonCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Boot prerequisite failures — fatal before the listener binds.
    Prereq,
    /// Governance initialization failures — 503 until resolved.
    Init,
    /// Ingress validation failures.
    Ingress,
    /// Routing and action-lookup failures.
    Routing,
    /// Capability token failures.
    Capability,
    /// Decision-engine denials.
    Decision,
    /// Egress validation failures.
    Egress,
    /// Execution failures inside handlers, tools, and jobs.
    Execution,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prereq => "prereq",
            Self::Init => "init",
            Self::Ingress => "ingress",
            Self::Routing => "routing",
            Self::Capability => "capability",
            Self::Decision => "decision",
            Self::Egress => "egress",
            Self::Execution => "execution",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ReasonCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable reason code.
///
/// Each variant serializes to the exact `SCREAMING_SNAKE_CASE` string used on
/// the wire, in receipts, and in CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    // -- Prereq --
    /// The runtime configuration file is missing.
    PrereqConfigMissing,
    /// The runtime configuration file failed validation.
    PrereqConfigInvalid,
    /// The treaty document is missing.
    PrereqTreatyMissing,
    /// The treaty document failed verification.
    PrereqTreatyInvalid,
    /// The genome bundle is missing.
    PrereqGenomeMissing,
    /// The genome signature failed verification.
    PrereqGenomeSignatureInvalid,
    /// The adapter configuration is missing.
    PrereqAdapterMissing,
    /// The adapter configuration failed verification.
    PrereqAdapterInvalid,

    // -- Init --
    /// Governance services could not be initialized.
    GovernanceInitFailed,
    /// No trusted signers are configured.
    TrustStoreNotConfigured,

    // -- Ingress --
    /// The ingress filter blocked the payload.
    CifIngressBlocked,
    /// The request body could not be parsed.
    MalformedRequest,

    // -- Routing --
    /// No route matches the request.
    RouteNotFound,
    /// The action ID is not in the action registry.
    UnregisteredAction,

    // -- Capability --
    /// The capability token is missing, expired, or otherwise invalid.
    CapabilityDenied,
    /// The capability token was already consumed.
    TokenReplayed,
    /// The log sink could not retain a blockable envelope.
    DurableLoggingRequired,

    // -- Decision --
    /// The decision engine denied the action.
    CdiDenied,
    /// An active stop or consent-withdrawal signal forbids the action.
    ConsentStopActive,
    /// The store is in incident lockdown.
    IncidentModeLocked,
    /// The destructive-op rate limit tripped incident mode.
    IncidentModeTriggered,
    /// The operation requires an explicit approval reference.
    ApprovalRequired,
    /// The hard daily tombstone budget is exhausted.
    TombstoneBudgetHard,

    // -- Egress --
    /// The egress filter blocked the response.
    CifEgressBlocked,

    // -- Execution --
    /// A stage or request deadline expired.
    Timeout,
    /// A job stage failed.
    StageFailed,
    /// The tool name is not registered with the gateway.
    ToolNotRegistered,
    /// The tool handler failed or panicked.
    ToolExecutionFailed,
    /// A persisted checkpoint is internally inconsistent.
    CheckpointCorrupt,
}

impl ReasonCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PrereqConfigMissing
            | Self::PrereqConfigInvalid
            | Self::PrereqTreatyMissing
            | Self::PrereqTreatyInvalid
            | Self::PrereqGenomeMissing
            | Self::PrereqGenomeSignatureInvalid
            | Self::PrereqAdapterMissing
            | Self::PrereqAdapterInvalid => ErrorCategory::Prereq,

            Self::GovernanceInitFailed | Self::TrustStoreNotConfigured => ErrorCategory::Init,

            Self::CifIngressBlocked | Self::MalformedRequest => ErrorCategory::Ingress,

            Self::RouteNotFound | Self::UnregisteredAction => ErrorCategory::Routing,

            Self::CapabilityDenied | Self::TokenReplayed | Self::DurableLoggingRequired => {
                ErrorCategory::Capability
            }

            Self::CdiDenied
            | Self::ConsentStopActive
            | Self::IncidentModeLocked
            | Self::IncidentModeTriggered
            | Self::ApprovalRequired
            | Self::TombstoneBudgetHard => ErrorCategory::Decision,

            Self::CifEgressBlocked => ErrorCategory::Egress,

            Self::Timeout
            | Self::StageFailed
            | Self::ToolNotRegistered
            | Self::ToolExecutionFailed
            | Self::CheckpointCorrupt => ErrorCategory::Execution,
        }
    }

    /// The HTTP status the daemon maps this code to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Prereq | ErrorCategory::Init => 503,
            ErrorCategory::Ingress => 400,
            ErrorCategory::Routing => match self {
                Self::RouteNotFound => 404,
                _ => 403,
            },
            ErrorCategory::Capability | ErrorCategory::Decision | ErrorCategory::Egress => 403,
            ErrorCategory::Execution => match self {
                Self::Timeout => 504,
                Self::CheckpointCorrupt => 409,
                _ => 500,
            },
        }
    }

    /// The stable wire string, e.g. `"TOKEN_REPLAYED"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrereqConfigMissing => "PREREQ_CONFIG_MISSING",
            Self::PrereqConfigInvalid => "PREREQ_CONFIG_INVALID",
            Self::PrereqTreatyMissing => "PREREQ_TREATY_MISSING",
            Self::PrereqTreatyInvalid => "PREREQ_TREATY_INVALID",
            Self::PrereqGenomeMissing => "PREREQ_GENOME_MISSING",
            Self::PrereqGenomeSignatureInvalid => "PREREQ_GENOME_SIGNATURE_INVALID",
            Self::PrereqAdapterMissing => "PREREQ_ADAPTER_MISSING",
            Self::PrereqAdapterInvalid => "PREREQ_ADAPTER_INVALID",
            Self::GovernanceInitFailed => "GOVERNANCE_INIT_FAILED",
            Self::TrustStoreNotConfigured => "TRUST_STORE_NOT_CONFIGURED",
            Self::CifIngressBlocked => "CIF_INGRESS_BLOCKED",
            Self::MalformedRequest => "MALFORMED_REQUEST",
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::UnregisteredAction => "UNREGISTERED_ACTION",
            Self::CapabilityDenied => "CAPABILITY_DENIED",
            Self::TokenReplayed => "TOKEN_REPLAYED",
            Self::DurableLoggingRequired => "DURABLE_LOGGING_REQUIRED",
            Self::CdiDenied => "CDI_DENIED",
            Self::ConsentStopActive => "CONSENT_STOP_ACTIVE",
            Self::IncidentModeLocked => "INCIDENT_MODE_LOCKED",
            Self::IncidentModeTriggered => "INCIDENT_MODE_TRIGGERED",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::TombstoneBudgetHard => "TOMBSTONE_BUDGET_HARD",
            Self::CifEgressBlocked => "CIF_EGRESS_BLOCKED",
            Self::Timeout => "TIMEOUT",
            Self::StageFailed => "STAGE_FAILED",
            Self::ToolNotRegistered => "TOOL_NOT_REGISTERED",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::CheckpointCorrupt => "CHECKPOINT_CORRUPT",
        }
    }

    /// Returns `true` when this code is fatal at boot.
    #[must_use]
    pub fn is_boot_fatal(&self) -> bool {
        self.category() == ErrorCategory::Prereq
    }

    /// Parse a stable wire string back into a code.
    ///
    /// Returns `None` for anything that is not an exact code string, so
    /// callers recovering a code from a flattened message fail closed to
    /// their own default.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MathisonError
// ---------------------------------------------------------------------------

/// Structured error carried across the substrate and onto the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathisonError {
    /// Stable reason code.
    pub reason_code: ReasonCode,
    /// Human-readable message.
    pub message: String,
    /// Individual violations (e.g. CIF sub-reasons), if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    /// Arbitrary key-value context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl MathisonError {
    /// Create a new error with the given code and message.
    pub fn new(reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason_code,
            message: message.into(),
            violations: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    /// Append a violation string.
    #[must_use]
    pub fn with_violation(mut self, violation: impl Into<String>) -> Self {
        self.violations.push(violation.into());
        self
    }

    /// Attach a key-value context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The HTTP status the daemon serves for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.reason_code.http_status()
    }
}

impl fmt::Display for MathisonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason_code, self.message)?;
        if !self.violations.is_empty() {
            write!(f, " [{}]", self.violations.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for MathisonError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_serialize_to_stable_strings() {
        let cases = [
            (ReasonCode::PrereqTreatyMissing, "PREREQ_TREATY_MISSING"),
            (
                ReasonCode::PrereqGenomeSignatureInvalid,
                "PREREQ_GENOME_SIGNATURE_INVALID",
            ),
            (ReasonCode::TokenReplayed, "TOKEN_REPLAYED"),
            (ReasonCode::CifIngressBlocked, "CIF_INGRESS_BLOCKED"),
            (ReasonCode::ConsentStopActive, "CONSENT_STOP_ACTIVE"),
            (ReasonCode::TombstoneBudgetHard, "TOMBSTONE_BUDGET_HARD"),
            (ReasonCode::ToolNotRegistered, "TOOL_NOT_REGISTERED"),
            (ReasonCode::Timeout, "TIMEOUT"),
        ];
        for (code, expected) in cases {
            assert_eq!(serde_json::to_string(&code).unwrap(), format!("\"{expected}\""));
            assert_eq!(code.as_str(), expected);
        }
    }

    #[test]
    fn as_str_matches_serde_for_all_codes() {
        let all = [
            ReasonCode::PrereqConfigMissing,
            ReasonCode::PrereqConfigInvalid,
            ReasonCode::PrereqTreatyMissing,
            ReasonCode::PrereqTreatyInvalid,
            ReasonCode::PrereqGenomeMissing,
            ReasonCode::PrereqGenomeSignatureInvalid,
            ReasonCode::PrereqAdapterMissing,
            ReasonCode::PrereqAdapterInvalid,
            ReasonCode::GovernanceInitFailed,
            ReasonCode::TrustStoreNotConfigured,
            ReasonCode::CifIngressBlocked,
            ReasonCode::MalformedRequest,
            ReasonCode::RouteNotFound,
            ReasonCode::UnregisteredAction,
            ReasonCode::CapabilityDenied,
            ReasonCode::TokenReplayed,
            ReasonCode::DurableLoggingRequired,
            ReasonCode::CdiDenied,
            ReasonCode::ConsentStopActive,
            ReasonCode::IncidentModeLocked,
            ReasonCode::IncidentModeTriggered,
            ReasonCode::ApprovalRequired,
            ReasonCode::TombstoneBudgetHard,
            ReasonCode::CifEgressBlocked,
            ReasonCode::Timeout,
            ReasonCode::StageFailed,
            ReasonCode::ToolNotRegistered,
            ReasonCode::ToolExecutionFailed,
            ReasonCode::CheckpointCorrupt,
        ];
        for code in all {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            let back: ReasonCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ReasonCode::PrereqTreatyMissing.http_status(), 503);
        assert_eq!(ReasonCode::GovernanceInitFailed.http_status(), 503);
        assert_eq!(ReasonCode::CifIngressBlocked.http_status(), 400);
        assert_eq!(ReasonCode::RouteNotFound.http_status(), 404);
        assert_eq!(ReasonCode::UnregisteredAction.http_status(), 403);
        assert_eq!(ReasonCode::TokenReplayed.http_status(), 403);
        assert_eq!(ReasonCode::CifEgressBlocked.http_status(), 403);
        assert_eq!(ReasonCode::Timeout.http_status(), 504);
        assert_eq!(ReasonCode::StageFailed.http_status(), 500);
        assert_eq!(ReasonCode::CheckpointCorrupt.http_status(), 409);
    }

    #[test]
    fn prereq_codes_are_boot_fatal() {
        assert!(ReasonCode::PrereqTreatyMissing.is_boot_fatal());
        assert!(ReasonCode::PrereqGenomeSignatureInvalid.is_boot_fatal());
        assert!(!ReasonCode::CdiDenied.is_boot_fatal());
    }

    #[test]
    fn error_builder_accumulates() {
        let err = MathisonError::new(ReasonCode::CifIngressBlocked, "payload too large")
            .with_violation("max_payload_bytes exceeded")
            .with_context("endpoint", "/jobs/run");
        assert_eq!(err.reason_code, ReasonCode::CifIngressBlocked);
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.context.get("endpoint").map(String::as_str), Some("/jobs/run"));
    }

    #[test]
    fn display_includes_code_and_violations() {
        let err = MathisonError::new(ReasonCode::CdiDenied, "action denied")
            .with_violation("deny_actions contains tool.invoke");
        let s = err.to_string();
        assert!(s.contains("CDI_DENIED"));
        assert!(s.contains("deny_actions"));
    }

    #[test]
    fn parse_roundtrips_wire_strings() {
        assert_eq!(
            ReasonCode::parse("TOKEN_REPLAYED"),
            Some(ReasonCode::TokenReplayed)
        );
        assert_eq!(
            ReasonCode::parse("INCIDENT_MODE_TRIGGERED"),
            Some(ReasonCode::IncidentModeTriggered)
        );
        assert_eq!(ReasonCode::parse("token_replayed"), None);
        assert_eq!(ReasonCode::parse("not a code"), None);
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = MathisonError::new(ReasonCode::ApprovalRequired, "needs approval")
            .with_context("beam_id", "b-1");
        let json = serde_json::to_string(&err).unwrap();
        let back: MathisonError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
