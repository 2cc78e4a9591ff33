// SPDX-License-Identifier: MIT OR Apache-2.0
//! The governance decision engine.
//!
//! [`DecisionEngine::decide`] evaluates a fixed rule ladder over the genome,
//! treaty, consent state, and call context. Deny wins over allow, and a
//! specific deny rule outranks any general allow. The engine may narrow an
//! allowed action's intent but never widens what the genome grants.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use mzn_artifact::{Genome, TreatyInfo};
use mzn_core::ActionRegistry;
use mzn_error::ReasonCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// `true` when the action may proceed.
    pub allowed: bool,
    /// Reason code for denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    /// Human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Narrowed intent for allowed actions, when the engine constrains scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_intent: Option<serde_json::Value>,
}

impl Decision {
    /// Unconditional allow.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason_code: None,
            reason: None,
            transformed_intent: None,
        }
    }

    /// Allow with a narrowed intent.
    #[must_use]
    pub fn allow_narrowed(intent: serde_json::Value) -> Self {
        Self {
            allowed: true,
            reason_code: None,
            reason: None,
            transformed_intent: Some(intent),
        }
    }

    /// Deny with a reason.
    #[must_use]
    pub fn deny(code: ReasonCode, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason_code: Some(code),
            reason: Some(reason.into()),
            transformed_intent: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Consent signal
// ---------------------------------------------------------------------------

/// Shared stop/consent-withdrawal signal.
///
/// All clones observe the same state; the rule "consent and stop always win"
/// means an active signal denies every action regardless of other grants.
#[derive(Debug, Clone, Default)]
pub struct ConsentSignal {
    stop: Arc<AtomicBool>,
}

impl ConsentSignal {
    /// A fresh, inactive signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate the stop signal.
    pub fn activate(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Clear the stop signal (requires an explicit human action upstream).
    pub fn clear(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    /// Returns `true` while the signal is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Tombstone-specific context for rule 6.
#[derive(Debug, Clone, Default)]
pub struct TombstoneContext {
    /// The target beam's kind is SELF, POLICY, or CARE.
    pub protected_kind: bool,
    /// The daily tombstone budget is already exceeded.
    pub over_daily_budget: bool,
}

/// Call-site context for one decision.
#[derive(Debug, Clone, Default)]
pub struct CdiContext {
    /// Acting identity.
    pub actor: String,
    /// Whether a valid capability token accompanies the call (pre-checked by
    /// the governed wrapper).
    pub token_valid: bool,
    /// Whether the store is in incident lockdown.
    pub incident_mode: bool,
    /// Approval reference supplied with the request, if any.
    pub approval_ref: Option<String>,
    /// Tombstone-specific context, for destructive beam operations.
    pub tombstone: Option<TombstoneContext>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluates the rule ladder for every governed action.
pub struct DecisionEngine {
    registry: Arc<ActionRegistry>,
    genome: Option<Genome>,
    treaty: Option<TreatyInfo>,
    consent: ConsentSignal,
}

impl DecisionEngine {
    /// Build an engine over the boot outputs.
    #[must_use]
    pub fn new(
        registry: Arc<ActionRegistry>,
        genome: Option<Genome>,
        treaty: Option<TreatyInfo>,
        consent: ConsentSignal,
    ) -> Self {
        Self {
            registry,
            genome,
            treaty,
            consent,
        }
    }

    /// The consent signal shared with this engine.
    #[must_use]
    pub fn consent(&self) -> &ConsentSignal {
        &self.consent
    }

    /// Evaluate the action-stage rule ladder.
    #[must_use]
    pub fn decide(&self, action_id: &str, ctx: &CdiContext) -> Decision {
        // 1. Governance artifacts must be loaded.
        let (Some(genome), Some(_treaty)) = (&self.genome, &self.treaty) else {
            return Decision::deny(
                ReasonCode::GovernanceInitFailed,
                "treaty or genome unavailable",
            );
        };

        // 2. Unregistered actions fail closed.
        let Ok(def) = self.registry.validate(action_id) else {
            return Decision::deny(
                ReasonCode::UnregisteredAction,
                format!("action '{action_id}' is not registered"),
            );
        };

        // 3. Consent and stop always win.
        if self.consent.is_active() {
            return Decision::deny(ReasonCode::ConsentStopActive, "stop signal is active");
        }

        // 4. Genome is the upper bound.
        if genome.denies(action_id) {
            return Decision::deny(
                ReasonCode::CdiDenied,
                format!("genome denies action '{action_id}'"),
            );
        }
        if !genome.permits(action_id) {
            return Decision::deny(
                ReasonCode::CdiDenied,
                format!("genome does not grant action '{action_id}'"),
            );
        }

        // 5. High-risk actions require a capability token.
        if def.risk_class.requires_token() && !ctx.token_valid {
            return Decision::deny(
                ReasonCode::CapabilityDenied,
                format!("action '{action_id}' requires a valid capability token"),
            );
        }

        // 6. Destructive beam ops may require explicit approval.
        if let Some(tombstone) = &ctx.tombstone {
            let needs_approval =
                tombstone.protected_kind || tombstone.over_daily_budget || ctx.incident_mode;
            if needs_approval && ctx.approval_ref.is_none() {
                let code = if ctx.incident_mode && !tombstone.protected_kind && !tombstone.over_daily_budget {
                    ReasonCode::IncidentModeLocked
                } else {
                    ReasonCode::ApprovalRequired
                };
                return Decision::deny(code, "destructive operation requires approval_ref");
            }
        } else if ctx.incident_mode && def.risk_class == mzn_core::RiskClass::Critical
            && ctx.approval_ref.is_none()
        {
            return Decision::deny(
                ReasonCode::IncidentModeLocked,
                "incident mode requires approval for critical actions",
            );
        }

        // 7. Allow, narrowing side-effectful intents to their declared scope.
        debug!(target: "mzn.cdi", action_id, actor = %ctx.actor, "allow");
        if def.side_effect {
            Decision::allow_narrowed(serde_json::json!({
                "action_id": action_id,
                "constraints": {
                    "side_effect": true,
                    "risk_class": def.risk_class,
                    "approval_ref": ctx.approval_ref,
                },
            }))
        } else {
            Decision::allow()
        }
    }

    /// Evaluate the output-stage check.
    ///
    /// A stop signal arriving mid-request still blocks the response; this is
    /// the late half of "consent and stop always win".
    #[must_use]
    pub fn decide_output(&self, action_id: &str) -> Decision {
        if self.genome.is_none() || self.treaty.is_none() {
            return Decision::deny(
                ReasonCode::GovernanceInitFailed,
                "treaty or genome unavailable",
            );
        }
        if self.consent.is_active() {
            return Decision::deny(ReasonCode::ConsentStopActive, "stop signal is active");
        }
        debug!(target: "mzn.cdi", action_id, "output allow");
        Decision::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mzn_artifact::{Authority, GenomeCapability, GenomeRisk};

    fn genome(allow: &[&str], deny: &[&str]) -> Genome {
        Genome {
            name: "main".into(),
            invariants: vec![],
            capabilities: vec![GenomeCapability {
                cap_id: "caps".into(),
                risk_class: GenomeRisk::C,
                allow_actions: allow.iter().map(|s| s.to_string()).collect(),
                deny_actions: deny.iter().map(|s| s.to_string()).collect(),
            }],
            authority: Authority {
                signers: vec!["s".into()],
                threshold: 1,
            },
            parents: vec![],
        }
    }

    fn treaty() -> TreatyInfo {
        TreatyInfo {
            version: "1".into(),
            authority: "kaitiaki".into(),
            content_hash: "00".repeat(32),
        }
    }

    fn engine(allow: &[&str], deny: &[&str]) -> DecisionEngine {
        DecisionEngine::new(
            Arc::new(ActionRegistry::builtin()),
            Some(genome(allow, deny)),
            Some(treaty()),
            ConsentSignal::new(),
        )
    }

    fn ctx(token_valid: bool) -> CdiContext {
        CdiContext {
            actor: "agent-1".into(),
            token_valid,
            ..Default::default()
        }
    }

    #[test]
    fn missing_genome_is_init_failure() {
        let e = DecisionEngine::new(
            Arc::new(ActionRegistry::builtin()),
            None,
            Some(treaty()),
            ConsentSignal::new(),
        );
        let d = e.decide("storage.read", &ctx(true));
        assert!(!d.allowed);
        assert_eq!(d.reason_code, Some(ReasonCode::GovernanceInitFailed));
    }

    #[test]
    fn unregistered_action_denied() {
        let e = engine(&["*"], &[]);
        let d = e.decide("no.such.action", &ctx(true));
        assert_eq!(d.reason_code, Some(ReasonCode::UnregisteredAction));
    }

    #[test]
    fn consent_stop_always_wins() {
        let e = engine(&["*"], &[]);
        e.consent().activate();
        let d = e.decide("storage.read", &ctx(true));
        assert_eq!(d.reason_code, Some(ReasonCode::ConsentStopActive));
        // Clearing restores normal evaluation.
        e.consent().clear();
        assert!(e.decide("storage.read", &ctx(true)).allowed);
    }

    #[test]
    fn genome_deny_beats_wildcard_allow() {
        let e = engine(&["*"], &["tool.invoke"]);
        let d = e.decide("tool.invoke", &ctx(true));
        assert_eq!(d.reason_code, Some(ReasonCode::CdiDenied));
        assert!(d.reason.unwrap().contains("denies"));
    }

    #[test]
    fn ungranted_action_denied() {
        let e = engine(&["storage.read"], &[]);
        let d = e.decide("tool.invoke", &ctx(true));
        assert_eq!(d.reason_code, Some(ReasonCode::CdiDenied));
        assert!(d.reason.unwrap().contains("does not grant"));
    }

    #[test]
    fn high_risk_without_token_denied() {
        let e = engine(&["*"], &[]);
        let d = e.decide("model.call", &ctx(false));
        assert_eq!(d.reason_code, Some(ReasonCode::CapabilityDenied));
    }

    #[test]
    fn low_risk_without_token_allowed() {
        let e = engine(&["*"], &[]);
        assert!(e.decide("storage.read", &ctx(false)).allowed);
    }

    #[test]
    fn protected_tombstone_requires_approval() {
        let e = engine(&["*"], &[]);
        let mut c = ctx(true);
        c.tombstone = Some(TombstoneContext {
            protected_kind: true,
            over_daily_budget: false,
        });
        let d = e.decide("beam.tombstone", &c);
        assert_eq!(d.reason_code, Some(ReasonCode::ApprovalRequired));

        c.approval_ref = Some("approval-42".into());
        assert!(e.decide("beam.tombstone", &c).allowed);
    }

    #[test]
    fn over_budget_tombstone_requires_approval() {
        let e = engine(&["*"], &[]);
        let mut c = ctx(true);
        c.tombstone = Some(TombstoneContext {
            protected_kind: false,
            over_daily_budget: true,
        });
        let d = e.decide("beam.tombstone", &c);
        assert_eq!(d.reason_code, Some(ReasonCode::ApprovalRequired));
    }

    #[test]
    fn incident_mode_locks_destructive_ops() {
        let e = engine(&["*"], &[]);
        let mut c = ctx(true);
        c.incident_mode = true;
        c.tombstone = Some(TombstoneContext::default());
        let d = e.decide("beam.tombstone", &c);
        assert_eq!(d.reason_code, Some(ReasonCode::IncidentModeLocked));
    }

    #[test]
    fn incident_mode_blocks_critical_without_tombstone_ctx() {
        let e = engine(&["*"], &[]);
        let mut c = ctx(true);
        c.incident_mode = true;
        let d = e.decide("beam.purge", &c);
        assert_eq!(d.reason_code, Some(ReasonCode::IncidentModeLocked));
    }

    #[test]
    fn side_effect_allow_is_narrowed() {
        let e = engine(&["*"], &[]);
        let d = e.decide("storage.write", &ctx(true));
        assert!(d.allowed);
        let intent = d.transformed_intent.unwrap();
        assert_eq!(intent["constraints"]["side_effect"], true);
    }

    #[test]
    fn read_allow_is_not_narrowed() {
        let e = engine(&["*"], &[]);
        let d = e.decide("governance.read", &ctx(true));
        assert!(d.allowed);
        assert!(d.transformed_intent.is_none());
    }

    #[test]
    fn output_check_honors_stop() {
        let e = engine(&["*"], &[]);
        assert!(e.decide_output("storage.read").allowed);
        e.consent().activate();
        let d = e.decide_output("storage.read");
        assert_eq!(d.reason_code, Some(ReasonCode::ConsentStopActive));
    }

    #[test]
    fn decision_serde_roundtrip() {
        let d = Decision::deny(ReasonCode::CdiDenied, "nope");
        let json = serde_json::to_string(&d).unwrap();
        let back: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
