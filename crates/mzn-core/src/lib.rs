// SPDX-License-Identifier: MIT OR Apache-2.0
//! mzn-core
//!
//! The stable contract for the Mathison governance substrate: the action
//! registry, canonical JSON hashing, the route registry, and the handful of
//! identifiers every other crate shares.
//!
//! If you only take one dependency, take this one.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Canonical JSON serialization and SHA-256 hashing.
pub mod canon;
/// The process-global table of governed action definitions.
pub mod registry;
/// First-class registry of HTTP/CLI route bindings with governance bits.
pub mod route;

pub use canon::{canonical_hash, canonical_string, sha256_hex};
pub use registry::{ActionDef, ActionRegistry, RegistryError, RiskClass};
pub use route::{RouteBinding, RouteRegistry};

use serde::{Deserialize, Serialize};

/// Contract version stamped into receipts and reported by `/health`.
pub const SUBSTRATE_VERSION: &str = "0.1.0";

/// Final verdict of a governed request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every stage passed; the response was released.
    Allow,
    /// Some stage denied the request.
    Deny,
    /// The pipeline could not reach a determination (treated as deny).
    Uncertain,
}

impl Verdict {
    /// Returns `true` only for [`Verdict::Allow`].
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Names of the five mandatory pipeline stages, in execution order.
pub const PIPELINE_STAGES: [&str; 5] = [
    "cif_ingress",
    "cdi_action",
    "handler",
    "cdi_output",
    "cif_egress",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_allow_is_allow() {
        assert!(Verdict::Allow.is_allow());
        assert!(!Verdict::Deny.is_allow());
        assert!(!Verdict::Uncertain.is_allow());
    }

    #[test]
    fn verdict_serde_roundtrip() {
        for v in [Verdict::Allow, Verdict::Deny, Verdict::Uncertain] {
            let json = serde_json::to_string(&v).unwrap();
            let back: Verdict = serde_json::from_str(&json).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn pipeline_stage_order_is_fixed() {
        assert_eq!(PIPELINE_STAGES[0], "cif_ingress");
        assert_eq!(PIPELINE_STAGES[4], "cif_egress");
        assert_eq!(PIPELINE_STAGES.len(), 5);
    }
}
