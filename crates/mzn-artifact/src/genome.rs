// SPDX-License-Identifier: MIT OR Apache-2.0
//! Genome and treaty payload types.
//!
//! A genome defines the upper bound of permitted actions. The decision
//! engine may narrow a genome's grants but never widen them.

use serde::{Deserialize, Serialize};

/// Genome capability risk band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GenomeRisk {
    /// Lowest-risk band.
    A,
    /// Elevated.
    B,
    /// High.
    C,
    /// Highest-risk band.
    D,
}

/// A single capability grant inside a genome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomeCapability {
    /// Capability identifier.
    pub cap_id: String,
    /// Risk band of the capability.
    pub risk_class: GenomeRisk,
    /// Action IDs (or `"*"`) this capability permits.
    #[serde(default)]
    pub allow_actions: Vec<String>,
    /// Action IDs this capability explicitly forbids.
    #[serde(default)]
    pub deny_actions: Vec<String>,
}

/// Signing authority declared by the genome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    /// Signer identities.
    pub signers: Vec<String>,
    /// Minimum number of signers required.
    pub threshold: u32,
}

/// Signed capability configuration bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genome {
    /// Human-readable genome name.
    pub name: String,
    /// Declared invariants (free-form statements recorded in receipts).
    #[serde(default)]
    pub invariants: Vec<String>,
    /// Capability grants.
    #[serde(default)]
    pub capabilities: Vec<GenomeCapability>,
    /// Signing authority.
    pub authority: Authority,
    /// Parent genome artifact IDs.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl Genome {
    /// Returns `true` if any capability explicitly denies `action_id`.
    ///
    /// Deny wins over allow, so callers check this first.
    #[must_use]
    pub fn denies(&self, action_id: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.deny_actions.iter().any(|a| a == action_id))
    }

    /// Returns `true` if any capability allows `action_id` (`"*"` matches
    /// everything) and no capability denies it.
    #[must_use]
    pub fn permits(&self, action_id: &str) -> bool {
        if self.denies(action_id) {
            return false;
        }
        self.capabilities
            .iter()
            .any(|c| c.allow_actions.iter().any(|a| a == action_id || a == "*"))
    }
}

/// Public treaty metadata recorded in receipts and served by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatyInfo {
    /// Treaty version string.
    pub version: String,
    /// Name of the authority the treaty derives from.
    pub authority: String,
    /// Hex SHA-256 of the treaty document bytes.
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome() -> Genome {
        Genome {
            name: "main".into(),
            invariants: vec!["consent and stop always win".into()],
            capabilities: vec![
                GenomeCapability {
                    cap_id: "exec".into(),
                    risk_class: GenomeRisk::C,
                    allow_actions: vec!["tool.invoke".into(), "job.run".into()],
                    deny_actions: vec![],
                },
                GenomeCapability {
                    cap_id: "no-purge".into(),
                    risk_class: GenomeRisk::D,
                    allow_actions: vec![],
                    deny_actions: vec!["beam.purge".into()],
                },
            ],
            authority: Authority {
                signers: vec!["release-bot".into()],
                threshold: 1,
            },
            parents: vec![],
        }
    }

    #[test]
    fn permits_allowed_action() {
        assert!(genome().permits("tool.invoke"));
        assert!(genome().permits("job.run"));
    }

    #[test]
    fn unlisted_action_not_permitted() {
        assert!(!genome().permits("model.call"));
    }

    #[test]
    fn deny_wins_over_allow() {
        let mut g = genome();
        g.capabilities[0].allow_actions.push("beam.purge".into());
        assert!(g.denies("beam.purge"));
        assert!(!g.permits("beam.purge"));
    }

    #[test]
    fn wildcard_allow_matches_everything_not_denied() {
        let mut g = genome();
        g.capabilities[0].allow_actions = vec!["*".into()];
        assert!(g.permits("model.call"));
        assert!(!g.permits("beam.purge"));
    }

    #[test]
    fn genome_serde_roundtrip() {
        let g = genome();
        let json = serde_json::to_string(&g).unwrap();
        let back: Genome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
