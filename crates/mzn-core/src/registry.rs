// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical table of governed action definitions.
//!
//! Every capability token and every receipt references an action ID from this
//! registry. The registry is populated during process initialization, frozen,
//! and shared read-only thereafter; lookups against unregistered IDs fail
//! closed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// RiskClass
// ---------------------------------------------------------------------------

/// Risk classification of a governed action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskClass {
    /// Read-only or otherwise benign.
    Low,
    /// Mutates substrate-internal state.
    Medium,
    /// Reaches an external system or a model.
    High,
    /// Destructive or identity-affecting.
    Critical,
}

impl RiskClass {
    /// Returns `true` for [`RiskClass::High`] and above.
    ///
    /// Actions at or above this level require a valid capability token
    /// before the decision engine will allow them.
    #[must_use]
    pub fn requires_token(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

// ---------------------------------------------------------------------------
// ActionDef
// ---------------------------------------------------------------------------

/// One registered governed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ActionDef {
    /// Stable dotted identifier, e.g. `"tool.invoke"`.
    pub id: String,
    /// Risk classification.
    pub risk_class: RiskClass,
    /// Whether executing this action has externally observable side effects.
    pub side_effect: bool,
    /// Human-readable description.
    pub description: String,
    /// Always `true`; present so the wire form states it explicitly.
    pub requires_governance: bool,
}

impl ActionDef {
    fn new(id: &str, risk_class: RiskClass, side_effect: bool, description: &str) -> Self {
        Self {
            id: id.to_string(),
            risk_class,
            side_effect,
            description: description.to_string(),
            requires_governance: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The action ID is not present in the registry.
    #[error("unregistered action: {id}")]
    Unregistered {
        /// The offending action ID.
        id: String,
    },
    /// An action with the same ID was already registered.
    #[error("duplicate action: {id}")]
    Duplicate {
        /// The duplicated action ID.
        id: String,
    },
    /// The registry has been frozen; no further registration is possible.
    #[error("registry is frozen")]
    Frozen,
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Read-only-after-init table of [`ActionDef`]s.
///
/// Built once at boot via [`ActionRegistry::builtin`] (optionally extended
/// with [`register`](ActionRegistry::register) before [`freeze`](ActionRegistry::freeze))
/// and then shared without locks.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, ActionDef>,
    frozen: bool,
}

impl ActionRegistry {
    /// Create an empty, unfrozen registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical action table of the substrate, already frozen.
    #[must_use]
    pub fn builtin() -> Self {
        let mut r = Self::new();
        let defs = [
            ActionDef::new("governance.read", RiskClass::Low, false, "read governance metadata"),
            ActionDef::new("storage.read", RiskClass::Low, false, "read persisted state"),
            ActionDef::new("storage.write", RiskClass::Medium, true, "write persisted state"),
            ActionDef::new("model.call", RiskClass::High, true, "invoke an LLM adapter"),
            ActionDef::new("tool.invoke", RiskClass::High, true, "invoke a registered tool"),
            ActionDef::new("job.run", RiskClass::High, true, "start a checkpointed job"),
            ActionDef::new("job.resume", RiskClass::Medium, true, "resume a checkpointed job"),
            ActionDef::new("memory.node.create", RiskClass::Medium, true, "create a memory node"),
            ActionDef::new("memory.edge.create", RiskClass::Medium, true, "create a memory edge"),
            ActionDef::new(
                "memory.hyperedge.create",
                RiskClass::Medium,
                true,
                "create a memory hyperedge",
            ),
            ActionDef::new("beam.put", RiskClass::Medium, true, "create or replace a beam"),
            ActionDef::new("beam.retire", RiskClass::Medium, true, "retire an active beam"),
            ActionDef::new("beam.pin", RiskClass::Low, true, "pin an active beam"),
            ActionDef::new("beam.unpin", RiskClass::Low, true, "unpin an active beam"),
            ActionDef::new("beam.tombstone", RiskClass::Critical, true, "tombstone a beam"),
            ActionDef::new("beam.purge", RiskClass::Critical, true, "purge a tombstoned beam"),
        ];
        for def in defs {
            r.actions.insert(def.id.clone(), def);
        }
        r.frozen = true;
        r
    }

    /// Register an additional action. Only valid before [`freeze`](Self::freeze).
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Frozen`] after the registry is frozen.
    /// - [`RegistryError::Duplicate`] if the ID already exists.
    pub fn register(&mut self, def: ActionDef) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen);
        }
        if self.actions.contains_key(&def.id) {
            return Err(RegistryError::Duplicate { id: def.id });
        }
        self.actions.insert(def.id.clone(), def);
        Ok(())
    }

    /// Freeze the registry; further registration fails.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Look up an action definition.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ActionDef> {
        self.actions.get(id)
    }

    /// Validate that `id` is registered, failing closed otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unregistered`] for unknown IDs.
    pub fn validate(&self, id: &str) -> Result<&ActionDef, RegistryError> {
        self.actions
            .get(id)
            .ok_or_else(|| RegistryError::Unregistered { id: id.to_string() })
    }

    /// All actions in the given risk class, in ID order.
    #[must_use]
    pub fn list_by_risk(&self, class: RiskClass) -> Vec<&ActionDef> {
        self.actions
            .values()
            .filter(|d| d.risk_class == class)
            .collect()
    }

    /// Whether the action has side effects. Unknown IDs report `true`
    /// (fail closed).
    #[must_use]
    pub fn has_side_effects(&self, id: &str) -> bool {
        self.actions.get(id).is_none_or(|d| d.side_effect)
    }

    /// Total number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if no actions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Iterate over all definitions in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &ActionDef> {
        self.actions.values()
    }
}
