// SPDX-License-Identifier: MIT OR Apache-2.0
//! First-class registry of route bindings.
//!
//! Each externally reachable route (HTTP or CLI) is recorded here together
//! with the action it maps to and whether it is wired through the governed
//! pipeline. The no-bypass conformance check iterates this registry
//! structurally instead of scanning source text.

use serde::{Deserialize, Serialize};

/// One route binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBinding {
    /// HTTP method or `"CLI"`.
    pub method: String,
    /// Route path, e.g. `"/jobs/run"`.
    pub path: String,
    /// Registered action the route executes.
    pub action_id: String,
    /// `true` when the route is wired through the governed wrapper.
    pub governed: bool,
}

/// Registry of all route bindings in the process.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: Vec<RouteBinding>,
}

impl RouteRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a route binding.
    pub fn bind(
        &mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        action_id: impl Into<String>,
        governed: bool,
    ) {
        self.routes.push(RouteBinding {
            method: method.into(),
            path: path.into(),
            action_id: action_id.into(),
            governed,
        });
    }

    /// All recorded bindings, in registration order.
    #[must_use]
    pub fn routes(&self) -> &[RouteBinding] {
        &self.routes
    }

    /// Bindings that are not wired through the governed pipeline.
    ///
    /// A non-empty result is a conformance failure for any route whose
    /// action has side effects.
    #[must_use]
    pub fn ungoverned(&self) -> Vec<&RouteBinding> {
        self.routes.iter().filter(|r| !r.governed).collect()
    }

    /// Look up a binding by method and path.
    #[must_use]
    pub fn find(&self, method: &str, path: &str) -> Option<&RouteBinding> {
        self.routes
            .iter()
            .find(|r| r.method == method && r.path == path)
    }
}
