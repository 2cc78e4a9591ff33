// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tool gateway: the single chokepoint for all tool and adapter
//! invocations.
//!
//! Deny-by-default: a tool name that was never registered yields
//! `TOOL_NOT_REGISTERED`. Every invocation re-validates the capability token
//! against the tool's action and the calling actor (without consuming it —
//! the governed wrapper performs the one atomic consume per request), checks
//! required scopes, captures handler panics, and records the outcome in a
//! bounded invocation ring.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mzn_core::ActionRegistry;
use mzn_error::{MathisonError, ReasonCode};
use mzn_token::{CapabilityToken, TokenService, ValidateOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Maximum retained invocation records.
const INVOCATION_RING_CAP: usize = 256;

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Capability sub-scope a tool may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Outbound network access.
    Network,
    /// Filesystem access.
    Fs,
    /// LLM adapter access.
    Model,
    /// Memory graph access.
    Memory,
    /// Storage access.
    Storage,
    /// Job engine access.
    Job,
    /// Governance metadata access.
    Governance,
}

/// Extract the scopes granted by a token's `scopes` constraint.
fn granted_scopes(token: &CapabilityToken) -> Vec<Scope> {
    token
        .constraints
        .get("scopes")
        .and_then(|v| serde_json::from_value::<Vec<Scope>>(v.clone()).ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// A registered tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool against the given arguments.
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Blanket implementation so plain async closures work in tests and wiring.
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        (self.0)(args)
    }
}

struct ToolEntry {
    action_id: String,
    required_scopes: Vec<Scope>,
    handler: Arc<dyn ToolHandler>,
}

// ---------------------------------------------------------------------------
// Invocation ring
// ---------------------------------------------------------------------------

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Tool name.
    pub tool: String,
    /// Calling actor.
    pub actor: String,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Denial or failure reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_reason: Option<String>,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result shape returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeOutcome {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Tool output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Reason string on denial/failure, prefixed with the reason code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_reason: Option<String>,
}

impl InvokeOutcome {
    fn denied(err: &MathisonError) -> Self {
        Self {
            success: false,
            data: None,
            denied_reason: Some(format!("{}: {}", err.reason_code, err.message)),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// The deny-by-default tool registry and invocation chokepoint.
pub struct ToolGateway {
    registry: Arc<ActionRegistry>,
    tokens: Arc<TokenService>,
    tools: Mutex<BTreeMap<String, ToolEntry>>,
    invocations: Mutex<VecDeque<InvocationRecord>>,
}

impl ToolGateway {
    /// Create a gateway over the action registry and token service.
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>, tokens: Arc<TokenService>) -> Self {
        Self {
            registry,
            tokens,
            tools: Mutex::new(BTreeMap::new()),
            invocations: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// - [`ReasonCode::UnregisteredAction`] when `action_id` is unknown.
    /// - [`ReasonCode::ToolExecutionFailed`] when the name is already taken.
    pub fn register_tool(
        &self,
        name: impl Into<String>,
        action_id: impl Into<String>,
        required_scopes: Vec<Scope>,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), MathisonError> {
        let name = name.into();
        let action_id = action_id.into();
        self.registry
            .validate(&action_id)
            .map_err(|e| MathisonError::new(ReasonCode::UnregisteredAction, e.to_string()))?;
        let mut tools = self.tools.lock().expect("tool registry lock poisoned");
        if tools.contains_key(&name) {
            return Err(MathisonError::new(
                ReasonCode::ToolExecutionFailed,
                format!("tool '{name}' is already registered"),
            ));
        }
        debug!(target: "mzn.gateway", tool = %name, action = %action_id, "registered");
        tools.insert(
            name,
            ToolEntry {
                action_id,
                required_scopes,
                handler,
            },
        );
        Ok(())
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .lock()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Invoke a tool with a capability token.
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: Value,
        token: &CapabilityToken,
        actor: &str,
    ) -> InvokeOutcome {
        let started_at = Utc::now();
        let outcome = self.invoke_inner(tool_name, args, token, actor).await;
        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;

        let record = InvocationRecord {
            tool: tool_name.to_string(),
            actor: actor.to_string(),
            success: outcome.success,
            denied_reason: outcome.denied_reason.clone(),
            started_at,
            duration_ms,
        };
        let mut ring = self.invocations.lock().expect("invocation ring lock poisoned");
        ring.push_back(record);
        while ring.len() > INVOCATION_RING_CAP {
            ring.pop_front();
        }
        outcome
    }

    async fn invoke_inner(
        &self,
        tool_name: &str,
        args: Value,
        token: &CapabilityToken,
        actor: &str,
    ) -> InvokeOutcome {
        let (action_id, required_scopes, handler) = {
            let tools = self.tools.lock().expect("tool registry lock poisoned");
            match tools.get(tool_name) {
                Some(entry) => (
                    entry.action_id.clone(),
                    entry.required_scopes.clone(),
                    Arc::clone(&entry.handler),
                ),
                None => {
                    warn!(target: "mzn.gateway", tool = tool_name, "not registered");
                    return InvokeOutcome::denied(&MathisonError::new(
                        ReasonCode::ToolNotRegistered,
                        format!("tool '{tool_name}' is not registered"),
                    ));
                }
            }
        };

        // Re-validate without consuming; the governed wrapper owns the one
        // atomic consume per request.
        if let Err(err) = self.tokens.validate(
            token,
            &ValidateOptions {
                expected_action_id: &action_id,
                expected_actor: actor,
                increment_use: false,
            },
        ) {
            return InvokeOutcome::denied(&err);
        }

        if !required_scopes.is_empty() {
            let granted = granted_scopes(token);
            let missing: Vec<&Scope> = required_scopes
                .iter()
                .filter(|s| !granted.contains(s))
                .collect();
            if !missing.is_empty() {
                return InvokeOutcome::denied(&MathisonError::new(
                    ReasonCode::CapabilityDenied,
                    format!("token lacks required scopes: {missing:?}"),
                ));
            }
        }

        // Run the handler in its own task so a panic is contained as a
        // JoinError rather than unwinding through the gateway.
        let joined = tokio::spawn(async move { handler.call(args).await }).await;
        match joined {
            Ok(Ok(data)) => InvokeOutcome {
                success: true,
                data: Some(data),
                denied_reason: None,
            },
            Ok(Err(e)) => {
                // A handler that failed with a substrate error keeps its
                // stable reason code on the wire.
                let err = match e.downcast::<MathisonError>() {
                    Ok(inner) => inner,
                    Err(other) => MathisonError::new(
                        ReasonCode::ToolExecutionFailed,
                        format!("tool '{tool_name}' failed: {other}"),
                    ),
                };
                InvokeOutcome::denied(&err)
            }
            Err(join_err) => {
                let detail = if join_err.is_panic() {
                    "handler panicked"
                } else {
                    "handler task cancelled"
                };
                warn!(target: "mzn.gateway", tool = tool_name, detail, "execution failure");
                InvokeOutcome::denied(&MathisonError::new(
                    ReasonCode::ToolExecutionFailed,
                    format!("tool '{tool_name}': {detail}"),
                ))
            }
        }
    }

    /// Snapshot of the invocation ring, oldest first.
    #[must_use]
    pub fn invocations(&self) -> Vec<InvocationRecord> {
        self.invocations
            .lock()
            .expect("invocation ring lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
