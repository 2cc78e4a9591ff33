// SPDX-License-Identifier: MIT OR Apache-2.0
//! Governed beam lifecycle operations, shared by the HTTP routes and the
//! CLI.
//!
//! Each of the six lifecycle operations runs inside the governed pipeline.
//! The handler's decision context is computed from the store's live state
//! (beam kind, daily budget, incident lockdown), so the decision engine's
//! approval and lockdown rules evaluate against reality before the handler
//! ever touches the store. The handler itself reaches the store only through
//! its gateway tool, keeping the gateway the single mutation chokepoint.

use crate::runtime::Runtime;
use async_trait::async_trait;
use mzn_beamstore::BeamOp;
use mzn_error::{MathisonError, ReasonCode};
use mzn_governor::{
    CdiContext, DeniedResponse, GovernedHandler, GovernedResponse, HandlerContext,
    TombstoneContext,
};
use mzn_token::MintRequest;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Action (and identically-named gateway tool) per lifecycle operation.
pub(crate) fn action_for(op: &BeamOp) -> &'static str {
    match op {
        BeamOp::Put => "beam.put",
        BeamOp::Retire => "beam.retire",
        BeamOp::Pin => "beam.pin",
        BeamOp::Unpin => "beam.unpin",
        BeamOp::Tombstone => "beam.tombstone",
        BeamOp::Purge => "beam.purge",
    }
}

struct BeamOpHandler {
    runtime: Arc<Runtime>,
    op: BeamOp,
}

#[async_trait]
impl GovernedHandler for BeamOpHandler {
    fn action_id(&self) -> &str {
        action_for(&self.op)
    }

    fn decision_context(&self, body: &Value) -> CdiContext {
        let mut ctx = CdiContext {
            approval_ref: body
                .get("approval_ref")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            ..CdiContext::default()
        };
        let beams = self.runtime.beams.lock().expect("beam store lock poisoned");
        ctx.incident_mode = beams.incident_locked();
        if matches!(self.op, BeamOp::Tombstone | BeamOp::Purge) {
            // An unknown beam counts as unprotected; the store rejects the
            // missing target itself.
            let protected_kind = body
                .get("beam_id")
                .and_then(Value::as_str)
                .and_then(|id| beams.get(id))
                .map(|beam| beam.kind.is_protected())
                .unwrap_or(false);
            ctx.tombstone = Some(TombstoneContext {
                protected_kind,
                over_daily_budget: beams.over_soft_budget(),
            });
        }
        ctx
    }

    async fn handle(&self, mut body: Value, ctx: &HandlerContext) -> Result<Value, MathisonError> {
        if let Value::Object(map) = &mut body {
            map.insert(
                "op".to_string(),
                serde_json::to_value(&self.op).unwrap_or(Value::Null),
            );
        }
        let token = ctx.token.as_ref().ok_or_else(|| {
            MathisonError::new(
                ReasonCode::CapabilityDenied,
                "beam operations require a capability token",
            )
        })?;
        let tool = action_for(&self.op);
        let out = self
            .runtime
            .gateway
            .invoke(tool, body, token, &ctx.actor)
            .await;
        if out.success {
            return Ok(out.data.unwrap_or(Value::Null));
        }
        let reason = out
            .denied_reason
            .unwrap_or_else(|| "beam operation failed".to_string());
        let code = reason
            .split(':')
            .next()
            .and_then(|s| ReasonCode::parse(s.trim()))
            .unwrap_or(ReasonCode::ToolExecutionFailed);
        Err(MathisonError::new(code, reason))
    }
}

/// Run one governed beam lifecycle operation.
///
/// Mints the per-request token for the operation's action (scoped to
/// storage, as the gateway tools require) and runs the full pipeline.
///
/// # Errors
///
/// The pipeline's [`DeniedResponse`] on any stage denial.
pub async fn apply(
    runtime: &Arc<Runtime>,
    op: BeamOp,
    body: Value,
    actor: &str,
) -> Result<GovernedResponse, DeniedResponse> {
    let action = action_for(&op);
    let ttl = runtime.config.timeouts.request_ms as i64 + 5_000;
    let mut mint = MintRequest::single_use(action, actor, ttl);
    mint.constraints.insert("scopes".into(), json!(["storage"]));
    let token = match runtime.tokens.mint(mint) {
        Ok(t) => t,
        Err(error) => {
            return Err(DeniedResponse {
                request_id: Uuid::new_v4(),
                error,
                receipt: None,
            });
        }
    };
    let handler = BeamOpHandler {
        runtime: Arc::clone(runtime),
        op,
    };
    runtime
        .governor
        .govern(&handler, body, Some(&token), actor)
        .await
}
