// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability tokens: short-lived, single-use bearer credentials scoping one
//! governed action.
//!
//! Tokens are signed with the ephemeral boot key, so a token minted in a
//! prior boot session can never validate in the current one. Consumption is
//! atomic: a check-and-set against the replay ledger, keyed by
//! `(boot_key_id, token_id)`, under a single lock.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use mzn_boot::BootKey;
use mzn_core::ActionRegistry;
use mzn_error::{MathisonError, ReasonCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// How long a spent-token ledger entry outlives the token itself, so that
/// late replays of a just-expired token still answer `TOKEN_REPLAYED`
/// rather than silently vanishing.
const LEDGER_GRACE_MS: i64 = 60_000;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A minted capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// Unique token identifier.
    pub token_id: Uuid,
    /// Action this token authorizes.
    pub action_id: String,
    /// Actor the token was minted for.
    pub actor: String,
    /// Mint timestamp.
    pub issued_at: DateTime<Utc>,
    /// Expiry timestamp, checked against the wall clock at consume time.
    pub expires_at: DateTime<Utc>,
    /// Maximum number of valid consumptions (1 for single-use).
    pub max_uses: u32,
    /// Free-form scoping constraints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, serde_json::Value>,
    /// Boot session the token belongs to.
    pub boot_key_id: String,
    /// Hex HMAC-SHA256 over the canonical token body.
    pub signature: String,
}

impl CapabilityToken {
    /// The canonical byte string the signature covers (everything except the
    /// signature itself).
    fn signing_payload(&self) -> Vec<u8> {
        let body = serde_json::json!({
            "token_id": self.token_id,
            "action_id": self.action_id,
            "actor": self.actor,
            "issued_at": self.issued_at,
            "expires_at": self.expires_at,
            "max_uses": self.max_uses,
            "constraints": self.constraints,
            "boot_key_id": self.boot_key_id,
        });
        mzn_core::canonical_string(&body)
            .expect("token body serializes")
            .into_bytes()
    }
}

/// Parameters for [`TokenService::mint`].
#[derive(Debug, Clone)]
pub struct MintRequest {
    /// Action to authorize.
    pub action_id: String,
    /// Actor the token is for.
    pub actor: String,
    /// Time to live in milliseconds (negative values mint already-expired
    /// tokens, used by expiry tests).
    pub ttl_ms: i64,
    /// Maximum consumptions; defaults to 1.
    pub max_uses: u32,
    /// Scoping constraints.
    pub constraints: BTreeMap<String, serde_json::Value>,
}

impl MintRequest {
    /// Single-use request with the given action, actor, and TTL.
    #[must_use]
    pub fn single_use(action_id: impl Into<String>, actor: impl Into<String>, ttl_ms: i64) -> Self {
        Self {
            action_id: action_id.into(),
            actor: actor.into(),
            ttl_ms,
            max_uses: 1,
            constraints: BTreeMap::new(),
        }
    }
}

/// Parameters for [`TokenService::validate`].
#[derive(Debug, Clone)]
pub struct ValidateOptions<'a> {
    /// Action the call site expects the token to carry.
    pub expected_action_id: &'a str,
    /// Actor the call site expects.
    pub expected_actor: &'a str,
    /// When `true`, atomically consume one use from the replay ledger.
    pub increment_use: bool,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LedgerEntry {
    uses: u32,
    expires_at: DateTime<Utc>,
}

/// Mints and validates capability tokens for the current boot session.
pub struct TokenService {
    boot_key: Arc<BootKey>,
    registry: Arc<ActionRegistry>,
    ledger: Mutex<HashMap<(String, Uuid), LedgerEntry>>,
}

impl TokenService {
    /// Create a service bound to the current boot key and action registry.
    #[must_use]
    pub fn new(boot_key: Arc<BootKey>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            boot_key,
            registry,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a token.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::UnregisteredAction`] when the action is unknown.
    pub fn mint(&self, request: MintRequest) -> Result<CapabilityToken, MathisonError> {
        self.registry.validate(&request.action_id).map_err(|e| {
            MathisonError::new(ReasonCode::UnregisteredAction, e.to_string())
        })?;

        let issued_at = Utc::now();
        let mut token = CapabilityToken {
            token_id: Uuid::new_v4(),
            action_id: request.action_id,
            actor: request.actor,
            issued_at,
            expires_at: issued_at + Duration::milliseconds(request.ttl_ms),
            max_uses: request.max_uses.max(1),
            constraints: request.constraints,
            boot_key_id: self.boot_key.key_id().to_string(),
            signature: String::new(),
        };
        token.signature = self.boot_key.sign_hex(&token.signing_payload());
        debug!(target: "mzn.token", token_id = %token.token_id, action = %token.action_id, "minted");
        Ok(token)
    }

    /// Validate a token against the current session and, optionally, consume
    /// one use.
    ///
    /// Checks, in order: boot-session match, signature, expiry (wall clock
    /// now, not mint time), action binding, actor binding, replay ledger.
    ///
    /// # Errors
    ///
    /// - [`ReasonCode::CapabilityDenied`] for any binding/expiry/signature
    ///   failure.
    /// - [`ReasonCode::TokenReplayed`] when `increment_use` finds the token
    ///   already spent.
    pub fn validate(
        &self,
        token: &CapabilityToken,
        opts: &ValidateOptions<'_>,
    ) -> Result<(), MathisonError> {
        if token.boot_key_id != self.boot_key.key_id() {
            return Err(MathisonError::new(
                ReasonCode::CapabilityDenied,
                "token was minted in a different boot session",
            )
            .with_context("token_session", token.boot_key_id.clone()));
        }
        if !self
            .boot_key
            .verify_hex(&token.signing_payload(), &token.signature)
        {
            return Err(MathisonError::new(
                ReasonCode::CapabilityDenied,
                "token signature invalid",
            ));
        }
        let now = Utc::now();
        if now > token.expires_at {
            return Err(MathisonError::new(
                ReasonCode::CapabilityDenied,
                format!("token expired at {}", token.expires_at.to_rfc3339()),
            ));
        }
        if token.action_id != opts.expected_action_id {
            return Err(MathisonError::new(
                ReasonCode::CapabilityDenied,
                format!(
                    "token is scoped to action '{}', call site expects '{}'",
                    token.action_id, opts.expected_action_id
                ),
            ));
        }
        if token.actor != opts.expected_actor {
            return Err(MathisonError::new(
                ReasonCode::CapabilityDenied,
                format!(
                    "token is bound to actor '{}', call site expects '{}'",
                    token.actor, opts.expected_actor
                ),
            ));
        }

        if opts.increment_use {
            let key = (token.boot_key_id.clone(), token.token_id);
            let mut ledger = self.ledger.lock().expect("token ledger lock poisoned");
            let entry = ledger.entry(key).or_insert(LedgerEntry {
                uses: 0,
                expires_at: token.expires_at + Duration::milliseconds(LEDGER_GRACE_MS),
            });
            if entry.uses >= token.max_uses {
                return Err(MathisonError::new(
                    ReasonCode::TokenReplayed,
                    "token already consumed",
                )
                .with_context("token_id", token.token_id.to_string()));
            }
            entry.uses += 1;
            debug!(target: "mzn.token", token_id = %token.token_id, uses = entry.uses, "consumed");
        }
        Ok(())
    }

    /// Remove ledger entries past their grace window. Returns the number
    /// purged.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut ledger = self.ledger.lock().expect("token ledger lock poisoned");
        let before = ledger.len();
        ledger.retain(|_, entry| entry.expires_at > now);
        before - ledger.len()
    }

    /// Number of live ledger entries.
    #[must_use]
    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().expect("token ledger lock poisoned").len()
    }
}

/// Spawn the periodic ledger sweeper.
pub fn spawn_sweeper(
    service: Arc<TokenService>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let purged = service.sweep();
            if purged > 0 {
                debug!(target: "mzn.token", purged, "ledger sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            Arc::new(BootKey::generate()),
            Arc::new(ActionRegistry::builtin()),
        )
    }

    fn opts<'a>(action: &'a str, actor: &'a str, consume: bool) -> ValidateOptions<'a> {
        ValidateOptions {
            expected_action_id: action,
            expected_actor: actor,
            increment_use: consume,
        }
    }

    #[test]
    fn mint_and_validate() {
        let svc = service();
        let token = svc
            .mint(MintRequest::single_use("tool.invoke", "agent-1", 60_000))
            .unwrap();
        assert_eq!(token.max_uses, 1);
        svc.validate(&token, &opts("tool.invoke", "agent-1", false))
            .unwrap();
    }

    #[test]
    fn unregistered_action_cannot_mint() {
        let svc = service();
        let err = svc
            .mint(MintRequest::single_use("nope", "agent-1", 1000))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::UnregisteredAction);
    }

    #[test]
    fn expired_token_denied() {
        let svc = service();
        let token = svc
            .mint(MintRequest::single_use("tool.invoke", "agent-1", -1000))
            .unwrap();
        let err = svc
            .validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::CapabilityDenied);
        assert!(err.message.contains("expired"));
    }

    #[test]
    fn second_consume_is_replayed() {
        let svc = service();
        let token = svc
            .mint(MintRequest::single_use("tool.invoke", "agent-1", 60_000))
            .unwrap();
        svc.validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap();
        let err = svc
            .validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::TokenReplayed);
    }

    #[test]
    fn non_consuming_validate_does_not_spend() {
        let svc = service();
        let token = svc
            .mint(MintRequest::single_use("tool.invoke", "agent-1", 60_000))
            .unwrap();
        for _ in 0..3 {
            svc.validate(&token, &opts("tool.invoke", "agent-1", false))
                .unwrap();
        }
        // The single allowed consumption is still available.
        svc.validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap();
    }

    #[test]
    fn multi_use_token_consumes_up_to_max() {
        let svc = service();
        let mut req = MintRequest::single_use("tool.invoke", "agent-1", 60_000);
        req.max_uses = 3;
        let token = svc.mint(req).unwrap();
        for _ in 0..3 {
            svc.validate(&token, &opts("tool.invoke", "agent-1", true))
                .unwrap();
        }
        let err = svc
            .validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::TokenReplayed);
    }

    #[test]
    fn action_mismatch_denied() {
        let svc = service();
        let token = svc
            .mint(MintRequest::single_use("tool.invoke", "agent-1", 60_000))
            .unwrap();
        let err = svc
            .validate(&token, &opts("model.call", "agent-1", true))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::CapabilityDenied);
        assert!(err.message.contains("scoped to action"));
    }

    #[test]
    fn actor_mismatch_denied() {
        let svc = service();
        let token = svc
            .mint(MintRequest::single_use("tool.invoke", "agent-1", 60_000))
            .unwrap();
        let err = svc
            .validate(&token, &opts("tool.invoke", "agent-2", true))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::CapabilityDenied);
    }

    #[test]
    fn tampered_token_fails_signature() {
        let svc = service();
        let mut token = svc
            .mint(MintRequest::single_use("tool.invoke", "agent-1", 60_000))
            .unwrap();
        token.actor = "agent-1".to_string();
        token.max_uses = 100;
        let err = svc
            .validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap_err();
        assert!(err.message.contains("signature"));
    }

    #[test]
    fn prior_session_token_rejected() {
        let old = service();
        let token = old
            .mint(MintRequest::single_use("tool.invoke", "agent-1", 60_000))
            .unwrap();
        // New boot session: fresh key, same registry.
        let current = service();
        let err = current
            .validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::CapabilityDenied);
        assert!(err.message.contains("different boot session"));
    }

    #[test]
    fn sweep_purges_expired_entries() {
        let svc = service();
        let mut req = MintRequest::single_use("tool.invoke", "agent-1", 50);
        req.max_uses = 1;
        let token = svc.mint(req).unwrap();
        svc.validate(&token, &opts("tool.invoke", "agent-1", true))
            .unwrap();
        assert_eq!(svc.ledger_len(), 1);
        // Within the grace window nothing is purged.
        assert_eq!(svc.sweep(), 0);
        // Force the entry past its grace deadline.
        {
            let mut ledger = svc.ledger.lock().unwrap();
            for entry in ledger.values_mut() {
                entry.expires_at = Utc::now() - Duration::milliseconds(1);
            }
        }
        assert_eq!(svc.sweep(), 1);
        assert_eq!(svc.ledger_len(), 0);
    }

    #[tokio::test]
    async fn sweeper_task_runs() {
        let svc = Arc::new(service());
        let handle = spawn_sweeper(svc.clone(), std::time::Duration::from_millis(5));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.abort();
    }

    #[test]
    fn token_serde_roundtrip() {
        let svc = service();
        let token = svc
            .mint(MintRequest::single_use("job.run", "cli", 1000))
            .unwrap();
        let json = serde_json::to_string(&token).unwrap();
        let back: CapabilityToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
