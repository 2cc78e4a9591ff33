// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded, hash-chained log sink.
//!
//! Envelopes are retained in a ring capped by both count and aggregate
//! bytes. On overflow the sink applies retention instead of blocking: the
//! oldest envelope with a droppable severity is evicted; if none exists and
//! the incoming envelope's severity is blockable, the append is rejected
//! with `DURABLE_LOGGING_REQUIRED`. The hash chain never resets except at
//! an explicit [`LogSink::clear`] (tests only).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use mzn_error::{MathisonError, ReasonCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Envelope severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Routine events.
    Info,
    /// Unexpected but recoverable.
    Warn,
    /// Failures.
    Error,
    /// Failures that must not be lost.
    Critical,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A chained log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEnvelope {
    /// Unique envelope identifier.
    pub envelope_id: Uuid,
    /// When the envelope was appended.
    pub timestamp: DateTime<Utc>,
    /// Emitting node.
    pub node_id: String,
    /// Subject (job, request, beam, …) the event concerns.
    pub subject_id: String,
    /// Event type tag.
    pub event_type: String,
    /// Severity.
    pub severity: Severity,
    /// One-line summary.
    pub summary: String,
    /// Optional pointer to externally stored detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details_ref: Option<String>,
    /// Hash of the previous envelope in the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_prev_hash: Option<String>,
    /// This envelope's hash over its canonical fields.
    pub hash: String,
}

/// Fields supplied by the caller; identity, chaining, and hashing are filled
/// by the sink.
#[derive(Debug, Clone)]
pub struct EnvelopeDraft {
    /// Emitting node.
    pub node_id: String,
    /// Subject the event concerns.
    pub subject_id: String,
    /// Event type tag.
    pub event_type: String,
    /// Severity.
    pub severity: Severity,
    /// One-line summary.
    pub summary: String,
    /// Optional detail pointer.
    pub details_ref: Option<String>,
}

impl EnvelopeDraft {
    /// Convenience constructor for the common fields.
    #[must_use]
    pub fn new(
        severity: Severity,
        event_type: impl Into<String>,
        subject_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            node_id: "mathison".to_string(),
            subject_id: subject_id.into(),
            event_type: event_type.into(),
            severity,
            summary: summary.into(),
            details_ref: None,
        }
    }
}

fn envelope_hash(envelope: &LogEnvelope) -> String {
    let mut v = serde_json::to_value(envelope).expect("envelope serializes");
    if let serde_json::Value::Object(map) = &mut v {
        map.insert("hash".to_string(), serde_json::Value::Null);
    }
    let canonical = mzn_core::canonical_string(&v).expect("envelope serializes");
    mzn_core::sha256_hex(canonical.as_bytes())
}

/// Verify an envelope's stored hash.
#[must_use]
pub fn verify_envelope(envelope: &LogEnvelope) -> bool {
    envelope.hash == envelope_hash(envelope)
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Which severities may be dropped and which must block on overflow.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Severities eligible for eviction when caps are exceeded.
    pub drop_on_overflow: Vec<Severity>,
    /// Severities whose append must fail rather than be lost.
    pub block_on_overflow: Vec<Severity>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            drop_on_overflow: vec![Severity::Debug, Severity::Info],
            block_on_overflow: vec![Severity::Error, Severity::Critical],
        }
    }
}

/// What happened to an appended envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored; zero or more older envelopes were evicted to make room.
    Stored {
        /// The stored envelope.
        envelope: LogEnvelope,
        /// IDs of evicted envelopes.
        evicted: Vec<Uuid>,
    },
    /// The new envelope itself was discarded (droppable severity, no room).
    DroppedNew,
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

struct SinkState {
    ring: VecDeque<(LogEnvelope, usize)>,
    pending_bytes: usize,
    chain_head: Option<String>,
}

/// The bounded hash-chained sink.
pub struct LogSink {
    max_envelopes: usize,
    max_pending_bytes: usize,
    policy: RetentionPolicy,
    state: Mutex<SinkState>,
}

impl LogSink {
    /// Create a sink with the given caps and the default retention policy.
    #[must_use]
    pub fn new(max_envelopes: usize, max_pending_bytes: usize) -> Self {
        Self::with_policy(max_envelopes, max_pending_bytes, RetentionPolicy::default())
    }

    /// Create a sink with an explicit retention policy.
    #[must_use]
    pub fn with_policy(
        max_envelopes: usize,
        max_pending_bytes: usize,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            max_envelopes: max_envelopes.max(1),
            max_pending_bytes: max_pending_bytes.max(1),
            policy,
            state: Mutex::new(SinkState {
                ring: VecDeque::new(),
                pending_bytes: 0,
                chain_head: None,
            }),
        }
    }

    /// Append an envelope, applying retention.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::DurableLoggingRequired`] when the caps are exceeded, no
    /// droppable envelope exists, and the new envelope's severity is in the
    /// block list.
    pub fn append(&self, draft: EnvelopeDraft) -> Result<AppendOutcome, MathisonError> {
        let mut state = self.state.lock().expect("log sink lock poisoned");

        let mut envelope = LogEnvelope {
            envelope_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            node_id: draft.node_id,
            subject_id: draft.subject_id,
            event_type: draft.event_type,
            severity: draft.severity,
            summary: draft.summary,
            details_ref: draft.details_ref,
            chain_prev_hash: state.chain_head.clone(),
            hash: String::new(),
        };
        envelope.hash = envelope_hash(&envelope);
        let size = serde_json::to_string(&envelope).map(|s| s.len()).unwrap_or(0);

        let mut evicted = Vec::new();
        while state.ring.len() + 1 > self.max_envelopes
            || state.pending_bytes + size > self.max_pending_bytes
        {
            let oldest_droppable = state
                .ring
                .iter()
                .position(|(e, _)| self.policy.drop_on_overflow.contains(&e.severity));
            match oldest_droppable {
                Some(pos) => {
                    if let Some((dropped, dropped_size)) = state.ring.remove(pos) {
                        state.pending_bytes -= dropped_size;
                        evicted.push(dropped.envelope_id);
                    }
                }
                None => {
                    if self.policy.block_on_overflow.contains(&envelope.severity) {
                        return Err(MathisonError::new(
                            ReasonCode::DurableLoggingRequired,
                            "log sink full and no droppable envelope available",
                        ));
                    }
                    // Nothing evictable and the new envelope is not
                    // blockable: discard the newcomer.
                    return Ok(AppendOutcome::DroppedNew);
                }
            }
        }

        // The chain advances even across evictions; only Clear resets it.
        state.chain_head = Some(envelope.hash.clone());
        state.pending_bytes += size;
        state.ring.push_back((envelope.clone(), size));
        Ok(AppendOutcome::Stored { envelope, evicted })
    }

    /// Remove and return up to `n` oldest envelopes for upstream transport.
    pub fn flush(&self, n: usize) -> Vec<LogEnvelope> {
        let mut state = self.state.lock().expect("log sink lock poisoned");
        let take = n.min(state.ring.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some((envelope, size)) = state.ring.pop_front() {
                state.pending_bytes -= size;
                out.push(envelope);
            }
        }
        out
    }

    /// Retained envelopes, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEnvelope> {
        self.state
            .lock()
            .expect("log sink lock poisoned")
            .ring
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Number of retained envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("log sink lock poisoned").ring.len()
    }

    /// Returns `true` when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate retained bytes.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.state
            .lock()
            .expect("log sink lock poisoned")
            .pending_bytes
    }

    /// Drop everything and reset the chain. Test use only.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("log sink lock poisoned");
        state.ring.clear();
        state.pending_bytes = 0;
        state.chain_head = None;
    }
}
