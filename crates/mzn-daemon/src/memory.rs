// SPDX-License-Identifier: MIT OR Apache-2.0
//! Governed memory-graph writes: nodes, edges, hyperedges.
//!
//! The search index over this graph is an external collaborator; this module
//! only provides the governed, idempotent write path and file-backed
//! persistence (`memory.jsonl`, append-only like the receipt log).

use chrono::{DateTime, Utc};
use mzn_error::{MathisonError, ReasonCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Kind of memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A node.
    Node,
    /// A binary edge.
    Edge,
    /// An n-ary hyperedge.
    Hyperedge,
}

/// One persisted memory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Record identifier.
    pub id: String,
    /// Node / edge / hyperedge.
    pub kind: MemoryKind,
    /// Caller-declared type tag.
    pub record_type: String,
    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Write request for any memory record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryWrite {
    /// Idempotency key; resubmission replays the original result.
    pub idempotency_key: String,
    /// Explicit record ID; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Caller-declared type tag.
    #[serde(rename = "type")]
    pub record_type: String,
    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Result of a write: the record plus whether it was created now.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryOutcome {
    /// The stored record.
    pub record: MemoryRecord,
    /// `false` when the idempotency key replayed an earlier write.
    pub created: bool,
}

/// Append-only, idempotent memory store.
pub struct MemoryStore {
    path: PathBuf,
    state: Mutex<MemoryState>,
    receipts: Mutex<BTreeMap<String, Value>>,
}

struct MemoryState {
    by_idempotency_key: BTreeMap<String, MemoryRecord>,
    count: usize,
}

impl MemoryStore {
    /// Open the store at `path` (typically `<store>/memory.jsonl`),
    /// replaying prior writes to rebuild the idempotency map.
    ///
    /// # Errors
    ///
    /// Storage failures as [`MathisonError`]s.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MathisonError> {
        let path = path.into();
        let mut by_idempotency_key = BTreeMap::new();
        let mut count = 0;
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    let entry: PersistedLine = serde_json::from_str(line).map_err(|e| {
                        MathisonError::new(
                            ReasonCode::StageFailed,
                            format!("memory log malformed: {e}"),
                        )
                    })?;
                    by_idempotency_key.insert(entry.idempotency_key, entry.record);
                    count += 1;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MathisonError::new(
                    ReasonCode::StageFailed,
                    format!("memory log read {}: {e}", path.display()),
                ));
            }
        }
        Ok(Self {
            path,
            state: Mutex::new(MemoryState {
                by_idempotency_key,
                count,
            }),
            receipts: Mutex::new(BTreeMap::new()),
        })
    }

    /// Remember the receipt that committed a key's original write, so a
    /// replayed submission can return it.
    pub fn bind_receipt(&self, idempotency_key: &str, receipt: Value) {
        self.receipts
            .lock()
            .expect("memory receipt map lock poisoned")
            .insert(idempotency_key.to_string(), receipt);
    }

    /// The receipt bound to a key's original write, if known this session.
    #[must_use]
    pub fn prior_receipt(&self, idempotency_key: &str) -> Option<Value> {
        self.receipts
            .lock()
            .expect("memory receipt map lock poisoned")
            .get(idempotency_key)
            .cloned()
    }

    /// Apply a write; a repeated idempotency key replays the original record
    /// without side effect.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::MalformedRequest`] for an empty key; storage failures
    /// as [`ReasonCode::StageFailed`].
    pub fn write(&self, kind: MemoryKind, request: &MemoryWrite) -> Result<MemoryOutcome, MathisonError> {
        if request.idempotency_key.trim().is_empty() {
            return Err(MathisonError::new(
                ReasonCode::MalformedRequest,
                "idempotency_key is required",
            ));
        }
        let mut state = self.state.lock().expect("memory store lock poisoned");
        if let Some(existing) = state.by_idempotency_key.get(&request.idempotency_key) {
            return Ok(MemoryOutcome {
                record: existing.clone(),
                created: false,
            });
        }
        let record = MemoryRecord {
            id: request.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind,
            record_type: request.record_type.clone(),
            data: request.data.clone(),
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        };
        let line = serde_json::to_string(&PersistedLine {
            idempotency_key: request.idempotency_key.clone(),
            record: record.clone(),
        })
        .map_err(|e| MathisonError::new(ReasonCode::StageFailed, format!("memory serialize: {e}")))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MathisonError::new(ReasonCode::StageFailed, format!("memory dir: {e}"))
            })?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MathisonError::new(ReasonCode::StageFailed, format!("memory open: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| MathisonError::new(ReasonCode::StageFailed, format!("memory write: {e}")))?;

        state
            .by_idempotency_key
            .insert(request.idempotency_key.clone(), record.clone());
        state.count += 1;
        Ok(MemoryOutcome {
            record,
            created: true,
        })
    }

    /// Number of persisted records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("memory store lock poisoned").count
    }

    /// Returns `true` when no records are persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedLine {
    idempotency_key: String,
    record: MemoryRecord,
}
