// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded ring of quarantined ingress rejections.
//!
//! Rejected payloads are retained for operator inspection, newest last.
//! When the ring is full the oldest entry is evicted; with a backing
//! directory configured, each entry is also written to
//! `quarantine/<id>.json` and evicted entries are deleted from disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// One quarantined rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Entry identifier (also the on-disk file stem).
    pub quarantine_id: Uuid,
    /// Endpoint the payload was submitted to.
    pub endpoint: String,
    /// When the payload was quarantined.
    pub stored_at: DateTime<Utc>,
    /// Violations that caused the rejection.
    pub violations: Vec<String>,
    /// Hash of the offending payload.
    pub payload_hash: String,
    /// The offending payload itself.
    pub payload: Value,
}

/// Bounded quarantine ring, optionally mirrored to disk.
#[derive(Debug)]
pub struct Quarantine {
    cap: usize,
    dir: Option<PathBuf>,
    ring: Mutex<VecDeque<QuarantineEntry>>,
}

impl Quarantine {
    /// Purely in-memory ring holding at most `cap` entries.
    #[must_use]
    pub fn in_memory(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            dir: None,
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Ring mirrored to `dir`, holding at most `cap` entries.
    #[must_use]
    pub fn on_disk(dir: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            dir: Some(dir.into()),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a rejection. Eviction of the oldest entry keeps the ring
    /// bounded.
    pub fn push(&self, endpoint: &str, payload: &Value, violations: &[String]) -> Uuid {
        let entry = QuarantineEntry {
            quarantine_id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            stored_at: Utc::now(),
            violations: violations.to_vec(),
            payload_hash: mzn_core::canonical_hash(payload)
                .unwrap_or_else(|_| mzn_core::sha256_hex(b"")),
            payload: payload.clone(),
        };
        let id = entry.quarantine_id;

        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{id}.json"));
            let write = std::fs::create_dir_all(dir).and_then(|()| {
                std::fs::write(
                    &path,
                    serde_json::to_vec_pretty(&entry).unwrap_or_default(),
                )
            });
            if let Err(e) = write {
                warn!(target: "mzn.cif", error = %e, "quarantine write failed");
            }
        }

        let mut ring = self.ring.lock().expect("quarantine lock poisoned");
        ring.push_back(entry);
        while ring.len() > self.cap {
            if let Some(evicted) = ring.pop_front() {
                if let Some(dir) = &self.dir {
                    let _ = std::fs::remove_file(dir.join(format!("{}.json", evicted.quarantine_id)));
                }
            }
        }
        id
    }

    /// Snapshot of retained entries, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<QuarantineEntry> {
        self.ring
            .lock()
            .expect("quarantine lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().expect("quarantine lock poisoned").len()
    }

    /// Returns `true` when the ring holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
