// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only JSONL receipt store.
//!
//! One receipt per line in `receipts.jsonl`. The file is opened in append
//! mode only; the store never rewrites an existing line, and a single mutex
//! serializes appends so the chain is totally ordered by acceptance.

use crate::{
    ChainError, Decision, Receipt, ReceiptBuilder, ReceiptSink, STAGE_SESSION_START, compute_hash,
    verify_chain, verify_chain_range,
};
use mzn_error::{MathisonError, ReasonCode};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

struct StoreState {
    last_hash: Option<String>,
    session_index: u64,
    count: usize,
}

/// File-backed append-only receipt store.
pub struct JsonlReceiptStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonlReceiptStore {
    /// Open (or create) the store at `path`, replaying the tail to recover
    /// the chain head.
    ///
    /// # Errors
    ///
    /// Surfaces unreadable or unparseable logs as [`MathisonError`]s.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MathisonError> {
        let path = path.into();
        let receipts = read_all(&path)?;
        let state = StoreState {
            last_hash: receipts.last().and_then(|r| r.this_hash.clone()),
            session_index: 0,
            count: receipts.len(),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Open the session chain: emit the synthetic `SESSION_START` receipt
    /// linking to `prev_terminal_hash` (the previous session's terminal
    /// hash, from the session registry).
    ///
    /// # Errors
    ///
    /// Propagates append failures.
    pub fn begin_session(
        &self,
        boot_key_id: &str,
        genome_id: &str,
        genome_version: &str,
        prev_terminal_hash: Option<String>,
    ) -> Result<Receipt, MathisonError> {
        let mut receipt = ReceiptBuilder::new("governance.read", Decision::Allow)
            .stage(STAGE_SESSION_START)
            .genome(genome_id, genome_version)
            .build(boot_key_id);
        {
            // Seed the chain head so the first append links correctly.
            let mut state = self.state.lock().expect("receipt store lock poisoned");
            state.session_index = 0;
            state.last_hash = prev_terminal_hash;
        }
        receipt = self.append_inner(receipt)?;
        info!(target: "mzn.receipt", boot_key_id, "session chain opened");
        Ok(receipt)
    }

    fn append_inner(&self, mut receipt: Receipt) -> Result<Receipt, MathisonError> {
        let mut state = self.state.lock().expect("receipt store lock poisoned");
        receipt.prev_receipt_hash = state.last_hash.clone();
        receipt.session_index = state.session_index;
        let hash = compute_hash(&receipt).map_err(|e| {
            MathisonError::new(ReasonCode::StageFailed, format!("receipt serialization: {e}"))
        })?;
        receipt.this_hash = Some(hash.clone());

        let line = serde_json::to_string(&receipt).map_err(|e| {
            MathisonError::new(ReasonCode::StageFailed, format!("receipt serialization: {e}"))
        })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(&self.path, &e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, &e))?;
        writeln!(file, "{line}").map_err(|e| io_error(&self.path, &e))?;

        state.last_hash = Some(hash);
        state.session_index += 1;
        state.count += 1;
        Ok(receipt)
    }

    /// Fetch a receipt by ID.
    ///
    /// # Errors
    ///
    /// Surfaces log read failures.
    pub fn get_by_id(&self, receipt_id: uuid::Uuid) -> Result<Option<Receipt>, MathisonError> {
        Ok(read_all(&self.path)?
            .into_iter()
            .find(|r| r.receipt_id == receipt_id))
    }

    /// All receipts for a job, in chain order.
    ///
    /// # Errors
    ///
    /// Surfaces log read failures.
    pub fn get_by_job(&self, job_id: &str) -> Result<Vec<Receipt>, MathisonError> {
        Ok(read_all(&self.path)?
            .into_iter()
            .filter(|r| r.job_id.as_deref() == Some(job_id))
            .collect())
    }

    /// All receipts, in chain order.
    ///
    /// # Errors
    ///
    /// Surfaces log read failures.
    pub fn all(&self) -> Result<Vec<Receipt>, MathisonError> {
        read_all(&self.path)
    }

    /// Verify the full chain end-to-end.
    ///
    /// # Errors
    ///
    /// The first [`ChainError`] found.
    pub fn verify(&self) -> Result<(), ChainError> {
        let receipts = read_all(&self.path).map_err(|_| ChainError::Empty)?;
        verify_chain(&receipts)
    }

    /// Verify the half-open index range `[from, to)` of the log.
    ///
    /// # Errors
    ///
    /// The first [`ChainError`] found.
    pub fn verify_range(&self, from: usize, to: usize) -> Result<(), ChainError> {
        let receipts = read_all(&self.path).map_err(|_| ChainError::Empty)?;
        verify_chain_range(&receipts, from, to)
    }

    /// Number of receipts appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("receipt store lock poisoned").count
    }

    /// Returns `true` when the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the most recently appended receipt.
    #[must_use]
    pub fn last_hash(&self) -> Option<String> {
        self.state
            .lock()
            .expect("receipt store lock poisoned")
            .last_hash
            .clone()
    }
}

impl ReceiptSink for JsonlReceiptStore {
    fn append(&self, receipt: Receipt) -> Result<Receipt, MathisonError> {
        self.append_inner(receipt)
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> MathisonError {
    MathisonError::new(
        ReasonCode::StageFailed,
        format!("receipt store io at {}: {e}", path.display()),
    )
}

fn read_all(path: &Path) -> Result<Vec<Receipt>, MathisonError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(path, &e)),
    };
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let receipt: Receipt = serde_json::from_str(line).map_err(|e| {
            MathisonError::new(
                ReasonCode::StageFailed,
                format!("receipt log line {} malformed: {e}", i + 1),
            )
        })?;
        out.push(receipt);
    }
    Ok(out)
}
