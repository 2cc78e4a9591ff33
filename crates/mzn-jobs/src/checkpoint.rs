// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistent per-job checkpoints.
//!
//! One JSON file per job under `checkpoints/`, replaced atomically
//! (write-temp-then-rename) on every update. `completed_stages` is the
//! canonical completion record; `stage_outputs` must cover exactly that set,
//! and a divergence on load fails closed as `CHECKPOINT_CORRUPT`.

use chrono::{DateTime, Utc};
use mzn_error::{MathisonError, ReasonCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, nothing run yet.
    Pending,
    /// A stage is executing.
    InProgress,
    /// All stages completed.
    Completed,
    /// Terminal failure; resume is not possible.
    Failed,
    /// Interrupted by timeout or stage error; resume retries the rest.
    ResumableFailure,
}

impl JobStatus {
    /// Returns `true` for states no transition may leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Output of one completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Hex SHA-256 of the canonical payload.
    pub content_hash: String,
    /// The stage's output payload.
    pub payload: Value,
}

impl StageOutput {
    /// Build an output, hashing the payload canonically.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        let content_hash =
            mzn_core::canonical_hash(&payload).unwrap_or_else(|_| mzn_core::sha256_hex(b""));
        Self {
            content_hash,
            payload,
        }
    }
}

/// Persistent state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    /// Job identifier.
    pub job_id: String,
    /// Job type name.
    pub job_type: String,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Stage currently executing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    /// Completed stages, in declared order (canonical completion record).
    pub completed_stages: Vec<String>,
    /// Original job inputs.
    pub inputs: Value,
    /// Outputs of completed stages; keys equal `completed_stages`.
    pub stage_outputs: BTreeMap<String, StageOutput>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Failure detail for FAILED / RESUMABLE_FAILURE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Genome in force when the job was created.
    pub genome_id: String,
    /// Genome version in force.
    pub genome_version: String,
}

impl JobCheckpoint {
    fn consistent(&self) -> bool {
        self.completed_stages.len() == self.stage_outputs.len()
            && self
                .completed_stages
                .iter()
                .all(|s| self.stage_outputs.contains_key(s))
    }
}

/// File-backed checkpoint store with atomic writes.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir` (typically `<store>/checkpoints`).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    /// Create a fresh checkpoint for `job_id`.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::CheckpointCorrupt`] if the job already exists;
    /// [`ReasonCode::StageFailed`] on I/O failure.
    pub fn create(
        &self,
        job_id: &str,
        job_type: &str,
        inputs: Value,
        genome_id: &str,
        genome_version: &str,
    ) -> Result<JobCheckpoint, MathisonError> {
        if self.path(job_id).exists() {
            return Err(MathisonError::new(
                ReasonCode::CheckpointCorrupt,
                format!("job '{job_id}' already has a checkpoint"),
            ));
        }
        let now = Utc::now();
        let checkpoint = JobCheckpoint {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            current_stage: None,
            completed_stages: Vec::new(),
            inputs,
            stage_outputs: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            error: None,
            genome_id: genome_id.to_string(),
            genome_version: genome_version.to_string(),
        };
        self.persist(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Load a checkpoint, failing closed on inconsistency.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::CheckpointCorrupt`] for unparseable or inconsistent
    /// checkpoints; I/O errors as [`ReasonCode::StageFailed`].
    pub fn load(&self, job_id: &str) -> Result<Option<JobCheckpoint>, MathisonError> {
        let path = self.path(job_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MathisonError::new(
                    ReasonCode::StageFailed,
                    format!("checkpoint read {}: {e}", path.display()),
                ));
            }
        };
        let checkpoint: JobCheckpoint = serde_json::from_str(&text).map_err(|e| {
            MathisonError::new(
                ReasonCode::CheckpointCorrupt,
                format!("checkpoint for '{job_id}' malformed: {e}"),
            )
        })?;
        if !checkpoint.consistent() {
            return Err(MathisonError::new(
                ReasonCode::CheckpointCorrupt,
                format!("checkpoint for '{job_id}': stage_outputs diverge from completed_stages"),
            ));
        }
        Ok(Some(checkpoint))
    }

    /// Record progress on a stage.
    ///
    /// With `completed = false`, only `current_stage` moves. With
    /// `completed = true`, the stage's output is stored and the stage is
    /// appended to `completed_stages`; outputs of already-completed stages
    /// are immutable.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::CheckpointCorrupt`] when mutating a completed stage or
    /// an unknown job; I/O errors as [`ReasonCode::StageFailed`].
    pub fn update_stage(
        &self,
        job_id: &str,
        stage: &str,
        output: Option<StageOutput>,
        completed: bool,
    ) -> Result<JobCheckpoint, MathisonError> {
        let mut checkpoint = self.require(job_id)?;
        if checkpoint.status.is_terminal() {
            return Err(MathisonError::new(
                ReasonCode::CheckpointCorrupt,
                format!("job '{job_id}' is terminal ({:?})", checkpoint.status),
            ));
        }
        if checkpoint.completed_stages.iter().any(|s| s == stage) {
            return Err(MathisonError::new(
                ReasonCode::CheckpointCorrupt,
                format!("stage '{stage}' of job '{job_id}' is already completed"),
            ));
        }
        checkpoint.status = JobStatus::InProgress;
        if completed {
            let output = output.unwrap_or_else(|| StageOutput::new(Value::Null));
            checkpoint.stage_outputs.insert(stage.to_string(), output);
            checkpoint.completed_stages.push(stage.to_string());
            checkpoint.current_stage = None;
        } else {
            checkpoint.current_stage = Some(stage.to_string());
        }
        checkpoint.updated_at = Utc::now();
        self.persist(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Transition to COMPLETED.
    ///
    /// # Errors
    ///
    /// Terminal-state transitions are [`ReasonCode::CheckpointCorrupt`].
    pub fn mark_completed(&self, job_id: &str) -> Result<JobCheckpoint, MathisonError> {
        self.transition(job_id, JobStatus::Completed, None)
    }

    /// Transition to FAILED (terminal).
    ///
    /// # Errors
    ///
    /// Terminal-state transitions are [`ReasonCode::CheckpointCorrupt`].
    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<JobCheckpoint, MathisonError> {
        self.transition(job_id, JobStatus::Failed, Some(error.to_string()))
    }

    /// Transition to RESUMABLE_FAILURE.
    ///
    /// # Errors
    ///
    /// Terminal-state transitions are [`ReasonCode::CheckpointCorrupt`].
    pub fn mark_resumable_failure(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<JobCheckpoint, MathisonError> {
        self.transition(job_id, JobStatus::ResumableFailure, Some(error.to_string()))
    }

    fn transition(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<JobCheckpoint, MathisonError> {
        let mut checkpoint = self.require(job_id)?;
        if checkpoint.status.is_terminal() {
            return Err(MathisonError::new(
                ReasonCode::CheckpointCorrupt,
                format!(
                    "job '{job_id}' is terminal ({:?}); cannot transition to {status:?}",
                    checkpoint.status
                ),
            ));
        }
        checkpoint.status = status;
        checkpoint.error = error;
        checkpoint.current_stage = None;
        checkpoint.updated_at = Utc::now();
        self.persist(&checkpoint)?;
        debug!(target: "mzn.jobs", job_id, ?status, "checkpoint transition");
        Ok(checkpoint)
    }

    /// Hex SHA-256 of raw bytes (stage output and file idempotency checks).
    #[must_use]
    pub fn hash_content(bytes: &[u8]) -> String {
        mzn_core::sha256_hex(bytes)
    }

    /// Returns `true` when the file at `path` exists and hashes to
    /// `expected`.
    #[must_use]
    pub fn check_file_hash(path: &Path, expected: &str) -> bool {
        match std::fs::read(path) {
            Ok(bytes) => Self::hash_content(&bytes) == expected,
            Err(_) => false,
        }
    }

    /// All checkpoint job IDs present in the store.
    ///
    /// # Errors
    ///
    /// I/O errors as [`ReasonCode::StageFailed`].
    pub fn list(&self) -> Result<Vec<String>, MathisonError> {
        let dir = match std::fs::read_dir(&self.dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MathisonError::new(
                    ReasonCode::StageFailed,
                    format!("checkpoint dir {}: {e}", self.dir.display()),
                ));
            }
        };
        let mut ids = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| {
                MathisonError::new(ReasonCode::StageFailed, format!("checkpoint dir: {e}"))
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn require(&self, job_id: &str) -> Result<JobCheckpoint, MathisonError> {
        self.load(job_id)?.ok_or_else(|| {
            MathisonError::new(
                ReasonCode::CheckpointCorrupt,
                format!("no checkpoint for job '{job_id}'"),
            )
        })
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn persist(&self, checkpoint: &JobCheckpoint) -> Result<(), MathisonError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            MathisonError::new(
                ReasonCode::StageFailed,
                format!("checkpoint dir {}: {e}", self.dir.display()),
            )
        })?;
        let path = self.path(&checkpoint.job_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint).map_err(|e| {
            MathisonError::new(ReasonCode::StageFailed, format!("checkpoint serialize: {e}"))
        })?;
        std::fs::write(&tmp, json).map_err(|e| {
            MathisonError::new(ReasonCode::StageFailed, format!("checkpoint write: {e}"))
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            MathisonError::new(ReasonCode::StageFailed, format!("checkpoint rename: {e}"))
        })?;
        Ok(())
    }
}
