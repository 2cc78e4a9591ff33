// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered-stage job execution.
//!
//! Stages are a fixed list per job type. The runner creates or loads the
//! job's checkpoint, skips stages already completed, and runs each remaining
//! stage under its deadline. Success checkpoints atomically and emits a
//! `STAGE_COMPLETE` receipt; timeout and error mark the job
//! `RESUMABLE_FAILURE` with a `STAGE_TIMEOUT` / `STAGE_FAILED` receipt.
//! A later `resume` call re-enters here, emits a `RESUME` receipt, and
//! retries only the incomplete tail.

use crate::checkpoint::{CheckpointStore, JobCheckpoint, JobStatus, StageOutput};
use async_trait::async_trait;
use mzn_error::{MathisonError, ReasonCode};
use mzn_receipt::{Decision, ReceiptBuilder, ReceiptSink};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Default per-stage deadline (5 minutes).
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Stage & job type
// ---------------------------------------------------------------------------

/// One stage of a job type.
#[async_trait]
pub trait JobStage: Send + Sync {
    /// Stage name, unique within the job type.
    fn name(&self) -> &str;

    /// Execute the stage.
    ///
    /// `prior` holds the outputs of every already-completed stage, so later
    /// stages can consume earlier results without re-reading storage.
    async fn run(
        &self,
        inputs: &Value,
        prior: &BTreeMap<String, StageOutput>,
    ) -> Result<Value, MathisonError>;
}

/// A job type: its name, ordered stages, and stage deadline.
pub struct JobType {
    /// Type name recorded in checkpoints.
    pub name: String,
    /// Stages, in execution order.
    pub stages: Vec<Arc<dyn JobStage>>,
    /// Per-stage deadline (override of [`DEFAULT_STAGE_TIMEOUT`]).
    pub stage_timeout: Duration,
}

impl JobType {
    /// Build a job type with the default stage deadline.
    #[must_use]
    pub fn new(name: impl Into<String>, stages: Vec<Arc<dyn JobStage>>) -> Self {
        Self {
            name: name.into(),
            stages,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Override the stage deadline.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes job types against the checkpoint store, emitting receipts.
pub struct JobRunner {
    checkpoints: Arc<CheckpointStore>,
    receipts: Arc<dyn ReceiptSink>,
    boot_key_id: String,
    genome_id: String,
    genome_version: String,
    in_flight: Mutex<HashSet<String>>,
}

impl JobRunner {
    /// Build a runner over the checkpoint store and receipt sink.
    #[must_use]
    pub fn new(
        checkpoints: Arc<CheckpointStore>,
        receipts: Arc<dyn ReceiptSink>,
        boot_key_id: impl Into<String>,
        genome_id: impl Into<String>,
        genome_version: impl Into<String>,
    ) -> Self {
        Self {
            checkpoints,
            receipts,
            boot_key_id: boot_key_id.into(),
            genome_id: genome_id.into(),
            genome_version: genome_version.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run (or resume) `job_id` through every stage of `job_type`.
    ///
    /// Re-running a COMPLETED job is a no-op returning the existing
    /// checkpoint. Concurrent runs of the same `job_id` are an error — the
    /// runner is single-writer per job.
    ///
    /// # Errors
    ///
    /// - [`ReasonCode::Timeout`] when a stage deadline expires.
    /// - [`ReasonCode::StageFailed`] when a stage fails or storage does.
    /// - [`ReasonCode::CheckpointCorrupt`] for terminal or inconsistent jobs.
    pub async fn run(
        &self,
        job_type: &JobType,
        job_id: &str,
        inputs: Value,
    ) -> Result<JobCheckpoint, MathisonError> {
        {
            let mut in_flight = self.in_flight.lock().expect("runner lock poisoned");
            if !in_flight.insert(job_id.to_string()) {
                return Err(MathisonError::new(
                    ReasonCode::StageFailed,
                    format!("job '{job_id}' is already running"),
                ));
            }
        }
        let result = self.run_inner(job_type, job_id, inputs).await;
        self.in_flight
            .lock()
            .expect("runner lock poisoned")
            .remove(job_id);
        result
    }

    async fn run_inner(
        &self,
        job_type: &JobType,
        job_id: &str,
        inputs: Value,
    ) -> Result<JobCheckpoint, MathisonError> {
        let checkpoint = match self.checkpoints.load(job_id)? {
            Some(existing) => {
                if existing.status == JobStatus::Completed {
                    // Idempotent: a completed job re-run produces nothing new.
                    info!(target: "mzn.jobs", job_id, "already completed; no-op");
                    return Ok(existing);
                }
                if existing.status == JobStatus::Failed {
                    return Err(MathisonError::new(
                        ReasonCode::CheckpointCorrupt,
                        format!("job '{job_id}' failed terminally"),
                    ));
                }
                if existing.status == JobStatus::ResumableFailure {
                    self.emit(job_id, "RESUME", "job.resume", Decision::Allow, None, "")?;
                    info!(target: "mzn.jobs", job_id, "resuming");
                }
                existing
            }
            None => self.checkpoints.create(
                job_id,
                &job_type.name,
                inputs,
                &self.genome_id,
                &self.genome_version,
            )?,
        };

        let mut completed: HashSet<String> =
            checkpoint.completed_stages.iter().cloned().collect();
        let job_inputs = checkpoint.inputs.clone();

        for stage in &job_type.stages {
            let stage_name = stage.name().to_string();
            if completed.contains(&stage_name) {
                continue;
            }
            self.checkpoints
                .update_stage(job_id, &stage_name, None, false)?;

            let prior = self
                .checkpoints
                .load(job_id)?
                .map(|c| c.stage_outputs)
                .unwrap_or_default();

            let outcome =
                tokio::time::timeout(job_type.stage_timeout, stage.run(&job_inputs, &prior)).await;
            match outcome {
                Ok(Ok(payload)) => {
                    let output = StageOutput::new(payload);
                    let hash = output.content_hash.clone();
                    self.checkpoints
                        .update_stage(job_id, &stage_name, Some(output), true)?;
                    self.emit(
                        job_id,
                        "STAGE_COMPLETE",
                        "job.run",
                        Decision::Allow,
                        None,
                        &hash,
                    )?;
                    completed.insert(stage_name);
                }
                Ok(Err(stage_err)) => {
                    warn!(target: "mzn.jobs", job_id, stage = %stage_name, "stage failed");
                    self.checkpoints
                        .mark_resumable_failure(job_id, &stage_err.to_string())?;
                    self.emit(
                        job_id,
                        "STAGE_FAILED",
                        "job.run",
                        Decision::Deny,
                        Some("STAGE_FAILED"),
                        "",
                    )?;
                    return Err(MathisonError::new(
                        ReasonCode::StageFailed,
                        format!("stage '{stage_name}' of job '{job_id}' failed: {stage_err}"),
                    ));
                }
                Err(_elapsed) => {
                    warn!(target: "mzn.jobs", job_id, stage = %stage_name, "stage timed out");
                    self.checkpoints.mark_resumable_failure(
                        job_id,
                        &format!(
                            "stage '{stage_name}' exceeded {:?}",
                            job_type.stage_timeout
                        ),
                    )?;
                    self.emit(
                        job_id,
                        "STAGE_TIMEOUT",
                        "job.run",
                        Decision::Deny,
                        Some("TIMEOUT"),
                        "",
                    )?;
                    return Err(MathisonError::new(
                        ReasonCode::Timeout,
                        format!(
                            "stage '{stage_name}' of job '{job_id}' exceeded {:?}",
                            job_type.stage_timeout
                        ),
                    ));
                }
            }
        }

        let final_checkpoint = self.checkpoints.mark_completed(job_id)?;
        self.emit(job_id, "JOB_COMPLETE", "job.run", Decision::Allow, None, "")?;
        info!(target: "mzn.jobs", job_id, "completed");
        Ok(final_checkpoint)
    }

    fn emit(
        &self,
        job_id: &str,
        stage: &str,
        action: &str,
        decision: Decision,
        reason_code: Option<&str>,
        content_hash: &str,
    ) -> Result<(), MathisonError> {
        let mut builder = ReceiptBuilder::new(action, decision)
            .stage(stage)
            .job_id(job_id)
            .genome(&self.genome_id, &self.genome_version);
        if let Some(code) = reason_code {
            builder = builder.reason_code(code);
        }
        if !content_hash.is_empty() {
            builder = builder.content_hash(content_hash);
        }
        self.receipts.append(builder.build(&self.boot_key_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mzn_receipt::JsonlReceiptStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedStage {
        name: String,
        delay: Duration,
        fail: bool,
        executions: Arc<AtomicU32>,
    }

    impl FixedStage {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                delay: Duration::ZERO,
                fail: false,
                executions: Arc::new(AtomicU32::new(0)),
            }
        }

        fn slow(name: &str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(name)
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(name)
            }
        }
    }

    #[async_trait]
    impl JobStage for FixedStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(
            &self,
            inputs: &Value,
            _prior: &BTreeMap<String, StageOutput>,
        ) -> Result<Value, MathisonError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(MathisonError::new(ReasonCode::StageFailed, "synthetic failure"));
            }
            Ok(json!({"stage": self.name, "inputs": inputs}))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        runner: JobRunner,
        store: Arc<JsonlReceiptStore>,
        checkpoints: Arc<CheckpointStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlReceiptStore::open(dir.path().join("receipts.jsonl")).unwrap());
        store.begin_session("boot-1", "g", "1", None).unwrap();
        let checkpoints = Arc::new(CheckpointStore::new(dir.path().join("checkpoints")));
        let runner = JobRunner::new(
            Arc::clone(&checkpoints),
            Arc::clone(&store) as Arc<dyn ReceiptSink>,
            "boot-1",
            "g",
            "1",
        );
        Fixture {
            _dir: dir,
            runner,
            store,
            checkpoints,
        }
    }

    fn four_stage_type(stage3_delay: Duration, timeout: Duration) -> (JobType, Vec<Arc<AtomicU32>>) {
        let s1 = FixedStage::new("S1");
        let s2 = FixedStage::new("S2");
        let s3 = FixedStage::slow("S3", stage3_delay);
        let s4 = FixedStage::new("S4");
        let counters = vec![
            Arc::clone(&s1.executions),
            Arc::clone(&s2.executions),
            Arc::clone(&s3.executions),
            Arc::clone(&s4.executions),
        ];
        let ty = JobType::new(
            "audit",
            vec![
                Arc::new(s1) as Arc<dyn JobStage>,
                Arc::new(s2),
                Arc::new(s3),
                Arc::new(s4),
            ],
        )
        .with_stage_timeout(timeout);
        (ty, counters)
    }

    #[tokio::test]
    async fn full_run_completes_all_stages() {
        let f = fixture();
        let (ty, _) = four_stage_type(Duration::ZERO, Duration::from_secs(5));
        let cp = f.runner.run(&ty, "job-1", json!({"doc": "x"})).await.unwrap();
        assert_eq!(cp.status, JobStatus::Completed);
        assert_eq!(cp.completed_stages, vec!["S1", "S2", "S3", "S4"]);
        let receipts = f.store.get_by_job("job-1").unwrap();
        let completes = receipts.iter().filter(|r| r.stage == "STAGE_COMPLETE").count();
        assert_eq!(completes, 4);
        assert!(receipts.iter().any(|r| r.stage == "JOB_COMPLETE"));
    }

    #[tokio::test]
    async fn timeout_marks_resumable_and_resume_finishes() {
        let f = fixture();
        // Stage 3 sleeps 500 ms against a 100 ms deadline.
        let (slow_ty, counters) =
            four_stage_type(Duration::from_millis(500), Duration::from_millis(100));
        let err = f
            .runner
            .run(&slow_ty, "job-1", json!({"doc": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::Timeout);

        let cp = f.checkpoints.load("job-1").unwrap().unwrap();
        assert_eq!(cp.status, JobStatus::ResumableFailure);
        assert_eq!(cp.completed_stages, vec!["S1", "S2"]);
        let receipts = f.store.get_by_job("job-1").unwrap();
        let timeout_receipt = receipts
            .iter()
            .find(|r| r.stage == "STAGE_TIMEOUT")
            .unwrap();
        assert_eq!(timeout_receipt.reason_code.as_deref(), Some("TIMEOUT"));

        // Resume with a fast stage list: S1/S2 are skipped, S3/S4 run.
        let (fast_ty, fast_counters) =
            four_stage_type(Duration::ZERO, Duration::from_secs(5));
        let cp = f
            .runner
            .run(&fast_ty, "job-1", json!({"doc": "x"}))
            .await
            .unwrap();
        assert_eq!(cp.status, JobStatus::Completed);
        assert_eq!(fast_counters[0].load(Ordering::SeqCst), 0, "S1 must not re-run");
        assert_eq!(fast_counters[1].load(Ordering::SeqCst), 0, "S2 must not re-run");
        assert_eq!(fast_counters[2].load(Ordering::SeqCst), 1);
        assert_eq!(fast_counters[3].load(Ordering::SeqCst), 1);
        // Original stages ran exactly once each before the timeout.
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        let receipts = f.store.get_by_job("job-1").unwrap();
        assert!(receipts.iter().any(|r| r.stage == "RESUME"));
    }

    #[tokio::test]
    async fn stage_error_marks_resumable_with_stage_failed_receipt() {
        let f = fixture();
        let ty = JobType::new(
            "audit",
            vec![
                Arc::new(FixedStage::new("S1")) as Arc<dyn JobStage>,
                Arc::new(FixedStage::failing("S2")),
            ],
        );
        let err = f.runner.run(&ty, "job-1", json!({})).await.unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::StageFailed);
        let cp = f.checkpoints.load("job-1").unwrap().unwrap();
        assert_eq!(cp.status, JobStatus::ResumableFailure);
        let receipts = f.store.get_by_job("job-1").unwrap();
        let failed = receipts.iter().find(|r| r.stage == "STAGE_FAILED").unwrap();
        assert_eq!(failed.reason_code.as_deref(), Some("STAGE_FAILED"));
    }

    #[tokio::test]
    async fn completed_rerun_is_noop_with_identical_hashes() {
        let f = fixture();
        let (ty, counters) = four_stage_type(Duration::ZERO, Duration::from_secs(5));
        let first = f.runner.run(&ty, "job-1", json!({"doc": "x"})).await.unwrap();
        let first_hashes: Vec<String> = first
            .stage_outputs
            .values()
            .map(|o| o.content_hash.clone())
            .collect();

        let second = f.runner.run(&ty, "job-1", json!({"doc": "x"})).await.unwrap();
        let second_hashes: Vec<String> = second
            .stage_outputs
            .values()
            .map(|o| o.content_hash.clone())
            .collect();
        assert_eq!(first_hashes, second_hashes);
        // No stage executed a second time.
        for c in &counters {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn identical_inputs_produce_identical_stage_hashes() {
        let f = fixture();
        let (ty_a, _) = four_stage_type(Duration::ZERO, Duration::from_secs(5));
        let (ty_b, _) = four_stage_type(Duration::ZERO, Duration::from_secs(5));
        let a = f.runner.run(&ty_a, "job-a", json!({"doc": "x"})).await.unwrap();
        let b = f.runner.run(&ty_b, "job-b", json!({"doc": "x"})).await.unwrap();
        let ha: Vec<&str> = a.stage_outputs.values().map(|o| o.content_hash.as_str()).collect();
        let hb: Vec<&str> = b.stage_outputs.values().map(|o| o.content_hash.as_str()).collect();
        assert_eq!(ha, hb);
    }

    #[tokio::test]
    async fn terminal_failure_cannot_rerun() {
        let f = fixture();
        f.checkpoints
            .create("job-1", "audit", json!({}), "g", "1")
            .unwrap();
        f.checkpoints.mark_failed("job-1", "fatal").unwrap();
        let (ty, _) = four_stage_type(Duration::ZERO, Duration::from_secs(5));
        let err = f.runner.run(&ty, "job-1", json!({})).await.unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::CheckpointCorrupt);
    }

    #[tokio::test]
    async fn concurrent_same_job_is_rejected() {
        let f = Arc::new(fixture());
        let slow = JobType::new(
            "audit",
            vec![Arc::new(FixedStage::slow("S1", Duration::from_millis(200))) as Arc<dyn JobStage>],
        );
        let f2 = Arc::clone(&f);
        let first = tokio::spawn(async move {
            let slow = JobType::new(
                "audit",
                vec![Arc::new(FixedStage::slow("S1", Duration::from_millis(200)))
                    as Arc<dyn JobStage>],
            );
            f2.runner.run(&slow, "job-1", json!({})).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = f.runner.run(&slow, "job-1", json!({})).await;
        assert!(second.is_err());
        assert!(second.unwrap_err().message.contains("already running"));
        first.await.unwrap().unwrap();
    }
}
