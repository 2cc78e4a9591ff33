// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in job types.
//!
//! `tiriti-audit` is the reference pipeline: load a document, scan it for
//! governance-relevant markers, and write a report file. Its report stage is
//! idempotent over output files: when the target already exists with the
//! expected content hash, the write is skipped so re-runs leave mtimes
//! untouched.

use async_trait::async_trait;
use mzn_error::{MathisonError, ReasonCode};
use mzn_jobs::{CheckpointStore, JobStage, JobType, StageOutput};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn input_path(inputs: &Value, key: &str) -> Result<PathBuf, MathisonError> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| {
            MathisonError::new(
                ReasonCode::MalformedRequest,
                format!("job inputs missing '{key}'"),
            )
        })
}

/// Stage 1: load the source document and hash it.
struct LoadStage;

#[async_trait]
impl JobStage for LoadStage {
    fn name(&self) -> &str {
        "load"
    }

    async fn run(
        &self,
        inputs: &Value,
        _prior: &BTreeMap<String, StageOutput>,
    ) -> Result<Value, MathisonError> {
        let path = input_path(inputs, "in")?;
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            MathisonError::new(
                ReasonCode::StageFailed,
                format!("cannot read input {}: {e}", path.display()),
            )
        })?;
        Ok(json!({
            "chars": text.len(),
            "lines": text.lines().count(),
            "content_hash": mzn_core::sha256_hex(text.as_bytes()),
            "text": text,
        }))
    }
}

/// Stage 2: scan the document for governance markers.
struct ScanStage;

const MARKERS: &[&str] = &["consent", "stop", "treaty", "authority", "approval"];

#[async_trait]
impl JobStage for ScanStage {
    fn name(&self) -> &str {
        "scan"
    }

    async fn run(
        &self,
        _inputs: &Value,
        prior: &BTreeMap<String, StageOutput>,
    ) -> Result<Value, MathisonError> {
        let loaded = prior.get("load").ok_or_else(|| {
            MathisonError::new(ReasonCode::StageFailed, "scan requires load output")
        })?;
        let text = loaded
            .payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut hits = BTreeMap::new();
        for marker in MARKERS {
            let count = text.matches(marker).count();
            if count > 0 {
                hits.insert((*marker).to_string(), count);
            }
        }
        let marker_total: usize = hits.values().sum();
        Ok(json!({"markers": hits, "marker_total": marker_total}))
    }
}

/// Stage 3: write the report, skipping the write when the existing file
/// already carries the expected hash.
struct ReportStage;

#[async_trait]
impl JobStage for ReportStage {
    fn name(&self) -> &str {
        "report"
    }

    async fn run(
        &self,
        inputs: &Value,
        prior: &BTreeMap<String, StageOutput>,
    ) -> Result<Value, MathisonError> {
        let outdir = input_path(inputs, "outdir")?;
        let scan = prior.get("scan").ok_or_else(|| {
            MathisonError::new(ReasonCode::StageFailed, "report requires scan output")
        })?;
        let load = prior.get("load").ok_or_else(|| {
            MathisonError::new(ReasonCode::StageFailed, "report requires load output")
        })?;

        let report = json!({
            "document_hash": load.payload.get("content_hash"),
            "markers": scan.payload.get("markers"),
        });
        let bytes = serde_json::to_vec_pretty(&report).map_err(|e| {
            MathisonError::new(ReasonCode::StageFailed, format!("report serialize: {e}"))
        })?;
        let expected = CheckpointStore::hash_content(&bytes);
        let target = outdir.join("audit-report.json");

        if CheckpointStore::check_file_hash(&target, &expected) {
            debug!(target: "mzn.jobs", path = %target.display(), "report unchanged; skipping write");
        } else {
            tokio::fs::create_dir_all(&outdir).await.map_err(|e| {
                MathisonError::new(ReasonCode::StageFailed, format!("outdir: {e}"))
            })?;
            tokio::fs::write(&target, &bytes).await.map_err(|e| {
                MathisonError::new(ReasonCode::StageFailed, format!("report write: {e}"))
            })?;
        }
        Ok(json!({
            "report_path": target.display().to_string(),
            "report_hash": expected,
        }))
    }
}

/// The built-in job type table.
#[must_use]
pub fn builtin_job_types(stage_timeout: Duration) -> BTreeMap<String, Arc<JobType>> {
    let mut types = BTreeMap::new();
    types.insert(
        "tiriti-audit".to_string(),
        Arc::new(
            JobType::new(
                "tiriti-audit",
                vec![
                    Arc::new(LoadStage) as Arc<dyn JobStage>,
                    Arc::new(ScanStage),
                    Arc::new(ReportStage),
                ],
            )
            .with_stage_timeout(stage_timeout),
        ),
    );
    types
}
