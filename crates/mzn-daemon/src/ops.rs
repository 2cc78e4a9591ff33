// SPDX-License-Identifier: MIT OR Apache-2.0
//! Governed job operations shared by the HTTP routes and the CLI.
//!
//! Both surfaces go through the same [`GovernedHandler`] implementations, so
//! a job started from the CLI and one started over HTTP traverse the
//! identical five-stage pipeline.

use crate::runtime::Runtime;
use async_trait::async_trait;
use mzn_error::{MathisonError, ReasonCode};
use mzn_governor::{DeniedResponse, GovernedHandler, GovernedResponse, HandlerContext};
use mzn_logsink::Severity;
use mzn_token::MintRequest;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct JobsRunHandler {
    pub(crate) runtime: Arc<Runtime>,
}

#[async_trait]
impl GovernedHandler for JobsRunHandler {
    fn action_id(&self) -> &str {
        "job.run"
    }

    async fn handle(&self, body: Value, _ctx: &HandlerContext) -> Result<Value, MathisonError> {
        let job_type_name = body
            .get("jobType")
            .and_then(Value::as_str)
            .ok_or_else(|| MathisonError::new(ReasonCode::MalformedRequest, "jobType is required"))?;
        let job_type = self.runtime.job_types.get(job_type_name).ok_or_else(|| {
            MathisonError::new(
                ReasonCode::RouteNotFound,
                format!("unknown job type '{job_type_name}'"),
            )
        })?;
        let inputs = body.get("inputs").cloned().unwrap_or(Value::Null);
        let job_id = body
            .get("jobId")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let checkpoint = self.runtime.runner.run(job_type, &job_id, inputs).await?;
        Ok(json!({
            "job_id": checkpoint.job_id,
            "status": checkpoint.status,
            "outputs": checkpoint.stage_outputs,
            "genome_id": checkpoint.genome_id,
            "genome_version": checkpoint.genome_version,
        }))
    }
}

pub(crate) struct JobsResumeHandler {
    pub(crate) runtime: Arc<Runtime>,
}

#[async_trait]
impl GovernedHandler for JobsResumeHandler {
    fn action_id(&self) -> &str {
        "job.resume"
    }

    async fn handle(&self, body: Value, _ctx: &HandlerContext) -> Result<Value, MathisonError> {
        let job_id = body
            .get("jobId")
            .and_then(Value::as_str)
            .ok_or_else(|| MathisonError::new(ReasonCode::MalformedRequest, "jobId is required"))?;
        let checkpoint = self.runtime.checkpoints.load(job_id)?.ok_or_else(|| {
            MathisonError::new(ReasonCode::RouteNotFound, format!("no job '{job_id}'"))
        })?;
        let job_type = self
            .runtime
            .job_types
            .get(&checkpoint.job_type)
            .ok_or_else(|| {
                MathisonError::new(
                    ReasonCode::RouteNotFound,
                    format!("unknown job type '{}'", checkpoint.job_type),
                )
            })?;
        let resumed = self
            .runtime
            .runner
            .run(job_type, job_id, checkpoint.inputs.clone())
            .await?;
        Ok(json!({
            "job_id": resumed.job_id,
            "status": resumed.status,
            "outputs": resumed.stage_outputs,
            "genome_id": resumed.genome_id,
            "genome_version": resumed.genome_version,
        }))
    }
}

pub(crate) struct JobsStatusHandler {
    pub(crate) runtime: Arc<Runtime>,
}

#[async_trait]
impl GovernedHandler for JobsStatusHandler {
    fn action_id(&self) -> &str {
        "storage.read"
    }

    async fn handle(&self, body: Value, _ctx: &HandlerContext) -> Result<Value, MathisonError> {
        let job_id = body
            .get("job_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MathisonError::new(ReasonCode::MalformedRequest, "job_id is required"))?;
        let checkpoint = self.runtime.checkpoints.load(job_id)?.ok_or_else(|| {
            MathisonError::new(ReasonCode::RouteNotFound, format!("no job '{job_id}'"))
        })?;
        Ok(json!({
            "job_id": checkpoint.job_id,
            "job_type": checkpoint.job_type,
            "status": checkpoint.status,
            "current_stage": checkpoint.current_stage,
            "completed_stages": checkpoint.completed_stages,
            "updated_at": checkpoint.updated_at,
            "error": checkpoint.error,
        }))
    }
}

pub(crate) struct JobsLogsHandler {
    pub(crate) runtime: Arc<Runtime>,
}

#[async_trait]
impl GovernedHandler for JobsLogsHandler {
    fn action_id(&self) -> &str {
        "governance.read"
    }

    async fn handle(&self, body: Value, _ctx: &HandlerContext) -> Result<Value, MathisonError> {
        let job_id = body
            .get("job_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MathisonError::new(ReasonCode::MalformedRequest, "job_id is required"))?;
        let receipts = self.runtime.receipts.get_by_job(job_id)?;
        Ok(json!({"job_id": job_id, "receipts": receipts}))
    }
}

/// Start a job through the governed pipeline.
///
/// # Errors
///
/// The pipeline's [`DeniedResponse`] on any stage denial.
pub async fn run_job(
    runtime: &Arc<Runtime>,
    body: Value,
    actor: &str,
) -> Result<GovernedResponse, DeniedResponse> {
    let ttl = runtime.config.timeouts.request_ms as i64 + 5_000;
    let token = match runtime
        .tokens
        .mint(MintRequest::single_use("job.run", actor, ttl))
    {
        Ok(t) => t,
        Err(error) => {
            return Err(DeniedResponse {
                request_id: Uuid::new_v4(),
                error,
                receipt: None,
            });
        }
    };
    let handler = JobsRunHandler {
        runtime: Arc::clone(runtime),
    };
    let result = runtime
        .governor
        .govern(&handler, body, Some(&token), actor)
        .await;
    if let Err(denied) = &result {
        runtime.log_event(
            Severity::Warn,
            "pipeline.deny",
            &denied.request_id.to_string(),
            denied.error.to_string(),
        );
    }
    result
}

/// Resume a job through the governed pipeline.
///
/// # Errors
///
/// The pipeline's [`DeniedResponse`] on any stage denial.
pub async fn resume_job(
    runtime: &Arc<Runtime>,
    body: Value,
    actor: &str,
) -> Result<GovernedResponse, DeniedResponse> {
    let handler = JobsResumeHandler {
        runtime: Arc::clone(runtime),
    };
    runtime.governor.govern(&handler, body, None, actor).await
}

/// Read a job's status through the governed pipeline.
///
/// # Errors
///
/// The pipeline's [`DeniedResponse`] on any stage denial.
pub async fn job_status(
    runtime: &Arc<Runtime>,
    job_id: &str,
    actor: &str,
) -> Result<GovernedResponse, DeniedResponse> {
    let handler = JobsStatusHandler {
        runtime: Arc::clone(runtime),
    };
    runtime
        .governor
        .govern(&handler, json!({"job_id": job_id}), None, actor)
        .await
}

/// Read a job's receipts through the governed pipeline.
///
/// # Errors
///
/// The pipeline's [`DeniedResponse`] on any stage denial.
pub async fn job_logs(
    runtime: &Arc<Runtime>,
    job_id: &str,
    actor: &str,
) -> Result<GovernedResponse, DeniedResponse> {
    let handler = JobsLogsHandler {
        runtime: Arc::clone(runtime),
    };
    runtime
        .governor
        .govern(&handler, json!({"job_id": job_id}), None, actor)
        .await
}
