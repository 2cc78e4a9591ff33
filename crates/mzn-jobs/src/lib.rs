// SPDX-License-Identifier: MIT OR Apache-2.0
//! The resumable job engine: stage-checkpointed execution with timeouts,
//! idempotent outputs, and crash recovery.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Persistent per-job checkpoints.
pub mod checkpoint;
/// Ordered-stage execution.
pub mod runner;

pub use checkpoint::{CheckpointStore, JobCheckpoint, JobStatus, StageOutput};
pub use runner::{JobRunner, JobStage, JobType};
