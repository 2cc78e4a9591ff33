// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for denials, prerequisite failures, and runtime errors.
const EXIT_FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "mathison", version, about = "Mathison governance substrate CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of pretty output.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a job through the governed pipeline.
    Run {
        /// Job type (e.g. tiriti-audit).
        #[arg(long = "job")]
        job_type: String,

        /// Input document path.
        #[arg(long = "in")]
        input: PathBuf,

        /// Output directory.
        #[arg(long)]
        outdir: PathBuf,

        /// Explicit job ID (generated when omitted).
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Show a job's checkpoint status.
    Status {
        /// Job ID.
        #[arg(long)]
        job_id: String,
    },

    /// Resume a job after a resumable failure.
    Resume {
        /// Job ID.
        #[arg(long)]
        job_id: String,
    },

    /// Propose a beam lifecycle mutation.
    Beam {
        #[command(subcommand)]
        op: BeamCommands,
    },

    /// Verify the receipt chain and print session boundaries.
    Audit,

    /// Run prerequisite and storage health checks.
    Doctor,
}

#[derive(Subcommand, Debug)]
enum BeamCommands {
    /// Create or replace an ACTIVE beam.
    Put {
        /// Beam identifier.
        #[arg(long)]
        beam_id: String,

        /// Beam kind: SELF, POLICY, CARE, RELATION, PROJECT, SKILL, FACT, NOTE.
        #[arg(long)]
        kind: String,

        /// Title.
        #[arg(long)]
        title: String,

        /// Plaintext body (sealed at rest).
        #[arg(long)]
        body: String,

        /// Tag. Can be repeated.
        #[arg(long)]
        tag: Vec<String>,

        /// Pin the beam into the persona frame.
        #[arg(long)]
        pinned: bool,
    },

    /// Retire an ACTIVE beam.
    Retire {
        /// Beam identifier.
        #[arg(long)]
        beam_id: String,

        /// Reason code for the retirement.
        #[arg(long)]
        reason: String,
    },

    /// Pin an ACTIVE beam into the persona frame.
    Pin {
        /// Beam identifier.
        #[arg(long)]
        beam_id: String,
    },

    /// Unpin an ACTIVE beam.
    Unpin {
        /// Beam identifier.
        #[arg(long)]
        beam_id: String,
    },

    /// Tombstone a beam. Protected kinds and over-budget days require
    /// --approval.
    Tombstone {
        /// Beam identifier.
        #[arg(long)]
        beam_id: String,

        /// Reason code for the tombstone.
        #[arg(long)]
        reason: String,

        /// Approval reference.
        #[arg(long)]
        approval: Option<String>,
    },

    /// Purge a tombstoned beam. Always requires --approval.
    Purge {
        /// Beam identifier.
        #[arg(long)]
        beam_id: String,

        /// Approval reference.
        #[arg(long)]
        approval: String,
    },
}

impl BeamCommands {
    /// The lifecycle operation and request body for this subcommand.
    fn into_request(self) -> (mzn_beamstore::BeamOp, serde_json::Value) {
        use mzn_beamstore::BeamOp;
        use serde_json::json;
        match self {
            Self::Put {
                beam_id,
                kind,
                title,
                body,
                tag,
                pinned,
            } => (
                BeamOp::Put,
                json!({
                    "beam_id": beam_id,
                    "kind": kind,
                    "title": title,
                    "body": body,
                    "tags": tag,
                    "pinned": pinned,
                }),
            ),
            Self::Retire { beam_id, reason } => (
                BeamOp::Retire,
                json!({"beam_id": beam_id, "reason_code": reason}),
            ),
            Self::Pin { beam_id } => (BeamOp::Pin, json!({"beam_id": beam_id})),
            Self::Unpin { beam_id } => (BeamOp::Unpin, json!({"beam_id": beam_id})),
            Self::Tombstone {
                beam_id,
                reason,
                approval,
            } => (
                BeamOp::Tombstone,
                json!({
                    "beam_id": beam_id,
                    "reason_code": reason,
                    "approval_ref": approval,
                }),
            ),
            Self::Purge { beam_id, approval } => (
                BeamOp::Purge,
                json!({"beam_id": beam_id, "approval_ref": approval}),
            ),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Run {
            job_type,
            input,
            outdir,
            job_id,
        } => {
            commands::run(
                cli.config.as_deref(),
                &job_type,
                &input,
                &outdir,
                job_id.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Status { job_id } => {
            commands::status(cli.config.as_deref(), &job_id, cli.json).await
        }
        Commands::Resume { job_id } => {
            commands::resume(cli.config.as_deref(), &job_id, cli.json).await
        }
        Commands::Beam { op } => {
            let (op, body) = op.into_request();
            commands::beam(cli.config.as_deref(), op, body, cli.json).await
        }
        Commands::Audit => commands::audit(cli.config.as_deref(), cli.json).await,
        Commands::Doctor => commands::doctor(cli.config.as_deref()).await,
    };

    match outcome {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(EXIT_FAILURE);
        }
    }
}
