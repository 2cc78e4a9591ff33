// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime assembly.
//!
//! [`Runtime::boot`] is the only place services are constructed: it runs the
//! prerequisite sequencer (fail-closed), mints the boot key, opens the
//! session chain, and wires every governance service into one explicit
//! graph. Nothing here is a global; request handlers receive the runtime by
//! reference.

use crate::jobtypes::builtin_job_types;
use crate::memory::MemoryStore;
use mzn_artifact::{Genome, TreatyInfo};
use mzn_beamstore::{BeamStore, BeamStoreConfig};
use mzn_boot::{BootKey, SessionRegistry, prereq};
use mzn_cdi::{ConsentSignal, DecisionEngine};
use mzn_cif::{CifLimits, ContentFilter, Quarantine};
use mzn_config::{MathisonConfig, Posture};
use mzn_core::{ActionRegistry, RouteRegistry};
use mzn_error::MathisonError;
use mzn_gateway::{FnTool, Scope, ToolGateway};
use mzn_governor::Governor;
use mzn_jobs::{CheckpointStore, JobRunner, JobType};
use mzn_logsink::{EnvelopeDraft, LogSink, Severity};
use mzn_receipt::{JsonlReceiptStore, Receipt, ReceiptSink};
use mzn_token::TokenService;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Fatal boot failure: the collected prerequisite errors.
#[derive(Debug)]
pub struct BootFailure {
    /// Structured errors, in sequencer order.
    pub errors: Vec<MathisonError>,
}

impl std::fmt::Display for BootFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boot prerequisites failed:")?;
        for e in &self.errors {
            write!(f, "\n  {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BootFailure {}

/// Receipt sink that mirrors chain heads into the session registry.
pub struct SessionLinkedSink {
    store: Arc<JsonlReceiptStore>,
    sessions: Arc<Mutex<SessionRegistry>>,
}

impl ReceiptSink for SessionLinkedSink {
    fn append(&self, receipt: Receipt) -> Result<Receipt, MathisonError> {
        let stored = self.store.append(receipt)?;
        if let Some(hash) = &stored.this_hash {
            if let Err(e) = self
                .sessions
                .lock()
                .expect("session registry lock poisoned")
                .record_receipt(hash)
            {
                warn!(target: "mzn.daemon", error = %e, "session registry update failed");
            }
        }
        Ok(stored)
    }
}

/// The assembled service graph.
pub struct Runtime {
    /// Loaded configuration.
    pub config: MathisonConfig,
    /// Action registry (read-only after boot).
    pub registry: Arc<ActionRegistry>,
    /// Ephemeral boot key.
    pub boot_key: Arc<BootKey>,
    /// Capability token service.
    pub tokens: Arc<TokenService>,
    /// Receipt store (direct access for audit queries).
    pub receipts: Arc<JsonlReceiptStore>,
    /// Session registry.
    pub sessions: Arc<Mutex<SessionRegistry>>,
    /// Governed pipeline wrapper.
    pub governor: Arc<Governor>,
    /// Tool gateway.
    pub gateway: Arc<ToolGateway>,
    /// Checkpoint store.
    pub checkpoints: Arc<CheckpointStore>,
    /// Job runner.
    pub runner: Arc<JobRunner>,
    /// Job type table.
    pub job_types: BTreeMap<String, Arc<JobType>>,
    /// Identity store.
    pub beams: Arc<Mutex<BeamStore>>,
    /// Governed log sink.
    pub logsink: Arc<LogSink>,
    /// Memory graph store.
    pub memory: Arc<MemoryStore>,
    /// Route bindings (for the no-bypass conformance check).
    pub routes: RouteRegistry,
    /// The verified genome.
    pub genome: Genome,
    /// Genome artifact ID.
    pub genome_id: String,
    /// Genome artifact version.
    pub genome_version: String,
    /// Treaty metadata.
    pub treaty: TreatyInfo,
    /// Boot timestamp.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("genome_id", &self.genome_id)
            .field("genome_version", &self.genome_version)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Boot the substrate. Fail-closed: any prerequisite error refuses to
    /// construct a runtime, so no handler is ever reachable without valid
    /// governance artifacts.
    ///
    /// # Errors
    ///
    /// [`BootFailure`] carrying every collected prerequisite error.
    pub fn boot(config: MathisonConfig) -> Result<Self, BootFailure> {
        let outcome = prereq::validate_all(&config);
        for w in &outcome.warnings {
            warn!(target: "mzn.daemon", "boot warning: {w}");
        }
        if !outcome.ok {
            return Err(BootFailure {
                errors: outcome.errors,
            });
        }
        let genome = outcome.genome.expect("ok outcome carries genome");
        let treaty = outcome.treaty.expect("ok outcome carries treaty");
        let (genome_id, genome_version) = match &outcome.genome_manifest {
            Some(m) => (m.artifact_id.clone(), m.version.clone()),
            None => (format!("genome-{}", genome.name), "unverified".to_string()),
        };

        let store_root = config.store.path.clone();
        let registry = Arc::new(ActionRegistry::builtin());
        let boot_key = Arc::new(BootKey::generate());

        let mut sessions =
            SessionRegistry::open(store_root.join("boot-key-registry.json")).map_err(|e| {
                BootFailure {
                    errors: vec![MathisonError::new(
                        mzn_error::ReasonCode::GovernanceInitFailed,
                        e.to_string(),
                    )],
                }
            })?;
        sessions.begin(boot_key.key_id()).map_err(|e| {
            init_err(MathisonError::new(
                mzn_error::ReasonCode::GovernanceInitFailed,
                e.to_string(),
            ))
        })?;
        let receipts = Arc::new(
            JsonlReceiptStore::open(store_root.join("receipts.jsonl")).map_err(init_err)?,
        );
        // The new session chain links to the store's recovered tail; the
        // registry's terminal hash is the fallback when the log is fresh.
        let prev_terminal = receipts
            .last_hash()
            .or_else(|| sessions.previous_terminal_hash());
        let sessions = Arc::new(Mutex::new(sessions));
        let session_start = receipts
            .begin_session(boot_key.key_id(), &genome_id, &genome_version, prev_terminal)
            .map_err(init_err)?;
        if let Some(hash) = &session_start.this_hash {
            sessions
                .lock()
                .expect("session registry lock poisoned")
                .record_receipt(hash)
                .map_err(|e| init_err(MathisonError::new(
                    mzn_error::ReasonCode::GovernanceInitFailed,
                    e.to_string(),
                )))?;
        }
        let sink: Arc<dyn ReceiptSink> = Arc::new(SessionLinkedSink {
            store: Arc::clone(&receipts),
            sessions: Arc::clone(&sessions),
        });

        let tokens = Arc::new(TokenService::new(
            Arc::clone(&boot_key),
            Arc::clone(&registry),
        ));

        let cif = Arc::new(ContentFilter::new(
            CifLimits {
                max_payload_bytes: config.limits.max_payload_bytes,
                max_string_length: config.limits.max_string_length,
                max_array_length: config.limits.max_array_length,
                max_depth: config.limits.max_depth,
            },
            Quarantine::on_disk(store_root.join("quarantine"), 64),
            config.posture == Posture::Production,
        ));

        let cdi = Arc::new(DecisionEngine::new(
            Arc::clone(&registry),
            Some(genome.clone()),
            Some(treaty.clone()),
            ConsentSignal::new(),
        ));

        let governor = Arc::new(Governor {
            boot_key: Arc::clone(&boot_key),
            tokens: Arc::clone(&tokens),
            cif: Arc::clone(&cif),
            cdi: Arc::clone(&cdi),
            receipts: Arc::clone(&sink),
            genome_id: genome_id.clone(),
            genome_version: genome_version.clone(),
            request_timeout: Duration::from_millis(config.timeouts.request_ms),
            concurrency: Arc::new(tokio::sync::Semaphore::new(
                config.limits.max_concurrent_requests.max(1),
            )),
        });

        let checkpoints = Arc::new(CheckpointStore::new(store_root.join("checkpoints")));
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&checkpoints),
            Arc::clone(&sink),
            boot_key.key_id(),
            &genome_id,
            &genome_version,
        ));
        let job_types = builtin_job_types(Duration::from_millis(config.timeouts.stage_ms));

        let passphrase = std::env::var("MATHISON_BEAM_PASSPHRASE").unwrap_or_else(|_| {
            warn!(target: "mzn.daemon", "MATHISON_BEAM_PASSPHRASE unset; using development passphrase");
            "mathison-development".to_string()
        });
        let beams = Arc::new(Mutex::new(
            BeamStore::open(
                store_root.join("beams"),
                &passphrase,
                BeamStoreConfig {
                    tombstone_soft_daily: config.beams.tombstone_soft_daily,
                    tombstone_hard_daily: config.beams.tombstone_hard_daily,
                    incident_window_secs: config.beams.incident_window_secs,
                    incident_threshold: config.beams.incident_threshold,
                },
            )
            .map_err(init_err)?,
        ));

        let logsink = Arc::new(LogSink::new(
            config.logsink.max_envelopes,
            config.logsink.max_pending_bytes,
        ));
        if let Err(e) = logsink.append(EnvelopeDraft::new(
            Severity::Info,
            "session.start",
            boot_key.key_id(),
            format!("session opened under genome {genome_id}"),
        )) {
            warn!(target: "mzn.daemon", error = %e, "boot envelope rejected");
        }
        let memory = Arc::new(MemoryStore::open(store_root.join("memory.jsonl")).map_err(init_err)?);

        let gateway = Arc::new(ToolGateway::new(
            Arc::clone(&registry),
            Arc::clone(&tokens),
        ));
        register_builtin_tools(&gateway, &beams, &genome_id, &genome_version)
            .map_err(init_err)?;

        let mut routes = RouteRegistry::new();
        for (method, path, action) in [
            ("GET", "/health", "governance.read"),
            ("GET", "/genome", "governance.read"),
            ("POST", "/jobs/run", "job.run"),
            ("POST", "/jobs/resume", "job.resume"),
            ("GET", "/jobs/status", "storage.read"),
            ("GET", "/jobs/logs", "governance.read"),
            ("POST", "/memory/nodes", "memory.node.create"),
            ("POST", "/memory/edges", "memory.edge.create"),
            ("POST", "/memory/hyperedges", "memory.hyperedge.create"),
            ("POST", "/beams/put", "beam.put"),
            ("POST", "/beams/retire", "beam.retire"),
            ("POST", "/beams/pin", "beam.pin"),
            ("POST", "/beams/unpin", "beam.unpin"),
            ("POST", "/beams/tombstone", "beam.tombstone"),
            ("POST", "/beams/purge", "beam.purge"),
        ] {
            routes.bind(method, path, action, true);
        }

        info!(
            target: "mzn.daemon",
            boot_key_id = boot_key.key_id(),
            genome = %genome_id,
            "runtime assembled"
        );

        Ok(Self {
            config,
            registry,
            boot_key,
            tokens,
            receipts,
            sessions,
            governor,
            gateway,
            checkpoints,
            runner,
            job_types,
            beams,
            logsink,
            memory,
            routes,
            genome,
            genome_id,
            genome_version,
            treaty,
            started_at: chrono::Utc::now(),
        })
    }

    /// Append an operational envelope to the governed log sink.
    ///
    /// Retention failures are surfaced to tracing, never to the caller; the
    /// sink applies its drop/block policy internally.
    pub fn log_event(&self, severity: Severity, event_type: &str, subject: &str, summary: String) {
        if let Err(e) = self.logsink.append(EnvelopeDraft::new(
            severity,
            event_type,
            subject,
            summary,
        )) {
            warn!(target: "mzn.daemon", error = %e, "log envelope rejected");
        }
    }

    /// Mark the session ended. Called on graceful shutdown.
    pub fn shutdown(&self) {
        self.log_event(
            Severity::Info,
            "session.end",
            self.boot_key.key_id(),
            "session closed".to_string(),
        );
        if let Err(e) = self
            .sessions
            .lock()
            .expect("session registry lock poisoned")
            .end_current()
        {
            warn!(target: "mzn.daemon", error = %e, "session end failed");
        }
    }
}

fn init_err(e: MathisonError) -> BootFailure {
    BootFailure { errors: vec![e] }
}

/// Built-in diagnostic tools: the gateway is exercised even before any
/// external adapter is registered.
fn register_builtin_tools(
    gateway: &ToolGateway,
    beams: &Arc<Mutex<BeamStore>>,
    genome_id: &str,
    genome_version: &str,
) -> Result<(), MathisonError> {
    let genome_id = genome_id.to_string();
    let genome_version = genome_version.to_string();
    gateway.register_tool(
        "substrate.info",
        "governance.read",
        vec![],
        Arc::new(FnTool(move |_args| {
            Ok(json!({
                "substrate_version": mzn_core::SUBSTRATE_VERSION,
                "genome_id": genome_id,
                "genome_version": genome_version,
            }))
        })),
    )?;

    let frame_beams = Arc::clone(beams);
    gateway.register_tool(
        "beam.frame",
        "governance.read",
        vec![Scope::Governance],
        Arc::new(FnTool(move |_args| {
            let frame = frame_beams
                .lock()
                .expect("beam store lock poisoned")
                .compile_frame();
            Ok(json!({
                "hash": frame.hash,
                "amnesic": frame.amnesic,
                "chars": frame.text.len(),
            }))
        })),
    )?;

    // BeamStore mutations go through the gateway: the store owns its beams
    // and handlers only propose intents. One tool per lifecycle operation,
    // each bound to its registered action.
    for op in [
        mzn_beamstore::BeamOp::Put,
        mzn_beamstore::BeamOp::Retire,
        mzn_beamstore::BeamOp::Pin,
        mzn_beamstore::BeamOp::Unpin,
        mzn_beamstore::BeamOp::Tombstone,
        mzn_beamstore::BeamOp::Purge,
    ] {
        let name = crate::beams::action_for(&op);
        let store = Arc::clone(beams);
        let expected = op.clone();
        gateway.register_tool(
            name,
            name,
            vec![Scope::Storage],
            Arc::new(FnTool(move |args| {
                let intent: mzn_beamstore::StoreBeamIntent = serde_json::from_value(args)?;
                anyhow::ensure!(
                    intent.op == expected,
                    "tool '{}' only accepts {:?} intents",
                    crate::beams::action_for(&expected),
                    expected
                );
                let beam = store
                    .lock()
                    .expect("beam store lock poisoned")
                    .apply(&intent)?;
                Ok(serde_json::to_value(beam)?)
            })),
        )?;
    }
    Ok(())
}
