// SPDX-License-Identifier: MIT OR Apache-2.0
//! The BeamStore: governed CRUD over encrypted identity fragments.
//!
//! The store exclusively owns its beams. Handlers propose a
//! [`StoreBeamIntent`]; [`BeamStore::apply`] is the single mutation path and
//! enforces the lifecycle table, tombstone budgets, and incident lockdown.
//! Persona compilation ([`BeamStore::compile_frame`]) is pure and
//! reproducible: the SELF_ROOT body plus the sorted pinned ACTIVE beams,
//! tombstoned fragments excluded.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Body encryption.
pub mod crypto;
/// Beam wire types and intents.
pub mod types;

pub use crypto::{BodyCipher, CryptoError, SealedBody};
pub use types::{
    Beam, BeamAuditEvent, BeamKind, BeamOp, BeamStatus, SELF_ROOT_ID, StoreBeamIntent, StoredBeam,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mzn_error::{MathisonError, ReasonCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Store schema version.
const STORE_VERSION: u32 = 1;

/// Marker left in place of compacted tombstoned bodies.
const COMPACTED_MARKER: &str = "body compacted";

// ---------------------------------------------------------------------------
// Config & frame
// ---------------------------------------------------------------------------

/// Budgets and incident thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BeamStoreConfig {
    /// Daily tombstones above which approval is required.
    pub tombstone_soft_daily: u32,
    /// Daily tombstones above which tombstoning is denied outright.
    pub tombstone_hard_daily: u32,
    /// Rolling incident window.
    pub incident_window_secs: u64,
    /// Tombstones within the window that trip incident mode.
    pub incident_threshold: u32,
}

impl Default for BeamStoreConfig {
    fn default() -> Self {
        Self {
            tombstone_soft_daily: 20,
            tombstone_hard_daily: 100,
            incident_window_secs: 600,
            incident_threshold: 50,
        }
    }
}

/// The compiled persona frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfFrame {
    /// Deterministic concatenation of SELF_ROOT + sorted pinned ACTIVE
    /// bodies, or the amnesic marker.
    pub text: String,
    /// Hex SHA-256 of `text`.
    pub hash: String,
    /// `true` when the store booted without a usable SELF_ROOT.
    pub amnesic: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreHeader {
    version: u32,
    salt_b64: String,
    created_at: DateTime<Utc>,
}

/// Mode the store booted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Normal read/write operation.
    Normal,
    /// SELF_ROOT missing or corrupt: read-only.
    AmnesicSafeMode,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The identity store. Hold behind a mutex; every intent is one transaction.
pub struct BeamStore {
    dir: PathBuf,
    cipher: BodyCipher,
    config: BeamStoreConfig,
    mode: StoreMode,
    beams: BTreeMap<String, StoredBeam>,
    audit: Vec<BeamAuditEvent>,
    incident_locked: bool,
    tombstone_window: VecDeque<DateTime<Utc>>,
    tombstones_by_day: BTreeMap<String, u32>,
}

impl BeamStore {
    /// Mount the store: load (or create) the header, derive the body cipher,
    /// load all beams, and determine the boot mode.
    ///
    /// A store that already holds beams but whose SELF_ROOT is missing or
    /// undecryptable boots into [`StoreMode::AmnesicSafeMode`] (read-only).
    /// A completely fresh store boots normal so it can be initialized.
    ///
    /// # Errors
    ///
    /// Storage failures as [`MathisonError`]s.
    pub fn open(
        dir: impl Into<PathBuf>,
        passphrase: &str,
        config: BeamStoreConfig,
    ) -> Result<Self, MathisonError> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join("beams")).map_err(|e| store_io(&dir, &e))?;

        let header_path = dir.join("store.json");
        let header: StoreHeader = match std::fs::read_to_string(&header_path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                MathisonError::new(ReasonCode::StageFailed, format!("store header malformed: {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let header = StoreHeader {
                    version: STORE_VERSION,
                    salt_b64: {
                        use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
                        B64.encode(crypto::generate_salt())
                    },
                    created_at: Utc::now(),
                };
                write_atomic(&header_path, &serde_json::to_vec_pretty(&header).unwrap_or_default())
                    .map_err(|e| store_io(&dir, &e))?;
                header
            }
            Err(e) => return Err(store_io(&dir, &e)),
        };
        if header.version != STORE_VERSION {
            return Err(MathisonError::new(
                ReasonCode::StageFailed,
                format!("store schema version {} unsupported", header.version),
            ));
        }
        let salt = {
            use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
            B64.decode(&header.salt_b64).map_err(|e| {
                MathisonError::new(ReasonCode::StageFailed, format!("store salt invalid: {e}"))
            })?
        };
        let cipher = BodyCipher::derive(passphrase, &salt);

        let mut beams = BTreeMap::new();
        let beams_dir = dir.join("beams");
        for entry in std::fs::read_dir(&beams_dir).map_err(|e| store_io(&dir, &e))? {
            let entry = entry.map_err(|e| store_io(&dir, &e))?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(entry.path()).map_err(|e| store_io(&dir, &e))?;
            let stored: StoredBeam = serde_json::from_str(&text).map_err(|e| {
                MathisonError::new(
                    ReasonCode::StageFailed,
                    format!("beam file {} malformed: {e}", entry.path().display()),
                )
            })?;
            beams.insert(stored.meta.beam_id.clone(), stored);
        }

        let audit_path = dir.join("audit.json");
        let audit: Vec<BeamAuditEvent> = match std::fs::read_to_string(&audit_path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        // Verify SELF_ROOT: present and decryptable, or the store is not
        // fresh and must fall back to the amnesic safe mode.
        let mode = if beams.is_empty() {
            StoreMode::Normal
        } else {
            match beams.get(SELF_ROOT_ID) {
                Some(root) => match &root.body {
                    Some(sealed) if cipher.open(sealed).is_ok() => StoreMode::Normal,
                    _ => StoreMode::AmnesicSafeMode,
                },
                None => StoreMode::AmnesicSafeMode,
            }
        };
        if mode == StoreMode::AmnesicSafeMode {
            warn!(target: "mzn.beamstore", "SELF_ROOT missing or corrupt; amnesic safe mode");
        } else {
            info!(target: "mzn.beamstore", beams = beams.len(), "mounted");
        }

        Ok(Self {
            dir,
            cipher,
            config,
            mode,
            beams,
            audit,
            incident_locked: false,
            tombstone_window: VecDeque::new(),
            tombstones_by_day: BTreeMap::new(),
        })
    }

    /// The mode the store booted into.
    #[must_use]
    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Whether incident lockdown is active.
    #[must_use]
    pub fn incident_locked(&self) -> bool {
        self.incident_locked
    }

    /// Tombstones recorded today (UTC).
    #[must_use]
    pub fn tombstones_today(&self) -> u32 {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        self.tombstones_by_day.get(&day).copied().unwrap_or(0)
    }

    /// Returns `true` once today's tombstones have reached the soft daily
    /// budget, i.e. further tombstones need an approval reference.
    #[must_use]
    pub fn over_soft_budget(&self) -> bool {
        self.tombstones_today() >= self.config.tombstone_soft_daily
    }

    /// Clear incident mode. Requires a non-empty human confirmation string.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::ApprovalRequired`] without a confirmation.
    pub fn clear_incident_mode(&mut self, human_confirm: &str) -> Result<(), MathisonError> {
        if human_confirm.trim().is_empty() {
            return Err(MathisonError::new(
                ReasonCode::ApprovalRequired,
                "clearing incident mode requires human confirmation",
            ));
        }
        self.incident_locked = false;
        self.tombstone_window.clear();
        info!(target: "mzn.beamstore", confirm = human_confirm, "incident mode cleared");
        Ok(())
    }

    /// Apply one mutation intent as a single transaction.
    ///
    /// # Errors
    ///
    /// Lifecycle, budget, and lockdown violations as [`MathisonError`]s; the
    /// store state is unchanged on error.
    pub fn apply(&mut self, intent: &StoreBeamIntent) -> Result<Beam, MathisonError> {
        if self.mode == StoreMode::AmnesicSafeMode {
            return Err(MathisonError::new(
                ReasonCode::CdiDenied,
                "store is in amnesic safe mode (read-only)",
            ));
        }
        let result = match intent.op {
            BeamOp::Put => self.apply_put(intent),
            BeamOp::Retire => self.apply_retire(intent),
            BeamOp::Pin => self.apply_pin(intent, true),
            BeamOp::Unpin => self.apply_pin(intent, false),
            BeamOp::Tombstone => self.apply_tombstone(intent),
            BeamOp::Purge => self.apply_purge(intent),
        }?;
        self.audit.push(BeamAuditEvent {
            ts: Utc::now(),
            op: intent.op.clone(),
            beam_id: intent.beam_id.clone(),
            reason_code: intent.reason_code.clone(),
            approval_ref: intent.approval_ref.clone(),
        });
        self.persist_audit()?;
        Ok(result)
    }

    fn apply_put(&mut self, intent: &StoreBeamIntent) -> Result<Beam, MathisonError> {
        let kind = intent.kind.ok_or_else(|| {
            MathisonError::new(ReasonCode::MalformedRequest, "PUT requires a beam kind")
        })?;
        let title = intent.title.clone().ok_or_else(|| {
            MathisonError::new(ReasonCode::MalformedRequest, "PUT requires a title")
        })?;
        let body = intent.body.as_deref().ok_or_else(|| {
            MathisonError::new(ReasonCode::MalformedRequest, "PUT requires a body")
        })?;
        if let Some(existing) = self.beams.get(&intent.beam_id) {
            if existing.meta.status == BeamStatus::Tombstoned {
                return Err(MathisonError::new(
                    ReasonCode::CdiDenied,
                    format!("beam '{}' is tombstoned", intent.beam_id),
                ));
            }
        }
        let sealed = self.cipher.seal(body).map_err(|e| {
            MathisonError::new(ReasonCode::StageFailed, format!("body seal: {e}"))
        })?;
        let stored = StoredBeam {
            meta: Beam {
                beam_id: intent.beam_id.clone(),
                kind,
                title,
                tags: intent.tags.clone(),
                status: BeamStatus::Active,
                pinned: intent.pinned,
                updated_at: Utc::now(),
            },
            body: Some(sealed),
            body_marker: None,
        };
        self.persist_beam(&stored)?;
        let meta = stored.meta.clone();
        self.beams.insert(intent.beam_id.clone(), stored);
        Ok(meta)
    }

    fn apply_retire(&mut self, intent: &StoreBeamIntent) -> Result<Beam, MathisonError> {
        if intent.reason_code.is_none() {
            return Err(MathisonError::new(
                ReasonCode::MalformedRequest,
                "RETIRE requires a reason_code",
            ));
        }
        self.mutate_meta(&intent.beam_id, |meta| {
            if meta.status != BeamStatus::Active {
                return Err(MathisonError::new(
                    ReasonCode::CdiDenied,
                    format!("cannot retire beam in status {:?}", meta.status),
                ));
            }
            meta.status = BeamStatus::Retired;
            meta.pinned = false;
            Ok(())
        })
    }

    fn apply_pin(&mut self, intent: &StoreBeamIntent, pinned: bool) -> Result<Beam, MathisonError> {
        self.mutate_meta(&intent.beam_id, |meta| {
            if meta.status != BeamStatus::Active {
                return Err(MathisonError::new(
                    ReasonCode::CdiDenied,
                    format!("cannot pin/unpin beam in status {:?}", meta.status),
                ));
            }
            meta.pinned = pinned;
            Ok(())
        })
    }

    fn apply_tombstone(&mut self, intent: &StoreBeamIntent) -> Result<Beam, MathisonError> {
        if intent.reason_code.is_none() {
            return Err(MathisonError::new(
                ReasonCode::MalformedRequest,
                "TOMBSTONE requires a reason_code",
            ));
        }
        let Some(existing) = self.beams.get(&intent.beam_id) else {
            return Err(MathisonError::new(
                ReasonCode::RouteNotFound,
                format!("no beam '{}'", intent.beam_id),
            ));
        };
        let protected = existing.meta.kind.is_protected();
        let approved = intent.approval_ref.is_some();
        let now = Utc::now();

        // Incident lockdown: every destructive op needs approval.
        if self.incident_locked && !approved {
            return Err(MathisonError::new(
                ReasonCode::IncidentModeLocked,
                "incident mode: tombstone requires approval_ref",
            ));
        }

        // Daily budgets.
        let day = now.format("%Y-%m-%d").to_string();
        let today = self.tombstones_today();
        if today >= self.config.tombstone_hard_daily {
            return Err(MathisonError::new(
                ReasonCode::TombstoneBudgetHard,
                format!("hard daily tombstone budget ({}) exhausted", self.config.tombstone_hard_daily),
            ));
        }
        if (protected || today >= self.config.tombstone_soft_daily) && !approved {
            return Err(MathisonError::new(
                ReasonCode::ApprovalRequired,
                if protected {
                    "tombstoning a protected kind requires approval_ref"
                } else {
                    "daily tombstone budget exceeded; approval_ref required"
                },
            ));
        }

        // Rolling incident window.
        let window = ChronoDuration::seconds(self.config.incident_window_secs as i64);
        while let Some(front) = self.tombstone_window.front() {
            if now - *front > window {
                self.tombstone_window.pop_front();
            } else {
                break;
            }
        }
        if self.tombstone_window.len() as u32 + 1 > self.config.incident_threshold {
            self.incident_locked = true;
            warn!(target: "mzn.beamstore", "tombstone spike; incident mode locked");
            if !approved {
                return Err(MathisonError::new(
                    ReasonCode::IncidentModeTriggered,
                    format!(
                        "more than {} tombstones in {}s",
                        self.config.incident_threshold, self.config.incident_window_secs
                    ),
                ));
            }
        }

        let beam = self.mutate_meta(&intent.beam_id, |meta| {
            meta.status = BeamStatus::Tombstoned;
            meta.pinned = false;
            Ok(())
        })?;
        self.tombstone_window.push_back(now);
        *self.tombstones_by_day.entry(day).or_insert(0) += 1;
        Ok(beam)
    }

    fn apply_purge(&mut self, intent: &StoreBeamIntent) -> Result<Beam, MathisonError> {
        if intent.approval_ref.is_none() {
            return Err(MathisonError::new(
                ReasonCode::ApprovalRequired,
                "PURGE requires approval_ref",
            ));
        }
        let Some(existing) = self.beams.get(&intent.beam_id) else {
            return Err(MathisonError::new(
                ReasonCode::RouteNotFound,
                format!("no beam '{}'", intent.beam_id),
            ));
        };
        if existing.meta.status != BeamStatus::Tombstoned {
            return Err(MathisonError::new(
                ReasonCode::CdiDenied,
                "only tombstoned beams can be purged",
            ));
        }
        let meta = existing.meta.clone();
        let path = self.beam_path(&intent.beam_id);
        std::fs::remove_file(&path).map_err(|e| store_io(&self.dir, &e))?;
        self.beams.remove(&intent.beam_id);
        Ok(meta)
    }

    fn mutate_meta(
        &mut self,
        beam_id: &str,
        f: impl FnOnce(&mut Beam) -> Result<(), MathisonError>,
    ) -> Result<Beam, MathisonError> {
        let Some(stored) = self.beams.get_mut(beam_id) else {
            return Err(MathisonError::new(
                ReasonCode::RouteNotFound,
                format!("no beam '{beam_id}'"),
            ));
        };
        let mut candidate = stored.clone();
        f(&mut candidate.meta)?;
        candidate.meta.updated_at = Utc::now();
        let meta = candidate.meta.clone();
        // Persist first; memory state only changes when the write lands.
        let path = self.dir.join("beams").join(format!("{beam_id}.json"));
        write_atomic(&path, &serde_json::to_vec_pretty(&candidate).unwrap_or_default())
            .map_err(|e| store_io(&self.dir, &e))?;
        *self.beams.get_mut(beam_id).expect("checked above") = candidate;
        Ok(meta)
    }

    /// Public metadata of a beam.
    #[must_use]
    pub fn get(&self, beam_id: &str) -> Option<&Beam> {
        self.beams.get(beam_id).map(|s| &s.meta)
    }

    /// All beams, sorted by ID.
    #[must_use]
    pub fn list(&self) -> Vec<&Beam> {
        self.beams.values().map(|s| &s.meta).collect()
    }

    /// Decrypt the body of a beam.
    ///
    /// # Errors
    ///
    /// [`ReasonCode::RouteNotFound`] for unknown beams;
    /// [`ReasonCode::StageFailed`] for compacted or undecryptable bodies.
    pub fn body_of(&self, beam_id: &str) -> Result<String, MathisonError> {
        let stored = self.beams.get(beam_id).ok_or_else(|| {
            MathisonError::new(ReasonCode::RouteNotFound, format!("no beam '{beam_id}'"))
        })?;
        match &stored.body {
            Some(sealed) => self.cipher.open(sealed).map_err(|e| {
                MathisonError::new(ReasonCode::StageFailed, format!("body open: {e}"))
            }),
            None => Err(MathisonError::new(
                ReasonCode::StageFailed,
                stored
                    .body_marker
                    .clone()
                    .unwrap_or_else(|| "body unavailable".to_string()),
            )),
        }
    }

    /// Compile the persona frame.
    ///
    /// Deterministic: SELF_ROOT body first, then every pinned ACTIVE beam in
    /// beam-ID order; TOMBSTONED fragments never contribute. In amnesic mode
    /// the frame is the explicit amnesic marker.
    #[must_use]
    pub fn compile_frame(&self) -> SelfFrame {
        if self.mode == StoreMode::AmnesicSafeMode {
            let text = "[AMNESIC_SAFE_MODE: SELF_ROOT unavailable]".to_string();
            let hash = mzn_core::sha256_hex(text.as_bytes());
            return SelfFrame {
                text,
                hash,
                amnesic: true,
            };
        }
        let mut sections = Vec::new();
        if let Ok(root) = self.body_of(SELF_ROOT_ID) {
            sections.push(root);
        }
        for (id, stored) in &self.beams {
            if id == SELF_ROOT_ID {
                continue;
            }
            if stored.meta.pinned && stored.meta.status == BeamStatus::Active {
                if let Ok(body) = self.body_of(id) {
                    sections.push(format!("## {}\n{body}", stored.meta.title));
                }
            }
        }
        let text = sections.join("\n\n");
        let hash = mzn_core::sha256_hex(text.as_bytes());
        SelfFrame {
            text,
            hash,
            amnesic: false,
        }
    }

    /// Compaction: prune audit events older than `audit_days`; replace
    /// bodies of beams tombstoned more than `tombstone_days` ago with a
    /// small marker. Returns `(events_pruned, bodies_compacted)`.
    ///
    /// # Errors
    ///
    /// Storage failures as [`MathisonError`]s.
    pub fn compact(
        &mut self,
        audit_days: i64,
        tombstone_days: i64,
    ) -> Result<(usize, usize), MathisonError> {
        let now = Utc::now();
        let audit_cutoff = now - ChronoDuration::days(audit_days);
        let before = self.audit.len();
        self.audit.retain(|e| e.ts >= audit_cutoff);
        let pruned = before - self.audit.len();
        self.persist_audit()?;

        let tombstone_cutoff = now - ChronoDuration::days(tombstone_days);
        let mut compacted = 0;
        let ids: Vec<String> = self
            .beams
            .iter()
            .filter(|(_, s)| {
                s.meta.status == BeamStatus::Tombstoned
                    && s.meta.updated_at < tombstone_cutoff
                    && s.body.is_some()
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(stored) = self.beams.get_mut(&id) {
                stored.body = None;
                stored.body_marker = Some(COMPACTED_MARKER.to_string());
                let snapshot = stored.clone();
                self.persist_beam(&snapshot)?;
                compacted += 1;
            }
        }
        Ok((pruned, compacted))
    }

    /// Audit events, oldest first.
    #[must_use]
    pub fn audit(&self) -> &[BeamAuditEvent] {
        &self.audit
    }

    fn beam_path(&self, beam_id: &str) -> PathBuf {
        self.dir.join("beams").join(format!("{beam_id}.json"))
    }

    fn persist_beam(&self, stored: &StoredBeam) -> Result<(), MathisonError> {
        let path = self.beam_path(&stored.meta.beam_id);
        write_atomic(&path, &serde_json::to_vec_pretty(stored).unwrap_or_default())
            .map_err(|e| store_io(&self.dir, &e))
    }

    fn persist_audit(&self) -> Result<(), MathisonError> {
        let path = self.dir.join("audit.json");
        write_atomic(&path, &serde_json::to_vec_pretty(&self.audit).unwrap_or_default())
            .map_err(|e| store_io(&self.dir, &e))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

fn store_io(dir: &Path, e: &std::io::Error) -> MathisonError {
    MathisonError::new(
        ReasonCode::StageFailed,
        format!("beam store io at {}: {e}", dir.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path) -> BeamStore {
        BeamStore::open(dir, "passphrase", BeamStoreConfig::default()).unwrap()
    }

    fn with_root(dir: &Path) -> BeamStore {
        let mut store = open(dir);
        store
            .apply(&StoreBeamIntent::put(
                SELF_ROOT_ID,
                BeamKind::SelfKind,
                "Self root",
                "I am the root.",
            ))
            .unwrap();
        store
    }

    #[test]
    fn put_creates_active_beam() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        let beam = store
            .apply(&StoreBeamIntent::put("b-1", BeamKind::Fact, "a fact", "water is wet"))
            .unwrap();
        assert_eq!(beam.status, BeamStatus::Active);
        assert_eq!(store.body_of("b-1").unwrap(), "water is wet");
    }

    #[test]
    fn bodies_are_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        store
            .apply(&StoreBeamIntent::put("b-1", BeamKind::Fact, "t", "super secret body"))
            .unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("beams/b-1.json")).unwrap();
        assert!(!on_disk.contains("super secret body"));
    }

    #[test]
    fn reopen_with_same_passphrase_recovers_bodies() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = with_root(dir.path());
            store
                .apply(&StoreBeamIntent::put("b-1", BeamKind::Note, "n", "remembered"))
                .unwrap();
        }
        let store = open(dir.path());
        assert_eq!(store.mode(), StoreMode::Normal);
        assert_eq!(store.body_of("b-1").unwrap(), "remembered");
    }

    #[test]
    fn wrong_passphrase_boots_amnesic() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _ = with_root(dir.path());
        }
        let store =
            BeamStore::open(dir.path(), "wrong-passphrase", BeamStoreConfig::default()).unwrap();
        assert_eq!(store.mode(), StoreMode::AmnesicSafeMode);
        let frame = store.compile_frame();
        assert!(frame.amnesic);
        assert!(frame.text.contains("AMNESIC"));
    }

    #[test]
    fn amnesic_mode_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = open(dir.path());
            // Beams exist but SELF_ROOT was never written.
            store
                .apply(&StoreBeamIntent::put("b-1", BeamKind::Fact, "t", "x"))
                .unwrap();
        }
        let mut store = open(dir.path());
        assert_eq!(store.mode(), StoreMode::AmnesicSafeMode);
        let err = store
            .apply(&StoreBeamIntent::put("b-2", BeamKind::Fact, "t", "y"))
            .unwrap_err();
        assert!(err.message.contains("amnesic"));
    }

    #[test]
    fn retire_requires_reason_and_active_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        store
            .apply(&StoreBeamIntent::put("b-1", BeamKind::Fact, "t", "x"))
            .unwrap();

        let mut no_reason = StoreBeamIntent::put("b-1", BeamKind::Fact, "t", "x");
        no_reason.op = BeamOp::Retire;
        no_reason.reason_code = None;
        assert_eq!(
            store.apply(&no_reason).unwrap_err().reason_code,
            ReasonCode::MalformedRequest
        );

        let mut retire = no_reason.clone();
        retire.reason_code = Some("stale".into());
        let beam = store.apply(&retire).unwrap();
        assert_eq!(beam.status, BeamStatus::Retired);
        // Retiring again is a lifecycle violation.
        assert_eq!(
            store.apply(&retire).unwrap_err().reason_code,
            ReasonCode::CdiDenied
        );
    }

    #[test]
    fn pin_unpin_only_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        store
            .apply(&StoreBeamIntent::put("b-1", BeamKind::Skill, "s", "x"))
            .unwrap();
        let mut pin = StoreBeamIntent::put("b-1", BeamKind::Skill, "s", "x");
        pin.op = BeamOp::Pin;
        assert!(store.apply(&pin).unwrap().pinned);

        let mut tomb = StoreBeamIntent::tombstone("b-1", "cleanup");
        tomb.approval_ref = None;
        store.apply(&tomb).unwrap();
        assert_eq!(store.apply(&pin).unwrap_err().reason_code, ReasonCode::CdiDenied);
    }

    #[test]
    fn protected_tombstone_needs_approval() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        store
            .apply(&StoreBeamIntent::put("care-1", BeamKind::Care, "c", "x"))
            .unwrap();
        let mut tomb = StoreBeamIntent::tombstone("care-1", "cleanup");
        assert_eq!(
            store.apply(&tomb).unwrap_err().reason_code,
            ReasonCode::ApprovalRequired
        );
        tomb.approval_ref = Some("approval-1".into());
        assert_eq!(store.apply(&tomb).unwrap().status, BeamStatus::Tombstoned);
    }

    #[test]
    fn soft_budget_requires_approval_hard_budget_denies() {
        let dir = tempfile::tempdir().unwrap();
        let config = BeamStoreConfig {
            tombstone_soft_daily: 2,
            tombstone_hard_daily: 3,
            incident_window_secs: 600,
            incident_threshold: 1_000,
        };
        let mut store = BeamStore::open(dir.path(), "p", config).unwrap();
        store
            .apply(&StoreBeamIntent::put(SELF_ROOT_ID, BeamKind::SelfKind, "r", "root"))
            .unwrap();
        for i in 0..5 {
            store
                .apply(&StoreBeamIntent::put(&format!("b-{i}"), BeamKind::Fact, "t", "x"))
                .unwrap();
        }
        store.apply(&StoreBeamIntent::tombstone("b-0", "r")).unwrap();
        store.apply(&StoreBeamIntent::tombstone("b-1", "r")).unwrap();
        // Third of the day: over soft budget, approval required.
        let err = store.apply(&StoreBeamIntent::tombstone("b-2", "r")).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::ApprovalRequired);
        let mut approved = StoreBeamIntent::tombstone("b-2", "r");
        approved.approval_ref = Some("ok".into());
        store.apply(&approved).unwrap();
        // Fourth: hard budget, denied even with approval.
        let mut fourth = StoreBeamIntent::tombstone("b-3", "r");
        fourth.approval_ref = Some("ok".into());
        assert_eq!(
            store.apply(&fourth).unwrap_err().reason_code,
            ReasonCode::TombstoneBudgetHard
        );
    }

    #[test]
    fn soft_budget_state_is_observable() {
        let dir = tempfile::tempdir().unwrap();
        let config = BeamStoreConfig {
            tombstone_soft_daily: 2,
            tombstone_hard_daily: 10,
            incident_window_secs: 600,
            incident_threshold: 1_000,
        };
        let mut store = BeamStore::open(dir.path(), "p", config).unwrap();
        store
            .apply(&StoreBeamIntent::put(SELF_ROOT_ID, BeamKind::SelfKind, "r", "root"))
            .unwrap();
        for i in 0..2 {
            store
                .apply(&StoreBeamIntent::put(&format!("b-{i}"), BeamKind::Fact, "t", "x"))
                .unwrap();
        }
        assert_eq!(store.tombstones_today(), 0);
        assert!(!store.over_soft_budget());
        store.apply(&StoreBeamIntent::tombstone("b-0", "r")).unwrap();
        store.apply(&StoreBeamIntent::tombstone("b-1", "r")).unwrap();
        assert_eq!(store.tombstones_today(), 2);
        assert!(store.over_soft_budget());
    }

    #[test]
    fn tombstone_spike_trips_incident_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = BeamStoreConfig {
            tombstone_soft_daily: 1_000,
            tombstone_hard_daily: 10_000,
            incident_window_secs: 600,
            incident_threshold: 50,
        };
        let mut store = BeamStore::open(dir.path(), "p", config).unwrap();
        store
            .apply(&StoreBeamIntent::put(SELF_ROOT_ID, BeamKind::SelfKind, "r", "root"))
            .unwrap();
        for i in 0..60 {
            store
                .apply(&StoreBeamIntent::put(&format!("b-{i}"), BeamKind::Fact, "t", "x"))
                .unwrap();
        }
        for i in 0..50 {
            store
                .apply(&StoreBeamIntent::tombstone(&format!("b-{i}"), "sweep"))
                .unwrap();
        }
        // The 51st trips incident mode.
        let err = store
            .apply(&StoreBeamIntent::tombstone("b-50", "sweep"))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::IncidentModeTriggered);
        assert!(store.incident_locked());

        // Every further destructive op requires approval.
        let err = store
            .apply(&StoreBeamIntent::tombstone("b-51", "sweep"))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::IncidentModeLocked);

        // An explicit human confirmation clears the mode.
        assert!(store.clear_incident_mode("").is_err());
        store.clear_incident_mode("operator-jane").unwrap();
        assert!(!store.incident_locked());
        store
            .apply(&StoreBeamIntent::tombstone("b-51", "sweep"))
            .unwrap();
    }

    #[test]
    fn purge_requires_approval_and_tombstoned_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        store
            .apply(&StoreBeamIntent::put("b-1", BeamKind::Fact, "t", "x"))
            .unwrap();
        let mut purge = StoreBeamIntent::tombstone("b-1", "r");
        purge.op = BeamOp::Purge;
        purge.approval_ref = Some("ok".into());
        // Not tombstoned yet.
        assert_eq!(store.apply(&purge).unwrap_err().reason_code, ReasonCode::CdiDenied);

        store.apply(&StoreBeamIntent::tombstone("b-1", "r")).unwrap();
        purge.approval_ref = None;
        assert_eq!(
            store.apply(&purge).unwrap_err().reason_code,
            ReasonCode::ApprovalRequired
        );
        purge.approval_ref = Some("ok".into());
        store.apply(&purge).unwrap();
        assert!(store.get("b-1").is_none());
        assert!(!dir.path().join("beams/b-1.json").exists());
    }

    #[test]
    fn frame_is_deterministic_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        for (id, title, body) in [
            ("z-beam", "Z", "z body"),
            ("a-beam", "A", "a body"),
        ] {
            let mut put = StoreBeamIntent::put(id, BeamKind::Skill, title, body);
            put.pinned = true;
            store.apply(&put).unwrap();
        }
        // Unpinned and tombstoned beams do not contribute.
        store
            .apply(&StoreBeamIntent::put("m-beam", BeamKind::Note, "M", "m body"))
            .unwrap();

        let frame1 = store.compile_frame();
        let frame2 = store.compile_frame();
        assert_eq!(frame1, frame2);
        assert!(!frame1.amnesic);
        assert!(frame1.text.starts_with("I am the root."));
        let a_pos = frame1.text.find("a body").unwrap();
        let z_pos = frame1.text.find("z body").unwrap();
        assert!(a_pos < z_pos);
        assert!(!frame1.text.contains("m body"));
    }

    #[test]
    fn tombstoned_beam_leaves_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        let mut put = StoreBeamIntent::put("b-1", BeamKind::Skill, "S", "skill body");
        put.pinned = true;
        store.apply(&put).unwrap();
        assert!(store.compile_frame().text.contains("skill body"));
        store.apply(&StoreBeamIntent::tombstone("b-1", "r")).unwrap();
        assert!(!store.compile_frame().text.contains("skill body"));
    }

    #[test]
    fn compaction_prunes_audit_and_old_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        store
            .apply(&StoreBeamIntent::put("b-1", BeamKind::Fact, "t", "old body"))
            .unwrap();
        store.apply(&StoreBeamIntent::tombstone("b-1", "r")).unwrap();

        // Age the records artificially.
        for event in &mut store.audit {
            event.ts = Utc::now() - ChronoDuration::days(400);
        }
        if let Some(stored) = store.beams.get_mut("b-1") {
            stored.meta.updated_at = Utc::now() - ChronoDuration::days(400);
        }

        let (pruned, compacted) = store.compact(30, 90).unwrap();
        assert!(pruned >= 3);
        assert_eq!(compacted, 1);
        assert!(store.body_of("b-1").is_err());
        // The tombstone itself stays visible.
        assert_eq!(store.get("b-1").unwrap().status, BeamStatus::Tombstoned);
    }

    #[test]
    fn audit_trail_records_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = with_root(dir.path());
        store
            .apply(&StoreBeamIntent::put("b-1", BeamKind::Fact, "t", "x"))
            .unwrap();
        store.apply(&StoreBeamIntent::tombstone("b-1", "cleanup")).unwrap();
        let ops: Vec<&BeamOp> = store.audit().iter().map(|e| &e.op).collect();
        assert_eq!(ops, vec![&BeamOp::Put, &BeamOp::Put, &BeamOp::Tombstone]);
        assert_eq!(store.audit().last().unwrap().reason_code.as_deref(), Some("cleanup"));
    }
}
