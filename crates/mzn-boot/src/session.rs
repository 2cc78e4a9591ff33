// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistent registry of boot sessions.
//!
//! The registry stores PUBLIC metadata only — never key material. Each boot
//! appends a session whose parent is the previous session, giving receipts
//! cross-restart attribution even though prior-session signatures can no
//! longer be re-verified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Public metadata for one boot session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSession {
    /// Public identifier of the session's boot key.
    pub boot_key_id: String,
    /// When the session began.
    pub started_at: DateTime<Utc>,
    /// When the session ended, if it shut down cleanly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Number of receipts appended during the session.
    pub receipt_count: u64,
    /// Hash of the session's first receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_receipt_hash: Option<String>,
    /// Hash of the session's last receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_receipt_hash: Option<String>,
    /// Boot key ID of the preceding session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    /// SHA-256 over the canonical public fields above.
    pub checksum: String,
}

impl BootSession {
    fn compute_checksum(&self) -> String {
        // Checksum covers every public field except itself.
        let public = serde_json::json!({
            "boot_key_id": self.boot_key_id,
            "started_at": self.started_at,
            "ended_at": self.ended_at,
            "receipt_count": self.receipt_count,
            "first_receipt_hash": self.first_receipt_hash,
            "last_receipt_hash": self.last_receipt_hash,
            "parent_session_id": self.parent_session_id,
        });
        mzn_core::canonical_hash(&public).expect("session metadata serializes")
    }

    fn reseal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Returns `true` when the stored checksum matches the recomputed one.
    #[must_use]
    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Errors from session registry operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionRegistryError {
    /// Registry file I/O failed.
    #[error("session registry io at {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Registry file is not valid JSON.
    #[error("session registry parse: {0}")]
    Parse(#[from] serde_json::Error),
    /// No session is currently open.
    #[error("no active session")]
    NoActiveSession,
}

/// File-backed, append-ordered registry of boot sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    path: PathBuf,
    sessions: Vec<BootSession>,
}

impl SessionRegistry {
    /// Open (or create) the registry at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionRegistryError`] for unreadable or unparseable files.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionRegistryError> {
        let path = path.into();
        let sessions = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(SessionRegistryError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Ok(Self { path, sessions })
    }

    /// Begin a new session for `boot_key_id`; its parent is the most recent
    /// recorded session.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub fn begin(&mut self, boot_key_id: &str) -> Result<&BootSession, SessionRegistryError> {
        let parent = self.sessions.last().map(|s| s.boot_key_id.clone());
        let mut session = BootSession {
            boot_key_id: boot_key_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            receipt_count: 0,
            first_receipt_hash: None,
            last_receipt_hash: None,
            parent_session_id: parent,
            checksum: String::new(),
        };
        session.reseal();
        info!(target: "mzn.boot", boot_key_id, "session started");
        self.sessions.push(session);
        self.save()?;
        Ok(self.sessions.last().expect("just pushed"))
    }

    /// Record a receipt hash against the current session.
    ///
    /// # Errors
    ///
    /// [`SessionRegistryError::NoActiveSession`] when no session is open.
    pub fn record_receipt(&mut self, receipt_hash: &str) -> Result<(), SessionRegistryError> {
        let session = self
            .sessions
            .last_mut()
            .filter(|s| s.ended_at.is_none())
            .ok_or(SessionRegistryError::NoActiveSession)?;
        session.receipt_count += 1;
        if session.first_receipt_hash.is_none() {
            session.first_receipt_hash = Some(receipt_hash.to_string());
        }
        session.last_receipt_hash = Some(receipt_hash.to_string());
        session.reseal();
        self.save()
    }

    /// Mark the current session ended.
    ///
    /// # Errors
    ///
    /// [`SessionRegistryError::NoActiveSession`] when no session is open.
    pub fn end_current(&mut self) -> Result<(), SessionRegistryError> {
        let session = self
            .sessions
            .last_mut()
            .filter(|s| s.ended_at.is_none())
            .ok_or(SessionRegistryError::NoActiveSession)?;
        session.ended_at = Some(Utc::now());
        session.reseal();
        info!(target: "mzn.boot", boot_key_id = %session.boot_key_id, "session ended");
        self.save()
    }

    /// The terminal receipt hash of the most recent *completed* chain,
    /// used to link a new session's `SESSION_START` receipt.
    #[must_use]
    pub fn previous_terminal_hash(&self) -> Option<String> {
        self.sessions
            .iter()
            .rev()
            .skip(1)
            .find_map(|s| s.last_receipt_hash.clone())
    }

    /// All sessions, oldest first.
    #[must_use]
    pub fn sessions(&self) -> &[BootSession] {
        &self.sessions
    }

    /// The currently open session, if any.
    #[must_use]
    pub fn current(&self) -> Option<&BootSession> {
        self.sessions.last().filter(|s| s.ended_at.is_none())
    }

    /// Verify every stored checksum.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        self.sessions.iter().all(BootSession::checksum_valid)
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn save(&self) -> Result<(), SessionRegistryError> {
        let io_err = |source| SessionRegistryError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.sessions)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    /// Path of the registry file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
