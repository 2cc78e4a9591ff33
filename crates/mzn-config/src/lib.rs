// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for Mathison.
//!
//! This crate provides [`MathisonConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, applying `MATHISON_*`
//! environment overrides, and producing advisory [`ConfigWarning`]s.
//!
//! Precedence for every overridable value: environment > config file >
//! hardcoded default.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// The selected storage backend is not provided by this build.
    #[error("storage backend '{backend}' is not supported by this build")]
    UnsupportedBackend {
        /// The requested backend.
        backend: String,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A timeout is unusually large.
    LargeTimeout {
        /// Which timeout.
        name: String,
        /// Timeout value in milliseconds.
        ms: u64,
    },
    /// Signature verification is disabled outside production.
    VerificationDisabled,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeTimeout { name, ms } => {
                write!(f, "timeout '{name}' is large ({ms} ms)")
            }
            ConfigWarning::VerificationDisabled => {
                write!(f, "artifact signature verification is disabled")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Operational posture; gates strict validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    /// Local development.
    #[default]
    Development,
    /// Pre-production staging.
    Staging,
    /// Production: trust store required, verification mandatory.
    Production,
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreBackend {
    /// One-file-per-record layout under `store.path`.
    #[default]
    File,
    /// Embedded SQL database (recognized, not provided by this build).
    Sql,
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Backend selector.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Root directory (FILE backend) or database path (SQL backend).
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".mathison/store")
}

/// Paths to governance artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ArtifactPaths {
    /// Genome bundle path (JSON). A sibling `<path>.manifest.json` holds the
    /// signed manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genome_path: Option<PathBuf>,
    /// Treaty document path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treaty_path: Option<PathBuf>,
    /// Adapter configuration path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_path: Option<PathBuf>,
    /// Trust store path (JSON array of trusted signers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_store_path: Option<PathBuf>,
}

/// Per-request payload caps enforced by the ingress/egress filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LimitsConfig {
    /// Maximum request/response payload size in bytes.
    pub max_payload_bytes: usize,
    /// Maximum length of any single string value.
    pub max_string_length: usize,
    /// Maximum length of any single array.
    pub max_array_length: usize,
    /// Maximum JSON nesting depth.
    pub max_depth: usize,
    /// Maximum in-flight governed requests.
    pub max_concurrent_requests: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1_048_576,
            max_string_length: 65_536,
            max_array_length: 4_096,
            max_depth: 32,
            max_concurrent_requests: 64,
        }
    }
}

/// Deadline settings, overridable per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeoutConfig {
    /// Per-request deadline in milliseconds.
    pub request_ms: u64,
    /// Per-job-stage deadline in milliseconds.
    pub stage_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            stage_ms: 300_000,
        }
    }
}

/// Log sink retention caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LogSinkConfig {
    /// Maximum retained envelopes.
    pub max_envelopes: usize,
    /// Maximum aggregate retained bytes.
    pub max_pending_bytes: usize,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            max_envelopes: 1_024,
            max_pending_bytes: 4_194_304,
        }
    }
}

/// BeamStore budgets and incident-mode thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BeamConfig {
    /// Daily tombstone count above which approval is required.
    pub tombstone_soft_daily: u32,
    /// Daily tombstone count above which tombstoning is denied outright.
    pub tombstone_hard_daily: u32,
    /// Rolling incident window in seconds.
    pub incident_window_secs: u64,
    /// Tombstones within the window that trip incident mode.
    pub incident_threshold: u32,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            tombstone_soft_daily: 20,
            tombstone_hard_daily: 100,
            incident_window_secs: 600,
            incident_threshold: 50,
        }
    }
}

/// Top-level runtime configuration for Mathison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct MathisonConfig {
    /// Operational posture.
    #[serde(default)]
    pub posture: Posture,
    /// Storage settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Governance artifact paths.
    #[serde(default)]
    pub artifacts: ArtifactPaths,
    /// Ingress/egress caps.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Log sink retention.
    #[serde(default)]
    pub logsink: LogSinkConfig,
    /// BeamStore budgets.
    #[serde(default)]
    pub beams: BeamConfig,
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// When `false`, artifact signature verification is skipped. Honored only
    /// outside production posture.
    #[serde(default = "default_true")]
    pub verify_manifests: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which a timeout generates a warning (1 hour).
const LARGE_TIMEOUT_MS: u64 = 3_600_000;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl MathisonConfig {
    /// Load configuration from an optional TOML file, then apply environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::FileNotFound`] if an explicit path does not exist.
    /// - [`ConfigError::ParseError`] for invalid TOML.
    /// - [`ConfigError::ValidationError`] / [`ConfigError::UnsupportedBackend`]
    ///   for semantic failures.
    pub fn load(path: Option<&Path>) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                    path: p.display().to_string(),
                })?;
                toml::from_str(&text).map_err(|e| ConfigError::ParseError {
                    reason: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        let warnings = config.validate()?;
        Ok((config, warnings))
    }

    /// Apply `MATHISON_*` environment variable overrides in place.
    ///
    /// Recognized variables: `MATHISON_STORE_BACKEND`, `MATHISON_STORE_PATH`,
    /// `MATHISON_GENOME_PATH`, `MATHISON_ENV`, `MATHISON_VERIFY_MANIFEST`.
    /// (`MATHISON_TRUST_STORE` carries inline signer JSON and is consumed by
    /// the boot sequencer, not here.)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MATHISON_STORE_BACKEND") {
            match v.to_ascii_uppercase().as_str() {
                "FILE" => self.store.backend = StoreBackend::File,
                "SQL" => self.store.backend = StoreBackend::Sql,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("MATHISON_STORE_PATH") {
            if !v.is_empty() {
                self.store.path = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var("MATHISON_GENOME_PATH") {
            if !v.is_empty() {
                self.artifacts.genome_path = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("MATHISON_ENV") {
            match v.to_ascii_lowercase().as_str() {
                "development" | "dev" => self.posture = Posture::Development,
                "staging" => self.posture = Posture::Staging,
                "production" | "prod" => self.posture = Posture::Production,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("MATHISON_VERIFY_MANIFEST") {
            match v.as_str() {
                "0" | "false" => self.verify_manifests = false,
                "1" | "true" => self.verify_manifests = true,
                _ => {}
            }
        }
    }

    /// Semantic validation; returns advisory warnings on success.
    ///
    /// # Errors
    ///
    /// See [`MathisonConfig::load`].
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if self.store.backend == StoreBackend::Sql {
            return Err(ConfigError::UnsupportedBackend {
                backend: "SQL".to_string(),
            });
        }

        if let Some(level) = &self.log_level {
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                reasons.push(format!("invalid log level '{level}'"));
            }
        }
        if self.timeouts.request_ms == 0 {
            reasons.push("timeouts.request_ms must be positive".to_string());
        }
        if self.timeouts.stage_ms == 0 {
            reasons.push("timeouts.stage_ms must be positive".to_string());
        }
        if self.limits.max_payload_bytes == 0 {
            reasons.push("limits.max_payload_bytes must be positive".to_string());
        }
        if self.limits.max_depth == 0 {
            reasons.push("limits.max_depth must be positive".to_string());
        }
        if self.logsink.max_envelopes == 0 {
            reasons.push("logsink.max_envelopes must be positive".to_string());
        }
        if self.beams.tombstone_hard_daily < self.beams.tombstone_soft_daily {
            reasons.push("beams.tombstone_hard_daily must be >= tombstone_soft_daily".to_string());
        }
        if self.posture == Posture::Production && !self.verify_manifests {
            reasons.push("verify_manifests cannot be disabled in production".to_string());
        }

        if !reasons.is_empty() {
            return Err(ConfigError::ValidationError { reasons });
        }

        if self.timeouts.stage_ms > LARGE_TIMEOUT_MS {
            warnings.push(ConfigWarning::LargeTimeout {
                name: "stage_ms".to_string(),
                ms: self.timeouts.stage_ms,
            });
        }
        if !self.verify_manifests {
            warnings.push(ConfigWarning::VerificationDisabled);
        }
        if self.artifacts.adapter_path.is_none() {
            warnings.push(ConfigWarning::MissingOptionalField {
                field: "artifacts.adapter_path".to_string(),
                hint: "model calls will be rejected until an adapter is configured".to_string(),
            });
        }

        Ok(warnings)
    }

    /// Resolved genome path, if configured.
    #[must_use]
    pub fn genome_path(&self) -> Option<&Path> {
        self.artifacts.genome_path.as_deref()
    }
}
