// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pre-boot prerequisite validation.
//!
//! [`validate_all`] runs the fixed sequence config → treaty → genome →
//! adapter, collecting every failure instead of stopping at the first so
//! operators see the full repair list. The server refuses to bind its
//! listener and the CLI exits non-zero unless the outcome reports `ok`.

use mzn_artifact::{ArtifactManifest, ArtifactVerifier, Genome, TreatyInfo, TrustStore};
use mzn_config::{MathisonConfig, Posture};
use mzn_error::{MathisonError, ReasonCode};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Result of prerequisite validation.
#[derive(Debug, Default)]
pub struct PrereqOutcome {
    /// `true` only when every prerequisite passed.
    pub ok: bool,
    /// Structured failures, in sequence order.
    pub errors: Vec<MathisonError>,
    /// Advisory findings.
    pub warnings: Vec<String>,
    /// The verified genome, when loading succeeded.
    pub genome: Option<Genome>,
    /// The genome's verified manifest.
    pub genome_manifest: Option<ArtifactManifest>,
    /// Public treaty metadata.
    pub treaty: Option<TreatyInfo>,
}

/// Sibling manifest path convention: `<file>.manifest.json`.
fn manifest_path_for(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".manifest.json");
    artifact.with_file_name(name)
}

/// Load the trust store: inline `MATHISON_TRUST_STORE` JSON wins over the
/// configured file path.
fn load_trust_store(config: &MathisonConfig) -> Result<TrustStore, MathisonError> {
    if let Ok(inline) = std::env::var("MATHISON_TRUST_STORE") {
        if !inline.is_empty() {
            return TrustStore::from_json(&inline).map_err(|e| {
                MathisonError::new(ReasonCode::TrustStoreNotConfigured, e.to_string())
            });
        }
    }
    match &config.artifacts.trust_store_path {
        Some(path) => TrustStore::load(path)
            .map_err(|e| MathisonError::new(ReasonCode::TrustStoreNotConfigured, e.to_string())),
        None => Err(MathisonError::new(
            ReasonCode::TrustStoreNotConfigured,
            "no trusted signers configured (set MATHISON_TRUST_STORE or artifacts.trust_store_path)",
        )),
    }
}

/// Verify one artifact file against its sibling manifest.
///
/// Returns the verified manifest, or a list of failure strings.
fn verify_artifact(
    verifier: &ArtifactVerifier,
    path: &Path,
    content: &[u8],
) -> Result<ArtifactManifest, Vec<String>> {
    let manifest_path = manifest_path_for(path);
    let manifest_text = std::fs::read_to_string(&manifest_path)
        .map_err(|e| vec![format!("manifest {} unreadable: {e}", manifest_path.display())])?;
    let manifest: ArtifactManifest = serde_json::from_str(&manifest_text)
        .map_err(|e| vec![format!("manifest {} malformed: {e}", manifest_path.display())])?;
    let verification = verifier.verify(&manifest, content);
    if verification.verified {
        Ok(manifest)
    } else {
        Err(verification.errors)
    }
}

/// Run the full prerequisite sequence against a loaded configuration.
#[must_use]
pub fn validate_all(config: &MathisonConfig) -> PrereqOutcome {
    let mut out = PrereqOutcome::default();

    // -- config ------------------------------------------------------------
    if config.artifacts.treaty_path.is_none() {
        out.errors.push(MathisonError::new(
            ReasonCode::PrereqConfigInvalid,
            "artifacts.treaty_path is not configured",
        ));
    }
    if config.genome_path().is_none() {
        out.errors.push(MathisonError::new(
            ReasonCode::PrereqConfigInvalid,
            "artifacts.genome_path is not configured (or set MATHISON_GENOME_PATH)",
        ));
    }

    let verify = config.verify_manifests || config.posture == Posture::Production;
    if !verify {
        out.warnings
            .push("artifact signature verification disabled (development posture)".to_string());
    }

    let verifier = if verify {
        match load_trust_store(config) {
            Ok(store) => Some(ArtifactVerifier::new(store)),
            Err(e) => {
                out.errors.push(e);
                None
            }
        }
    } else {
        None
    };

    // -- treaty ------------------------------------------------------------
    if let Some(treaty_path) = &config.artifacts.treaty_path {
        match std::fs::read(treaty_path) {
            Ok(bytes) if !bytes.is_empty() => {
                let content_hash = mzn_core::sha256_hex(&bytes);
                match &verifier {
                    Some(v) => match verify_artifact(v, treaty_path, &bytes) {
                        Ok(manifest) => {
                            out.treaty = Some(TreatyInfo {
                                version: manifest.version.clone(),
                                authority: manifest.signer_id.clone(),
                                content_hash,
                            });
                        }
                        Err(errors) => {
                            let mut err = MathisonError::new(
                                ReasonCode::PrereqTreatyInvalid,
                                "treaty failed verification",
                            );
                            for v in errors {
                                err = err.with_violation(v);
                            }
                            out.errors.push(err);
                        }
                    },
                    None => {
                        out.treaty = Some(TreatyInfo {
                            version: "unverified".to_string(),
                            authority: "unverified".to_string(),
                            content_hash,
                        });
                    }
                }
            }
            Ok(_) => {
                out.errors.push(
                    MathisonError::new(ReasonCode::PrereqTreatyMissing, "treaty file is empty")
                        .with_context("path", treaty_path.display().to_string()),
                );
            }
            Err(e) => {
                out.errors.push(
                    MathisonError::new(
                        ReasonCode::PrereqTreatyMissing,
                        format!("treaty unreadable: {e}"),
                    )
                    .with_context("path", treaty_path.display().to_string()),
                );
            }
        }
    }

    // -- genome ------------------------------------------------------------
    if let Some(genome_path) = config.genome_path() {
        match std::fs::read(genome_path) {
            Ok(bytes) => {
                let verified_manifest = match &verifier {
                    Some(v) => match verify_artifact(v, genome_path, &bytes) {
                        Ok(manifest) => Some(manifest),
                        Err(errors) => {
                            let mut err = MathisonError::new(
                                ReasonCode::PrereqGenomeSignatureInvalid,
                                "genome failed verification",
                            );
                            for violation in errors {
                                err = err.with_violation(violation);
                            }
                            out.errors.push(err);
                            None
                        }
                    },
                    None => None,
                };
                // Parse only after (optional) verification so unsigned
                // content never reaches the parser in strict postures.
                if verifier.is_none() || verified_manifest.is_some() {
                    match serde_json::from_slice::<Genome>(&bytes) {
                        Ok(genome) => {
                            out.genome = Some(genome);
                            out.genome_manifest = verified_manifest;
                        }
                        Err(e) => {
                            out.errors.push(
                                MathisonError::new(
                                    ReasonCode::PrereqGenomeSignatureInvalid,
                                    format!("genome content malformed: {e}"),
                                )
                                .with_context("path", genome_path.display().to_string()),
                            );
                        }
                    }
                }
            }
            Err(e) => {
                out.errors.push(
                    MathisonError::new(
                        ReasonCode::PrereqGenomeMissing,
                        format!("genome unreadable: {e}"),
                    )
                    .with_context("path", genome_path.display().to_string()),
                );
            }
        }
    }

    // -- adapter -----------------------------------------------------------
    if let Some(adapter_path) = &config.artifacts.adapter_path {
        match std::fs::read(adapter_path) {
            Ok(bytes) => {
                if let Some(v) = &verifier {
                    if let Err(errors) = verify_artifact(v, adapter_path, &bytes) {
                        let mut err = MathisonError::new(
                            ReasonCode::PrereqAdapterInvalid,
                            "adapter config failed verification",
                        );
                        for violation in errors {
                            err = err.with_violation(violation);
                        }
                        out.errors.push(err);
                    }
                }
            }
            Err(e) => {
                out.errors.push(
                    MathisonError::new(
                        ReasonCode::PrereqAdapterMissing,
                        format!("adapter config unreadable: {e}"),
                    )
                    .with_context("path", adapter_path.display().to_string()),
                );
            }
        }
    } else {
        out.warnings
            .push("no adapter configured; model.call will be denied".to_string());
    }

    out.ok = out.errors.is_empty();
    if !out.ok {
        for e in &out.errors {
            warn!(target: "mzn.boot", reason = %e.reason_code, "prerequisite failed: {}", e.message);
        }
    }
    out
}
