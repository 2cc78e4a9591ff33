// SPDX-License-Identifier: MIT OR Apache-2.0
//! Artifact manifest wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of governance artifact a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// Signed capability configuration.
    Genome,
    /// Human-readable governance document.
    Treaty,
    /// Policy bundle.
    Policy,
    /// LLM adapter configuration.
    Adapter,
    /// Runtime configuration.
    Config,
}

/// Signature algorithm declared by a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlg {
    /// Ed25519 over the artifact content bytes.
    #[serde(rename = "ed25519")]
    Ed25519,
    /// HMAC-SHA256 over the artifact content bytes (shared-key deployments).
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
}

/// Detached signature attached to a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSignature {
    /// Declared algorithm.
    pub alg: SignatureAlg,
    /// Base64-encoded signature bytes.
    pub sig_b64: String,
}

/// Manifest describing one signed governance artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Stable artifact identifier.
    pub artifact_id: String,
    /// Artifact kind.
    pub artifact_type: ArtifactType,
    /// Artifact version string.
    pub version: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Identity of the signer (human or service).
    pub signer_id: String,
    /// Key the signature was produced with.
    pub key_id: String,
    /// Detached signature.
    pub signature: ManifestSignature,
    /// Hex SHA-256 of the artifact's canonical content bytes.
    pub content_hash: String,
    /// Compatible substrate versions.
    #[serde(default)]
    pub compat: Vec<String>,
}
