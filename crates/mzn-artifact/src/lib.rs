// SPDX-License-Identifier: MIT OR Apache-2.0
//! Signed artifact manifests, the trust store, and the artifact verifier.
//!
//! Governance artifacts (genome, treaty, policy, adapter config) are loaded
//! only after their manifest passes verification: signer known, algorithm
//! matching, content hash matching, signature valid. Any failure leaves the
//! artifact unusable — there is no partial activation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Genome and treaty payload types.
pub mod genome;
/// Artifact manifest wire types.
pub mod manifest;
/// Trusted signer records and the trust store.
pub mod trust;
/// The verifier itself.
pub mod verify;

pub use genome::{Authority, Genome, GenomeCapability, GenomeRisk, TreatyInfo};
pub use manifest::{ArtifactManifest, ArtifactType, ManifestSignature, SignatureAlg};
pub use trust::{TrustStore, TrustStoreError, TrustedSigner};
pub use verify::{ArtifactVerifier, Verification};
