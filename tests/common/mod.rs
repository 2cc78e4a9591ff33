// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures: a signed artifact set and a bootable configuration.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use ed25519_dalek::{Signer, SigningKey};
use mathison::artifact::{
    ArtifactManifest, ArtifactType, ManifestSignature, SignatureAlg, TrustedSigner,
};
use mathison::config::{ArtifactPaths, MathisonConfig, StoreBackend, StoreConfig};
use std::path::Path;

fn write_signed(dir: &Path, name: &str, content: &[u8], sk: &SigningKey, kind: ArtifactType) {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    let manifest = ArtifactManifest {
        artifact_id: format!("{name}-artifact"),
        artifact_type: kind,
        version: "1.0.0".into(),
        created_at: chrono::Utc::now(),
        signer_id: "release-bot".into(),
        key_id: "k1".into(),
        signature: ManifestSignature {
            alg: SignatureAlg::Ed25519,
            sig_b64: B64.encode(sk.sign(content).to_bytes()),
        },
        content_hash: mathison::core::sha256_hex(content),
        compat: vec!["0.1".into()],
    };
    std::fs::write(
        dir.join(format!("{name}.manifest.json")),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

/// Write a complete signed artifact set into `dir` and return a bootable
/// configuration pointing at it.
pub fn bootable_config(dir: &Path) -> MathisonConfig {
    let sk = SigningKey::from_bytes(&[77u8; 32]);
    write_signed(
        dir,
        "tiriti.md",
        b"# Treaty\nConsent and stop always win.\n",
        &sk,
        ArtifactType::Treaty,
    );
    let genome = serde_json::to_vec(&serde_json::json!({
        "name": "main",
        "invariants": ["consent and stop always win"],
        "capabilities": [{
            "cap_id": "all",
            "risk_class": "C",
            "allow_actions": ["*"],
            "deny_actions": []
        }],
        "authority": {"signers": ["release-bot"], "threshold": 1},
        "parents": []
    }))
    .unwrap();
    write_signed(dir, "genome.json", &genome, &sk, ArtifactType::Genome);

    let signers = vec![TrustedSigner {
        key_id: "k1".into(),
        alg: SignatureAlg::Ed25519,
        public_key_b64: B64.encode(sk.verifying_key().to_bytes()),
        description: "test key".into(),
        added_at: chrono::Utc::now(),
    }];
    let trust_path = dir.join("trust.json");
    std::fs::write(&trust_path, serde_json::to_string(&signers).unwrap()).unwrap();

    MathisonConfig {
        store: StoreConfig {
            backend: StoreBackend::File,
            path: dir.join("store"),
        },
        artifacts: ArtifactPaths {
            genome_path: Some(dir.join("genome.json")),
            treaty_path: Some(dir.join("tiriti.md")),
            adapter_path: None,
            trust_store_path: Some(trust_path),
        },
        ..Default::default()
    }
}
