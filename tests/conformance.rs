// SPDX-License-Identifier: MIT OR Apache-2.0
//! Substrate-wide conformance checks: no-bypass, deny-by-default,
//! single-use tokens, signed-artifact gating, hash chains, proof integrity,
//! and fail-closed boot.

mod common;

use common::bootable_config;
use mathison::daemon::Runtime;
use mathison::error::ReasonCode;
use mathison::token::{MintRequest, ValidateOptions};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;

fn clear_env() {
    // Env-var mutation is unsafe in edition 2024; serial tests only.
    #[allow(unsafe_code)]
    unsafe {
        std::env::remove_var("MATHISON_TRUST_STORE");
        std::env::remove_var("MATHISON_GENOME_PATH");
        std::env::remove_var("MATHISON_STORE_PATH");
    }
}

fn booted(dir: &std::path::Path) -> Arc<Runtime> {
    Arc::new(Runtime::boot(bootable_config(dir)).unwrap())
}

#[test]
#[serial]
fn every_route_is_governed() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let runtime = booted(dir.path());
    // Structural no-bypass: the route registry has no raw bindings, and
    // every bound action exists in the action registry.
    assert!(runtime.routes.ungoverned().is_empty());
    for route in runtime.routes.routes() {
        assert!(
            runtime.registry.get(&route.action_id).is_some(),
            "route {} {} binds unregistered action {}",
            route.method,
            route.path,
            route.action_id
        );
    }
    runtime.shutdown();
}

#[tokio::test]
#[serial]
async fn unregistered_tools_are_denied_by_default() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let runtime = booted(dir.path());
    let token = runtime
        .tokens
        .mint(MintRequest::single_use("tool.invoke", "probe", 30_000))
        .unwrap();
    for name in ["ghost", "shell", "curl", ""] {
        let out = runtime.gateway.invoke(name, json!({}), &token, "probe").await;
        assert!(!out.success);
        assert!(
            out.denied_reason.as_deref().unwrap_or_default().starts_with("TOOL_NOT_REGISTERED"),
            "tool '{name}' was not denied by default"
        );
    }
    runtime.shutdown();
}

#[test]
#[serial]
fn tokens_are_single_use() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let runtime = booted(dir.path());
    let token = runtime
        .tokens
        .mint(MintRequest::single_use("storage.write", "probe", 30_000))
        .unwrap();
    let opts = ValidateOptions {
        expected_action_id: "storage.write",
        expected_actor: "probe",
        increment_use: true,
    };
    runtime.tokens.validate(&token, &opts).unwrap();
    let err = runtime.tokens.validate(&token, &opts).unwrap_err();
    assert_eq!(err.reason_code, ReasonCode::TokenReplayed);
    runtime.shutdown();
}

#[tokio::test]
#[serial]
async fn full_pipeline_proof_has_all_five_stages() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let runtime = booted(dir.path());
    let input = dir.path().join("doc.md");
    std::fs::write(&input, "treaty consent stop authority").unwrap();
    let outdir = dir.path().join("out");

    let response = mathison::daemon::ops::run_job(
        &runtime,
        json!({
            "jobType": "tiriti-audit",
            "inputs": {"in": input.display().to_string(), "outdir": outdir.display().to_string()},
            "jobId": "conformance-1",
        }),
        "probe",
    )
    .await
    .unwrap();

    let proof = response.receipt.proof.as_ref().unwrap();
    for stage in mathison::core::PIPELINE_STAGES {
        assert!(proof.stage_hashes.contains_key(stage), "missing stage {stage}");
    }
    mathison::proof::verify(proof, &runtime.boot_key).unwrap();

    // Mutating any stage hash or the signature breaks verification.
    let mut tampered = proof.clone();
    tampered.stage_hashes.insert("handler".into(), "0".repeat(64));
    assert!(mathison::proof::verify(&tampered, &runtime.boot_key).is_err());
    let mut tampered = proof.clone();
    tampered.signature = "0".repeat(64);
    assert!(mathison::proof::verify(&tampered, &runtime.boot_key).is_err());
    runtime.shutdown();
}

#[tokio::test]
#[serial]
async fn receipt_chain_verifies_end_to_end() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let runtime = booted(dir.path());
    let input = dir.path().join("doc.md");
    std::fs::write(&input, "treaty").unwrap();
    let outdir = dir.path().join("out");
    for i in 0..3 {
        mathison::daemon::ops::run_job(
            &runtime,
            json!({
                "jobType": "tiriti-audit",
                "inputs": {"in": input.display().to_string(), "outdir": outdir.display().to_string()},
                "jobId": format!("chain-{i}"),
            }),
            "probe",
        )
        .await
        .unwrap();
    }
    let receipts = runtime.receipts.all().unwrap();
    assert!(receipts.len() >= 10);
    for pair in receipts.windows(2) {
        assert_eq!(
            pair[1].prev_receipt_hash.as_deref(),
            pair[0].this_hash.as_deref(),
            "adjacent receipts must link"
        );
    }
    runtime.receipts.verify().unwrap();
    runtime.shutdown();
}

#[test]
#[serial]
fn unsigned_artifacts_refuse_boot() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = bootable_config(dir.path());
    // Re-sign the genome with an untrusted key: content intact, signer not
    // in the trust store.
    let genome_bytes = std::fs::read(dir.path().join("genome.json")).unwrap();
    let rogue = ed25519_dalek::SigningKey::from_bytes(&[99u8; 32]);
    use ed25519_dalek::Signer as _;
    let manifest = mathison::artifact::ArtifactManifest {
        artifact_id: "genome.json-artifact".into(),
        artifact_type: mathison::artifact::ArtifactType::Genome,
        version: "1.0.0".into(),
        created_at: chrono::Utc::now(),
        signer_id: "rogue".into(),
        key_id: "rogue-key".into(),
        signature: mathison::artifact::ManifestSignature {
            alg: mathison::artifact::SignatureAlg::Ed25519,
            sig_b64: {
                use base64::Engine as _;
                base64::engine::general_purpose::STANDARD
                    .encode(rogue.sign(&genome_bytes).to_bytes())
            },
        },
        content_hash: mathison::core::sha256_hex(&genome_bytes),
        compat: vec![],
    };
    std::fs::write(
        dir.path().join("genome.json.manifest.json"),
        serde_json::to_string(&manifest).unwrap(),
    )
    .unwrap();

    let failure = Runtime::boot(config).unwrap_err();
    assert!(failure
        .errors
        .iter()
        .any(|e| e.reason_code == ReasonCode::PrereqGenomeSignatureInvalid));
}

#[test]
#[serial]
fn truncated_treaty_refuses_boot() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = bootable_config(dir.path());
    std::fs::write(dir.path().join("tiriti.md"), b"").unwrap();
    let failure = Runtime::boot(config).unwrap_err();
    assert!(failure
        .errors
        .iter()
        .any(|e| e.reason_code == ReasonCode::PrereqTreatyMissing));
}

#[tokio::test]
#[serial]
async fn prior_session_artifacts_do_not_verify() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = bootable_config(dir.path());
    let (old_proof, old_token) = {
        let runtime = Arc::new(Runtime::boot(config.clone()).unwrap());
        let input = dir.path().join("doc.md");
        std::fs::write(&input, "treaty").unwrap();
        let response = mathison::daemon::ops::run_job(
            &runtime,
            json!({
                "jobType": "tiriti-audit",
                "inputs": {"in": input.display().to_string(), "outdir": dir.path().join("out").display().to_string()},
            }),
            "probe",
        )
        .await
        .unwrap();
        let token = runtime
            .tokens
            .mint(MintRequest::single_use("tool.invoke", "probe", 600_000))
            .unwrap();
        runtime.shutdown();
        (response.receipt.proof.unwrap(), token)
    };

    // Restart: new boot key, same store.
    let runtime = Arc::new(Runtime::boot(config).unwrap());
    assert!(matches!(
        mathison::proof::verify(&old_proof, &runtime.boot_key).unwrap_err(),
        mathison::proof::ProofError::DifferentBootSession { .. }
    ));
    let err = runtime
        .tokens
        .validate(
            &old_token,
            &ValidateOptions {
                expected_action_id: "tool.invoke",
                expected_actor: "probe",
                increment_use: true,
            },
        )
        .unwrap_err();
    assert!(err.message.contains("different boot session"));
    // Attribution survives: the old session is in the registry with the new
    // one as its child.
    {
        let sessions = runtime.sessions.lock().unwrap();
        assert_eq!(sessions.sessions().len(), 2);
        assert!(sessions.verify_integrity());
    }
    runtime.shutdown();
}
