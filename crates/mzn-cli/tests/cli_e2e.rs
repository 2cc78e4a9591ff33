// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end CLI scenarios over a development-posture store
//! (`verify_manifests = false`, so fixtures need no signing keys).

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_fixtures(dir: &Path) {
    std::fs::write(
        dir.join("tiriti.md"),
        "# Treaty\nConsent and stop always win.\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("genome.json"),
        serde_json::to_string(&serde_json::json!({
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
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.join("doc.md"),
        "This treaty records consent and authority; stop always wins.\n",
    )
    .unwrap();
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config_path = dir.join("mathison.toml");
    let config = format!(
        r#"
posture = "development"
verify_manifests = false

[store]
backend = "FILE"
path = "{store}"

[artifacts]
genome_path = "{genome}"
treaty_path = "{treaty}"
"#,
        store = dir.join("store").display(),
        genome = dir.join("genome.json").display(),
        treaty = dir.join("tiriti.md").display(),
    );
    std::fs::write(&config_path, config).unwrap();
    config_path
}

fn mathison() -> Command {
    let mut cmd = Command::cargo_bin("mathison").unwrap();
    for var in [
        "MATHISON_STORE_BACKEND",
        "MATHISON_STORE_PATH",
        "MATHISON_GENOME_PATH",
        "MATHISON_ENV",
        "MATHISON_VERIFY_MANIFEST",
        "MATHISON_TRUST_STORE",
        "MATHISON_BEAM_PASSPHRASE",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Seed the identity root so later boots against the same store mount
/// normally instead of falling back to the amnesic safe mode.
fn seed_self_root(config: &str) {
    mathison()
        .args([
            "beam", "put",
            "--beam-id", "SELF_ROOT",
            "--kind", "SELF",
            "--title", "Self root",
            "--body", "I am the root.",
            "--config", config,
        ])
        .assert()
        .success();
}

#[test]
fn treaty_missing_exits_one_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());
    std::fs::remove_file(dir.path().join("tiriti.md")).unwrap();
    let outdir = dir.path().join("out");

    mathison()
        .args([
            "run",
            "--job",
            "tiriti-audit",
            "--in",
            dir.path().join("doc.md").to_str().unwrap(),
            "--outdir",
            outdir.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("PREREQ_TREATY_MISSING"));

    assert!(!outdir.exists(), "no files may be written on failed boot");
}

#[test]
fn run_completes_and_reruns_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());
    let outdir = dir.path().join("out");

    let run = |job_id: &str| {
        mathison()
            .args([
                "run",
                "--job",
                "tiriti-audit",
                "--in",
                dir.path().join("doc.md").to_str().unwrap(),
                "--outdir",
                outdir.to_str().unwrap(),
                "--job-id",
                job_id,
                "--config",
                config.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("COMPLETED"));
    };

    run("job-e2e-1");
    let report = outdir.join("audit-report.json");
    assert!(report.exists());
    let mtime = std::fs::metadata(&report).unwrap().modified().unwrap();
    let count = std::fs::read_dir(&outdir).unwrap().count();

    // Completing the same job again leaves the output set untouched.
    run("job-e2e-1");
    assert_eq!(std::fs::metadata(&report).unwrap().modified().unwrap(), mtime);
    assert_eq!(std::fs::read_dir(&outdir).unwrap().count(), count);
}

#[test]
fn status_reports_completed_job() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());
    let outdir = dir.path().join("out");

    mathison()
        .args([
            "run",
            "--job",
            "tiriti-audit",
            "--in",
            dir.path().join("doc.md").to_str().unwrap(),
            "--outdir",
            outdir.to_str().unwrap(),
            "--job-id",
            "job-status-1",
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success();

    mathison()
        .args([
            "status",
            "--job-id",
            "job-status-1",
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"));
}

#[test]
fn unknown_job_type_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());

    mathison()
        .args([
            "run",
            "--job",
            "no-such-job",
            "--in",
            dir.path().join("doc.md").to_str().unwrap(),
            "--outdir",
            dir.path().join("out").to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ROUTE_NOT_FOUND"));
}

#[test]
fn audit_verifies_chain_after_runs() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());
    let outdir = dir.path().join("out");

    mathison()
        .args([
            "run",
            "--job",
            "tiriti-audit",
            "--in",
            dir.path().join("doc.md").to_str().unwrap(),
            "--outdir",
            outdir.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success();

    mathison()
        .args(["audit", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("chain: ok"));
}

#[test]
fn beam_lifecycle_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());
    let config = config.to_str().unwrap();
    seed_self_root(config);

    mathison()
        .args([
            "beam", "put",
            "--beam-id", "fact-1",
            "--kind", "FACT",
            "--title", "a fact",
            "--body", "water is wet",
            "--config", config,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("ACTIVE"));

    mathison()
        .args(["beam", "pin", "--beam-id", "fact-1", "--config", config])
        .assert()
        .success()
        .stdout(predicate::str::contains("pinned: true"));

    mathison()
        .args(["beam", "unpin", "--beam-id", "fact-1", "--config", config])
        .assert()
        .success();

    mathison()
        .args([
            "beam", "retire",
            "--beam-id", "fact-1",
            "--reason", "stale",
            "--config", config,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("RETIRED"));

    mathison()
        .args([
            "beam", "tombstone",
            "--beam-id", "fact-1",
            "--reason", "cleanup",
            "--config", config,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("TOMBSTONED"));

    mathison()
        .args([
            "beam", "purge",
            "--beam-id", "fact-1",
            "--approval", "approval-1",
            "--config", config,
        ])
        .assert()
        .success();
}

#[test]
fn protected_tombstone_requires_approval() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());
    let config = config.to_str().unwrap();
    seed_self_root(config);

    mathison()
        .args([
            "beam", "put",
            "--beam-id", "care-1",
            "--kind", "CARE",
            "--title", "a commitment",
            "--body", "stay kind",
            "--config", config,
        ])
        .assert()
        .success();

    mathison()
        .args([
            "beam", "tombstone",
            "--beam-id", "care-1",
            "--reason", "cleanup",
            "--config", config,
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("APPROVAL_REQUIRED"));

    mathison()
        .args([
            "beam", "tombstone",
            "--beam-id", "care-1",
            "--reason", "cleanup",
            "--approval", "operator-jane",
            "--config", config,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("TOMBSTONED"));
}

#[test]
fn doctor_passes_on_healthy_store() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());

    mathison()
        .args(["doctor", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("all checks passed"));
}

#[test]
fn doctor_reports_prereq_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = write_config(dir.path());
    std::fs::remove_file(dir.path().join("genome.json")).unwrap();

    mathison()
        .args(["doctor", "--config", config.to_str().unwrap()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("PREREQ_GENOME_MISSING"));
}
