// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command implementations.
//!
//! Every command boots the full runtime (fail-closed: a missing or invalid
//! governance artifact aborts before any work happens) and goes through the
//! same governed operations the daemon serves.

use anyhow::{Context, anyhow, bail};
use mzn_config::MathisonConfig;
use mzn_daemon::{Runtime, ops};
use mzn_governor::DeniedResponse;
use mzn_receipt::STAGE_SESSION_START;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

/// Actor identity recorded for CLI-originated requests.
const CLI_ACTOR: &str = "cli";

fn load_config(path: Option<&Path>) -> anyhow::Result<MathisonConfig> {
    let (config, warnings) = MathisonConfig::load(path).context("load configuration")?;
    for w in &warnings {
        eprintln!("warning: {w}");
    }
    Ok(config)
}

/// Boot or report every prerequisite error (with reason codes) on stderr.
fn boot(config: MathisonConfig) -> anyhow::Result<Arc<Runtime>> {
    match Runtime::boot(config) {
        Ok(runtime) => Ok(Arc::new(runtime)),
        Err(failure) => {
            for e in &failure.errors {
                eprintln!("{e}");
            }
            Err(anyhow!("boot prerequisites failed"))
        }
    }
}

fn denial_to_error(denied: DeniedResponse) -> anyhow::Error {
    anyhow!("{}", denied.error)
}

fn print_body(body: &Value, as_json: bool) {
    if as_json {
        println!("{}", serde_json::to_string_pretty(body).unwrap_or_default());
    } else if let Some(map) = body.as_object() {
        for (k, v) in map {
            match v.as_str() {
                Some(s) => println!("{k}: {s}"),
                None => println!("{k}: {v}"),
            }
        }
    } else {
        println!("{body}");
    }
}

/// `mathison run`.
pub async fn run(
    config_path: Option<&Path>,
    job_type: &str,
    input: &Path,
    outdir: &Path,
    job_id: Option<&str>,
    as_json: bool,
) -> anyhow::Result<()> {
    let runtime = boot(load_config(config_path)?)?;
    let mut body = json!({
        "jobType": job_type,
        "inputs": {
            "in": input.display().to_string(),
            "outdir": outdir.display().to_string(),
        },
    });
    if let Some(id) = job_id {
        body["jobId"] = json!(id);
    }
    let result = ops::run_job(&runtime, body, CLI_ACTOR).await;
    runtime.shutdown();
    let response = result.map_err(denial_to_error)?;
    print_body(&response.body, as_json);
    Ok(())
}

/// `mathison status`.
pub async fn status(config_path: Option<&Path>, job_id: &str, as_json: bool) -> anyhow::Result<()> {
    let runtime = boot(load_config(config_path)?)?;
    let result = ops::job_status(&runtime, job_id, CLI_ACTOR).await;
    runtime.shutdown();
    let response = result.map_err(denial_to_error)?;
    print_body(&response.body, as_json);
    Ok(())
}

/// `mathison resume`.
pub async fn resume(config_path: Option<&Path>, job_id: &str, as_json: bool) -> anyhow::Result<()> {
    let runtime = boot(load_config(config_path)?)?;
    let result = ops::resume_job(&runtime, json!({"jobId": job_id}), CLI_ACTOR).await;
    runtime.shutdown();
    let response = result.map_err(denial_to_error)?;
    print_body(&response.body, as_json);
    Ok(())
}

/// `mathison beam <op>`: propose one beam lifecycle mutation through the
/// governed pipeline.
pub async fn beam(
    config_path: Option<&Path>,
    op: mzn_beamstore::BeamOp,
    body: Value,
    as_json: bool,
) -> anyhow::Result<()> {
    let runtime = boot(load_config(config_path)?)?;
    let result = mzn_daemon::beams::apply(&runtime, op, body, CLI_ACTOR).await;
    runtime.shutdown();
    let response = result.map_err(denial_to_error)?;
    print_body(&response.body, as_json);
    Ok(())
}

/// `mathison audit`: verify the receipt chain end-to-end and print session
/// boundaries and ancestry.
pub async fn audit(config_path: Option<&Path>, as_json: bool) -> anyhow::Result<()> {
    let runtime = boot(load_config(config_path)?)?;
    let verify = runtime.receipts.verify();
    let receipts = runtime.receipts.all().map_err(|e| anyhow!("{e}"))?;
    let boundaries: Vec<&mzn_receipt::Receipt> = receipts
        .iter()
        .filter(|r| r.stage == STAGE_SESSION_START)
        .collect();
    let ancestry: Vec<Value> = {
        let sessions = runtime
            .sessions
            .lock()
            .expect("session registry lock poisoned");
        sessions
            .sessions()
            .iter()
            .map(|s| {
                json!({
                    "boot_key_id": s.boot_key_id,
                    "parent": s.parent_session_id,
                    "receipts": s.receipt_count,
                    "checksum_valid": s.checksum_valid(),
                })
            })
            .collect()
    };
    let report = json!({
        "receipts": receipts.len(),
        "sessions": boundaries.len(),
        "chain_valid": verify.is_ok(),
        "ancestry": ancestry,
    });
    runtime.shutdown();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    } else {
        println!("receipts: {}", receipts.len());
        println!("session boundaries: {}", boundaries.len());
        for s in &ancestry {
            println!(
                "  session {} (parent {}) — {} receipts, checksum {}",
                s["boot_key_id"].as_str().unwrap_or("?"),
                s["parent"].as_str().unwrap_or("none"),
                s["receipts"],
                if s["checksum_valid"] == true { "ok" } else { "INVALID" },
            );
        }
        match &verify {
            Ok(()) => println!("chain: ok"),
            Err(e) => println!("chain: BROKEN ({e})"),
        }
    }
    if let Err(e) = verify {
        bail!("receipt chain verification failed: {e}");
    }
    Ok(())
}

/// `mathison doctor`: prerequisite checks plus storage health, as a human
/// summary. Exits non-zero when any check fails.
pub async fn doctor(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let outcome = mzn_boot::prereq::validate_all(&config);
    println!("prerequisites:");
    if outcome.ok {
        println!("  config:  ok");
        println!(
            "  treaty:  ok ({})",
            outcome.treaty.as_ref().map_or("?", |t| t.version.as_str())
        );
        println!(
            "  genome:  ok ({})",
            outcome
                .genome_manifest
                .as_ref()
                .map_or("unverified", |m| m.artifact_id.as_str())
        );
    } else {
        for e in &outcome.errors {
            println!("  FAIL: {e}");
        }
    }
    for w in &outcome.warnings {
        println!("  note: {w}");
    }
    if !outcome.ok {
        bail!("prerequisite checks failed");
    }

    let runtime = boot(config)?;
    let mut failed = false;
    println!("storage:");

    match runtime.receipts.verify() {
        Ok(()) => println!("  receipt chain:   ok ({} receipts)", runtime.receipts.len()),
        Err(e) => {
            println!("  receipt chain:   FAIL ({e})");
            failed = true;
        }
    }

    {
        let sessions = runtime
            .sessions
            .lock()
            .expect("session registry lock poisoned");
        if sessions.verify_integrity() {
            println!("  sessions:        ok ({} recorded)", sessions.sessions().len());
        } else {
            println!("  sessions:        FAIL (checksum mismatch)");
            failed = true;
        }
    }

    match runtime.checkpoints.list() {
        Ok(ids) => println!("  checkpoints:     ok ({} jobs)", ids.len()),
        Err(e) => {
            println!("  checkpoints:     FAIL ({e})");
            failed = true;
        }
    }

    println!(
        "  pattern set:     {} ({})",
        runtime.governor.cif.patterns().version,
        &runtime.governor.cif.patterns().content_hash()[..16],
    );
    println!("  quarantine:      {} entries", runtime.governor.cif.quarantine().len());
    println!(
        "  log sink:        {} envelopes ({} bytes pending)",
        runtime.logsink.len(),
        runtime.logsink.pending_bytes(),
    );

    // The persona frame check exercises the full gateway chain: a scoped
    // token, the deny-by-default registry, and the BeamStore behind it.
    let mut mint = mzn_token::MintRequest::single_use("governance.read", CLI_ACTOR, 30_000);
    mint.constraints
        .insert("scopes".into(), json!(["governance"]));
    match runtime.tokens.mint(mint) {
        Ok(token) => {
            let out = runtime
                .gateway
                .invoke("beam.frame", json!({}), &token, CLI_ACTOR)
                .await;
            if out.success {
                let data = out.data.unwrap_or(Value::Null);
                let amnesic = data["amnesic"] == true;
                println!(
                    "  persona frame:   {} (hash {})",
                    if amnesic { "AMNESIC" } else { "ok" },
                    data["hash"].as_str().map(|h| &h[..16]).unwrap_or("?"),
                );
                if amnesic {
                    failed = true;
                }
            } else {
                println!(
                    "  persona frame:   FAIL ({})",
                    out.denied_reason.unwrap_or_default()
                );
                failed = true;
            }
        }
        Err(e) => {
            println!("  persona frame:   FAIL ({e})");
            failed = true;
        }
    }

    runtime.shutdown();
    if failed {
        bail!("doctor found failing checks");
    }
    println!("all checks passed");
    Ok(())
}
