// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::Context;
use mzn_config::MathisonConfig;
use mzn_daemon::{Runtime, build_app};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::var("MATHISON_CONFIG").ok().map(PathBuf::from);
    let (config, warnings) =
        MathisonConfig::load(config_path.as_deref()).context("load configuration")?;
    for w in &warnings {
        tracing::warn!(target: "mzn.daemon", "config: {w}");
    }

    // Fail-closed: no listener binds unless every prerequisite verified.
    let runtime = Arc::new(Runtime::boot(config).map_err(|failure| {
        for e in &failure.errors {
            eprintln!("{e}");
        }
        anyhow::anyhow!("boot prerequisites failed; refusing to bind")
    })?);

    mzn_token::spawn_sweeper(
        Arc::clone(&runtime.tokens),
        std::time::Duration::from_secs(30),
    );

    let listen = std::env::var("MATHISON_LISTEN").unwrap_or_else(|_| "127.0.0.1:8474".to_string());
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    info!(target: "mzn.daemon", %listen, "serving");

    let app = build_app(Arc::clone(&runtime));
    let shutdown_runtime = Arc::clone(&runtime);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_runtime.shutdown();
        })
        .await
        .context("serve")?;
    Ok(())
}
