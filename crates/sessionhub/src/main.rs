//! SessionHub: multi-session connection manager, entry point.
//!
//! # Usage
//!
//! ```text
//! sessionhub [OPTIONS]
//!
//! Options:
//!   --config <PATH>        TOML configuration file [default: sessionhub.toml]
//!   --transport <KIND>     Transport driver: null | bridge
//!   --bridge-addr <ADDR>   Protocol bridge address (host:port)
//!   --log-level <LEVEL>    Fallback log level when RUST_LOG is unset
//!   --dump-config          Print the effective configuration and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                 | Overrides          |
//! |--------------------------|--------------------|
//! | `SESSIONHUB_CONFIG`      | `--config`         |
//! | `SESSIONHUB_TRANSPORT`   | `--transport`      |
//! | `SESSIONHUB_BRIDGE_ADDR` | `--bridge-addr`    |
//! | `SESSIONHUB_LOG_LEVEL`   | `--log-level`      |
//!
//! Command-line values beat the environment, which beats the config file.
//!
//! # What happens at startup
//!
//! 1. The config file is loaded (a missing file means defaults).
//! 2. `tracing_subscriber` is initialised from `RUST_LOG`, falling back to
//!    the configured log level.
//! 3. The transport driver and the file-backed stores are built.
//! 4. The last state snapshot is restored and every session listed under
//!    `[manager] sessions` is initialised.
//! 5. The persister runs until Ctrl+C; then a final snapshot is written and
//!    every session is stopped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sessionhub::application::events::SessionEvent;
use sessionhub::application::persister::StatePersister;
use sessionhub::application::registry::SessionRegistry;
use sessionhub::infrastructure::storage::config::{load_config, render_config};
use sessionhub::infrastructure::storage::credentials::FileCredentialStore;
use sessionhub::infrastructure::storage::snapshot::JsonSnapshotStore;
use sessionhub::infrastructure::transport::{build_driver, TransportKind};
use sessionhub_core::SessionId;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Keeps paired sessions to an external messaging network alive and
/// delivers outbound notifications through them.
#[derive(Debug, Parser)]
#[command(name = "sessionhub", version)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = "sessionhub.toml", env = "SESSIONHUB_CONFIG")]
    config: PathBuf,

    /// Transport driver, overriding `[manager] transport`.
    #[arg(long, value_enum, env = "SESSIONHUB_TRANSPORT")]
    transport: Option<TransportKind>,

    /// Protocol bridge address, overriding `[bridge] addr`.
    #[arg(long, env = "SESSIONHUB_BRIDGE_ADDR")]
    bridge_addr: Option<String>,

    /// Log level used when `RUST_LOG` is unset, overriding `[manager] log_level`.
    #[arg(long, env = "SESSIONHUB_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    dump_config: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(kind) = cli.transport {
        config.manager.transport = kind;
    }
    if let Some(addr) = cli.bridge_addr {
        config.bridge.addr = addr;
    }
    if let Some(level) = cli.log_level {
        config.manager.log_level = level;
    }

    if cli.dump_config {
        print!("{}", render_config(&config).context("failed to render config")?);
        return Ok(());
    }

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.manager.log_level)),
        )
        .init();

    info!(
        transport = %config.manager.transport,
        config = %cli.config.display(),
        "starting sessionhub"
    );

    // ── Composition root ──────────────────────────────────────────────────────
    let driver = build_driver(config.manager.transport, &config.bridge.addr);
    let credentials = Arc::new(FileCredentialStore::new(&config.manager.credentials_dir));
    let snapshots = Arc::new(JsonSnapshotStore::new(&config.manager.state_file));
    let registry = SessionRegistry::new(config.to_policy(), driver, credentials);

    spawn_challenge_printer(registry.subscribe());

    let persister = StatePersister::new(registry.clone(), snapshots);
    persister.restore().await;

    for name in &config.manager.sessions {
        let id = SessionId::new(name.as_str());
        match registry.initialize(&id).await {
            Ok(status) => info!(session_id = %id, state = %status.state, "session initialised"),
            Err(e) => warn!(session_id = %id, error = %e, "failed to initialise session"),
        }
    }

    let (persist_stop_tx, persist_stop_rx) = watch::channel(false);
    let persist_task = persister.spawn(persist_stop_rx);

    // ── Run until Ctrl+C ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown requested");

    // Final snapshot first, while every session can still answer.
    persist_stop_tx.send_replace(true);
    if let Err(e) = persist_task.await {
        warn!(error = %e, "state persister task failed");
    }
    registry.shutdown().await;

    info!("sessionhub stopped");
    Ok(())
}

/// Shows pairing codes to the operator as they are issued.
fn spawn_challenge_printer(mut events: broadcast::Receiver<SessionEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::PairingChallengeIssued {
                    session_id,
                    challenge,
                }) => {
                    info!(session_id = %session_id, code = %challenge.code, "pairing code ready");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
