//! Aiolos aggregation engine daemon.
//!
//! Boots the storage backend, catches up on intervals missed while down,
//! starts the aggregation schedulers, and serves the admin API until
//! Ctrl+C. Shutdown drains every live bucket to the store before exit.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: sled under data/aggregates, admin API on 0.0.0.0:8080
//! cargo run --release
//!
//! # Explicit config file and bind address
//! ./aiolos-core --config /etc/aiolos/aiolos.toml --addr 0.0.0.0:9090
//! ```
//!
//! # Environment Variables
//!
//! - `AIOLOS_CONFIG`: Path to a TOML config file (CLI `--config` wins)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use aiolos_core::api::{create_app, ApiState};
use aiolos_core::backfill;
use aiolos_core::config::EngineConfig;
use aiolos_core::engine::AggregationEngine;
use aiolos_core::rollup::RollupStage;
use aiolos_core::storage::{AggregateStore, SledStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "aiolos-core")]
#[command(about = "Aiolos wind telemetry aggregation engine")]
#[command(version)]
struct CliArgs {
    /// Override the admin server bind address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to a TOML config file (overrides AIOLOS_CONFIG and ./aiolos.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the sled data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

// ============================================================================
// Startup catch-up
// ============================================================================

/// One backfill pass per rollup stage, recovering intervals missed while
/// the process was down. Failures are logged and boot continues; the
/// periodic drivers and manual triggers can retry later.
fn run_startup_backfill(engine: &AggregationEngine) {
    let cfg = engine.config();
    let passes = [
        (
            RollupStage::TenMinute,
            Duration::minutes(cfg.backfill.ten_minute_lookback_mins),
        ),
        (
            RollupStage::Hourly,
            Duration::minutes(cfg.backfill.hourly_lookback_mins),
        ),
    ];

    for (stage, lookback) in passes {
        let outcome = backfill::backfill_recent(
            engine.store().as_ref(),
            engine.events(),
            &cfg.aggregation,
            stage,
            lookback,
            Utc::now(),
        );
        info!(
            stage = %stage,
            checked = outcome.intervals_checked,
            rolled = outcome.intervals_rolled,
            failed = outcome.intervals_failed,
            "Startup catch-up pass complete"
        );
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::load(),
    };
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Aiolos Wind Telemetry Aggregation Engine");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    let sled_store = Arc::new(
        SledStore::open(&config.storage.data_dir).with_context(|| {
            format!(
                "Failed to open aggregate store at {}",
                config.storage.data_dir.display()
            )
        })?,
    );
    info!(path = %config.storage.data_dir.display(), "✓ Aggregate store opened");

    let store: Arc<dyn AggregateStore> = Arc::clone(&sled_store) as Arc<dyn AggregateStore>;
    let server_addr = config.server.addr.clone();
    let engine = Arc::new(AggregationEngine::new(config, store));

    run_startup_backfill(&engine);

    engine.start();
    info!("✓ Aggregation schedulers running");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let app = create_app(ApiState {
        engine: Arc::clone(&engine),
    });
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {server_addr}"))?;
    info!(addr = %server_addr, "✓ Admin API listening");
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
        })
        .await
        .context("Admin server error")?;

    // Drain live buckets and sync sled before exit.
    engine.stop().await;
    sled_store.flush().context("Failed to flush store on shutdown")?;

    info!("");
    info!("✓ Aiolos shutdown complete");
    Ok(())
}
