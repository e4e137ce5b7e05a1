//! # Slumber - standalone controller
//!
//! ## Initialization Sequence
//!
//! 1. **Tracing** - `--log-level`, then `RUST_LOG`, then `info`
//! 2. **Settings** - TOML file or defaults
//! 3. **Store** - in-memory store seeded from a YAML document
//! 4. **Runtime** - operator configuration task, discovery and scheduler
//!
//! ## Shutdown
//!
//! SIGTERM/SIGINT stop discovery, cancel timers and wait for in-flight
//! passes up to the configured shutdown timeout.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use slumber::cli::{Cli, Commands};
use slumber::seed::Seed;
use slumber_controller::{Runtime, Settings, ShutdownCoordinator, install_signal_handlers};
use slumber_core::SystemClock;
use slumber_probe::{SlpProber, StatusProber};
use slumber_reconciler::content_hash;
use slumber_store::{InMemoryResourceStore, TracingResourceStore};

/// Extra time the coordinator allows on top of the scheduler's own drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Run { config, seed } => run(config.as_deref(), &seed).await,
        Commands::Probe {
            host,
            port,
            timeout_ms,
        } => probe(&host, port, Duration::from_millis(timeout_ms)).await,
        Commands::Hash { seed } => hash(&seed),
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config: Option<&Path>, seed: &Path) -> Result<()> {
    let start_time = Instant::now();
    info!("Slumber controller starting...");

    let settings = config
        .map(Settings::load)
        .transpose()
        .context("Failed to load controller settings")?
        .unwrap_or_default();
    let seed = Seed::load(seed).context("Failed to load seed document")?;

    let memory = InMemoryResourceStore::new();
    let instances = seed.apply(&memory).await;
    if seed.operator_config.is_none() {
        warn!("Seed has no operator configuration; instances wait until one is declared");
    }
    let store = Arc::new(TracingResourceStore::new(memory));

    let prober = SlpProber::new().with_protocol_version(settings.protocol_version);
    let shutdown = Arc::new(ShutdownCoordinator::with_timeout(
        settings.shutdown_timeout() + SHUTDOWN_GRACE,
    ));
    let _signals = install_signal_handlers(Arc::clone(&shutdown));

    info!(
        instances,
        workers = settings.workers,
        init_ms = start_time.elapsed().as_millis(),
        "Initialization complete"
    );

    let runtime = Runtime::new(
        store.clone(),
        store,
        Arc::new(prober),
        Arc::new(SystemClock),
        settings,
    );
    let stats = runtime.run(shutdown).await;

    if !stats.drained {
        warn!("In-flight passes did not finish before the shutdown timeout");
    }
    info!(
        passes = stats.scheduler.passes,
        coalesced = stats.scheduler.coalesced,
        aborted = stats.scheduler.aborted,
        panicked = stats.scheduler.panicked,
        instances = stats.instances,
        phase = ?stats.phase,
        uptime_secs = start_time.elapsed().as_secs(),
        "Slumber controller stopped"
    );
    Ok(())
}

async fn probe(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let report = SlpProber::new()
        .probe(host, port, timeout)
        .await
        .with_context(|| format!("Cannot probe {host}:{port}"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn hash(seed: &Path) -> Result<()> {
    let seed = Seed::load(seed).context("Failed to load seed document")?;
    for instance in seed.instances() {
        let digest = content_hash(&instance.spec)
            .with_context(|| format!("Cannot hash {}", instance.id))?;
        println!("{} {digest}", instance.id);
    }
    Ok(())
}
