//! # confsync - controller entry point
//!
//! ## Initialization Sequence
//!
//! 1. **Tracing** - `RUST_LOG`-style filter, `info` by default
//! 2. **Configuration** - config file, `CONFSYNC_*` environment, CLI flags
//! 3. **Stores** - in-memory object stores for both kinds, wrapped in tracing
//! 4. **Seed** - `ConfigSpec` manifests from `--manifests`, if given
//! 5. **Controller** - reconciler, workers, watch pump and resync
//! 6. **Garbage collector** - cascades owner deletion to artifacts
//!
//! ## Shutdown
//!
//! Ctrl+C stops the controller. In-flight passes get the configured grace
//! period to finish before they are aborted.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use confsync::cli::Cli;
use confsync::manifest;
use confsync_reconciler::{Controller, ControllerConfig, Reconciler, ReconcilerConfig};
use confsync_store::{
    ConfigArtifact, ConfigSpec, GarbageCollector, InMemoryStore, ObjectStore, ResourceRegistry,
    TracingStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    init_tracing();

    let cli = Cli::parse();
    let config = cli.controller_config()?;
    info!(
        workers = config.workers,
        finalizer = %config.finalizer,
        "confsync starting..."
    );

    let (specs, artifacts) = init_stores();

    if let Some(dir) = &cli.manifests {
        let seeded = seed_manifests(specs.as_ref(), dir).await?;
        info!(count = seeded, dir = %dir.display(), "Seeded ConfigSpec records");
    }

    let controller = Arc::new(init_controller(
        Arc::clone(&specs),
        Arc::clone(&artifacts),
        config,
    )?);
    let stopper = controller.stopper();
    let controller_handle = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run().await })
    };

    let (gc_stop_tx, gc_stop_rx) = watch::channel(false);
    let gc_handle = {
        let gc = GarbageCollector::<ConfigSpec, ConfigArtifact>::new(
            Arc::clone(&specs),
            Arc::clone(&artifacts),
        );
        tokio::spawn(async move { gc.run(gc_stop_rx).await })
    };

    info!("confsync started in {:?}", start_time.elapsed());
    info!("confsync is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;

    stopper.stop();
    let _ = gc_stop_tx.send(true);

    match controller_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Controller exited with error"),
        Err(e) => error!(error = %e, "Controller task failed"),
    }
    match gc_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Garbage collector exited with error"),
        Err(e) => warn!(error = %e, "Garbage collector task failed"),
    }

    report_artifacts(artifacts.as_ref()).await;
    info!("confsync stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

type Stores = (
    Arc<dyn ObjectStore<ConfigSpec>>,
    Arc<dyn ObjectStore<ConfigArtifact>>,
);

fn init_stores() -> Stores {
    let specs: Arc<dyn ObjectStore<ConfigSpec>> =
        Arc::new(TracingStore::new(InMemoryStore::<ConfigSpec>::new()));
    let artifacts: Arc<dyn ObjectStore<ConfigArtifact>> =
        Arc::new(TracingStore::new(InMemoryStore::<ConfigArtifact>::new()));
    (specs, artifacts)
}

async fn seed_manifests(
    specs: &dyn ObjectStore<ConfigSpec>,
    dir: &std::path::Path,
) -> Result<usize> {
    let records = manifest::load_dir(dir)?;
    let count = records.len();
    for record in records {
        let key = record.metadata.key();
        specs
            .create(record)
            .await
            .with_context(|| format!("Failed to seed {key}"))?;
    }
    Ok(count)
}

fn init_controller(
    specs: Arc<dyn ObjectStore<ConfigSpec>>,
    artifacts: Arc<dyn ObjectStore<ConfigArtifact>>,
    config: ControllerConfig,
) -> Result<Controller> {
    let reconciler = Reconciler::builder()
        .with_specs(specs)
        .with_artifacts(artifacts)
        .with_registry(Arc::new(ResourceRegistry::standard()))
        .with_config(ReconcilerConfig::from(&config))
        .build()
        .context("Failed to build reconciler")?;

    Ok(Controller::new(Arc::new(reconciler), config))
}

async fn report_artifacts(artifacts: &dyn ObjectStore<ConfigArtifact>) {
    match artifacts.list(None).await {
        Ok(list) => {
            for artifact in list {
                info!(
                    artifact = %artifact.metadata.key(),
                    bytes = artifact.config().map_or(0, str::len),
                    "Artifact"
                );
            }
        }
        Err(e) => warn!(error = %e, "Failed to list artifacts"),
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
