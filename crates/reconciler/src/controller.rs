//! Event-driven controller.
//!
//! Turns store notifications into keyed work and runs reconciliation passes
//! on a pool of workers:
//!
//! - `ConfigSpec` events enqueue the record's own key.
//! - `ConfigArtifact` events enqueue the key of their controlling owner.
//! - A lagged watch, startup, and the periodic resync enqueue every record.
//! - A failed or timed-out pass re-enqueues its key with backoff.

use std::sync::Arc;
use std::time::Duration;

use confsync_store::{ConfigArtifact, ConfigSpec, ObjectKey, ObjectStore, Resource, WatchStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::queue::{Backoff, WorkQueue};
use crate::reconciler::Reconciler;
use crate::types::ReconcileResult;

/// Runs the reconciler against store notifications.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue<ObjectKey>>,
    config: ControllerConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl Controller {
    /// Create a new controller.
    pub fn new(reconciler: Arc<Reconciler>, config: ControllerConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let queue = Arc::new(WorkQueue::new(Backoff::new(
            config.backoff_base,
            config.backoff_max,
        )));
        Self {
            reconciler,
            queue,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Get the work queue.
    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Enqueue one identity.
    pub async fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key).await;
    }

    /// Enqueue every record currently in the store.
    pub async fn enqueue_all(&self) -> Result<usize> {
        enqueue_listed(
            &self.queue,
            self.reconciler.specs().as_ref(),
            self.config.namespace.as_deref(),
        )
        .await
    }

    /// Take the next key off the queue and run one pass for it.
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn process_next(&self) -> Option<Result<ReconcileResult>> {
        let key = self.queue.get().await?;
        Some(process_key(&self.queue, &self.reconciler, key, self.config.pass_timeout).await)
    }

    /// Run until stopped.
    ///
    /// On stop the queue stops handing out work, and passes already running
    /// get `shutdown_grace` to finish before they are aborted.
    pub async fn run(&self) -> Result<()> {
        self.config.validate()?;
        info!(
            workers = self.config.workers,
            resync_secs = self.config.resync_interval.as_secs(),
            namespace = ?self.config.namespace,
            "Starting controller"
        );

        // Subscribe before listing so nothing between the two is missed.
        let spec_events = self.reconciler.specs().watch();
        let artifact_events = self.reconciler.artifacts().watch();
        let listed = self.enqueue_all().await?;
        debug!(listed, "Initial list enqueued");

        let pump = tokio::spawn(pump_events(
            spec_events,
            artifact_events,
            Arc::clone(&self.queue),
            Arc::clone(self.reconciler.specs()),
            self.config.namespace.clone(),
        ));

        let resync = (!self.config.resync_interval.is_zero()).then(|| {
            tokio::spawn(resync_loop(
                Arc::clone(&self.queue),
                Arc::clone(self.reconciler.specs()),
                self.config.namespace.clone(),
                self.config.resync_interval,
            ))
        });

        let mut workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.reconciler),
                    self.config.pass_timeout,
                ))
            })
            .collect();

        let mut stop_rx = self.stop_rx.clone();
        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }
            if stop_rx.changed().await.is_err() {
                break;
            }
        }

        info!("Stopping controller");
        self.queue.shutdown().await;
        pump.abort();
        if let Some(resync) = resync {
            resync.abort();
        }

        let grace = self.config.shutdown_grace;
        let drained =
            tokio::time::timeout(grace, futures::future::join_all(workers.iter_mut())).await;
        if drained.is_err() {
            warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Shutdown grace expired, aborting in-flight passes"
            );
            for worker in &workers {
                worker.abort();
            }
        }

        info!("Controller stopped");
        Ok(())
    }

    /// Stop the controller.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> ControllerStopper {
        ControllerStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a running controller.
#[derive(Clone)]
pub struct ControllerStopper {
    stop_tx: watch::Sender<bool>,
}

impl ControllerStopper {
    /// Stop the controller.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

fn watched(namespace: Option<&str>, key: &ObjectKey) -> bool {
    namespace.is_none_or(|ns| ns == key.namespace)
}

async fn enqueue_listed(
    queue: &WorkQueue<ObjectKey>,
    specs: &dyn ObjectStore<ConfigSpec>,
    namespace: Option<&str>,
) -> Result<usize> {
    let records = specs.list(namespace).await?;
    let count = records.len();
    for record in records {
        queue.add(record.key()).await;
    }
    Ok(count)
}

/// Owner key for an artifact event, if the artifact is controlled by a
/// `ConfigSpec`.
fn owner_key(artifact: &ConfigArtifact) -> Option<ObjectKey> {
    artifact
        .metadata
        .controller_owner()
        .filter(|owner| owner.kind == ConfigSpec::KIND)
        .map(|owner| ObjectKey::new(artifact.metadata.namespace.clone(), owner.name.clone()))
}

async fn relist(
    queue: &WorkQueue<ObjectKey>,
    specs: &dyn ObjectStore<ConfigSpec>,
    namespace: Option<&str>,
    source: &str,
    skipped: u64,
) {
    warn!(source, skipped, "Watch lagged, relisting");
    if let Err(e) = enqueue_listed(queue, specs, namespace).await {
        warn!(error = %e, "Relist failed");
    }
}

async fn pump_events(
    mut spec_events: WatchStream<ConfigSpec>,
    mut artifact_events: WatchStream<ConfigArtifact>,
    queue: Arc<WorkQueue<ObjectKey>>,
    specs: Arc<dyn ObjectStore<ConfigSpec>>,
    namespace: Option<String>,
) {
    let namespace = namespace.as_deref();
    loop {
        tokio::select! {
            event = spec_events.recv() => match event {
                Ok(event) => {
                    let key = event.key();
                    if watched(namespace, &key) {
                        debug!(key = %key, event = event.event_type(), "ConfigSpec changed");
                        queue.add(key).await;
                    }
                }
                Err(confsync_store::Error::Lagged { skipped }) => {
                    relist(&queue, specs.as_ref(), namespace, ConfigSpec::KIND, skipped).await;
                }
                Err(_) => break,
            },
            event = artifact_events.recv() => match event {
                Ok(event) => {
                    if let Some(key) = owner_key(event.object()).filter(|k| watched(namespace, k)) {
                        debug!(key = %key, event = event.event_type(), "Owned artifact changed");
                        queue.add(key).await;
                    }
                }
                Err(confsync_store::Error::Lagged { skipped }) => {
                    relist(&queue, specs.as_ref(), namespace, ConfigArtifact::KIND, skipped).await;
                }
                Err(_) => break,
            },
        }
    }
    debug!("Watch closed, event pump exiting");
}

async fn resync_loop(
    queue: Arc<WorkQueue<ObjectKey>>,
    specs: Arc<dyn ObjectStore<ConfigSpec>>,
    namespace: Option<String>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    // the first tick completes immediately and startup already listed
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match enqueue_listed(&queue, specs.as_ref(), namespace.as_deref()).await {
            Ok(count) => debug!(count, "Resync enqueued"),
            Err(e) => warn!(error = %e, "Resync list failed"),
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<Reconciler>,
    pass_timeout: Duration,
) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        // Outcome is already logged and requeued.
        let _ = process_key(&queue, &reconciler, key, pass_timeout).await;
    }
    debug!(worker = id, "Worker exiting");
}

async fn process_key(
    queue: &Arc<WorkQueue<ObjectKey>>,
    reconciler: &Reconciler,
    key: ObjectKey,
    pass_timeout: Duration,
) -> Result<ReconcileResult> {
    let outcome = match tokio::time::timeout(pass_timeout, reconciler.reconcile(&key)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::timeout(&key, pass_timeout)),
    };

    match &outcome {
        Ok(_) => queue.forget(&key).await,
        Err(e) => {
            let delay = queue.add_rate_limited(key.clone()).await;
            warn!(
                key = %key,
                error = %e,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconciliation failed, requeueing"
            );
        }
    }
    queue.done(&key).await;
    outcome
}
