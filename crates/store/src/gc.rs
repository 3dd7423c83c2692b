//! Owner-reference cascade cleanup.
//!
//! Secondary, best-effort path: when an owner record disappears, dependents
//! whose controller reference points at that owner's uid are deleted.
//! Controllers must not rely on it for correctness.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::Resource;
use crate::store::ObjectStore;
use crate::watch::WatchEvent;

/// Deletes dependents of type `D` orphaned by owners of type `O`.
pub struct GarbageCollector<O: Resource, D: Resource> {
    owners: Arc<dyn ObjectStore<O>>,
    dependents: Arc<dyn ObjectStore<D>>,
    _owner: PhantomData<fn() -> O>,
}

impl<O: Resource, D: Resource> GarbageCollector<O, D> {
    /// Create a new collector.
    pub fn new(owners: Arc<dyn ObjectStore<O>>, dependents: Arc<dyn ObjectStore<D>>) -> Self {
        Self {
            owners,
            dependents,
            _owner: PhantomData,
        }
    }

    /// Delete every dependent controlled by `owner`. Returns how many went.
    pub async fn collect(&self, owner: &O) -> Result<usize> {
        let Some(uid) = owner.meta().uid else {
            return Ok(0);
        };

        let orphans = self
            .dependents
            .list(Some(&owner.meta().namespace))
            .await?
            .into_iter()
            .filter(|d| d.meta().controller_owner().is_some_and(|r| r.uid == uid));

        let mut collected = 0usize;
        for orphan in orphans {
            let key = orphan.key();
            match self.dependents.delete(&key).await {
                Ok(()) => {
                    debug!(kind = D::KIND, key = %key, owner = %owner.key(), "Collected dependent");
                    collected = collected.saturating_add(1);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(collected)
    }

    /// Follow owner deletions until stopped.
    pub async fn run(&self, mut stop_rx: watch::Receiver<bool>) -> Result<()> {
        info!(owner = O::KIND, dependent = D::KIND, "Starting garbage collector");
        let mut events = self.owners.watch();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(WatchEvent::Deleted(owner)) => {
                        if let Err(e) = self.collect(&owner).await {
                            warn!(owner = %owner.key(), error = %e, "Cascade cleanup failed");
                        }
                    }
                    Ok(_) => {}
                    Err(Error::Lagged { skipped }) => {
                        warn!(skipped, "Garbage collector lagged behind owner events");
                    }
                    Err(e) => return Err(e),
                },
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        info!("Garbage collector stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}
