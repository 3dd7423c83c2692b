//! Finalizer management.

use std::sync::Arc;

use confsync_store::{ObjectStore, Resource};
use tracing::debug;

use crate::error::Result;

/// Adds and removes one finalizer token on records of kind `R`.
///
/// Both operations are no-ops when the record is already in the wanted
/// state. A write uses the record's resource version as-is, so a stale copy
/// fails with a conflict; the caller restarts its pass from a fresh read.
pub struct FinalizerManager<R: Resource> {
    store: Arc<dyn ObjectStore<R>>,
    token: String,
}

impl<R: Resource> FinalizerManager<R> {
    /// Create a new manager for `token`.
    pub fn new(store: Arc<dyn ObjectStore<R>>, token: impl Into<String>) -> Self {
        Self {
            store,
            token: token.into(),
        }
    }

    #[must_use]
    pub fn is_present(&self, record: &R) -> bool {
        record.meta().has_finalizer(&self.token)
    }

    /// Make sure the token is on the record.
    ///
    /// Returns the persisted record and whether a write happened.
    pub async fn ensure_present(&self, mut record: R) -> Result<(R, bool)> {
        if !record.meta_mut().add_finalizer(&self.token) {
            return Ok((record, false));
        }
        debug!(kind = R::KIND, key = %record.key(), token = %self.token, "Adding finalizer");
        let persisted = self.store.update(record).await?;
        Ok((persisted, true))
    }

    /// Make sure the token is not on the record.
    ///
    /// Returns the persisted record and whether a write happened. If the
    /// record was marked for deletion and this was its last finalizer, the
    /// store has removed it by the time this returns.
    pub async fn ensure_absent(&self, mut record: R) -> Result<(R, bool)> {
        if !record.meta_mut().remove_finalizer(&self.token) {
            return Ok((record, false));
        }
        debug!(kind = R::KIND, key = %record.key(), token = %self.token, "Removing finalizer");
        let persisted = self.store.update(record).await?;
        Ok((persisted, true))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use confsync_store::{ConfigSpec, InMemoryStore, ObjectKey};

    const TOKEN: &str = "test.example/cleanup";

    fn setup() -> (Arc<InMemoryStore<ConfigSpec>>, FinalizerManager<ConfigSpec>) {
        let store = InMemoryStore::<ConfigSpec>::new_arc();
        let manager = FinalizerManager::new(store.clone() as Arc<dyn ObjectStore<ConfigSpec>>, TOKEN);
        (store, manager)
    }

    #[tokio::test]
    async fn test_ensure_present_adds_once() -> Result<()> {
        let (store, manager) = setup();
        let created = store.create(ConfigSpec::new("default", "app", "")).await?;

        let (record, changed) = manager.ensure_present(created).await?;
        assert!(changed);
        assert!(manager.is_present(&record));

        let (again, changed) = manager.ensure_present(record.clone()).await?;
        assert!(!changed);
        assert_eq!(again.metadata.resource_version, record.metadata.resource_version);
        assert_eq!(store.stats().updates, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_absent_is_noop_without_token() -> Result<()> {
        let (store, manager) = setup();
        let created = store.create(ConfigSpec::new("default", "app", "")).await?;

        let (_, changed) = manager.ensure_absent(created).await?;
        assert!(!changed);
        assert_eq!(store.stats().updates, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_copy_conflicts() -> Result<()> {
        let (store, manager) = setup();
        let created = store.create(ConfigSpec::new("default", "app", "")).await?;

        let mut concurrent = created.clone();
        concurrent
            .metadata
            .labels
            .insert("team".to_string(), "a".to_string());
        store.update(concurrent).await?;

        let err = manager.ensure_present(created).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get(&ObjectKey::new("default", "app")).await?;
        assert!(!manager.is_present(&stored));
        assert_eq!(stored.metadata.labels.get("team").map(String::as_str), Some("a"));
        Ok(())
    }

    #[tokio::test]
    async fn test_removing_last_finalizer_releases_deleted_record() -> Result<()> {
        let (store, manager) = setup();
        let created = store.create(ConfigSpec::new("default", "app", "")).await?;
        let (record, _) = manager.ensure_present(created).await?;

        store.delete(&record.key()).await?;
        let marked = store.get(&record.key()).await?;
        let (_, changed) = manager.ensure_absent(marked).await?;

        assert!(changed);
        assert!(store.get(&record.key()).await.unwrap_err().is_not_found());
        Ok(())
    }
}
