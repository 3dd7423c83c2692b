//! Object store trait and implementations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use tokio::sync::{broadcast, RwLock};

use crate::error::{Error, Result};
use crate::record::Resource;
use crate::types::{ObjectKey, Uid};
use crate::watch::{WatchEvent, WatchStream};

/// Capacity of the watch broadcast channel.
const WATCH_CAPACITY: usize = 1024;

/// Trait for record storage backends.
///
/// Every write asserts the `resource_version` of the record it was computed
/// from. A stale version fails with `Error::Conflict`; callers must re-read
/// rather than patch and resubmit the stale copy.
#[async_trait]
pub trait ObjectStore<R: Resource>: Send + Sync {
    /// Fetch a record.
    async fn get(&self, key: &ObjectKey) -> Result<R>;

    /// List records, optionally restricted to one namespace, ordered by key.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<R>>;

    /// Create a record. The store assigns uid and resource version.
    async fn create(&self, record: R) -> Result<R>;

    /// Write the spec facet and metadata. The stored status is preserved.
    async fn update(&self, record: R) -> Result<R>;

    /// Write the status facet. Everything else is preserved.
    async fn update_status(&self, record: R) -> Result<R>;

    /// Request deletion.
    ///
    /// A record with finalizers is only marked (`deletion_timestamp`); it is
    /// removed once an update clears its last finalizer.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to change notifications.
    fn watch(&self) -> WatchStream<R>;
}

/// Counters of applied writes. No-op writes are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub creates: u64,
    pub updates: u64,
    pub status_updates: u64,
    pub deletes: u64,
}

impl StoreStats {
    /// Total number of applied writes.
    pub const fn writes(&self) -> u64 {
        self.creates
            .saturating_add(self.updates)
            .saturating_add(self.status_updates)
            .saturating_add(self.deletes)
    }
}

#[derive(Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    status_updates: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory object store with optimistic concurrency and watch support.
pub struct InMemoryStore<R: Resource> {
    objects: RwLock<BTreeMap<ObjectKey, R>>,
    revision: AtomicU64,
    events: broadcast::Sender<WatchEvent<R>>,
    counters: Counters,
}

impl<R: Resource> Default for InMemoryStore<R> {
    fn default() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            events,
            counters: Counters::default(),
        }
    }
}

impl<R: Resource> InMemoryStore<R> {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of the write counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            status_updates: self.counters.status_updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    fn publish(&self, event: WatchEvent<R>) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn check_version(key: &ObjectKey, record: &R, stored: &R) -> Result<()> {
        let expected = record.meta().resource_version;
        let actual = stored.meta().resource_version;
        if expected == actual {
            Ok(())
        } else {
            Err(Error::conflict(R::KIND, key, expected, actual))
        }
    }
}

#[async_trait]
impl<R: Resource> ObjectStore<R> for InMemoryStore<R> {
    async fn get(&self, key: &ObjectKey) -> Result<R> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(R::KIND, key))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<R>> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
            .map(|(_, record)| record.clone())
            .collect_vec())
    }

    async fn create(&self, mut record: R) -> Result<R> {
        let key = record.key();
        if key.name.is_empty() || key.namespace.is_empty() {
            return Err(Error::invalid(R::KIND, &key, "name and namespace are required"));
        }

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::already_exists(R::KIND, &key));
        }

        record.set_status(R::Status::default());
        let meta = record.meta_mut();
        meta.uid = Some(Uid::new());
        meta.resource_version = self.next_revision();
        meta.generation = 1;
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;

        objects.insert(key, record.clone());
        drop(objects);

        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        self.publish(WatchEvent::Added(record.clone()));
        Ok(record)
    }

    async fn update(&self, record: R) -> Result<R> {
        let key = record.key();
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(R::KIND, &key))?;
        Self::check_version(&key, &record, stored)?;

        let stored_meta = stored.meta();
        if stored_meta.is_deleting() {
            let added = record
                .meta()
                .finalizers
                .iter()
                .any(|f| !stored_meta.has_finalizer(f));
            if added {
                return Err(Error::invalid(
                    R::KIND,
                    &key,
                    "finalizers cannot be added once deletion is requested",
                ));
            }
        }

        let mut next = record;
        next.set_status(stored.status().clone());
        {
            let meta = next.meta_mut();
            meta.uid = stored_meta.uid;
            meta.creation_timestamp = stored_meta.creation_timestamp;
            meta.deletion_timestamp = stored_meta.deletion_timestamp;
            meta.generation = stored_meta.generation;
        }
        if next == *stored {
            return Ok(next);
        }

        let spec_changed = next.spec_differs(stored);
        let meta = next.meta_mut();
        if spec_changed {
            meta.generation = meta.generation.saturating_add(1);
        }
        meta.resource_version = self.next_revision();

        let removed = next.meta().is_deleting() && next.meta().finalizers.is_empty();
        if removed {
            objects.remove(&key);
        } else {
            objects.insert(key, next.clone());
        }
        drop(objects);

        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
            self.publish(WatchEvent::Deleted(next.clone()));
        } else {
            self.publish(WatchEvent::Modified(next.clone()));
        }
        Ok(next)
    }

    async fn update_status(&self, record: R) -> Result<R> {
        let key = record.key();
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(R::KIND, &key))?;
        Self::check_version(&key, &record, stored)?;

        if record.status() == stored.status() {
            return Ok(stored.clone());
        }

        let mut next = stored.clone();
        next.set_status(record.status().clone());
        next.meta_mut().resource_version = self.next_revision();
        objects.insert(key, next.clone());
        drop(objects);

        self.counters.status_updates.fetch_add(1, Ordering::Relaxed);
        self.publish(WatchEvent::Modified(next.clone()));
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(key)
            .ok_or_else(|| Error::not_found(R::KIND, key))?;

        if stored.meta().finalizers.is_empty() {
            let removed = objects.remove(key);
            drop(objects);
            if let Some(record) = removed {
                self.counters.deletes.fetch_add(1, Ordering::Relaxed);
                self.publish(WatchEvent::Deleted(record));
            }
            return Ok(());
        }

        if stored.meta().is_deleting() {
            return Ok(());
        }

        let mut marked = stored.clone();
        let meta = marked.meta_mut();
        meta.deletion_timestamp = Some(Utc::now());
        meta.resource_version = self.next_revision();
        objects.insert(key.clone(), marked.clone());
        drop(objects);

        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        self.publish(WatchEvent::Modified(marked));
        Ok(())
    }

    fn watch(&self) -> WatchStream<R> {
        WatchStream::new(self.events.subscribe())
    }
}

#[async_trait]
impl<R: Resource, S: ObjectStore<R> + ?Sized> ObjectStore<R> for Arc<S> {
    async fn get(&self, key: &ObjectKey) -> Result<R> {
        (**self).get(key).await
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<R>> {
        (**self).list(namespace).await
    }

    async fn create(&self, record: R) -> Result<R> {
        (**self).create(record).await
    }

    async fn update(&self, record: R) -> Result<R> {
        (**self).update(record).await
    }

    async fn update_status(&self, record: R) -> Result<R> {
        (**self).update_status(record).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        (**self).delete(key).await
    }

    fn watch(&self) -> WatchStream<R> {
        (**self).watch()
    }
}

/// A wrapper that adds tracing to an object store.
pub struct TracingStore<S> {
    inner: S,
}

impl<S> TracingStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get the wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<R: Resource, S: ObjectStore<R>> ObjectStore<R> for TracingStore<S> {
    async fn get(&self, key: &ObjectKey) -> Result<R> {
        tracing::trace!(kind = R::KIND, key = %key, "Getting record");
        self.inner.get(key).await
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<R>> {
        tracing::trace!(kind = R::KIND, namespace = ?namespace, "Listing records");
        self.inner.list(namespace).await
    }

    async fn create(&self, record: R) -> Result<R> {
        tracing::debug!(kind = R::KIND, key = %record.key(), "Creating record");
        let result = self.inner.create(record).await;
        if let Ok(ref created) = result {
            tracing::trace!(
                resource_version = created.meta().resource_version,
                "Record created"
            );
        }
        result
    }

    async fn update(&self, record: R) -> Result<R> {
        tracing::debug!(
            kind = R::KIND,
            key = %record.key(),
            resource_version = record.meta().resource_version,
            "Updating record"
        );
        self.inner.update(record).await
    }

    async fn update_status(&self, record: R) -> Result<R> {
        tracing::debug!(
            kind = R::KIND,
            key = %record.key(),
            resource_version = record.meta().resource_version,
            "Updating record status"
        );
        self.inner.update_status(record).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        tracing::debug!(kind = R::KIND, key = %key, "Deleting record");
        self.inner.delete(key).await
    }

    fn watch(&self) -> WatchStream<R> {
        self.inner.watch()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::{ConfigArtifact, ConfigSpec, Phase, CONFIG_KEY};

    const TOKEN: &str = "test.example/cleanup";

    fn spec(name: &str) -> ConfigSpec {
        ConfigSpec::new("default", name, "key: value\n")
    }

    #[tokio::test]
    async fn test_create_and_get() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let created = store.create(spec("app")).await?;

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version > 0);
        assert_eq!(created.metadata.generation, 1);

        let fetched = store.get(&created.key()).await?;
        assert_eq!(fetched, created);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_twice_fails() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        store.create(spec("app")).await?;

        let err = store.create(spec("app")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let store = InMemoryStore::<ConfigSpec>::new();
        let err = store.create(spec("")).await.unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryStore::<ConfigSpec>::new();
        let err = store
            .get(&ObjectKey::new("default", "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let created = store.create(spec("app")).await?;

        let mut first = created.clone();
        first.spec.value = "key: first\n".to_string();
        store.update(first).await?;

        let mut second = created;
        second.spec.value = "key: second\n".to_string();
        let err = store.update(second).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get(&ObjectKey::new("default", "app")).await?;
        assert_eq!(stored.spec.value, "key: first\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_update_preserves_status() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let created = store.create(spec("app")).await?;

        let mut with_status = created.clone();
        with_status.status.config_map_name = Some("app-config".to_string());
        let reported = store.update_status(with_status).await?;

        let mut edit = reported.clone();
        edit.status.config_map_name = None;
        edit.spec.status = Phase::Applied;
        let updated = store.update(edit).await?;

        assert_eq!(updated.status.config_map_name.as_deref(), Some("app-config"));
        assert_eq!(updated.spec.status, Phase::Applied);
        assert_eq!(updated.metadata.generation, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_preserves_spec() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let created = store.create(spec("app")).await?;

        let mut report = created.clone();
        report.spec.value = "sneaky: edit\n".to_string();
        report.status.config_map_name = Some("app-config".to_string());
        let stored = store.update_status(report).await?;

        assert_eq!(stored.spec.value, "key: value\n");
        assert_eq!(stored.status.config_map_name.as_deref(), Some("app-config"));
        assert_eq!(stored.metadata.generation, created.metadata.generation);
        Ok(())
    }

    #[tokio::test]
    async fn test_noop_update_is_not_a_write() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let created = store.create(spec("app")).await?;

        let same = store.update(created.clone()).await?;
        let same_status = store.update_status(created.clone()).await?;

        assert_eq!(same.metadata.resource_version, created.metadata.resource_version);
        assert_eq!(
            same_status.metadata.resource_version,
            created.metadata.resource_version
        );
        assert_eq!(store.stats().writes(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_removes() -> Result<()> {
        let store = InMemoryStore::<ConfigArtifact>::new();
        let created = store
            .create(ConfigArtifact::new("default", "app-config").with_entry(CONFIG_KEY, "a: 1\n"))
            .await?;

        store.delete(&created.key()).await?;

        assert!(store.get(&created.key()).await.unwrap_err().is_not_found());
        assert!(store.delete(&created.key()).await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_only_marks() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let mut record = spec("app");
        record.metadata.add_finalizer(TOKEN);
        let created = store.create(record).await?;

        store.delete(&created.key()).await?;
        let marked = store.get(&created.key()).await?;
        assert!(marked.metadata.is_deleting());

        // Second delete is idempotent.
        store.delete(&created.key()).await?;
        let again = store.get(&created.key()).await?;
        assert_eq!(again.metadata.resource_version, marked.metadata.resource_version);

        let mut released = marked;
        released.metadata.remove_finalizer(TOKEN);
        store.update(released).await?;

        assert!(store.get(&created.key()).await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_cannot_add_finalizer_while_deleting() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let mut record = spec("app");
        record.metadata.add_finalizer(TOKEN);
        let created = store.create(record).await?;
        store.delete(&created.key()).await?;

        let mut marked = store.get(&created.key()).await?;
        marked.metadata.add_finalizer("late.example/guard");
        let err = store.update(marked).await.unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_client_cannot_clear_deletion_timestamp() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let mut record = spec("app");
        record.metadata.add_finalizer(TOKEN);
        let created = store.create(record).await?;
        store.delete(&created.key()).await?;

        let mut marked = store.get(&created.key()).await?;
        marked.metadata.deletion_timestamp = None;
        marked.metadata.labels.insert("touched".to_string(), "yes".to_string());
        let updated = store.update(marked).await?;

        assert!(updated.metadata.is_deleting());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        store.create(ConfigSpec::new("a", "one", "")).await?;
        store.create(ConfigSpec::new("b", "two", "")).await?;
        store.create(ConfigSpec::new("a", "three", "")).await?;

        assert_eq!(store.list(None).await?.len(), 3);
        let names: Vec<String> = store
            .list(Some("a"))
            .await?
            .into_iter()
            .map(|r| r.metadata.name)
            .collect();
        assert_eq!(names, vec!["one".to_string(), "three".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_watch_sees_lifecycle() -> Result<()> {
        let store = InMemoryStore::<ConfigSpec>::new();
        let mut watch = store.watch();

        let created = store.create(spec("app")).await?;
        let mut edit = created.clone();
        edit.spec.value = "key: new\n".to_string();
        store.update(edit).await?;
        store.delete(&created.key()).await?;

        assert_eq!(watch.recv().await?.event_type(), "added");
        assert_eq!(watch.recv().await?.event_type(), "modified");
        let deleted = watch.recv().await?;
        assert_eq!(deleted.event_type(), "deleted");
        assert_eq!(deleted.key(), created.key());
        Ok(())
    }

    #[tokio::test]
    async fn test_tracing_store_delegates() -> Result<()> {
        let inner = InMemoryStore::<ConfigSpec>::new_arc();
        let store = TracingStore::new(Arc::clone(&inner));

        let created = store.create(spec("app")).await?;
        let fetched = store.get(&created.key()).await?;

        assert_eq!(fetched, created);
        assert_eq!(inner.stats().creates, 1);
        Ok(())
    }
}
