//! Record model and object store for confsync.
//!
//! This crate is the substrate the reconciler runs against:
//!
//! - **Records**: `ConfigSpec` (desired state) and `ConfigArtifact` (derived
//!   artifact), each with shared `ObjectMeta`
//! - **Object store**: get/list/create/update/update_status/delete/watch with
//!   optimistic concurrency on `resource_version`
//! - **Finalizer-gated deletion**: deleting a record with finalizers only
//!   marks it; it goes away when the last finalizer is removed
//! - **Watch**: broadcast change notifications
//! - **Cascade cleanup**: `GarbageCollector` follows owner references
//!
//! # Example
//!
//! ```ignore
//! use confsync_store::{ConfigSpec, InMemoryStore, ObjectStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::<ConfigSpec>::new_arc();
//!     let mut watch = store.watch();
//!
//!     let created = store
//!         .create(ConfigSpec::new("default", "app", "key: value\n"))
//!         .await
//!         .unwrap();
//!
//!     let event = watch.recv().await.unwrap();
//!     println!("{} {}", event.event_type(), created.key());
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod gc;
pub mod record;
pub mod registry;
pub mod store;
pub mod types;
pub mod watch;

// Re-export main types
pub use error::{Error, Result};
pub use gc::GarbageCollector;
pub use record::{
    artifact_name, Condition, ConditionStatus, ConfigArtifact, ConfigSpec, ConfigSpecSpec,
    ConfigSpecStatus, Phase, Resource, ARTIFACT_SUFFIX, CONFIG_KEY,
};
pub use registry::{ResourceRegistry, CONFIG_ARTIFACT_API_VERSION, CONFIG_SPEC_API_VERSION};
pub use store::{InMemoryStore, ObjectStore, StoreStats, TracingStore};
pub use types::{ObjectKey, ObjectMeta, OwnerReference, TypeMeta, Uid};
pub use watch::{WatchEvent, WatchStream};
