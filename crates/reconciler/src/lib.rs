//! K8s-style reconciliation for `ConfigSpec` records.
//!
//! For every `ConfigSpec` the controller keeps exactly one `ConfigArtifact`
//! named `<name>-config` whose `config.yaml` entry holds the record's
//! payload.
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! A pass for one identity:
//! 1. Reads the record fresh from the store
//! 2. Adds the finalizer before creating anything
//! 3. Validates the payload as YAML
//! 4. Creates or updates the artifact, stamped with an owner reference
//! 5. Records `Applied` and the apply time, then reports observed status
//!
//! When deletion is requested the pass deletes the artifact and only then
//! releases the finalizer.
//!
//! Passes are level-triggered and idempotent: a repeat pass on a converged
//! record writes nothing.
//!
//! ## Controller
//!
//! - Watches both kinds and maps artifact events to their owner
//! - Deduplicates keys so one identity is never processed concurrently
//! - Retries failures with exponential backoff
//! - Resyncs everything periodically
//!
//! # Example
//!
//! ```ignore
//! use confsync_reconciler::{Controller, ControllerConfig, Reconciler, ReconcilerConfig};
//! use confsync_store::{ConfigArtifact, ConfigSpec, InMemoryStore, ResourceRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let specs = InMemoryStore::<ConfigSpec>::new_arc();
//!     let artifacts = InMemoryStore::<ConfigArtifact>::new_arc();
//!     let reconciler = Arc::new(Reconciler::new(
//!         specs,
//!         artifacts,
//!         Arc::new(ResourceRegistry::standard()),
//!         ReconcilerConfig::default(),
//!     ));
//!
//!     let controller = Controller::new(reconciler, ControllerConfig::default());
//!
//!     // Run until stopped
//!     // controller.run().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod queue;
pub mod reconciler;
pub mod status;
pub mod types;
pub mod validator;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ControllerConfig, DEFAULT_FINALIZER};
pub use controller::{Controller, ControllerStopper};
pub use error::{Error, Result};
pub use finalizer::FinalizerManager;
pub use queue::{Backoff, WorkQueue};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use status::{
    is_ready, merge_status, ready_condition, StatusReporter, StatusUpdate, READY_CONDITION,
    REASON_APPLIED, REASON_APPLY_FAILED, REASON_INVALID_PAYLOAD,
};
pub use types::{ReconcileAction, ReconcileResult};
pub use validator::{PayloadValidator, ValidationError, YamlValidator};
