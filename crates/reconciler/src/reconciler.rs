//! Reconciler implementation.
//!
//! One pass per identity:
//!
//! 1. Read the `ConfigSpec` fresh. Gone means done.
//! 2. Deletion requested: delete the artifact, then release the finalizer.
//! 3. Otherwise make sure the finalizer is on the record before touching
//!    the artifact, validate the payload, converge the artifact, and record
//!    the outcome in the spec phase and the observed status.
//!
//! Every write carries the resource version it was computed from. Any
//! failure ends the pass; the caller re-enqueues and the next pass starts
//! over from a fresh read.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use confsync_store::{
    ConditionStatus, ConfigArtifact, ConfigSpec, ObjectKey, ObjectStore, Phase, ResourceRegistry,
    CONFIG_KEY,
};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ControllerConfig, DEFAULT_FINALIZER};
use crate::error::{Error, Result};
use crate::finalizer::FinalizerManager;
use crate::status::{
    is_ready, ready_condition, StatusReporter, StatusUpdate, REASON_APPLIED, REASON_APPLY_FAILED,
    REASON_INVALID_PAYLOAD,
};
use crate::types::{ReconcileAction, ReconcileResult};
use crate::validator::{PayloadValidator, YamlValidator};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Finalizer token this reconciler owns.
    pub finalizer: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            finalizer: DEFAULT_FINALIZER.to_string(),
        }
    }
}

impl From<&ControllerConfig> for ReconcilerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            finalizer: config.finalizer.clone(),
        }
    }
}

/// Keeps one `ConfigArtifact` in sync with each `ConfigSpec`.
pub struct Reconciler {
    specs: Arc<dyn ObjectStore<ConfigSpec>>,
    artifacts: Arc<dyn ObjectStore<ConfigArtifact>>,
    registry: Arc<ResourceRegistry>,
    validator: Arc<dyn PayloadValidator>,
    clock: Arc<dyn Clock>,
    finalizers: FinalizerManager<ConfigSpec>,
    status: StatusReporter,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a reconciler with the YAML validator and the system clock.
    pub fn new(
        specs: Arc<dyn ObjectStore<ConfigSpec>>,
        artifacts: Arc<dyn ObjectStore<ConfigArtifact>>,
        registry: Arc<ResourceRegistry>,
        config: ReconcilerConfig,
    ) -> Self {
        Self::with_parts(
            specs,
            artifacts,
            registry,
            Arc::new(YamlValidator),
            Arc::new(SystemClock),
            config,
        )
    }

    fn with_parts(
        specs: Arc<dyn ObjectStore<ConfigSpec>>,
        artifacts: Arc<dyn ObjectStore<ConfigArtifact>>,
        registry: Arc<ResourceRegistry>,
        validator: Arc<dyn PayloadValidator>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let finalizers = FinalizerManager::new(Arc::clone(&specs), config.finalizer.clone());
        let status = StatusReporter::new(Arc::clone(&specs));
        Self {
            specs,
            artifacts,
            registry,
            validator,
            clock,
            finalizers,
            status,
            config,
        }
    }

    /// Start building a reconciler.
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    /// Run one reconciliation pass for `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        let record = match self.specs.get(key).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "Record not found, nothing to reconcile");
                return Ok(ReconcileResult::unchanged(key.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        if record.metadata.is_deleting() {
            return self.finalize(record).await;
        }

        let mut actions = Vec::new();

        let (record, added) = self.finalizers.ensure_present(record).await?;
        if added {
            actions.push(ReconcileAction::AddFinalizer);
        }

        if let Err(invalid) = self.validator.validate(&record.spec.value) {
            warn!(key = %key, error = %invalid, "Payload failed validation");
            self.mark_failed(record, REASON_INVALID_PAYLOAD, &invalid.reason)
                .await;
            return Err(Error::validation(key, invalid.reason));
        }

        let written = match self.converge_artifact(&record, &mut actions).await {
            Ok(written) => written,
            Err(e) => {
                if !e.is_conflict() {
                    self.mark_failed(record, REASON_APPLY_FAILED, &e.to_string())
                        .await;
                }
                return Err(e);
            }
        };

        let now = self.clock.now();
        let record = self.refresh_spec(record, written, now, &mut actions).await?;
        self.report_applied(&record, written, now, &mut actions)
            .await?;

        let result = ReconcileResult::new(key.clone(), actions);
        if result.converged {
            debug!(key = %key, "Already converged");
        } else {
            info!(
                key = %key,
                actions = %result.summary(),
                artifact_writes = result.artifact_writes(),
                "Reconciled"
            );
        }
        Ok(result)
    }

    /// Teardown branch: artifact first, finalizer last.
    ///
    /// The finalizer is only released after the artifact delete succeeded
    /// or reported not-found, so a failed delete is retried rather than
    /// leaving an orphan behind.
    async fn finalize(&self, record: ConfigSpec) -> Result<ReconcileResult> {
        let key = record.metadata.key();
        if !self.finalizers.is_present(&record) {
            debug!(key = %key, "Deletion in progress, finalizer already released");
            return Ok(ReconcileResult::unchanged(key));
        }

        let mut actions = Vec::new();
        let artifact_key = record.artifact_key();
        match self.artifacts.delete(&artifact_key).await {
            Ok(()) => actions.push(ReconcileAction::DeleteArtifact {
                name: artifact_key.name.clone(),
            }),
            Err(e) if e.is_not_found() => {
                debug!(artifact = %artifact_key, "Artifact already gone");
            }
            Err(e) => {
                warn!(
                    key = %key,
                    artifact = %artifact_key,
                    error = %e,
                    "Artifact delete failed, keeping finalizer"
                );
                return Err(e.into());
            }
        }

        let (_, removed) = self.finalizers.ensure_absent(record).await?;
        if removed {
            actions.push(ReconcileAction::RemoveFinalizer);
        }

        let result = ReconcileResult::new(key, actions);
        info!(key = %result.key, actions = %result.summary(), "Finalized");
        Ok(result)
    }

    /// Create or update the artifact. Returns whether it was written.
    async fn converge_artifact(
        &self,
        record: &ConfigSpec,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<bool> {
        let artifact_key = record.artifact_key();
        let payload = record.spec.value.as_str();

        let existing = match self.artifacts.get(&artifact_key).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                let mut artifact = ConfigArtifact::new(
                    artifact_key.namespace.clone(),
                    artifact_key.name.clone(),
                )
                .with_entry(CONFIG_KEY, payload);
                artifact
                    .metadata
                    .owner_references
                    .push(self.registry.controller_reference(record)?);

                self.artifacts.create(artifact).await?;
                debug!(artifact = %artifact_key, "Created artifact");
                actions.push(ReconcileAction::CreateArtifact {
                    name: artifact_key.name,
                });
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        let in_sync = existing.config() == Some(payload);
        let owned = existing
            .metadata
            .controller_owner()
            .is_some_and(|owner| Some(owner.uid) == record.metadata.uid);
        if in_sync && owned {
            return Ok(false);
        }

        let mut next = existing;
        next.data.insert(CONFIG_KEY.to_string(), payload.to_string());
        if !owned {
            next.metadata.owner_references.retain(|r| !r.controller);
            next.metadata
                .owner_references
                .push(self.registry.controller_reference(record)?);
        }

        self.artifacts.update(next).await?;
        debug!(artifact = %artifact_key, in_sync, owned, "Updated artifact");
        actions.push(ReconcileAction::UpdateArtifact {
            name: artifact_key.name,
        });
        Ok(true)
    }

    /// Set `Applied` and the apply time on the spec facet.
    ///
    /// Skipped when nothing was written and the record already says
    /// `Applied`, so an idle pass makes no writes.
    async fn refresh_spec(
        &self,
        record: ConfigSpec,
        written: bool,
        now: DateTime<Utc>,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<ConfigSpec> {
        if !written && record.spec.status == Phase::Applied && !record.spec.time.is_empty() {
            return Ok(record);
        }

        let mut next = record;
        next.spec.status = Phase::Applied;
        next.spec.time = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let persisted = self.specs.update(next).await?;
        actions.push(ReconcileAction::RefreshSpec {
            phase: Phase::Applied,
        });
        Ok(persisted)
    }

    async fn report_applied(
        &self,
        record: &ConfigSpec,
        written: bool,
        now: DateTime<Utc>,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<()> {
        let artifact_name = record.artifact_name();
        let stale = written
            || record.status.last_applied_time.is_none()
            || record.status.config_map_name.as_deref() != Some(artifact_name.as_str())
            || !is_ready(&record.status);
        if !stale {
            return Ok(());
        }

        let update = StatusUpdate::new()
            .applied_at(now)
            .artifact(artifact_name.clone())
            .condition(ready_condition(
                ConditionStatus::True,
                REASON_APPLIED,
                format!("artifact {artifact_name} matches the payload"),
                now,
            ));
        if self.status.report(record, &update).await?.is_some() {
            actions.push(ReconcileAction::ReportStatus);
        }
        Ok(())
    }

    /// Record a failed pass: `Error` phase plus a false `Ready` condition.
    ///
    /// Best effort. The pass is failing anyway and its error is what the
    /// caller sees, so write failures here are only logged.
    async fn mark_failed(&self, record: ConfigSpec, reason: &str, message: &str) {
        let key = record.metadata.key();
        let record = if record.spec.status == Phase::Error {
            record
        } else {
            let mut next = record;
            next.spec.status = Phase::Error;
            match self.specs.update(next).await {
                Ok(persisted) => persisted,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to record Error phase");
                    return;
                }
            }
        };

        let update = StatusUpdate::new().condition(ready_condition(
            ConditionStatus::False,
            reason,
            message,
            self.clock.now(),
        ));
        if let Err(e) = self.status.report(&record, &update).await {
            warn!(key = %key, error = %e, "Failed to report failure condition");
        }
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Get the desired-state store.
    pub fn specs(&self) -> &Arc<dyn ObjectStore<ConfigSpec>> {
        &self.specs
    }

    /// Get the artifact store.
    pub fn artifacts(&self) -> &Arc<dyn ObjectStore<ConfigArtifact>> {
        &self.artifacts
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    specs: Option<Arc<dyn ObjectStore<ConfigSpec>>>,
    artifacts: Option<Arc<dyn ObjectStore<ConfigArtifact>>>,
    registry: Option<Arc<ResourceRegistry>>,
    validator: Option<Arc<dyn PayloadValidator>>,
    clock: Option<Arc<dyn Clock>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            specs: None,
            artifacts: None,
            registry: None,
            validator: None,
            clock: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the desired-state store.
    #[must_use]
    pub fn with_specs(mut self, specs: Arc<dyn ObjectStore<ConfigSpec>>) -> Self {
        self.specs = Some(specs);
        self
    }

    /// Set the artifact store.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ObjectStore<ConfigArtifact>>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Set the kind registry. Defaults to `ResourceRegistry::standard()`.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ResourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set a custom payload validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set a custom clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the finalizer token.
    #[must_use]
    pub fn finalizer(mut self, token: impl Into<String>) -> Self {
        self.config.finalizer = token.into();
        self
    }

    /// Build the reconciler.
    pub fn build(self) -> Result<Reconciler> {
        let specs = self
            .specs
            .ok_or_else(|| Error::invalid_config("ConfigSpec store is required"))?;
        let artifacts = self
            .artifacts
            .ok_or_else(|| Error::invalid_config("ConfigArtifact store is required"))?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ResourceRegistry::standard()));

        if !registry.is_registered::<ConfigSpec>() {
            return Err(Error::invalid_config(
                "registry must know ConfigSpec to stamp owner references",
            ));
        }
        if self.config.finalizer.is_empty() {
            return Err(Error::invalid_config("finalizer token is required"));
        }

        Ok(Reconciler::with_parts(
            specs,
            artifacts,
            registry,
            self.validator.unwrap_or_else(|| Arc::new(YamlValidator)),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.config,
        ))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use confsync_store::InMemoryStore;

    fn setup() -> (
        Reconciler,
        Arc<InMemoryStore<ConfigSpec>>,
        Arc<InMemoryStore<ConfigArtifact>>,
    ) {
        let specs = InMemoryStore::<ConfigSpec>::new_arc();
        let artifacts = InMemoryStore::<ConfigArtifact>::new_arc();
        let reconciler = Reconciler::new(
            specs.clone(),
            artifacts.clone(),
            Arc::new(ResourceRegistry::standard()),
            ReconcilerConfig::default(),
        );
        (reconciler, specs, artifacts)
    }

    #[tokio::test]
    async fn test_reconcile_missing_record_is_noop() {
        let (reconciler, _, artifacts) = setup();
        let result = reconciler
            .reconcile(&ObjectKey::new("default", "ghost"))
            .await
            .unwrap();

        assert!(result.converged);
        assert_eq!(artifacts.stats().writes(), 0);
    }

    #[tokio::test]
    async fn test_first_pass_takes_every_step() -> Result<()> {
        let (reconciler, specs, _) = setup();
        let created = specs
            .create(ConfigSpec::new("default", "app", "key: value\n"))
            .await?;

        let result = reconciler.reconcile(&created.metadata.key()).await?;

        assert_eq!(
            result.actions,
            vec![
                ReconcileAction::AddFinalizer,
                ReconcileAction::CreateArtifact {
                    name: "app-config".to_string()
                },
                ReconcileAction::RefreshSpec {
                    phase: Phase::Applied
                },
                ReconcileAction::ReportStatus,
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_artifact_carries_controller_reference() -> Result<()> {
        let (reconciler, specs, artifacts) = setup();
        let created = specs
            .create(ConfigSpec::new("default", "app", "key: value\n"))
            .await?;

        reconciler.reconcile(&created.metadata.key()).await?;

        let artifact = artifacts
            .get(&ObjectKey::new("default", "app-config"))
            .await?;
        let owner = artifact.metadata.controller_owner().unwrap();
        assert_eq!(Some(owner.uid), created.metadata.uid);
        assert_eq!(owner.kind, "ConfigSpec");
        Ok(())
    }

    #[tokio::test]
    async fn test_spec_time_is_rfc3339() -> Result<()> {
        let (reconciler, specs, _) = setup();
        let created = specs
            .create(ConfigSpec::new("default", "app", "key: value\n"))
            .await?;

        reconciler.reconcile(&created.metadata.key()).await?;

        let stored = specs.get(&created.metadata.key()).await?;
        assert!(DateTime::parse_from_rfc3339(&stored.spec.time).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_adopts_unowned_artifact() -> Result<()> {
        let (reconciler, specs, artifacts) = setup();
        artifacts
            .create(ConfigArtifact::new("default", "app-config").with_entry(CONFIG_KEY, "key: value\n"))
            .await?;
        let created = specs
            .create(ConfigSpec::new("default", "app", "key: value\n"))
            .await?;

        let result = reconciler.reconcile(&created.metadata.key()).await?;

        assert!(result.contains(&ReconcileAction::UpdateArtifact {
            name: "app-config".to_string()
        }));
        let artifact = artifacts
            .get(&ObjectKey::new("default", "app-config"))
            .await?;
        assert_eq!(
            artifact.metadata.controller_owner().map(|o| o.uid),
            created.metadata.uid
        );
        Ok(())
    }

    #[test]
    fn test_builder_requires_stores() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_rejects_registry_without_config_spec() {
        let result = Reconciler::builder()
            .with_specs(InMemoryStore::<ConfigSpec>::new_arc())
            .with_artifacts(InMemoryStore::<ConfigArtifact>::new_arc())
            .with_registry(Arc::new(ResourceRegistry::new()))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder() {
        let reconciler = Reconciler::builder()
            .with_specs(InMemoryStore::<ConfigSpec>::new_arc())
            .with_artifacts(InMemoryStore::<ConfigArtifact>::new_arc())
            .finalizer("example.dev/cleanup")
            .build()
            .unwrap();
        assert_eq!(reconciler.config().finalizer, "example.dev/cleanup");
    }
}
