//! Observed-state reporting.
//!
//! The reporter only ever writes through `update_status`, so it cannot race
//! with edits to the spec facet of the same record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use confsync_store::{Condition, ConditionStatus, ConfigSpec, ConfigSpecStatus, ObjectStore};
use tracing::debug;

use crate::error::Result;

/// Condition type summarising whether the artifact matches the record.
pub const READY_CONDITION: &str = "Ready";

/// Reason used when the artifact is in sync.
pub const REASON_APPLIED: &str = "Applied";

/// Reason used when the payload failed validation.
pub const REASON_INVALID_PAYLOAD: &str = "InvalidPayload";

/// Reason used when the artifact could not be written.
pub const REASON_APPLY_FAILED: &str = "ApplyFailed";

/// Proposed observed state. `None` fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub last_applied_time: Option<DateTime<Utc>>,
    pub artifact_name: Option<String>,
    pub conditions: Vec<Condition>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn applied_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_applied_time = Some(at);
        self
    }

    #[must_use]
    pub fn artifact(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Build a `Ready` condition.
pub fn ready_condition(
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    at: DateTime<Utc>,
) -> Condition {
    Condition {
        condition_type: READY_CONDITION.to_string(),
        status,
        reason: reason.to_string(),
        message: message.into(),
        last_transition_time: at,
    }
}

/// Whether the stored `Ready` condition is `True`.
pub fn is_ready(status: &ConfigSpecStatus) -> bool {
    status
        .condition(READY_CONDITION)
        .is_some_and(|c| c.status == ConditionStatus::True)
}

/// Merge a proposed update into the stored observed state.
///
/// - `last_applied_time` never moves backwards.
/// - A condition keeps its `last_transition_time` unless its status flips.
/// - Conditions not mentioned in the update are kept.
pub fn merge_status(current: &ConfigSpecStatus, update: &StatusUpdate) -> ConfigSpecStatus {
    let mut merged = current.clone();

    if let Some(proposed) = update.last_applied_time {
        merged.last_applied_time = Some(
            current
                .last_applied_time
                .map_or(proposed, |existing| existing.max(proposed)),
        );
    }

    if let Some(name) = &update.artifact_name {
        merged.config_map_name = Some(name.clone());
    }

    for condition in &update.conditions {
        match merged
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status != condition.status {
                    existing.status = condition.status;
                    existing.last_transition_time = condition.last_transition_time;
                }
                existing.reason.clone_from(&condition.reason);
                existing.message.clone_from(&condition.message);
            }
            None => merged.conditions.push(condition.clone()),
        }
    }

    merged
}

/// Writes the observed-state facet of `ConfigSpec` records.
pub struct StatusReporter {
    store: Arc<dyn ObjectStore<ConfigSpec>>,
}

impl StatusReporter {
    /// Create a new reporter.
    pub fn new(store: Arc<dyn ObjectStore<ConfigSpec>>) -> Self {
        Self { store }
    }

    /// Merge `update` into `record`'s observed state and persist it.
    ///
    /// Returns `None` without writing when the merge changes nothing.
    pub async fn report(&self, record: &ConfigSpec, update: &StatusUpdate) -> Result<Option<ConfigSpec>> {
        let merged = merge_status(&record.status, update);
        if merged == record.status {
            return Ok(None);
        }

        debug!(
            key = %record.metadata.key(),
            last_applied_time = ?merged.last_applied_time,
            "Reporting status"
        );
        let mut next = record.clone();
        next.status = merged;
        let persisted = self.store.update_status(next).await?;
        Ok(Some(persisted))
    }
}
