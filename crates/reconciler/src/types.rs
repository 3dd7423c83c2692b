//! Core types for the reconciler.

use confsync_store::{ObjectKey, Phase};
use serde::{Deserialize, Serialize};

/// Actions a reconciliation pass can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// Put the cleanup finalizer on the record.
    AddFinalizer,
    /// Create the derived artifact.
    CreateArtifact { name: String },
    /// Overwrite the payload key of an existing artifact.
    UpdateArtifact { name: String },
    /// Write phase and apply time into the record's spec facet.
    RefreshSpec { phase: Phase },
    /// Write the observed-state facet.
    ReportStatus,
    /// Delete the derived artifact during teardown.
    DeleteArtifact { name: String },
    /// Release the record by removing the finalizer.
    RemoveFinalizer,
}

impl ReconcileAction {
    /// Whether this action wrote to the artifact store.
    pub const fn touches_artifact(&self) -> bool {
        matches!(
            self,
            Self::CreateArtifact { .. } | Self::UpdateArtifact { .. } | Self::DeleteArtifact { .. }
        )
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::AddFinalizer => "add finalizer".to_string(),
            Self::CreateArtifact { name } => format!("create artifact {name}"),
            Self::UpdateArtifact { name } => format!("update artifact {name}"),
            Self::RefreshSpec { phase } => format!("set phase {phase}"),
            Self::ReportStatus => "report status".to_string(),
            Self::DeleteArtifact { name } => format!("delete artifact {name}"),
            Self::RemoveFinalizer => "remove finalizer".to_string(),
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Identity that was reconciled.
    pub key: ObjectKey,
    /// Actions that were taken, in order.
    pub actions: Vec<ReconcileAction>,
    /// Whether the identity was already converged (no actions needed).
    pub converged: bool,
}

impl ReconcileResult {
    /// Create a new reconcile result.
    pub fn new(key: ObjectKey, actions: Vec<ReconcileAction>) -> Self {
        let converged = actions.is_empty();
        Self {
            key,
            actions,
            converged,
        }
    }

    /// A pass that had nothing to do.
    pub fn unchanged(key: ObjectKey) -> Self {
        Self::new(key, Vec::new())
    }

    /// Number of writes made to the artifact store.
    pub fn artifact_writes(&self) -> usize {
        self.actions.iter().filter(|a| a.touches_artifact()).count()
    }

    /// Comma-separated action descriptions, for logging.
    pub fn summary(&self) -> String {
        self.actions
            .iter()
            .map(ReconcileAction::description)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn contains(&self, action: &ReconcileAction) -> bool {
        self.actions.contains(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_converged() {
        let result = ReconcileResult::unchanged(ObjectKey::new("default", "app"));
        assert!(result.converged);
        assert_eq!(result.artifact_writes(), 0);
    }

    #[test]
    fn test_artifact_writes_counted() {
        let result = ReconcileResult::new(
            ObjectKey::new("default", "app"),
            vec![
                ReconcileAction::AddFinalizer,
                ReconcileAction::CreateArtifact {
                    name: "app-config".to_string(),
                },
                ReconcileAction::RefreshSpec {
                    phase: Phase::Applied,
                },
                ReconcileAction::ReportStatus,
            ],
        );
        assert!(!result.converged);
        assert_eq!(result.artifact_writes(), 1);
    }

    #[test]
    fn test_summary_lists_actions_in_order() {
        let result = ReconcileResult::new(
            ObjectKey::new("default", "app"),
            vec![
                ReconcileAction::DeleteArtifact {
                    name: "app-config".to_string(),
                },
                ReconcileAction::RemoveFinalizer,
            ],
        );
        assert_eq!(result.summary(), "delete artifact app-config, remove finalizer");
        assert_eq!(ReconcileResult::unchanged(ObjectKey::new("default", "app")).summary(), "");
    }
}
