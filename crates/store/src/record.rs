//! Record kinds held by the stores.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ObjectKey, ObjectMeta};

/// Data key under which an artifact carries the payload.
pub const CONFIG_KEY: &str = "config.yaml";

/// Suffix appended to a `ConfigSpec` name to derive its artifact name.
pub const ARTIFACT_SUFFIX: &str = "-config";

/// A record kind the object store can hold.
///
/// Every kind has two independently writable facets: the spec facet
/// (everything except status, written with `update`) and the status facet
/// (written with `update_status`). Kinds without status use `()`.
pub trait Resource: Clone + PartialEq + Send + Sync + fmt::Debug + 'static {
    /// Kind name, e.g. `ConfigSpec`.
    const KIND: &'static str;

    /// Observed-state facet.
    type Status: Clone + PartialEq + Default + Send + Sync + fmt::Debug;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn status(&self) -> &Self::Status;

    fn set_status(&mut self, status: Self::Status);

    /// Whether the spec facets of two records differ.
    fn spec_differs(&self, other: &Self) -> bool;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Lifecycle phase recorded in the spec facet of a `ConfigSpec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Applied,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Applied => write!(f, "Applied"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Truth value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// One observation about a record's current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Desired state declared by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSpecSpec {
    /// Configuration payload, expected to be YAML.
    #[serde(default)]
    pub value: String,
    /// RFC3339 time of the last successful apply, written by the controller.
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub status: Phase,
}

/// Observed state written by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpecStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
}

impl ConfigSpecStatus {
    /// Find a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// The desired-state record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSpec {
    pub metadata: ObjectMeta,
    pub spec: ConfigSpecSpec,
    #[serde(default)]
    pub status: ConfigSpecStatus,
}

impl ConfigSpec {
    /// Create an unsaved record with the given payload.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ConfigSpecSpec {
                value: value.into(),
                ..Default::default()
            },
            status: ConfigSpecStatus::default(),
        }
    }

    /// Name of the artifact derived from this record.
    pub fn artifact_name(&self) -> String {
        artifact_name(&self.metadata.name)
    }

    /// Key of the artifact derived from this record.
    pub fn artifact_key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.artifact_name())
    }
}

impl Resource for ConfigSpec {
    const KIND: &'static str = "ConfigSpec";
    type Status = ConfigSpecStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> &ConfigSpecStatus {
        &self.status
    }

    fn set_status(&mut self, status: ConfigSpecStatus) {
        self.status = status;
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.spec != other.spec
    }
}

/// The derived artifact: a named key/value payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigArtifact {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigArtifact {
    /// Create an unsaved, empty artifact.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }

    /// Set a data entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// The payload stored under [`CONFIG_KEY`].
    pub fn config(&self) -> Option<&str> {
        self.data.get(CONFIG_KEY).map(String::as_str)
    }
}

impl Resource for ConfigArtifact {
    const KIND: &'static str = "ConfigArtifact";
    type Status = ();

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> &() {
        &()
    }

    fn set_status(&mut self, _status: ()) {}

    fn spec_differs(&self, other: &Self) -> bool {
        self.data != other.data
    }
}

/// Derive the artifact name for a `ConfigSpec` name.
pub fn artifact_name(owner_name: &str) -> String {
    format!("{owner_name}{ARTIFACT_SUFFIX}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name_is_derived() {
        let spec = ConfigSpec::new("default", "app", "key: value\n");
        assert_eq!(spec.artifact_name(), "app-config");
        assert_eq!(spec.artifact_key(), ObjectKey::new("default", "app-config"));
    }

    #[test]
    fn test_spec_facet_comparison_ignores_status() {
        let a = ConfigSpec::new("default", "app", "key: value\n");
        let mut b = a.clone();
        b.status.config_map_name = Some("app-config".to_string());
        assert!(!a.spec_differs(&b));

        b.spec.value = "key: new\n".to_string();
        assert!(a.spec_differs(&b));
    }

    #[test]
    fn test_config_spec_wire_names() {
        let mut spec = ConfigSpec::new("default", "app", "key: value\n");
        spec.status.config_map_name = Some("app-config".to_string());

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["spec"]["value"], "key: value\n");
        assert_eq!(json["spec"]["status"], "Pending");
        assert_eq!(json["status"]["configMapName"], "app-config");
        assert!(json["status"].get("lastAppliedTime").is_none());
    }

    #[test]
    fn test_artifact_config_accessor() {
        let artifact = ConfigArtifact::new("default", "app-config").with_entry(CONFIG_KEY, "a: 1\n");
        assert_eq!(artifact.config(), Some("a: 1\n"));
        assert_eq!(ConfigArtifact::new("default", "x").config(), None);
    }
}
