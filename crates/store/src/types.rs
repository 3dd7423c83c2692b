//! Identity and metadata types shared by every stored record.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of a record: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store-assigned unique identifier of one incarnation of a record.
///
/// A record deleted and re-created under the same key gets a new uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(Ulid);

impl Uid {
    /// Create a new random uid.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// API group/version and kind of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

/// Back-reference from a dependent record to the record that owns it.
///
/// This is a relation only. Nothing holds the owner through it; it drives
/// best-effort cascade cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Uid,
    #[serde(default)]
    pub controller: bool,
}

/// Metadata carried by every record.
///
/// `uid`, `resource_version`, `generation`, `creation_timestamp` and
/// `deletion_timestamp` are owned by the store; values sent by clients are
/// ignored on write (except `resource_version`, which is the optimistic
/// concurrency token being asserted).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a record that has not been stored yet.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Identity of the record.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether deletion has been requested.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    #[must_use]
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers.iter().any(|f| f == token)
    }

    /// Add a finalizer token. Returns `false` if it was already present.
    pub fn add_finalizer(&mut self, token: &str) -> bool {
        if self.has_finalizer(token) {
            return false;
        }
        self.finalizers.push(token.to_string());
        true
    }

    /// Remove a finalizer token. Returns `false` if it was not present.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != token);
        self.finalizers.len() != before
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(ObjectKey::new("default", "app").to_string(), "default/app");
    }

    #[test]
    fn test_finalizers_are_a_set() {
        let mut meta = ObjectMeta::new("default", "app");
        assert!(meta.add_finalizer("a.example/cleanup"));
        assert!(!meta.add_finalizer("a.example/cleanup"));
        assert_eq!(meta.finalizers.len(), 1);

        assert!(meta.remove_finalizer("a.example/cleanup"));
        assert!(!meta.remove_finalizer("a.example/cleanup"));
        assert!(meta.finalizers.is_empty());
    }

    #[test]
    fn test_remove_finalizer_keeps_foreign_tokens() {
        let mut meta = ObjectMeta::new("default", "app");
        meta.add_finalizer("other.example/guard");
        meta.add_finalizer("a.example/cleanup");

        meta.remove_finalizer("a.example/cleanup");

        assert_eq!(meta.finalizers, vec!["other.example/guard".to_string()]);
    }

    #[test]
    fn test_controller_owner() {
        let mut meta = ObjectMeta::new("default", "app-config");
        assert!(meta.controller_owner().is_none());

        let uid = Uid::new();
        meta.owner_references.push(OwnerReference {
            api_version: "confsync.dev/v1".to_string(),
            kind: "ConfigSpec".to_string(),
            name: "app".to_string(),
            uid,
            controller: true,
        });

        assert_eq!(meta.controller_owner().map(|r| r.uid), Some(uid));
    }
}
