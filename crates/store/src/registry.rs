//! Explicit registry of record kinds.
//!
//! Built once at composition time and handed to whoever needs type
//! metadata, such as the reconciler when it stamps owner references.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::record::{ConfigArtifact, ConfigSpec, Resource};
use crate::types::{OwnerReference, TypeMeta};

/// API version under which `ConfigSpec` is served.
pub const CONFIG_SPEC_API_VERSION: &str = "confsync.dev/v1";

/// API version under which `ConfigArtifact` is served.
pub const CONFIG_ARTIFACT_API_VERSION: &str = "v1";

/// Maps record kinds to their type metadata.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    kinds: HashMap<&'static str, TypeMeta>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the kinds this workspace ships.
    pub fn standard() -> Self {
        Self::new()
            .with::<ConfigSpec>(CONFIG_SPEC_API_VERSION)
            .with::<ConfigArtifact>(CONFIG_ARTIFACT_API_VERSION)
    }

    /// Register a kind under an API version.
    #[must_use]
    pub fn with<R: Resource>(mut self, api_version: impl Into<String>) -> Self {
        self.kinds.insert(
            R::KIND,
            TypeMeta {
                api_version: api_version.into(),
                kind: R::KIND.to_string(),
            },
        );
        self
    }

    #[must_use]
    pub fn is_registered<R: Resource>(&self) -> bool {
        self.kinds.contains_key(R::KIND)
    }

    /// Type metadata of a registered kind.
    pub fn type_meta<R: Resource>(&self) -> Result<&TypeMeta> {
        self.kinds
            .get(R::KIND)
            .ok_or_else(|| Error::unregistered_kind(R::KIND))
    }

    /// Build a controller owner reference pointing at `owner`.
    ///
    /// Fails if the kind is unregistered or the owner has not been stored
    /// yet (no uid).
    pub fn controller_reference<R: Resource>(&self, owner: &R) -> Result<OwnerReference> {
        let type_meta = self.type_meta::<R>()?;
        let meta = owner.meta();
        let uid = meta
            .uid
            .ok_or_else(|| Error::invalid(R::KIND, meta.key(), "owner has no uid"))?;

        Ok(OwnerReference {
            api_version: type_meta.api_version.clone(),
            kind: type_meta.kind.clone(),
            name: meta.name.clone(),
            uid,
            controller: true,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Uid;

    #[test]
    fn test_standard_registers_both_kinds() {
        let registry = ResourceRegistry::standard();
        assert!(registry.is_registered::<ConfigSpec>());
        assert!(registry.is_registered::<ConfigArtifact>());
        assert_eq!(
            registry.type_meta::<ConfigSpec>().unwrap().api_version,
            CONFIG_SPEC_API_VERSION
        );
    }

    #[test]
    fn test_unregistered_kind_fails() {
        let registry = ResourceRegistry::new();
        let err = registry.type_meta::<ConfigSpec>().unwrap_err();
        assert!(matches!(err, Error::UnregisteredKind { .. }));
    }

    #[test]
    fn test_controller_reference_needs_uid() {
        let registry = ResourceRegistry::standard();
        let mut owner = ConfigSpec::new("default", "app", "");
        assert!(registry.controller_reference(&owner).is_err());

        let uid = Uid::new();
        owner.metadata.uid = Some(uid);
        let reference = registry.controller_reference(&owner).unwrap();
        assert_eq!(reference.uid, uid);
        assert_eq!(reference.kind, "ConfigSpec");
        assert_eq!(reference.name, "app");
        assert!(reference.controller);
    }
}
