//! Loading `ConfigSpec` records from YAML manifests.
//!
//! A manifest file holds one or more YAML documents:
//!
//! ```yaml
//! apiVersion: confsync.dev/v1
//! kind: ConfigSpec
//! metadata:
//!   name: app
//!   namespace: default
//! spec:
//!   value: |
//!     key: value
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use confsync_store::{ConfigSpec, Resource, CONFIG_SPEC_API_VERSION};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    api_version: String,
    kind: String,
    metadata: ManifestMeta,
    #[serde(default)]
    spec: ManifestSpec,
}

#[derive(Debug, Deserialize)]
struct ManifestMeta {
    name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestSpec {
    #[serde(default)]
    value: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Manifest {
    fn into_record(self) -> Result<ConfigSpec> {
        if self.kind != ConfigSpec::KIND {
            bail!("unsupported kind '{}', expected {}", self.kind, ConfigSpec::KIND);
        }
        if self.api_version != CONFIG_SPEC_API_VERSION {
            bail!(
                "unsupported apiVersion '{}', expected {CONFIG_SPEC_API_VERSION}",
                self.api_version
            );
        }

        let mut record =
            ConfigSpec::new(self.metadata.namespace, self.metadata.name, self.spec.value);
        record.metadata.labels = self.metadata.labels;
        Ok(record)
    }
}

/// Parse every document in `content`.
pub fn parse_manifests(content: &str) -> Result<Vec<ConfigSpec>> {
    serde_yaml::Deserializer::from_str(content)
        .enumerate()
        .map(|(index, document)| {
            Manifest::deserialize(document)
                .with_context(|| format!("document {index} is not a valid manifest"))?
                .into_record()
                .with_context(|| format!("document {index}"))
        })
        .collect()
}

/// Load all `.yaml` and `.yml` files in `dir`, in file-name order.
pub fn load_dir(dir: &Path) -> Result<Vec<ConfigSpec>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read manifest directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed = parse_manifests(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        records.extend(parsed);
    }
    Ok(records)
}
