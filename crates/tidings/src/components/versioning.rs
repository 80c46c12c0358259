use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::component::{ComponentError, PromptComponent};

/// A full component state captured at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSnapshot {
    #[serde(flatten)]
    pub component: PromptComponent,
    pub snapshot_id: String,
    pub snapshot_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub snapshot_id: String,
    pub snapshot_timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct FieldChange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ListDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataChange {
    pub from: Option<Value>,
    pub to: Option<Value>,
}

/// Per-field differences between two versions of a component.
#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub component_id: String,
    pub from_version: String,
    pub to_version: String,
    pub name: Option<FieldChange>,
    pub description: Option<FieldChange>,
    pub template: Option<FieldChange>,
    pub required_inputs: Option<ListDelta>,
    pub optional_inputs: Option<ListDelta>,
    pub outputs: Option<ListDelta>,
    pub tags: Option<ListDelta>,
    pub metadata: BTreeMap<String, MetadataChange>,
}

impl VersionDiff {
    pub fn has_changes(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.template.is_some()
            || self.required_inputs.is_some()
            || self.optional_inputs.is_some()
            || self.outputs.is_some()
            || self.tags.is_some()
            || !self.metadata.is_empty()
    }
}

fn list_delta(newer: &[String], older: &[String]) -> Option<ListDelta> {
    let added: Vec<String> = newer.iter().filter(|i| !older.contains(i)).cloned().collect();
    let removed: Vec<String> = older.iter().filter(|i| !newer.contains(i)).cloned().collect();
    if added.is_empty() && removed.is_empty() {
        None
    } else {
        Some(ListDelta { added, removed })
    }
}

/// Append-only store of component version snapshots, one JSON file per
/// version under a per-component directory.
pub struct VersionStore {
    version_dir: PathBuf,
}

impl VersionStore {
    pub fn new(version_dir: impl Into<PathBuf>) -> Result<Self, ComponentError> {
        let version_dir = version_dir.into();
        fs::create_dir_all(&version_dir)?;
        Ok(Self { version_dir })
    }

    fn component_dir(&self, component_id: &str) -> Result<PathBuf, ComponentError> {
        let dir = self.version_dir.join(component_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn version_path(&self, component_id: &str, version: &str) -> Result<PathBuf, ComponentError> {
        let filename = format!("{}.json", version.replace('.', "_"));
        Ok(self.component_dir(component_id)?.join(filename))
    }

    /// Snapshot a component at its current version.
    pub fn add_version(&self, component: &PromptComponent) -> Result<(), ComponentError> {
        let snapshot = VersionSnapshot {
            component: component.clone(),
            snapshot_id: Uuid::new_v4().to_string(),
            snapshot_timestamp: Utc::now(),
        };
        let path = self.version_path(&component.id, &component.version)?;
        let data = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&path, data)?;
        tracing::debug!(
            "Added version {} for component {}",
            component.version,
            component.id
        );
        Ok(())
    }

    /// Retrieve a specific version of a component.
    pub fn get_version(
        &self,
        component_id: &str,
        version: &str,
    ) -> Result<Option<PromptComponent>, ComponentError> {
        let path = self.version_path(component_id, version)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let snapshot: VersionSnapshot = serde_json::from_str(&data)?;
        Ok(Some(snapshot.component))
    }

    fn read_snapshot(&self, path: &Path) -> Result<VersionSnapshot, ComponentError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// List all versions of a component, newest snapshot first.
    pub fn list_versions(&self, component_id: &str) -> Result<Vec<VersionInfo>, ComponentError> {
        let dir = self.component_dir(component_id)?;
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_snapshot(&path) {
                Ok(snapshot) => versions.push(VersionInfo {
                    version: snapshot.component.version,
                    snapshot_id: snapshot.snapshot_id,
                    snapshot_timestamp: snapshot.snapshot_timestamp,
                    updated_at: snapshot.component.updated_at,
                }),
                Err(e) => {
                    tracing::error!("Error reading version file {}: {}", path.display(), e);
                }
            }
        }
        versions.sort_by(|a, b| b.snapshot_timestamp.cmp(&a.snapshot_timestamp));
        Ok(versions)
    }

    pub fn delete_version(&self, component_id: &str, version: &str) -> Result<bool, ComponentError> {
        let path = self.version_path(component_id, version)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        tracing::info!("Deleted version {} for component {}", version, component_id);
        Ok(true)
    }

    /// Derive change lines between consecutive snapshots, newest first.
    pub fn history(&self, component_id: &str) -> Result<Vec<HistoryEntry>, ComponentError> {
        let versions = self.list_versions(component_id)?;
        let mut history = Vec::new();

        for (i, info) in versions.iter().enumerate() {
            let Some(current) = self.get_version(component_id, &info.version)? else {
                continue;
            };

            // The oldest snapshot has nothing to compare against.
            if i == versions.len() - 1 {
                history.push(HistoryEntry {
                    version: info.version.clone(),
                    timestamp: info.snapshot_timestamp,
                    changes: vec!["Initial version".to_string()],
                });
                continue;
            }

            let Some(previous) = self.get_version(component_id, &versions[i + 1].version)? else {
                continue;
            };

            let mut changes = Vec::new();
            if current.name != previous.name {
                changes.push(format!("Updated name: {} -> {}", previous.name, current.name));
            }
            if current.description != previous.description {
                changes.push("Updated description".to_string());
            }
            if current.template != previous.template {
                changes.push("Modified template".to_string());
            }
            history.push(HistoryEntry {
                version: info.version.clone(),
                timestamp: info.snapshot_timestamp,
                changes,
            });
        }

        Ok(history)
    }

    /// Compare two stored versions, reporting per-field changes from
    /// `from_version` to `to_version`.
    pub fn compare_versions(
        &self,
        component_id: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<VersionDiff, ComponentError> {
        let from = self.get_version(component_id, from_version)?.ok_or_else(|| {
            ComponentError::VersionNotFound {
                id: component_id.to_string(),
                version: from_version.to_string(),
            }
        })?;
        let to = self.get_version(component_id, to_version)?.ok_or_else(|| {
            ComponentError::VersionNotFound {
                id: component_id.to_string(),
                version: to_version.to_string(),
            }
        })?;

        let field = |a: &str, b: &str| {
            if a != b {
                Some(FieldChange {
                    from: a.to_string(),
                    to: b.to_string(),
                })
            } else {
                None
            }
        };

        let mut metadata = BTreeMap::new();
        let keys: HashSet<&String> = from.metadata.keys().chain(to.metadata.keys()).collect();
        for key in keys {
            let from_val = from.metadata.get(key);
            let to_val = to.metadata.get(key);
            if from_val != to_val {
                metadata.insert(
                    key.clone(),
                    MetadataChange {
                        from: from_val.cloned(),
                        to: to_val.cloned(),
                    },
                );
            }
        }

        Ok(VersionDiff {
            component_id: component_id.to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            name: field(&from.name, &to.name),
            description: field(&from.description, &to.description),
            template: if from.template.trim() != to.template.trim() {
                Some(FieldChange {
                    from: from.template.clone(),
                    to: to.template.clone(),
                })
            } else {
                None
            },
            required_inputs: list_delta(&to.required_inputs, &from.required_inputs),
            optional_inputs: list_delta(&to.optional_inputs, &from.optional_inputs),
            outputs: list_delta(&to.outputs, &from.outputs),
            tags: list_delta(&to.tags, &from.tags),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn sample(version: &str, template: &str) -> PromptComponent {
        let mut c = PromptComponent::new(
            "sample",
            "a sample component",
            template,
            vec!["test".to_string()],
            HashMap::new(),
        )
        .with_id("comp-1");
        c.version = version.to_string();
        c
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path()).unwrap();

        let c = sample("1.0.0", "Hello {name}");
        store.add_version(&c).unwrap();

        let loaded = store.get_version("comp-1", "1.0.0").unwrap().unwrap();
        assert_eq!(loaded.template, "Hello {name}");
        assert_eq!(loaded.version, "1.0.0");
        assert!(store.get_version("comp-1", "9.9.9").unwrap().is_none());
    }

    #[test]
    fn test_no_two_snapshots_share_a_version() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path()).unwrap();

        store.add_version(&sample("1.0.0", "a")).unwrap();
        store.add_version(&sample("1.0.1", "b")).unwrap();
        store.add_version(&sample("1.0.2", "c")).unwrap();

        let versions = store.list_versions("comp-1").unwrap();
        let mut seen: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_compare_versions_reports_field_and_list_changes() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path()).unwrap();

        let mut old = sample("1.0.0", "Hello {name}");
        old.tags = vec!["greeting".to_string()];
        store.add_version(&old).unwrap();

        let mut new = sample("1.0.1", "Hello {name}, from {place}");
        new.tags = vec!["welcome".to_string()];
        store.add_version(&new).unwrap();

        let diff = store.compare_versions("comp-1", "1.0.0", "1.0.1").unwrap();
        assert!(diff.has_changes());
        assert!(diff.template.is_some());
        let inputs = diff.required_inputs.unwrap();
        assert_eq!(inputs.added, vec!["place"]);
        assert!(inputs.removed.is_empty());
        let tags = diff.tags.unwrap();
        assert_eq!(tags.added, vec!["welcome"]);
        assert_eq!(tags.removed, vec!["greeting"]);
    }

    #[test]
    fn test_compare_missing_version_fails() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path()).unwrap();
        store.add_version(&sample("1.0.0", "a")).unwrap();

        let err = store
            .compare_versions("comp-1", "1.0.0", "2.0.0")
            .unwrap_err();
        assert!(matches!(err, ComponentError::VersionNotFound { .. }));
    }
}
