use chrono::{DateTime, Utc};
use dashmap::DashMap;
use etcetera::{choose_app_strategy, AppStrategy};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use super::component::{ComponentError, PromptComponent};
use super::versioning::{HistoryEntry, VersionDiff, VersionInfo, VersionStore};
use crate::config;

/// Summary view returned by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Disk-backed registry of prompt components.
///
/// The registry exclusively owns component records and their version
/// history. Reads are concurrent; each write goes through `save` which
/// snapshots the previously stored state before overwriting it.
pub struct ComponentRegistry {
    storage_dir: PathBuf,
    version_store: VersionStore,
    components: DashMap<String, PromptComponent>,
}

impl ComponentRegistry {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self, ComponentError> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(storage_dir.join("components"))?;
        let version_store = VersionStore::new(storage_dir.join("versions"))?;

        let registry = Self {
            storage_dir,
            version_store,
            components: DashMap::new(),
        };
        registry.load_components()?;
        Ok(registry)
    }

    /// Open the registry at the platform data directory
    /// (e.g. ~/.local/share/tidings/components on Linux).
    pub fn open_default() -> Result<Self, ComponentError> {
        let strategy = choose_app_strategy(config::APP_STRATEGY.clone())
            .map_err(|e| ComponentError::Storage(std::io::Error::other(e.to_string())))?;
        Self::new(strategy.data_dir().join("components"))
    }

    fn component_path(&self, component_id: &str) -> PathBuf {
        self.storage_dir
            .join("components")
            .join(format!("{component_id}.json"))
    }

    fn load_components(&self) -> Result<(), ComponentError> {
        let components_dir = self.storage_dir.join("components");
        for entry in fs::read_dir(&components_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(ComponentError::from)
                .and_then(|data| PromptComponent::from_json(&data))
            {
                Ok(component) => {
                    tracing::debug!("Loaded component: {} - {}", component.id, component.name);
                    self.components.insert(component.id.clone(), component);
                }
                Err(e) => {
                    tracing::error!("Error loading component {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }

    /// Persist a component, snapshotting the previously stored version
    /// first when one exists.
    fn save(&self, mut component: PromptComponent) -> Result<PromptComponent, ComponentError> {
        let path = self.component_path(&component.id);
        let is_new = !path.exists();

        if !is_new {
            match fs::read_to_string(&path)
                .map_err(ComponentError::from)
                .and_then(|data| PromptComponent::from_json(&data))
            {
                Ok(current) => self.version_store.add_version(&current)?,
                Err(e) => {
                    tracing::error!(
                        "Error snapshotting component {} before save: {}",
                        component.id,
                        e
                    );
                }
            }
        }

        component.updated_at = Utc::now();
        fs::write(&path, serde_json::to_string_pretty(&component)?)?;
        self.components
            .insert(component.id.clone(), component.clone());
        tracing::info!(
            "{} component: {} - {}",
            if is_new { "Created" } else { "Updated" },
            component.id,
            component.name
        );
        Ok(component)
    }

    /// Register a new component. Fails if the id is already taken.
    pub fn register(&self, component: PromptComponent) -> Result<PromptComponent, ComponentError> {
        if self.components.contains_key(&component.id) {
            return Err(ComponentError::AlreadyExists(component.id));
        }
        self.save(component)
    }

    /// Update an existing component. Fails if the id is unknown.
    pub fn update(&self, component: PromptComponent) -> Result<PromptComponent, ComponentError> {
        if !self.components.contains_key(&component.id) {
            return Err(ComponentError::NotFound(component.id));
        }
        self.save(component)
    }

    pub fn get(&self, component_id: &str) -> Option<PromptComponent> {
        self.components.get(component_id).map(|c| c.value().clone())
    }

    pub fn get_version(
        &self,
        component_id: &str,
        version: &str,
    ) -> Result<Option<PromptComponent>, ComponentError> {
        self.version_store.get_version(component_id, version)
    }

    /// Delete a component, archiving its current state as a final
    /// snapshot first. There is no restore path.
    pub fn delete(&self, component_id: &str) -> Result<bool, ComponentError> {
        let Some((_, component)) = self.components.remove(component_id) else {
            return Ok(false);
        };

        self.version_store.add_version(&component)?;

        let path = self.component_path(component_id);
        if let Err(e) = fs::remove_file(&path) {
            tracing::error!("Error deleting component {}: {}", component_id, e);
            // Deletion failed; put the record back.
            self.components.insert(component.id.clone(), component);
            return Ok(false);
        }
        tracing::info!("Deleted component: {}", component_id);
        Ok(true)
    }

    /// List registered components, optionally filtered by tag, sorted by
    /// name.
    pub fn list(&self, tag: Option<&str>) -> Vec<ComponentSummary> {
        let mut result: Vec<ComponentSummary> = self
            .components
            .iter()
            .filter(|entry| tag.is_none_or(|t| entry.tags.iter().any(|x| x == t)))
            .map(|entry| ComponentSummary {
                id: entry.id.clone(),
                name: entry.name.clone(),
                description: entry.description.clone(),
                version: entry.version.clone(),
                tags: entry.tags.clone(),
                updated_at: entry.updated_at,
            })
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    pub fn versions(&self, component_id: &str) -> Result<Vec<VersionInfo>, ComponentError> {
        self.version_store.list_versions(component_id)
    }

    pub fn history(&self, component_id: &str) -> Result<Vec<HistoryEntry>, ComponentError> {
        self.version_store.history(component_id)
    }

    pub fn compare_versions(
        &self,
        component_id: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<VersionDiff, ComponentError> {
        self.version_store
            .compare_versions(component_id, from_version, to_version)
    }

    /// Export a component as a JSON string.
    pub fn export_json(&self, component_id: &str) -> Result<String, ComponentError> {
        let component = self
            .get(component_id)
            .ok_or_else(|| ComponentError::NotFound(component_id.to_string()))?;
        component.to_json()
    }

    /// Import a component from a JSON string. Without `overwrite`, an
    /// existing id is an error.
    pub fn import_json(&self, json_str: &str, overwrite: bool) -> Result<String, ComponentError> {
        let component = PromptComponent::from_json(json_str)?;
        if self.components.contains_key(&component.id) && !overwrite {
            return Err(ComponentError::AlreadyExists(component.id));
        }
        let saved = self.save(component)?;
        Ok(saved.id)
    }
}
