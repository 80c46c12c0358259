use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::contentmind::{ContentMindAgent, CONTENTMIND_AGENT_ID};
use super::digest::{DeliveryChannel, DigestAgent, DIGEST_AGENT_ID};
use super::researcher::{ResearcherAgent, RESEARCHER_AGENT_ID};
use super::{Agent, AgentCapabilities};
use crate::router::ModelRouter;
use crate::storage::ContentStore;

pub type AgentConfig = HashMap<String, Value>;

pub type AgentFactory =
    Arc<dyn Fn(&AgentConfig, &AgentDeps) -> Result<Arc<dyn Agent>> + Send + Sync>;

/// Dependencies injected into agent factories. Wiring happens at the
/// process entry point; agents never reach for globals.
#[derive(Clone)]
pub struct AgentDeps {
    pub router: Arc<ModelRouter>,
    pub store: Arc<dyn ContentStore>,
    pub email_delivery: Option<Arc<dyn DeliveryChannel>>,
    pub whatsapp_delivery: Option<Arc<dyn DeliveryChannel>>,
}

impl AgentDeps {
    pub fn new(router: Arc<ModelRouter>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            router,
            store,
            email_delivery: None,
            whatsapp_delivery: None,
        }
    }
}

/// One entry of an agent manifest: an id and the factory that builds the
/// agent. An explicit manifest replaces reflection-based package
/// discovery; semantics are otherwise identical.
pub struct AgentManifestEntry {
    pub id: String,
    pub factory: AgentFactory,
}

/// Process-wide agent registry: agent-id → factory, configuration, and
/// live instance. All three maps are read-mostly; writes occur only at
/// registration.
#[derive(Default)]
pub struct AgentRegistry {
    factories: DashMap<String, AgentFactory>,
    configs: DashMap<String, AgentConfig>,
    instances: DashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for an agent id. Replacing does
    /// not tear down an existing instance; callers do that explicitly.
    pub fn register_class(&self, id: impl Into<String>, factory: AgentFactory) {
        let id = id.into();
        tracing::info!("Registered agent class: {}", id);
        self.factories.insert(id, factory);
    }

    pub fn register_config(&self, id: impl Into<String>, config: AgentConfig) {
        self.configs.insert(id.into(), config);
    }

    pub fn register_manifest(&self, entries: Vec<AgentManifestEntry>) {
        for entry in entries {
            self.register_class(entry.id, entry.factory);
        }
    }

    /// Instantiate an agent, caching the instance. Idempotent per id: a
    /// live instance is returned as-is.
    pub fn create(&self, id: &str, deps: &AgentDeps) -> Result<Arc<dyn Agent>> {
        if let Some(existing) = self.instances.get(id) {
            return Ok(existing.clone());
        }

        let factory = self
            .factories
            .get(id)
            .map(|f| f.value().clone())
            .ok_or_else(|| anyhow!("Unknown agent: {id}"))?;
        let config = self
            .configs
            .get(id)
            .map(|c| c.value().clone())
            .unwrap_or_default();

        let agent = factory(&config, deps)?;
        self.instances.insert(id.to_string(), agent.clone());
        tracing::info!("Created agent instance: {}", id);
        Ok(agent)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.instances.get(id).map(|a| a.value().clone())
    }

    /// Drop a live instance; the class registration stays.
    pub fn remove_instance(&self, id: &str) -> bool {
        self.instances.remove(id).is_some()
    }

    pub fn list_classes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn list_instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn list_capabilities(&self) -> HashMap<String, AgentCapabilities> {
        self.instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().capabilities()))
            .collect()
    }
}

/// The manifest of built-in agents.
pub fn builtin_manifest() -> Vec<AgentManifestEntry> {
    vec![
        AgentManifestEntry {
            id: CONTENTMIND_AGENT_ID.to_string(),
            factory: Arc::new(|_config, deps| {
                Ok(Arc::new(ContentMindAgent::new(deps.router.clone())) as Arc<dyn Agent>)
            }),
        },
        AgentManifestEntry {
            id: RESEARCHER_AGENT_ID.to_string(),
            factory: Arc::new(|_config, deps| {
                Ok(Arc::new(ResearcherAgent::new(deps.router.clone())) as Arc<dyn Agent>)
            }),
        },
        AgentManifestEntry {
            id: DIGEST_AGENT_ID.to_string(),
            factory: Arc::new(|_config, deps| {
                let mut agent = DigestAgent::new(deps.router.clone(), deps.store.clone());
                if let Some(email) = &deps.email_delivery {
                    agent = agent.with_email_channel(email.clone());
                }
                if let Some(whatsapp) = &deps.whatsapp_delivery {
                    agent = agent.with_whatsapp_channel(whatsapp.clone());
                }
                Ok(Arc::new(agent) as Arc<dyn Agent>)
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryContentStore;

    fn deps() -> AgentDeps {
        AgentDeps::new(
            Arc::new(ModelRouter::new()),
            Arc::new(InMemoryContentStore::new()),
        )
    }

    #[test]
    fn test_manifest_registration_and_listing() {
        let registry = AgentRegistry::new();
        registry.register_manifest(builtin_manifest());

        assert_eq!(
            registry.list_classes(),
            vec!["contentmind", "digest", "researcher"]
        );
        assert!(registry.list_instances().is_empty());
    }

    #[test]
    fn test_create_is_idempotent_per_id() {
        let registry = AgentRegistry::new();
        registry.register_manifest(builtin_manifest());
        let deps = deps();

        let first = registry.create(CONTENTMIND_AGENT_ID, &deps).unwrap();
        let second = registry.create(CONTENTMIND_AGENT_ID, &deps).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.list_instances(), vec!["contentmind"]);
    }

    #[test]
    fn test_unknown_agent_fails() {
        let registry = AgentRegistry::new();
        assert!(registry.create("nonexistent", &deps()).is_err());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_replacing_class_keeps_existing_instance() {
        let registry = AgentRegistry::new();
        registry.register_manifest(builtin_manifest());
        let deps = deps();

        let instance = registry.create(RESEARCHER_AGENT_ID, &deps).unwrap();

        // Re-register the class; the live instance is untouched until the
        // caller removes it.
        registry.register_class(
            RESEARCHER_AGENT_ID,
            Arc::new(|_config, deps: &AgentDeps| {
                Ok(Arc::new(ResearcherAgent::new(deps.router.clone())) as Arc<dyn Agent>)
            }),
        );
        let same = registry.create(RESEARCHER_AGENT_ID, &deps).unwrap();
        assert!(Arc::ptr_eq(&instance, &same));

        assert!(registry.remove_instance(RESEARCHER_AGENT_ID));
        let fresh = registry.create(RESEARCHER_AGENT_ID, &deps).unwrap();
        assert!(!Arc::ptr_eq(&instance, &fresh));
    }

    #[test]
    fn test_capabilities_reflect_live_instances() {
        let registry = AgentRegistry::new();
        registry.register_manifest(builtin_manifest());
        let deps = deps();
        registry.create(CONTENTMIND_AGENT_ID, &deps).unwrap();
        registry.create(DIGEST_AGENT_ID, &deps).unwrap();

        let capabilities = registry.list_capabilities();
        assert_eq!(capabilities.len(), 2);
        assert!(capabilities
            .get(CONTENTMIND_AGENT_ID)
            .unwrap()
            .features
            .contains(&"summarization".to_string()));
    }
}
