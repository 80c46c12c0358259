use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agents::{ContentArtifact, ContentType};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Artifact not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Filter for artifact queries. All clauses are conjunctive; a `tags`
/// clause matches artifacts carrying any of the listed tags.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub content_types: Option<Vec<ContentType>>,
    pub tags: Option<Vec<String>>,
    pub since: Option<DateTime<Utc>>,
}

impl ArtifactFilter {
    pub fn matches(&self, artifact: &ContentArtifact) -> bool {
        if let Some(types) = &self.content_types {
            if !types.contains(&artifact.content_type) {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !tags.iter().any(|t| artifact.tags.iter().any(|a| a == t)) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if artifact.extracted_at < since {
                return false;
            }
        }
        true
    }
}

/// Knowledge-store contract consumed by the agents. Relational and
/// vector implementations live outside the core.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn save(&self, artifact: &ContentArtifact) -> Result<String, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<ContentArtifact>, StoreError>;

    async fn query(&self, filter: &ArtifactFilter) -> Result<Vec<ContentArtifact>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// In-memory store used by tests and as the default wiring.
#[derive(Default)]
pub struct InMemoryContentStore {
    items: RwLock<Vec<(String, ContentArtifact)>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn save(&self, artifact: &ContentArtifact) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.items
            .write()
            .await
            .push((id.clone(), artifact.clone()));
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<ContentArtifact>, StoreError> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .find(|(item_id, _)| item_id == id)
            .map(|(_, artifact)| artifact.clone()))
    }

    async fn query(&self, filter: &ArtifactFilter) -> Result<Vec<ContentArtifact>, StoreError> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .filter(|(_, artifact)| filter.matches(artifact))
            .map(|(_, artifact)| artifact.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.items.read().await.len())
    }
}
