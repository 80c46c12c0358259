mod contentmind;
mod digest;
mod extractor;
mod registry;
mod researcher;

pub use contentmind::{ContentMindAgent, CONTENTMIND_AGENT_ID};
pub use digest::{
    Connection, ContentAnalysis, DeliveryChannel, DeliveryError, DeliveryReceipt, DigestAgent,
    DigestRecord, ItemAnalysis, DIGEST_AGENT_ID,
};
pub use extractor::{ExtractedContent, Extractor, ExtractorError, RawContent, TextExtractor};
pub use registry::{
    builtin_manifest, AgentConfig, AgentDeps, AgentFactory, AgentManifestEntry, AgentRegistry,
};
pub use researcher::{ResearcherAgent, RESEARCHER_AGENT_ID};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::router::ProviderKind;
use crate::scheduler::DigestTask;
use crate::storage::StoreError;

/// The content shapes the platform understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Url,
    Pdf,
    Text,
    Audio,
    Social,
    Query,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Url => "url",
            ContentType::Pdf => "pdf",
            ContentType::Text => "text",
            ContentType::Audio => "audio",
            ContentType::Social => "social",
            ContentType::Query => "query",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sub-task provider preferences carried on every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_extraction: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagging: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<ProviderKind>,
}

/// Shared envelope on every agent request.
#[derive(Debug, Clone, Default)]
pub struct RequestEnvelope {
    pub provider_preferences: ProviderPreferences,
    pub metadata: HashMap<String, Value>,
}

/// Typed request variants; the gateway constructs these, agents dispatch
/// on them.
#[derive(Debug, Clone)]
pub enum AgentRequest {
    Content {
        content_type: ContentType,
        content: RawContent,
        envelope: RequestEnvelope,
    },
    Research {
        query: String,
        envelope: RequestEnvelope,
    },
    Digest(DigestTask),
}

/// The enriched representation of a piece of content produced by a
/// processing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub content_type: ContentType,
    pub title: String,
    pub summary: String,
    pub full_text: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: HashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_thread: Option<bool>,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// What an agent produced.
#[derive(Debug, Clone, Serialize)]
pub enum AgentOutput {
    Artifact(ContentArtifact),
    Digest(DigestRecord),
}

impl AgentOutput {
    pub fn artifact(&self) -> Option<&ContentArtifact> {
        match self {
            AgentOutput::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn digest(&self) -> Option<&DigestRecord> {
        match self {
            AgentOutput::Digest(record) => Some(record),
            _ => None,
        }
    }
}

/// Agent response. `providers_used` maps each sub-task to the provider
/// that served it (`None` when the enricher failed outright);
/// `fallback_reasons` records sub-tasks that degraded, so the caller can
/// badge the artifact.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentOutput>,
    pub providers_used: HashMap<String, Option<String>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub fallback_reasons: HashMap<String, String>,
}

impl AgentResponse {
    pub fn success(output: AgentOutput) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
            output: Some(output),
            providers_used: HashMap::new(),
            fallback_reasons: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Whether any sub-task fell back to the degraded path.
    pub fn is_degraded(&self) -> bool {
        !self.fallback_reasons.is_empty()
    }
}

/// Capability descriptor for discovery.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCapabilities {
    pub id: String,
    pub name: String,
    pub description: String,
    pub supported_content_types: Vec<ContentType>,
    pub features: Vec<String>,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(ContentType),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Extraction failed: {0}")]
    Extraction(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A processing agent. Implementations hold no request-specific state
/// between calls; `process` is cancel-safe at every await point.
#[async_trait]
pub trait Agent: Send + Sync {
    fn capabilities(&self) -> AgentCapabilities;

    async fn process(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// Record one router sub-task result into the response bookkeeping:
/// the serving provider, and the fallback reason when it degraded.
pub(crate) fn record_route(
    providers_used: &mut HashMap<String, Option<String>>,
    fallback_reasons: &mut HashMap<String, String>,
    sub_task: &str,
    result: &crate::router::ProviderResult,
) {
    if result.is_success() {
        providers_used.insert(sub_task.to_string(), Some(result.provider.clone()));
        if let Some(reason) = &result.fallback_reason {
            fallback_reasons.insert(sub_task.to_string(), reason.clone());
        }
    } else {
        tracing::warn!(
            "{} task failed: {}",
            sub_task,
            result.message.as_deref().unwrap_or("unknown error")
        );
        providers_used.insert(sub_task.to_string(), None);
    }
}
