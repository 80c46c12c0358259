use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::extractor::{Extractor, RawContent, TextExtractor};
use super::{
    Agent, AgentCapabilities, AgentError, AgentOutput, AgentRequest, AgentResponse,
    ContentArtifact, ContentType, RequestEnvelope,
};
use crate::router::{ModelRouter, ProviderKind, Requirements, TaskContent};

pub const CONTENTMIND_AGENT_ID: &str = "contentmind";

const SUMMARY_MAX_TOKENS: u32 = 500;
const ENTITY_MAX_TOKENS: u32 = 500;
const TAG_MAX_TOKENS: u32 = 100;

/// The content-processing agent: selects an extractor by content type,
/// then enriches the extracted text through the router (summary,
/// entities, tags) and composes an artifact.
pub struct ContentMindAgent {
    router: Arc<ModelRouter>,
    extractors: HashMap<ContentType, Arc<dyn Extractor>>,
}

impl ContentMindAgent {
    /// Build with the default tool table: a plain-text extractor. Format
    /// extractors are registered per deployment via `with_extractor`.
    pub fn new(router: Arc<ModelRouter>) -> Self {
        let mut extractors: HashMap<ContentType, Arc<dyn Extractor>> = HashMap::new();
        extractors.insert(ContentType::Text, Arc::new(TextExtractor::new()));
        Self { router, extractors }
    }

    pub fn with_extractor(
        mut self,
        content_type: ContentType,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        self.extractors.insert(content_type, extractor);
        self
    }

    fn requirements(provider: Option<ProviderKind>, max_tokens: u32) -> Requirements {
        Requirements {
            provider,
            max_tokens: Some(max_tokens),
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    /// Parse entity output that is not a JSON object. Handles structured
    /// text of the shape `Category: a, b` (possibly with items on
    /// continuation lines); anything else is recorded as unstructured.
    fn parse_entity_text(text: &str) -> HashMap<String, Vec<String>> {
        fn split_items(text: &str) -> Vec<String> {
            text.split(',')
                .map(|item| item.trim().trim_end_matches('.').to_string())
                .filter(|item| !item.is_empty())
                .collect()
        }

        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        let mut current_category: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((category, items_text)) = line.split_once(':') {
                let category = category.trim();
                let items_text = items_text.trim();
                if !category.is_empty() && !items_text.is_empty() {
                    let items = split_items(items_text);
                    if !items.is_empty() {
                        result.insert(category.to_string(), items);
                    }
                } else if !category.is_empty() {
                    current_category = Some(category.to_string());
                }
            } else if let Some(category) = &current_category {
                let items = split_items(line);
                if !items.is_empty() {
                    result.entry(category.clone()).or_default().extend(items);
                }
            }
        }

        if !result.is_empty() {
            return result;
        }

        let unstructured: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if unstructured.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("unstructured".to_string(), unstructured)])
        }
    }

    fn parse_entities(raw: &str) -> HashMap<String, Vec<String>> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            match serde_json::from_str::<serde_json::Map<String, Value>>(trimmed) {
                Ok(object) => {
                    let mut entities = HashMap::new();
                    for (category, value) in object {
                        let items = match value {
                            Value::Array(items) => items
                                .into_iter()
                                .map(|item| match item {
                                    Value::String(s) => s,
                                    other => other.to_string(),
                                })
                                .collect(),
                            Value::String(s) => vec![s],
                            other => vec![other.to_string()],
                        };
                        entities.insert(category, items);
                    }
                    return entities;
                }
                Err(e) => {
                    tracing::warn!("Failed to parse entity result as JSON: {}", e);
                }
            }
        }
        Self::parse_entity_text(trimmed)
    }

    fn source_info(
        content_type: ContentType,
        content: &RawContent,
        envelope: &RequestEnvelope,
    ) -> String {
        if let Some(source) = envelope
            .metadata
            .get("source")
            .and_then(|s| s.as_str())
        {
            if !source.is_empty() {
                return source.to_string();
            }
        }
        match (content_type, content) {
            (ContentType::Pdf, RawContent::Text(path)) if !path.starts_with("data:") => {
                path.clone()
            }
            (ContentType::Pdf, _) => "PDF Document".to_string(),
            (ContentType::Audio, RawContent::Text(path)) if !path.starts_with("data:") => {
                path.clone()
            }
            (ContentType::Audio, _) => "Audio Recording".to_string(),
            (ContentType::Text, _) => "Text Note".to_string(),
            (_, RawContent::Text(text)) => text.clone(),
            (_, RawContent::Bytes(_)) => content_type.to_string(),
        }
    }

    async fn process_content(
        &self,
        content_type: ContentType,
        content: RawContent,
        envelope: RequestEnvelope,
    ) -> Result<AgentResponse, AgentError> {
        let extractor = self
            .extractors
            .get(&content_type)
            .ok_or(AgentError::UnsupportedContentType(content_type))?;

        tracing::info!("Processing content type: {}", content_type);
        let extracted = extractor
            .extract(&content, Some(&envelope.metadata))
            .await
            .map_err(|e| AgentError::Extraction(e.to_string()))?;

        let mut providers_used: HashMap<String, Option<String>> = HashMap::new();
        let mut fallback_reasons: HashMap<String, String> = HashMap::new();
        let prefs = &envelope.provider_preferences;

        let mut summary = extracted
            .summary
            .clone()
            .unwrap_or_else(|| "No summary available".to_string());
        let mut entities: HashMap<String, Vec<String>> = HashMap::new();
        let mut tags: Vec<String> = Vec::new();

        if !extracted.text.trim().is_empty() {
            let task_content = TaskContent::text(&extracted.text);

            let summary_result = self
                .router
                .route(
                    "summarize",
                    &task_content,
                    &Self::requirements(prefs.summary, SUMMARY_MAX_TOKENS),
                )
                .await;
            if summary_result.is_success() {
                summary = summary_result.result.clone();
            }
            super::record_route(
                &mut providers_used,
                &mut fallback_reasons,
                "summary",
                &summary_result,
            );

            let entity_result = self
                .router
                .route(
                    "extract_entities",
                    &task_content,
                    &Self::requirements(prefs.entity_extraction, ENTITY_MAX_TOKENS),
                )
                .await;
            if entity_result.is_success() {
                entities = Self::parse_entities(&entity_result.result);
            }
            super::record_route(
                &mut providers_used,
                &mut fallback_reasons,
                "entity_extraction",
                &entity_result,
            );

            let tag_result = self
                .router
                .route(
                    "tag_content",
                    &task_content,
                    &Self::requirements(prefs.tagging, TAG_MAX_TOKENS),
                )
                .await;
            if tag_result.is_success() {
                tags = tag_result
                    .result
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            super::record_route(
                &mut providers_used,
                &mut fallback_reasons,
                "tagging",
                &tag_result,
            );
        }

        let is_thread = envelope
            .metadata
            .get("is_thread")
            .and_then(|v| v.as_bool());

        let artifact = ContentArtifact {
            content_type,
            title: extracted.title,
            summary,
            full_text: extracted.text,
            source: Self::source_info(content_type, &content, &envelope),
            author: extracted.author,
            published_date: extracted.published_date,
            tags,
            entities,
            page_count: extracted.page_count,
            duration_secs: extracted.duration_secs,
            platform: extracted.platform,
            is_thread,
            extracted_at: extracted.extracted_at,
        };

        Ok(AgentResponse {
            providers_used,
            fallback_reasons,
            ..AgentResponse::success(AgentOutput::Artifact(artifact))
        })
    }
}

#[async_trait]
impl Agent for ContentMindAgent {
    fn capabilities(&self) -> AgentCapabilities {
        let mut supported: Vec<ContentType> = self.extractors.keys().copied().collect();
        supported.sort_by_key(|c| c.as_str());
        AgentCapabilities {
            id: CONTENTMIND_AGENT_ID.to_string(),
            name: "ContentMind".to_string(),
            description: "Processes and organizes content into enriched artifacts".to_string(),
            supported_content_types: supported,
            features: vec![
                "summarization".to_string(),
                "entity_extraction".to_string(),
                "tagging".to_string(),
            ],
        }
    }

    async fn process(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        match request {
            AgentRequest::Content {
                content_type,
                content,
                envelope,
            } => self.process_content(content_type, content, envelope).await,
            _ => Err(AgentError::Invalid(
                "contentmind only handles content requests".to_string(),
            )),
        }
    }
}
