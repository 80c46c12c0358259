use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    Agent, AgentCapabilities, AgentError, AgentOutput, AgentRequest, AgentResponse,
    ContentArtifact, ContentType, RequestEnvelope,
};
use crate::router::{ModelRouter, ProviderKind, ProviderResult, Requirements, TaskContent};

pub const RESEARCHER_AGENT_ID: &str = "researcher";

const SEARCH_MAX_TOKENS: u32 = 500;
const SYNTHESIS_MAX_TOKENS: u32 = 800;
const RESEARCH_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Serialize)]
pub struct SourceItem {
    pub source: String,
    pub content: String,
}

/// Research agent: routes a query through a search step and a synthesis
/// step, then lifts any `Entities:`/`Tags:` trailer out of the synthesis.
pub struct ResearcherAgent {
    router: Arc<ModelRouter>,
}

impl ResearcherAgent {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    fn requirements(provider: Option<ProviderKind>, max_tokens: u32) -> Requirements {
        Requirements {
            provider,
            max_tokens: Some(max_tokens),
            temperature: Some(RESEARCH_TEMPERATURE),
            ..Default::default()
        }
    }

    /// Split `Source:`-delimited search output into source items; text
    /// without markers becomes a single AI-generated source.
    fn split_sources(search_text: &str) -> Vec<SourceItem> {
        if !search_text.contains("Source:") {
            return vec![SourceItem {
                source: "AI-generated".to_string(),
                content: search_text.trim().to_string(),
            }];
        }

        search_text
            .split("Source:")
            .skip(1)
            .map(|part| match part.split_once('\n') {
                Some((source, content)) => SourceItem {
                    source: source.trim().to_string(),
                    content: content.trim().to_string(),
                },
                None => SourceItem {
                    source: part.trim().to_string(),
                    content: String::new(),
                },
            })
            .collect()
    }

    /// Extract `(summary, entities, tags)` from the synthesis text. The
    /// summary is everything before an `Entities:` marker; entity lines
    /// are `Category:` headers followed by `- item` bullets; tags are the
    /// first comma-separated line after `Tags:`.
    fn parse_synthesis(synthesis: &str) -> (String, HashMap<String, Vec<String>>, Vec<String>) {
        let summary = match synthesis.split_once("Entities:") {
            Some((before, _)) => before.trim().to_string(),
            None => synthesis.trim().to_string(),
        };

        let mut entities: HashMap<String, Vec<String>> = HashMap::new();
        if let Some((_, rest)) = synthesis.split_once("Entities:") {
            let entity_section = rest.split("Tags:").next().unwrap_or("");
            let mut current_category = "general".to_string();
            for line in entity_section.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(item) = line.strip_prefix("- ") {
                    entities
                        .entry(current_category.clone())
                        .or_default()
                        .push(item.trim().to_string());
                } else if line.contains(':') {
                    current_category = line.trim_end_matches(':').trim().to_string();
                }
            }
        }

        let mut tags = Vec::new();
        if let Some((_, rest)) = synthesis.split_once("Tags:") {
            if let Some(first_line) = rest.trim().lines().next() {
                tags = first_line
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }

        (summary, entities, tags)
    }

    async fn process_query(
        &self,
        query: String,
        envelope: RequestEnvelope,
    ) -> Result<AgentResponse, AgentError> {
        if query.trim().is_empty() {
            return Err(AgentError::Invalid("missing query".to_string()));
        }

        tracing::info!("Research query: {}", query);
        let prefs = &envelope.provider_preferences;
        let mut providers_used: HashMap<String, Option<String>> = HashMap::new();
        let mut fallback_reasons: HashMap<String, String> = HashMap::new();

        let search_content = TaskContent::text(&query).with("query", json!(query.clone()));
        let search_result: ProviderResult = self
            .router
            .route(
                "research",
                &search_content,
                &Self::requirements(prefs.research, SEARCH_MAX_TOKENS),
            )
            .await;
        providers_used.insert("research".to_string(), Some(search_result.provider.clone()));
        if let Some(reason) = &search_result.fallback_reason {
            fallback_reasons.insert("research".to_string(), reason.clone());
        }

        let sources = Self::split_sources(&search_result.result);
        let formatted_sources = sources
            .iter()
            .map(|s| format!("Source: {}\n{}", s.source, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let synthesis_content = TaskContent::text(&formatted_sources)
            .with("query", json!(query.clone()))
            .with("search_results", json!(formatted_sources.clone()));
        let synthesis_result = self
            .router
            .route(
                "synthesize",
                &synthesis_content,
                &Self::requirements(prefs.synthesis, SYNTHESIS_MAX_TOKENS),
            )
            .await;
        providers_used.insert(
            "synthesis".to_string(),
            Some(synthesis_result.provider.clone()),
        );
        if let Some(reason) = &synthesis_result.fallback_reason {
            fallback_reasons.insert("synthesis".to_string(), reason.clone());
        }

        let (summary, entities, tags) = Self::parse_synthesis(&synthesis_result.result);

        let artifact = ContentArtifact {
            content_type: ContentType::Query,
            title: format!("Research: {query}"),
            summary,
            full_text: synthesis_result.result.clone(),
            source: query,
            author: None,
            published_date: None,
            tags,
            entities,
            page_count: None,
            duration_secs: None,
            platform: None,
            is_thread: None,
            extracted_at: Utc::now(),
        };

        Ok(AgentResponse {
            providers_used,
            fallback_reasons,
            ..AgentResponse::success(AgentOutput::Artifact(artifact))
        })
    }
}

#[async_trait]
impl Agent for ResearcherAgent {
    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            id: RESEARCHER_AGENT_ID.to_string(),
            name: "Researcher".to_string(),
            description: "Conducts research and synthesizes information".to_string(),
            supported_content_types: vec![ContentType::Query],
            features: vec!["search".to_string(), "synthesis".to_string()],
        }
    }

    async fn process(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        match request {
            AgentRequest::Research { query, envelope } => {
                self.process_query(query, envelope).await
            }
            _ => Err(AgentError::Invalid(
                "researcher only handles research requests".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sources_without_markers() {
        let sources = ResearcherAgent::split_sources("Plain synthesis text.");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source, "AI-generated");
        assert_eq!(sources[0].content, "Plain synthesis text.");
    }

    #[test]
    fn test_split_sources_with_markers() {
        let text = "Source: Journal A\nFinding one.\n\nSource: Journal B\nFinding two.";
        let sources = ResearcherAgent::split_sources(text);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source, "Journal A");
        assert_eq!(sources[0].content, "Finding one.");
        assert_eq!(sources[1].source, "Journal B");
    }

    #[test]
    fn test_parse_synthesis_with_trailer() {
        let synthesis = "Rust is a systems language.\n\nEntities:\nLanguages:\n- Rust\n- C\nTags: systems, memory-safety";
        let (summary, entities, tags) = ResearcherAgent::parse_synthesis(synthesis);
        assert_eq!(summary, "Rust is a systems language.");
        assert_eq!(
            entities.get("Languages").unwrap(),
            &vec!["Rust".to_string(), "C".to_string()]
        );
        assert_eq!(tags, vec!["systems", "memory-safety"]);
    }

    #[test]
    fn test_parse_synthesis_without_trailer() {
        let (summary, entities, tags) = ResearcherAgent::parse_synthesis("Just an answer.");
        assert_eq!(summary, "Just an answer.");
        assert!(entities.is_empty());
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn test_query_pipeline_with_degraded_router() {
        let agent = ResearcherAgent::new(Arc::new(ModelRouter::new()));
        let response = agent
            .process(AgentRequest::Research {
                query: "what is ownership in rust".to_string(),
                envelope: RequestEnvelope::default(),
            })
            .await
            .unwrap();

        assert!(response.is_success());
        let artifact = response.output.as_ref().unwrap().artifact().unwrap();
        assert_eq!(artifact.content_type, ContentType::Query);
        assert_eq!(artifact.title, "Research: what is ownership in rust");
        assert_eq!(
            response.providers_used.get("research"),
            Some(&Some("fallback".to_string()))
        );
        assert!(response.is_degraded());
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let agent = ResearcherAgent::new(Arc::new(ModelRouter::new()));
        let result = agent
            .process(AgentRequest::Research {
                query: "  ".to_string(),
                envelope: RequestEnvelope::default(),
            })
            .await;
        assert!(matches!(result, Err(AgentError::Invalid(_))));
    }
}
