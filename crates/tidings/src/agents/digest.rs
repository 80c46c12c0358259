use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use super::{
    Agent, AgentCapabilities, AgentError, AgentOutput, AgentRequest, AgentResponse,
    ContentArtifact, ContentType,
};
use crate::router::{ModelRouter, Requirements, TaskContent};
use crate::scheduler::{DeliveryMethod, DigestTask, TaskCallback};
use crate::storage::{ArtifactFilter, ContentStore};

pub const DIGEST_AGENT_ID: &str = "digest";

const THEME_MAX_TOKENS: u32 = 800;
const CONNECTION_MAX_TOKENS: u32 = 300;
const INSIGHT_MAX_TOKENS: u32 = 500;
const ITEM_ANALYSIS_MAX_TOKENS: u32 = 800;
const CROSS_REFERENCE_MAX_TOKENS: u32 = 1200;
const DIGEST_MAX_TOKENS: u32 = 2000;
const ANALYSIS_TEMPERATURE: f32 = 0.1;
const DIGEST_TEMPERATURE: f32 = 0.2;

/// Caps keeping LLM usage bounded per digest.
const ITEM_ANALYSIS_LIMIT: usize = 3;
const CROSS_REFERENCE_LIMIT: usize = 5;
const CONNECTION_PAIR_LIMIT: usize = 10;
const CONNECTION_DISPLAY_LIMIT: usize = 5;
const THEME_FALLBACK_LIMIT: usize = 5;
const POPULAR_TAG_LIMIT: usize = 10;

static THEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Theme|Topic)\s*\d*\s*:\s*([^\n]+)").unwrap());

static INSIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:•|-|\d+\.)\s*(.+)$").unwrap());

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery failed: {0}")]
    Failed(String),
    #[error("Recipient rejected: {0}")]
    RecipientRejected(String),
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

/// Delivery contract. At-least-once semantics; upstream must tolerate
/// duplicate delivery.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        html: Option<&str>,
        text: &str,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// A relationship the analyzer found between two digest items.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub from_title: String,
    pub to_title: String,
    pub relationship: String,
}

/// Detailed analysis of a single digest item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemAnalysis {
    pub title: String,
    pub analysis: String,
}

/// Cross-item analysis of the period's artifacts: themes, pairwise
/// connections, key insights, per-item deep dives, a cross-reference
/// narrative, plus content-type counts and tag frequencies.
///
/// The count and tag fields are computed in plain code and always
/// present; the LLM-derived fields stay empty when every provider is
/// degraded (themes then fall back to tag frequency).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentAnalysis {
    pub themes: Vec<String>,
    pub connections: Vec<Connection>,
    pub key_insights: Vec<String>,
    pub item_analyses: Vec<ItemAnalysis>,
    pub cross_reference: Option<String>,
    pub content_types: BTreeMap<String, usize>,
    pub popular_tags: Vec<(String, usize)>,
}

/// A generated and (possibly) delivered digest.
#[derive(Debug, Clone, Serialize)]
pub struct DigestRecord {
    pub digest_type: String,
    pub recipient: String,
    pub delivery_method: DeliveryMethod,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub item_count: usize,
    pub analysis: ContentAnalysis,
    pub generated_at: DateTime<Utc>,
    pub message_id: Option<String>,
}

/// Rolls up accumulated artifacts into a recipient-bound digest: analyze
/// the period's items, generate a narrative, format text and HTML
/// bodies, and push them through a delivery channel. Registered with the
/// scheduler via `callback`.
pub struct DigestAgent {
    router: Arc<ModelRouter>,
    store: Arc<dyn ContentStore>,
    email: Option<Arc<dyn DeliveryChannel>>,
    whatsapp: Option<Arc<dyn DeliveryChannel>>,
}

impl DigestAgent {
    pub fn new(router: Arc<ModelRouter>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            router,
            store,
            email: None,
            whatsapp: None,
        }
    }

    pub fn with_email_channel(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.email = Some(channel);
        self
    }

    pub fn with_whatsapp_channel(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.whatsapp = Some(channel);
        self
    }

    /// Scheduler callback adapter: errors propagate so the scheduler can
    /// log them, but the scheduler keeps the job on its cadence either
    /// way.
    pub fn callback(agent: Arc<DigestAgent>) -> TaskCallback {
        Arc::new(move |task: DigestTask| {
            let agent = agent.clone();
            Box::pin(async move {
                agent
                    .process(AgentRequest::Digest(task))
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            })
        })
    }

    fn period(digest_type: &str) -> ChronoDuration {
        match digest_type {
            "weekly" => ChronoDuration::days(7),
            "monthly" => ChronoDuration::days(30),
            _ => ChronoDuration::days(1),
        }
    }

    fn analysis_requirements(max_tokens: u32) -> Requirements {
        Requirements {
            max_tokens: Some(max_tokens),
            temperature: Some(ANALYSIS_TEMPERATURE),
            ..Default::default()
        }
    }

    fn item_block(artifact: &ContentArtifact) -> String {
        format!(
            "Title: {}\nTags: {}\nSummary: {}",
            artifact.title,
            artifact.tags.join(", "),
            artifact.summary
        )
    }

    /// Parse "Theme: ..." / "Topic 2: ..." lines out of raw model
    /// output; anything after a colon on a reasonable-length line is the
    /// looser second pass.
    fn parse_themes(raw: &str) -> Vec<String> {
        let mut themes: Vec<String> = THEME_RE
            .captures_iter(raw)
            .map(|caps| caps[1].trim().to_string())
            .filter(|theme| !theme.is_empty())
            .collect();

        if themes.is_empty() {
            for line in raw.lines() {
                let line = line.trim();
                if line.len() > 5 {
                    if let Some((_, name)) = line.split_once(':') {
                        let name = name.trim();
                        if !name.is_empty() {
                            themes.push(name.to_string());
                        }
                    }
                }
            }
        }
        themes
    }

    /// Tag frequency as themes when the model gave nothing usable.
    fn tag_frequency_themes(artifacts: &[ContentArtifact]) -> Vec<String> {
        Self::tag_counts(artifacts)
            .into_iter()
            .take(THEME_FALLBACK_LIMIT)
            .map(|(tag, _)| tag)
            .collect()
    }

    /// Parse bulleted or numbered insight lines; fall back to splitting
    /// on sentence terminators.
    fn parse_insights(raw: &str) -> Vec<String> {
        let insights: Vec<String> = INSIGHT_RE
            .captures_iter(raw)
            .map(|caps| caps[1].trim().to_string())
            .filter(|insight| !insight.is_empty())
            .collect();
        if !insights.is_empty() {
            return insights;
        }

        raw.split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|sentence| sentence.len() > 10)
            .map(str::to_string)
            .collect()
    }

    /// Whether connection output actually describes a relationship.
    fn describes_connection(text: &str) -> bool {
        let text = text.trim().to_lowercase();
        !text.is_empty()
            && !text.starts_with("no connection")
            && !text.starts_with("none")
            && !text.starts_with("not related")
    }

    /// Item pairs to probe for connections, capped to bound LLM usage.
    fn candidate_pairs(artifacts: &[ContentArtifact]) -> Vec<(&ContentArtifact, &ContentArtifact)> {
        let mut pairs = Vec::new();
        for i in 0..artifacts.len() {
            for j in (i + 1)..artifacts.len() {
                pairs.push((&artifacts[i], &artifacts[j]));
                if pairs.len() == CONNECTION_PAIR_LIMIT {
                    return pairs;
                }
            }
        }
        pairs
    }

    fn count_content_types(artifacts: &[ContentArtifact]) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for artifact in artifacts {
            *counts.entry(artifact.content_type.to_string()).or_insert(0) += 1;
        }
        counts
    }

    fn tag_counts(artifacts: &[ContentArtifact]) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for artifact in artifacts {
            for tag in &artifact.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted
    }

    fn popular_tags(artifacts: &[ContentArtifact]) -> Vec<(String, usize)> {
        Self::tag_counts(artifacts)
            .into_iter()
            .take(POPULAR_TAG_LIMIT)
            .collect()
    }

    /// Cross-item analysis of the period's artifacts. Each LLM-backed
    /// step is independent; a degraded router leaves that section empty
    /// rather than polluting the digest with placeholder prose.
    async fn analyze(
        &self,
        artifacts: &[ContentArtifact],
        providers_used: &mut HashMap<String, Option<String>>,
        fallback_reasons: &mut HashMap<String, String>,
    ) -> ContentAnalysis {
        let mut analysis = ContentAnalysis {
            content_types: Self::count_content_types(artifacts),
            popular_tags: Self::popular_tags(artifacts),
            ..Default::default()
        };
        if artifacts.is_empty() {
            return analysis;
        }

        // Themes across all items.
        let theme_blocks = artifacts
            .iter()
            .map(Self::item_block)
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let themes_result = self
            .router
            .route(
                "identify_themes",
                &TaskContent::text(theme_blocks).with("num_items", json!(artifacts.len())),
                &Self::analysis_requirements(THEME_MAX_TOKENS),
            )
            .await;
        super::record_route(providers_used, fallback_reasons, "analysis", &themes_result);
        if !themes_result.is_degraded() {
            analysis.themes = Self::parse_themes(&themes_result.result);
        }
        if analysis.themes.is_empty() {
            analysis.themes = Self::tag_frequency_themes(artifacts);
        }

        // Pairwise connections.
        if artifacts.len() >= 2 {
            for (first, second) in Self::candidate_pairs(artifacts) {
                let pair_text = format!(
                    "Item 1:\n{}\n\nItem 2:\n{}\n",
                    Self::item_block(first),
                    Self::item_block(second)
                );
                let result = self
                    .router
                    .route(
                        "identify_connection",
                        &TaskContent::text(pair_text),
                        &Self::analysis_requirements(CONNECTION_MAX_TOKENS),
                    )
                    .await;
                if result.is_degraded() {
                    continue;
                }
                if Self::describes_connection(&result.result) {
                    analysis.connections.push(Connection {
                        from_title: first.title.clone(),
                        to_title: second.title.clone(),
                        relationship: result.result.trim().to_string(),
                    });
                }
            }
        }

        // Key insights across all items.
        let insight_blocks = artifacts
            .iter()
            .map(|a| format!("Title: {}\nSummary: {}", a.title, a.summary))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let insight_result = self
            .router
            .route(
                "extract_insights",
                &TaskContent::text(insight_blocks).with("num_items", json!(artifacts.len())),
                &Self::analysis_requirements(INSIGHT_MAX_TOKENS),
            )
            .await;
        if !insight_result.is_degraded() {
            analysis.key_insights = Self::parse_insights(&insight_result.result);
        }

        // Deep dives on the first few items that have a summary.
        for artifact in artifacts
            .iter()
            .filter(|a| !a.summary.trim().is_empty())
            .take(ITEM_ANALYSIS_LIMIT)
        {
            let mut content = Self::item_block(artifact);
            if !artifact.entities.is_empty() {
                content.push_str("\nEntities:\n");
                let entities: BTreeMap<&String, &Vec<String>> = artifact.entities.iter().collect();
                for (category, items) in entities {
                    content.push_str(&format!("{}: {}\n", category, items.join(", ")));
                }
            }
            let result = self
                .router
                .route(
                    "content_analysis",
                    &TaskContent::text(content),
                    &Self::analysis_requirements(ITEM_ANALYSIS_MAX_TOKENS),
                )
                .await;
            if !result.is_degraded() && !result.result.trim().is_empty() {
                analysis.item_analyses.push(ItemAnalysis {
                    title: artifact.title.clone(),
                    analysis: result.result.trim().to_string(),
                });
            }
        }

        // Cross-reference narrative over the first few items.
        if artifacts.len() >= 2 {
            let items = artifacts
                .iter()
                .take(CROSS_REFERENCE_LIMIT)
                .map(|a| {
                    format!(
                        "{}\nContent Type: {}\nCreated: {}",
                        Self::item_block(a),
                        a.content_type,
                        a.extracted_at.to_rfc3339()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n--- ITEM SEPARATOR ---\n\n");
            let result = self
                .router
                .route(
                    "cross_reference",
                    &TaskContent::text(items),
                    &Self::analysis_requirements(CROSS_REFERENCE_MAX_TOKENS),
                )
                .await;
            if !result.is_degraded() && !result.result.trim().is_empty() {
                analysis.cross_reference = Some(result.result.trim().to_string());
            }
        }

        analysis
    }

    /// Ask the router for the digest narrative, feeding it the items and
    /// the full analysis. Skipped when the router is degraded; the
    /// structured sections read fine without it.
    async fn generate_narrative(
        &self,
        task: &DigestTask,
        artifacts: &[ContentArtifact],
        analysis: &ContentAnalysis,
        providers_used: &mut HashMap<String, Option<String>>,
        fallback_reasons: &mut HashMap<String, String>,
    ) -> Option<String> {
        let digest_data = json!({
            "content_items": artifacts
                .iter()
                .map(|a| json!({
                    "title": a.title,
                    "summary": a.summary,
                    "content_type": a.content_type,
                    "tags": a.tags,
                }))
                .collect::<Vec<_>>(),
            "themes": analysis.themes,
            "key_insights": analysis.key_insights,
            "connections": analysis.connections,
            "cross_reference": analysis.cross_reference,
            "content_types": analysis.content_types,
            "popular_tags": analysis.popular_tags,
            "digest_type": task.digest_type,
            "item_count": artifacts.len(),
        });

        let result = self
            .router
            .route(
                "generate_digest",
                &TaskContent::text(digest_data.to_string()),
                &Requirements {
                    max_tokens: Some(DIGEST_MAX_TOKENS),
                    temperature: Some(DIGEST_TEMPERATURE),
                    ..Default::default()
                },
            )
            .await;
        super::record_route(providers_used, fallback_reasons, "digest", &result);

        if result.is_degraded() || result.result.trim().is_empty() {
            None
        } else {
            Some(result.result.trim().to_string())
        }
    }

    fn assemble_sections(
        artifacts: &[ContentArtifact],
    ) -> BTreeMap<ContentType, Vec<&ContentArtifact>> {
        let mut sections: BTreeMap<ContentType, Vec<&ContentArtifact>> = BTreeMap::new();
        for artifact in artifacts {
            sections
                .entry(artifact.content_type)
                .or_default()
                .push(artifact);
        }
        sections
    }

    fn format_text(
        task: &DigestTask,
        narrative: Option<&str>,
        analysis: &ContentAnalysis,
        sections: &BTreeMap<ContentType, Vec<&ContentArtifact>>,
        item_count: usize,
    ) -> String {
        let mut body = String::new();
        body.push_str(&format!(
            "Your {} digest ({} item{})\n",
            task.digest_type,
            item_count,
            if item_count == 1 { "" } else { "s" }
        ));
        if item_count == 0 {
            body.push_str("\nNo new content in this period.\n");
            return body;
        }

        if let Some(narrative) = narrative {
            body.push('\n');
            body.push_str(narrative);
            body.push('\n');
        }

        if !analysis.key_insights.is_empty() {
            body.push_str("\nKey insights:\n");
            for insight in &analysis.key_insights {
                body.push_str(&format!("- {insight}\n"));
            }
        }

        if !analysis.themes.is_empty() {
            body.push_str("\nCommon themes:\n");
            for theme in &analysis.themes {
                body.push_str(&format!("- {theme}\n"));
            }
        }

        for (content_type, items) in sections {
            body.push_str(&format!("\n== {} ==\n", content_type));
            for artifact in items {
                body.push_str(&format!("- {}\n  {}\n", artifact.title, artifact.summary));
                if !artifact.tags.is_empty() {
                    body.push_str(&format!("  tags: {}\n", artifact.tags.join(", ")));
                }
            }
        }

        if !analysis.connections.is_empty() {
            body.push_str("\nConnections:\n");
            for connection in analysis.connections.iter().take(CONNECTION_DISPLAY_LIMIT) {
                body.push_str(&format!(
                    "- {} and {}: {}\n",
                    connection.from_title, connection.to_title, connection.relationship
                ));
            }
        }

        if !analysis.item_analyses.is_empty() {
            body.push_str("\nDetailed analysis:\n");
            for item in &analysis.item_analyses {
                body.push_str(&format!("- {}: {}\n", item.title, item.analysis));
            }
        }

        if let Some(cross_reference) = &analysis.cross_reference {
            body.push_str("\nCross-reference:\n");
            body.push_str(cross_reference);
            body.push('\n');
        }

        if !analysis.popular_tags.is_empty() {
            let tags = analysis
                .popular_tags
                .iter()
                .map(|(tag, count)| format!("{tag} ({count})"))
                .collect::<Vec<_>>()
                .join(", ");
            body.push_str(&format!("\nPopular tags: {tags}\n"));
        }

        body
    }

    fn format_html(
        task: &DigestTask,
        narrative: Option<&str>,
        analysis: &ContentAnalysis,
        sections: &BTreeMap<ContentType, Vec<&ContentArtifact>>,
        item_count: usize,
    ) -> String {
        let mut body = String::new();
        body.push_str(&format!(
            "<h1>Your {} digest</h1>",
            html_escape(&task.digest_type)
        ));
        if item_count == 0 {
            body.push_str("<p>No new content in this period.</p>");
            return body;
        }
        body.push_str(&format!(
            "<p>This digest contains {item_count} item{}.</p>",
            if item_count == 1 { "" } else { "s" }
        ));

        if let Some(narrative) = narrative {
            body.push_str(&format!("<p>{}</p>", html_escape(narrative)));
        }

        if !analysis.key_insights.is_empty() {
            body.push_str("<h2>Key Insights</h2><ul>");
            for insight in &analysis.key_insights {
                body.push_str(&format!("<li>{}</li>", html_escape(insight)));
            }
            body.push_str("</ul>");
        }

        if !analysis.themes.is_empty() {
            body.push_str("<h2>Common Themes</h2><ul>");
            for theme in &analysis.themes {
                body.push_str(&format!("<li>{}</li>", html_escape(theme)));
            }
            body.push_str("</ul>");
        }

        for (content_type, items) in sections {
            body.push_str(&format!("<h2>{}</h2><ul>", content_type));
            for artifact in items {
                body.push_str(&format!(
                    "<li><strong>{}</strong><br/>{}</li>",
                    html_escape(&artifact.title),
                    html_escape(&artifact.summary)
                ));
            }
            body.push_str("</ul>");
        }

        if !analysis.connections.is_empty() {
            body.push_str("<h2>Content Connections</h2><ul>");
            for connection in analysis.connections.iter().take(CONNECTION_DISPLAY_LIMIT) {
                body.push_str(&format!(
                    "<li><strong>{}</strong> and <strong>{}</strong>: {}</li>",
                    html_escape(&connection.from_title),
                    html_escape(&connection.to_title),
                    html_escape(&connection.relationship)
                ));
            }
            body.push_str("</ul>");
        }

        if !analysis.item_analyses.is_empty() {
            body.push_str("<h2>Detailed Analysis</h2>");
            for item in &analysis.item_analyses {
                body.push_str(&format!(
                    "<h3>{}</h3><p>{}</p>",
                    html_escape(&item.title),
                    html_escape(&item.analysis)
                ));
            }
        }

        if let Some(cross_reference) = &analysis.cross_reference {
            body.push_str(&format!(
                "<h2>Cross-Reference Analysis</h2><p>{}</p>",
                html_escape(cross_reference)
            ));
        }

        body
    }

    async fn build_and_deliver(
        &self,
        task: &DigestTask,
    ) -> Result<(DigestRecord, HashMap<String, Option<String>>, HashMap<String, String>), AgentError>
    {
        let filter = ArtifactFilter {
            content_types: task.content_types.clone(),
            tags: task.tags.clone(),
            since: Some(Utc::now() - Self::period(&task.digest_type)),
        };
        let artifacts = self.store.query(&filter).await?;
        tracing::info!(
            "Assembling {} digest for {} from {} artifacts",
            task.digest_type,
            task.recipient,
            artifacts.len()
        );

        let mut providers_used: HashMap<String, Option<String>> = HashMap::new();
        let mut fallback_reasons: HashMap<String, String> = HashMap::new();

        let analysis = self
            .analyze(&artifacts, &mut providers_used, &mut fallback_reasons)
            .await;

        let narrative = if artifacts.is_empty() {
            None
        } else {
            self.generate_narrative(
                task,
                &artifacts,
                &analysis,
                &mut providers_used,
                &mut fallback_reasons,
            )
            .await
        };

        let sections = Self::assemble_sections(&artifacts);
        let item_count = artifacts.len();
        let subject = format!(
            "Your {} digest — {}",
            task.digest_type,
            Utc::now().format("%Y-%m-%d")
        );
        let text_body =
            Self::format_text(task, narrative.as_deref(), &analysis, &sections, item_count);
        let html_body =
            Self::format_html(task, narrative.as_deref(), &analysis, &sections, item_count);

        let channel = match task.delivery_method {
            DeliveryMethod::Email => self.email.as_ref(),
            DeliveryMethod::Whatsapp => self.whatsapp.as_ref(),
        }
        .ok_or_else(|| {
            AgentError::Delivery(format!(
                "no delivery channel configured for {}",
                task.delivery_method
            ))
        })?;

        let receipt = match task.delivery_method {
            DeliveryMethod::Email => {
                channel
                    .send(
                        &task.recipient,
                        Some(&subject),
                        Some(&html_body),
                        &text_body,
                    )
                    .await
            }
            DeliveryMethod::Whatsapp => {
                channel.send(&task.recipient, None, None, &text_body).await
            }
        }
        .map_err(|e| AgentError::Delivery(e.to_string()))?;

        tracing::info!(
            "Delivered {} digest to {} via {}",
            task.digest_type,
            task.recipient,
            task.delivery_method
        );

        let record = DigestRecord {
            digest_type: task.digest_type.clone(),
            recipient: task.recipient.clone(),
            delivery_method: task.delivery_method,
            subject,
            text_body,
            html_body,
            item_count,
            analysis,
            generated_at: Utc::now(),
            message_id: receipt.message_id,
        };
        Ok((record, providers_used, fallback_reasons))
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl Agent for DigestAgent {
    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            id: DIGEST_AGENT_ID.to_string(),
            name: "Digest".to_string(),
            description: "Assembles and delivers periodic digests of accumulated content"
                .to_string(),
            supported_content_types: vec![],
            features: vec![
                "content_analysis".to_string(),
                "digest_generation".to_string(),
                "delivery".to_string(),
            ],
        }
    }

    async fn process(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let AgentRequest::Digest(task) = request else {
            return Err(AgentError::Invalid(
                "digest agent only handles digest requests".to_string(),
            ));
        };
        let (record, providers_used, fallback_reasons) = self.build_and_deliver(&task).await?;
        Ok(AgentResponse {
            providers_used,
            fallback_reasons,
            ..AgentResponse::success(AgentOutput::Digest(record))
        })
    }
}
