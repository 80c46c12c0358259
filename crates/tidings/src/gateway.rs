use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::agents::{
    AgentDeps, AgentError, AgentRegistry, AgentRequest, AgentResponse, ContentType, RawContent,
    RequestEnvelope, CONTENTMIND_AGENT_ID, RESEARCHER_AGENT_ID,
};

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+").unwrap());

const RESEARCH_KEYWORDS: &[&str] = &["research", "query", "question", "investigate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressSource {
    Email,
    Messaging,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// A message from an external ingress, normalized across the email-like
/// and messaging-like transports.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub source: IngressSource,
    pub sender: String,
    pub subject: Option<String>,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn email(sender: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source: IngressSource::Email,
            sender: sender.into(),
            subject: Some(subject.into()),
            body: body.into(),
            attachments: Vec::new(),
            message_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn messaging(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source: IngressSource::Messaging,
            sender: sender.into(),
            subject: None,
            body: body.into(),
            attachments: Vec::new(),
            message_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// The gateway's verdict for one message: what the content is, which
/// agent should process it, and transport metadata for the artifact.
#[derive(Debug, Clone)]
pub struct Classification {
    pub content_type: ContentType,
    pub content: RawContent,
    pub metadata: HashMap<String, Value>,
    pub target_agent: String,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No processable content found in message")]
    NoContent,
    #[error("Failed to route to agent {0}")]
    AgentUnavailable(String),
    #[error(transparent)]
    Agent(#[from] AgentError),
}

fn base_metadata(message: &IncomingMessage) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert(
        "source".to_string(),
        json!(match message.source {
            IngressSource::Email => "email",
            IngressSource::Messaging => "messaging",
        }),
    );
    metadata.insert("sender".to_string(), json!(message.sender));
    if let Some(subject) = &message.subject {
        metadata.insert("subject".to_string(), json!(subject));
    }
    if let Some(message_id) = &message.message_id {
        metadata.insert("message_id".to_string(), json!(message_id));
    }
    metadata.insert("date".to_string(), json!(message.received_at.to_rfc3339()));
    metadata
}

fn is_research_request(message: &IncomingMessage) -> bool {
    let subject = message.subject.as_deref().unwrap_or("").to_lowercase();
    let body = message.body.to_lowercase();
    RESEARCH_KEYWORDS
        .iter()
        .any(|k| subject.contains(k) || body.contains(k))
        || body.starts_with("research:")
        || body.starts_with("query:")
        || body.contains('?')
}

/// Classify a message into `(content_type, content, metadata, target)`.
///
/// Rules, first match wins: PDF attachment, audio attachment, thread of
/// URLs, single URL, research request, plain text.
pub fn classify(message: &IncomingMessage) -> Result<Classification, GatewayError> {
    let mut metadata = base_metadata(message);

    if let Some(attachment) = message
        .attachments
        .iter()
        .find(|a| a.mime_type == "application/pdf")
    {
        metadata.insert("filename".to_string(), json!(attachment.filename));
        return Ok(Classification {
            content_type: ContentType::Pdf,
            content: RawContent::Bytes(attachment.content.clone()),
            metadata,
            target_agent: CONTENTMIND_AGENT_ID.to_string(),
        });
    }

    if let Some(attachment) = message
        .attachments
        .iter()
        .find(|a| a.mime_type.starts_with("audio/"))
    {
        metadata.insert("filename".to_string(), json!(attachment.filename));
        metadata.insert("mime_type".to_string(), json!(attachment.mime_type));
        return Ok(Classification {
            content_type: ContentType::Audio,
            content: RawContent::Bytes(attachment.content.clone()),
            metadata,
            target_agent: CONTENTMIND_AGENT_ID.to_string(),
        });
    }

    // Several URL lines form a thread; the downstream extractor fuses
    // the posts.
    let url_lines: Vec<&str> = message
        .body
        .lines()
        .map(str::trim)
        .filter(|line| URL_RE.is_match(line) && line.starts_with("http"))
        .collect();
    if url_lines.len() > 1 {
        metadata.insert("is_thread".to_string(), json!(true));
        return Ok(Classification {
            content_type: ContentType::Social,
            content: RawContent::Text(url_lines.join("\n")),
            metadata,
            target_agent: CONTENTMIND_AGENT_ID.to_string(),
        });
    }

    if let Some(url) = URL_RE.find(&message.body) {
        return Ok(Classification {
            content_type: ContentType::Url,
            content: RawContent::Text(url.as_str().to_string()),
            metadata,
            target_agent: CONTENTMIND_AGENT_ID.to_string(),
        });
    }

    if is_research_request(message) {
        let query = message
            .body
            .trim()
            .strip_prefix("research:")
            .or_else(|| message.body.trim().strip_prefix("query:"))
            .unwrap_or(message.body.trim())
            .trim()
            .to_string();
        if query.is_empty() {
            return Err(GatewayError::NoContent);
        }
        return Ok(Classification {
            content_type: ContentType::Query,
            content: RawContent::Text(query),
            metadata,
            target_agent: RESEARCHER_AGENT_ID.to_string(),
        });
    }

    if message.body.trim().is_empty() {
        return Err(GatewayError::NoContent);
    }

    Ok(Classification {
        content_type: ContentType::Text,
        content: RawContent::Text(message.body.clone()),
        metadata,
        target_agent: CONTENTMIND_AGENT_ID.to_string(),
    })
}

/// Ingress classifier and dispatcher: turns messages into typed agent
/// requests and invokes the target agent via the registry, lazily
/// instantiating it on first use.
pub struct Gateway {
    registry: Arc<AgentRegistry>,
    deps: AgentDeps,
}

impl Gateway {
    pub fn new(registry: Arc<AgentRegistry>, deps: AgentDeps) -> Self {
        Self { registry, deps }
    }

    pub async fn dispatch(&self, message: IncomingMessage) -> Result<AgentResponse, GatewayError> {
        let classification = classify(&message)?;
        tracing::info!(
            "Routing {} content from {} to {} agent",
            classification.content_type,
            message.sender,
            classification.target_agent
        );

        let agent = match self.registry.get(&classification.target_agent) {
            Some(agent) => agent,
            None => {
                tracing::info!(
                    "Target agent {} not instantiated, creating",
                    classification.target_agent
                );
                self.registry
                    .create(&classification.target_agent, &self.deps)
                    .map_err(|_| {
                        GatewayError::AgentUnavailable(classification.target_agent.clone())
                    })?
            }
        };

        let envelope = RequestEnvelope {
            provider_preferences: Default::default(),
            metadata: classification.metadata,
        };
        let request = match classification.content_type {
            ContentType::Query => {
                let query = classification
                    .content
                    .as_text()
                    .unwrap_or_default()
                    .to_string();
                AgentRequest::Research { query, envelope }
            }
            content_type => AgentRequest::Content {
                content_type,
                content: classification.content,
                envelope,
            },
        };

        Ok(agent.process(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{builtin_manifest, ResponseStatus};
    use crate::router::ModelRouter;
    use crate::storage::InMemoryContentStore;

    #[test]
    fn test_url_in_email_body() {
        let message = IncomingMessage::email(
            "a@example.com",
            "An interesting read",
            "See https://example.com/x for details.",
        );
        let classification = classify(&message).unwrap();
        assert_eq!(classification.content_type, ContentType::Url);
        assert_eq!(
            classification.content.as_text(),
            Some("https://example.com/x")
        );
        assert_eq!(classification.target_agent, "contentmind");
    }

    #[test]
    fn test_pdf_attachment_wins_over_body() {
        let message = IncomingMessage::email("a@example.com", "Paper", "See https://example.com")
            .with_attachment(Attachment {
                filename: "paper.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                content: vec![0x25, 0x50, 0x44, 0x46],
            });
        let classification = classify(&message).unwrap();
        assert_eq!(classification.content_type, ContentType::Pdf);
        assert_eq!(classification.target_agent, "contentmind");
        assert!(matches!(classification.content, RawContent::Bytes(_)));
    }

    #[test]
    fn test_audio_attachment() {
        let message = IncomingMessage::email("a@example.com", "Voice note", "")
            .with_attachment(Attachment {
                filename: "note.mp3".to_string(),
                mime_type: "audio/mpeg".to_string(),
                content: vec![1, 2, 3],
            });
        let classification = classify(&message).unwrap();
        assert_eq!(classification.content_type, ContentType::Audio);
    }

    #[test]
    fn test_thread_of_urls_is_social() {
        let message =
            IncomingMessage::messaging("+551199", "https://a/1\nhttps://a/2\nhttps://a/3");
        let classification = classify(&message).unwrap();
        assert_eq!(classification.content_type, ContentType::Social);
        assert_eq!(classification.metadata.get("is_thread"), Some(&json!(true)));
        assert_eq!(classification.target_agent, "contentmind");
    }

    #[test]
    fn test_research_request_goes_to_researcher() {
        let message = IncomingMessage::messaging("+551199", "research: history of the transistor");
        let classification = classify(&message).unwrap();
        assert_eq!(classification.content_type, ContentType::Query);
        assert_eq!(classification.target_agent, "researcher");
        assert_eq!(
            classification.content.as_text(),
            Some("history of the transistor")
        );
    }

    #[test]
    fn test_question_mark_is_a_query() {
        let message = IncomingMessage::messaging("+551199", "who invented the laser?");
        let classification = classify(&message).unwrap();
        assert_eq!(classification.content_type, ContentType::Query);
    }

    #[test]
    fn test_plain_text_defaults_to_contentmind() {
        let message = IncomingMessage::email(
            "a@example.com",
            "Meeting notes",
            "We discussed the roadmap and agreed on milestones.",
        );
        let classification = classify(&message).unwrap();
        assert_eq!(classification.content_type, ContentType::Text);
        assert_eq!(classification.target_agent, "contentmind");
    }

    #[test]
    fn test_empty_message_is_rejected() {
        let message = IncomingMessage::email("a@example.com", "", "   ");
        assert!(matches!(classify(&message), Err(GatewayError::NoContent)));
    }

    #[tokio::test]
    async fn test_dispatch_creates_agent_and_processes() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register_manifest(builtin_manifest());
        let deps = AgentDeps::new(
            Arc::new(ModelRouter::new()),
            Arc::new(InMemoryContentStore::new()),
        );
        let gateway = Gateway::new(registry.clone(), deps);

        let message = IncomingMessage::email(
            "a@example.com",
            "Meeting notes",
            "Roadmap review\nWe discussed milestones. Shipping is planned. Risks were noted.",
        );
        let response = gateway.dispatch(message).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Success);
        let artifact = response.output.as_ref().unwrap().artifact().unwrap();
        assert_eq!(artifact.content_type, ContentType::Text);
        assert_eq!(artifact.title, "Roadmap review");

        // The agent was lazily instantiated and cached.
        assert_eq!(registry.list_instances(), vec!["contentmind"]);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_agent_is_unavailable() {
        // Registry without any classes registered.
        let registry = Arc::new(AgentRegistry::new());
        let deps = AgentDeps::new(
            Arc::new(ModelRouter::new()),
            Arc::new(InMemoryContentStore::new()),
        );
        let gateway = Gateway::new(registry, deps);

        let message = IncomingMessage::email("a@example.com", "notes", "plain body text");
        let err = gateway.dispatch(message).await.unwrap_err();
        assert!(matches!(err, GatewayError::AgentUnavailable(_)));
    }
}
