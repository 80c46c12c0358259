use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

static EXCESS_NEWLINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static EXCESS_SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

const MAX_TITLE_LEN: usize = 100;
const PREVIEW_LEN: usize = 500;

/// Raw content handed to an extractor: a string for text-like inputs, or
/// bytes for binary formats (PDF, audio).
#[derive(Debug, Clone)]
pub enum RawContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl RawContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawContent::Text(text) => Some(text),
            RawContent::Bytes(_) => None,
        }
    }
}

/// What an extractor produces from raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedContent {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            summary: None,
            author: None,
            published_date: None,
            page_count: None,
            duration_secs: None,
            platform: None,
            extracted_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("Empty content provided")]
    Empty,
    #[error("Unsupported input shape: {0}")]
    UnsupportedInput(String),
    #[error("Extraction failed: {0}")]
    Failed(String),
}

/// Content extractor contract. Format-specific extractors (PDF, audio,
/// HTML, social scrapers) are external collaborators implementing this
/// trait.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        content: &RawContent,
        metadata: Option<&HashMap<String, Value>>,
    ) -> Result<ExtractedContent, ExtractorError>;
}

/// Extractor for plain text: normalizes whitespace, picks a title, and
/// builds a preview summary.
#[derive(Debug, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn clean_text(text: &str) -> String {
        let cleaned = EXCESS_NEWLINES_RE.replace_all(text, "\n\n");
        let cleaned = cleaned.replace('\t', "    ");
        let cleaned = EXCESS_SPACES_RE.replace_all(&cleaned, " ");
        cleaned.trim().to_string()
    }

    fn extract_title(text: &str, metadata: Option<&HashMap<String, Value>>) -> String {
        if let Some(title) = metadata
            .and_then(|m| m.get("title"))
            .and_then(|t| t.as_str())
        {
            if !title.is_empty() {
                return title.to_string();
            }
        }

        let Some(first_line) = text.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return "Text Note".to_string();
        };
        if first_line.chars().count() <= MAX_TITLE_LEN {
            return first_line.to_string();
        }
        if let Some(first_sentence) = first_line.split('.').next() {
            if first_sentence.chars().count() <= MAX_TITLE_LEN {
                return first_sentence.to_string();
            }
        }
        let truncated: String = first_line.chars().take(MAX_TITLE_LEN - 3).collect();
        format!("{truncated}...")
    }

    fn preview(text: &str) -> String {
        if text.chars().count() <= PREVIEW_LEN {
            return text.to_string();
        }
        let truncated: String = text.chars().take(PREVIEW_LEN).collect();
        match truncated.rfind('.') {
            Some(last_period) if last_period > 0 => {
                format!("{}...", &truncated[..=last_period])
            }
            _ => format!("{truncated}..."),
        }
    }
}

#[async_trait]
impl Extractor for TextExtractor {
    fn name(&self) -> &str {
        "text_extractor"
    }

    async fn extract(
        &self,
        content: &RawContent,
        metadata: Option<&HashMap<String, Value>>,
    ) -> Result<ExtractedContent, ExtractorError> {
        let text = match content {
            RawContent::Text(text) => text.clone(),
            RawContent::Bytes(bytes) => String::from_utf8(bytes.clone())
                .map_err(|_| ExtractorError::UnsupportedInput("non-UTF-8 bytes".to_string()))?,
        };
        if text.trim().is_empty() {
            return Err(ExtractorError::Empty);
        }

        let cleaned = Self::clean_text(&text);
        let mut extracted =
            ExtractedContent::new(Self::extract_title(&cleaned, metadata), cleaned.clone());
        extracted.summary = Some(Self::preview(&cleaned));
        extracted.author = metadata
            .and_then(|m| m.get("author"))
            .and_then(|a| a.as_str())
            .map(str::to_string);
        Ok(extracted)
    }
}
