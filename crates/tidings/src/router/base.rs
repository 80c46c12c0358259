use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::errors::ProviderError;

/// The providers the router can select between. `Fallback` is the
/// deterministic non-LLM degradation, never a configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    Openai,
    Anthropic,
    Fallback,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::Openai => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested execution locality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelPreference {
    Local,
    Cloud,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// A single generation request handed to a provider adapter. Adapters
/// must honor `timeout` cooperatively.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// What a provider adapter returns on success.
#[derive(Debug, Clone)]
pub struct Generation {
    pub model: String,
    pub text: String,
    pub tokens: Option<TokenUsage>,
}

/// Adapter to a model backend. Errors are logged by the router and folded
/// into the fallback chain, so implementations should return them rather
/// than degrade themselves.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn default_model(&self) -> &str;

    fn default_timeout(&self) -> Duration;

    /// Whether the backend is currently reachable. Remote-API providers
    /// are assumed available when configured; the local provider probes.
    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    Success,
    Error,
}

/// The router's output for one request. Recoverable failures surface as
/// `Success` with `provider = "fallback"` and a `fallback_reason`;
/// `Error` is reserved for unrecoverable internal failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub status: RouteStatus,
    pub provider: String,
    pub model: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub processed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProviderResult {
    pub fn success(provider: ProviderKind, generation: Generation) -> Self {
        Self {
            status: RouteStatus::Success,
            provider: provider.to_string(),
            model: generation.model,
            result: generation.text,
            tokens: generation.tokens,
            processed_at: Utc::now(),
            fallback_reason: None,
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RouteStatus::Success
    }

    /// A successful result that came from the degraded path.
    pub fn is_degraded(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Outcome of a cancellable route call. Cancellation is a distinct
/// outcome, not an error, and never carries a simplified result.
#[derive(Debug)]
pub enum RouteOutcome {
    Completed(ProviderResult),
    Cancelled,
}

impl RouteOutcome {
    pub fn into_result(self) -> Option<ProviderResult> {
        match self {
            RouteOutcome::Completed(result) => Some(result),
            RouteOutcome::Cancelled => None,
        }
    }
}

/// Content handed to `route`. `text` is the primary payload; `extra`
/// carries additional template inputs (e.g. `query`, `search_results`).
#[derive(Debug, Clone, Default)]
pub struct TaskContent {
    pub text: String,
    pub extra: HashMap<String, Value>,
}

impl TaskContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extra: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Caller requirements for a route call. Everything is optional; the
/// router fills in defaults.
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    pub provider: Option<ProviderKind>,
    pub model_preference: Option<ModelPreference>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
    pub global_timeout: Option<Duration>,
}

impl Requirements {
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }
}
