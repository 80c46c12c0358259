use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{GenerateRequest, Generation, Provider, ProviderKind, TokenUsage};
use super::errors::ProviderError;
use crate::config::Config;
use crate::model::ModelConfig;

pub const OPEN_AI_DEFAULT_MODEL: &str = "gpt-4o-mini";
const OPEN_AI_DEFAULT_HOST: &str = "https://api.openai.com";
const OPEN_AI_DEFAULT_BASE_PATH: &str = "v1/chat/completions";
const OPEN_AI_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct OpenAiProvider {
    client: Client,
    host: String,
    base_path: String,
    api_key: String,
    model: ModelConfig,
}

impl OpenAiProvider {
    pub fn new(
        host: impl Into<String>,
        api_key: impl Into<String>,
        model: ModelConfig,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::ExecutionError(e.to_string()))?;
        Ok(Self {
            client,
            host: host.into(),
            base_path: OPEN_AI_DEFAULT_BASE_PATH.to_string(),
            api_key: api_key.into(),
            model,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let api_key: String = config
            .get_secret("openai_api_key")
            .map_err(|_| ProviderError::NotConfigured("OPENAI_API_KEY".to_string()))?;
        let host: String = config
            .get_param("openai_host")
            .unwrap_or_else(|_| OPEN_AI_DEFAULT_HOST.to_string());
        let model_name: String = config
            .get_param("openai_model")
            .unwrap_or_else(|_| OPEN_AI_DEFAULT_MODEL.to_string());
        Self::new(host, api_key, ModelConfig::new(model_name))
    }

    async fn post(
        &self,
        payload: Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProviderError> {
        let base_url = url::Url::parse(&self.host)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid base URL: {e}")))?;
        let url = base_url.join(&self.base_path).map_err(|e| {
            ProviderError::RequestFailed(format!("Failed to construct endpoint URL: {e}"))
        })?;

        Ok(self
            .client
            .post(url)
            .timeout(timeout)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn default_model(&self) -> &str {
        &self.model.model_name
    }

    fn default_timeout(&self) -> Duration {
        self.model.timeout(OPEN_AI_DEFAULT_TIMEOUT)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.model.model_name.clone());
        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.prompt},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        tracing::debug!("Calling OpenAI API with model: {}", model);
        let response = self.post(payload, request.timeout).await?;
        let response = handle_response_openai_compat(response).await?;

        let text = response
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                ProviderError::ResponseFormat("missing message content".to_string())
            })?
            .trim()
            .to_string();

        let tokens = response.get("usage").map(|usage| TokenUsage {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            output_tokens: usage
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            total_tokens: usage
                .get("total_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
        });

        let model = response
            .get("model")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or(model);

        Ok(Generation {
            model,
            text,
            tokens,
        })
    }
}

/// Map an OpenAI-compatible HTTP response to a JSON body or a typed error.
pub(crate) async fn handle_response_openai_compat(
    response: reqwest::Response,
) -> Result<Value, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(ProviderError::Authentication(body)),
        429 => Err(ProviderError::RateLimited(body)),
        500..=599 => Err(ProviderError::ServerError(body)),
        _ => Err(ProviderError::RequestFailed(format!("{status}: {body}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini-2024",
                "choices": [{"message": {"role": "assistant", "content": " tagged, output "}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(server.uri(), "test-key", ModelConfig::new("gpt-4o-mini".to_string())).unwrap();
        let request = GenerateRequest {
            prompt: "Tag this.".to_string(),
            system_prompt: "You tag.".to_string(),
            model: None,
            temperature: 0.0,
            max_tokens: 100,
            timeout: Duration::from_secs(5),
        };

        let generation = provider.generate(&request).await.unwrap();
        assert_eq!(generation.text, "tagged, output");
        assert_eq!(generation.model, "gpt-4o-mini-2024");
        assert_eq!(generation.tokens.unwrap().total_tokens, Some(15));
    }

    #[tokio::test]
    async fn test_auth_errors_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(server.uri(), "bad-key", ModelConfig::new("gpt-4o-mini".to_string())).unwrap();
        let request = GenerateRequest {
            prompt: "x".to_string(),
            system_prompt: String::new(),
            model: None,
            temperature: 0.0,
            max_tokens: 10,
            timeout: Duration::from_secs(5),
        };

        let err = provider.generate(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(server.uri(), "key", ModelConfig::new("gpt-4o-mini".to_string())).unwrap();
        let request = GenerateRequest {
            prompt: "x".to_string(),
            system_prompt: String::new(),
            model: None,
            temperature: 0.0,
            max_tokens: 10,
            timeout: Duration::from_secs(5),
        };

        let err = provider.generate(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }
}
