use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{GenerateRequest, Generation, Provider, ProviderKind, TokenUsage};
use super::errors::ProviderError;
use super::openai::handle_response_openai_compat;
use crate::config::Config;
use crate::model::ModelConfig;

pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const ANTHROPIC_DEFAULT_HOST: &str = "https://api.anthropic.com";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct AnthropicProvider {
    client: Client,
    host: String,
    api_key: String,
    model: ModelConfig,
}

impl AnthropicProvider {
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
            api_key: api_key.into(),
            model,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let api_key: String = config
            .get_secret("anthropic_api_key")
            .map_err(|_| ProviderError::NotConfigured("ANTHROPIC_API_KEY".to_string()))?;
        let host: String = config
            .get_param("anthropic_host")
            .unwrap_or_else(|_| ANTHROPIC_DEFAULT_HOST.to_string());
        let model_name: String = config
            .get_param("anthropic_model")
            .unwrap_or_else(|_| ANTHROPIC_DEFAULT_MODEL.to_string());
        Self::new(host, api_key, ModelConfig::new(model_name))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn default_model(&self) -> &str {
        &self.model.model_name
    }

    fn default_timeout(&self) -> Duration {
        self.model.timeout(ANTHROPIC_DEFAULT_TIMEOUT)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.model.model_name.clone());
        let payload = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [
                {"role": "user", "content": request.prompt},
            ],
        });

        let base_url = url::Url::parse(&self.host)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid base URL: {e}")))?;
        let url = base_url.join("v1/messages").map_err(|e| {
            ProviderError::RequestFailed(format!("Failed to construct endpoint URL: {e}"))
        })?;

        tracing::debug!("Calling Anthropic API with model: {}", model);
        let response = self
            .client
            .post(url)
            .timeout(request.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&payload)
            .send()
            .await?;
        let response: Value = handle_response_openai_compat(response).await?;

        let text = response
            .pointer("/content/0/text")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ProviderError::ResponseFormat("missing content text".to_string()))?
            .to_string();

        let tokens = response.get("usage").map(|usage| {
            let input = usage
                .get("input_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            let output = usage
                .get("output_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: match (input, output) {
                    (Some(i), Some(o)) => Some(i + o),
                    _ => None,
                },
            }
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
