use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{GenerateRequest, Generation, Provider, ProviderKind, TokenUsage};
use super::errors::ProviderError;
use crate::config::Config;
use crate::model::ModelConfig;

pub const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "llama3";
const OLLAMA_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const AVAILABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Adapter for a local Ollama server. Unlike the cloud adapters this one
/// carries a real availability probe: server reachable, models listed,
/// configured model present.
#[derive(Debug)]
pub struct OllamaProvider {
    client: Client,
    host: String,
    model: ModelConfig,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>, model: ModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::ExecutionError(e.to_string()))?;
        Ok(Self {
            client,
            host: host.into(),
            model,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let host: String = config
            .get_param("local_llm_host")
            .unwrap_or_else(|_| OLLAMA_DEFAULT_HOST.to_string());
        let model_name: String = config
            .get_param("local_llm_model")
            .unwrap_or_else(|_| OLLAMA_DEFAULT_MODEL.to_string());
        Self::new(host, ModelConfig::new(model_name))
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, ProviderError> {
        let base = url::Url::parse(&self.host)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid base URL: {e}")))?;
        base.join(path)
            .map_err(|e| ProviderError::RequestFailed(format!("Failed to construct URL: {e}")))
    }

    /// Whether the Ollama server answers at all.
    pub async fn server_reachable(&self, timeout: Duration) -> bool {
        let Ok(url) = self.endpoint("/") else {
            return false;
        };
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!("Ollama service check failed: {}", e);
                false
            }
        }
    }

    /// List model names known to the server.
    pub async fn list_models(&self, timeout: Duration) -> Vec<String> {
        let Ok(url) = self.endpoint("api/tags") else {
            return Vec::new();
        };
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!("Failed to list models: {}", response.status());
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!("Listing models failed: {}", e);
                return Vec::new();
            }
        };
        let json: Value = match response.json().await {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Error parsing model list: {}", e);
                return Vec::new();
            }
        };
        json.get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn default_model(&self) -> &str {
        &self.model.model_name
    }

    fn default_timeout(&self) -> Duration {
        self.model.timeout(OLLAMA_DEFAULT_TIMEOUT)
    }

    async fn is_available(&self) -> bool {
        if !self.server_reachable(AVAILABILITY_PROBE_TIMEOUT).await {
            tracing::warn!("Ollama server is not available");
            return false;
        }
        let models = self.list_models(AVAILABILITY_PROBE_TIMEOUT).await;
        if models.is_empty() {
            tracing::warn!("No models available in Ollama");
            return false;
        }
        if !models.iter().any(|m| m == &self.model.model_name) {
            tracing::warn!(
                "Local model {} not found in available models {:?}",
                self.model.model_name,
                models
            );
            return false;
        }
        true
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.model.model_name.clone());
        let payload = json!({
            "model": model,
            "prompt": request.prompt,
            "system": request.system_prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        let url = self.endpoint("api/generate")?;
        tracing::debug!("Generating with local model: {}", model);
        let response = self
            .client
            .post(url)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let json: Value = response.json().await?;
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| {
                ProviderError::ResponseFormat("missing 'response' field".to_string())
            })?
            .to_string();

        let tokens = match (
            json.get("prompt_eval_count").and_then(|v| v.as_u64()),
            json.get("eval_count").and_then(|v| v.as_u64()),
        ) {
            (None, None) => None,
            (input, output) => Some(TokenUsage {
                input_tokens: input.map(|v| v as u32),
                output_tokens: output.map(|v| v as u32),
                total_tokens: match (input, output) {
                    (Some(i), Some(o)) => Some((i + o) as u32),
                    _ => None,
                },
            }),
        };

        Ok(Generation {
            model,
            text,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "response": "A concise summary.",
                "prompt_eval_count": 42,
                "eval_count": 7,
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), ModelConfig::new("llama3".to_string())).unwrap();
        let request = GenerateRequest {
            prompt: "Summarize this.".to_string(),
            system_prompt: "You summarize.".to_string(),
            model: None,
            temperature: 0.0,
            max_tokens: 100,
            timeout: Duration::from_secs(5),
        };

        let generation = provider.generate(&request).await.unwrap();
        assert_eq!(generation.text, "A concise summary.");
        assert_eq!(generation.model, "llama3");
        let tokens = generation.tokens.unwrap();
        assert_eq!(tokens.input_tokens, Some(42));
        assert_eq!(tokens.output_tokens, Some(7));
        assert_eq!(tokens.total_tokens, Some(49));
    }

    #[tokio::test]
    async fn test_availability_requires_configured_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "mistral"}],
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), ModelConfig::new("llama3".to_string())).unwrap();
        assert!(!provider.is_available().await);

        let provider = OllamaProvider::new(server.uri(), ModelConfig::new("mistral".to_string())).unwrap();
        assert!(provider.is_available().await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", ModelConfig::new("llama3".to_string())).unwrap();
        assert!(!provider.server_reachable(Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn test_generate_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), ModelConfig::new("llama3".to_string())).unwrap();
        let request = GenerateRequest {
            prompt: "x".to_string(),
            system_prompt: String::new(),
            model: None,
            temperature: 0.0,
            max_tokens: 10,
            timeout: Duration::from_secs(5),
        };

        let err = provider.generate(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed(_)));
    }
}
