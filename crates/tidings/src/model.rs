use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_TOKENS: u32 = 500;
const DEFAULT_TEMPERATURE: f32 = 0.0;

/// Generation parameters for a single provider call.
///
/// Defaults favor deterministic output (temperature 0.0), which is what the
/// enrichment tasks want; interactive callers override per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The name of the model to use
    pub model_name: String,
    /// Optional temperature setting (0.0 - 1.0)
    pub temperature: Option<f32>,
    /// Optional maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Optional per-call timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl ModelConfig {
    pub fn new(model_name: String) -> Self {
        let temperature = std::env::var("TIDINGS_TEMPERATURE")
            .ok()
            .and_then(|val| val.parse::<f32>().ok());

        Self {
            model_name,
            temperature,
            max_tokens: None,
            timeout_secs: None,
        }
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temp: Option<f32>) -> Self {
        self.temperature = temp;
        self
    }

    /// Set the max tokens
    pub fn with_max_tokens(mut self, tokens: Option<u32>) -> Self {
        self.max_tokens = tokens;
        self
    }

    /// Set the per-call timeout in seconds
    pub fn with_timeout_secs(mut self, secs: Option<u64>) -> Self {
        if secs.is_some() {
            self.timeout_secs = secs;
        }
        self
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}
