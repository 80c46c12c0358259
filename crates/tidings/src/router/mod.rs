mod anthropic;
mod base;
mod errors;
mod fallback;
mod ollama;
mod openai;
mod prompts;

pub use anthropic::{AnthropicProvider, ANTHROPIC_DEFAULT_MODEL};
pub use base::{
    GenerateRequest, Generation, ModelPreference, Provider, ProviderKind, ProviderResult,
    Requirements, RouteOutcome, RouteStatus, TaskContent, TokenUsage,
};
pub use errors::ProviderError;
pub use fallback::generate_simplified;
pub use ollama::{OllamaProvider, OLLAMA_DEFAULT_HOST, OLLAMA_DEFAULT_MODEL};
pub use openai::{OpenAiProvider, OPEN_AI_DEFAULT_MODEL};
pub use prompts::{builtin_system_prompt, builtin_task_prompt};

use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::components::ComponentRegistry;
use crate::config::Config;

const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(60);
const COMPLEXITY_TIMEOUT: Duration = Duration::from_secs(2);
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_TOKENS: u32 = 500;

/// Above this complexity the more capable cloud provider is preferred.
const CAPABLE_PROVIDER_THRESHOLD: f32 = 0.6;

static TASK_COMPLEXITY: Lazy<HashMap<&'static str, f32>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert("summarize", 0.3);
    map.insert("extract_entities", 0.4);
    map.insert("tag_content", 0.5);
    map.insert("generate_insights", 0.7);
    map
});

enum CallOutcome {
    Success(Generation),
    Failure(String),
    Timeout,
}

/// Routes `(task, content, requirements)` to a provider and returns a
/// `ProviderResult`. Recoverable failures (timeouts, adapter errors,
/// nothing configured) degrade to deterministic simplified results, so
/// callers always see `status: success` with a `fallback_reason` instead
/// of an error.
pub struct ModelRouter {
    local: Option<Arc<dyn Provider>>,
    openai: Option<Arc<dyn Provider>>,
    anthropic: Option<Arc<dyn Provider>>,
    components: Option<Arc<ComponentRegistry>>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            local: None,
            openai: None,
            anthropic: None,
            components: None,
        }
    }

    /// Build a router from configuration, wiring in every provider that
    /// is configured. Missing providers are skipped, not errors.
    pub fn from_config(config: &Config, components: Option<Arc<ComponentRegistry>>) -> Self {
        let mut router = Self::new();
        router.components = components;

        let local_enabled: bool = config.get_param("local_llm_enabled").unwrap_or(false);
        if local_enabled {
            match OllamaProvider::from_config(config) {
                Ok(provider) => router.local = Some(Arc::new(provider)),
                Err(e) => tracing::warn!("Local provider unavailable: {}", e),
            }
        }
        match OpenAiProvider::from_config(config) {
            Ok(provider) => router.openai = Some(Arc::new(provider)),
            Err(e) => tracing::debug!("OpenAI provider not configured: {}", e),
        }
        match AnthropicProvider::from_config(config) {
            Ok(provider) => router.anthropic = Some(Arc::new(provider)),
            Err(e) => tracing::debug!("Anthropic provider not configured: {}", e),
        }

        tracing::info!(
            "Model router initialized. Local: {}, OpenAI: {}, Anthropic: {}",
            router.local.is_some(),
            router.openai.is_some(),
            router.anthropic.is_some()
        );
        router
    }

    pub fn with_local(mut self, provider: Arc<dyn Provider>) -> Self {
        self.local = Some(provider);
        self
    }

    pub fn with_openai(mut self, provider: Arc<dyn Provider>) -> Self {
        self.openai = Some(provider);
        self
    }

    pub fn with_anthropic(mut self, provider: Arc<dyn Provider>) -> Self {
        self.anthropic = Some(provider);
        self
    }

    pub fn with_components(mut self, components: Arc<ComponentRegistry>) -> Self {
        self.components = Some(components);
        self
    }

    /// Route a request. Bounded by `requirements.global_timeout`
    /// (default 60 s); when the bound fires the in-flight work is
    /// dropped and a `GLOBAL_TIMEOUT` simplified result is returned.
    pub async fn route(
        &self,
        task: &str,
        content: &TaskContent,
        requirements: &Requirements,
    ) -> ProviderResult {
        tracing::info!("Beginning LLM routing for task: '{}'", task);
        let started = std::time::Instant::now();
        let global_timeout = requirements.global_timeout.unwrap_or(DEFAULT_GLOBAL_TIMEOUT);

        match tokio::time::timeout(
            global_timeout,
            self.pick_and_call(task, content, requirements),
        )
        .await
        {
            Ok(result) => {
                tracing::info!(
                    "LLM routing for task '{}' completed in {:.2}s",
                    task,
                    started.elapsed().as_secs_f64()
                );
                result
            }
            Err(_) => {
                tracing::error!(
                    "Global timeout ({:?}) exceeded for task '{}'",
                    global_timeout,
                    task
                );
                generate_simplified(task, content, "GLOBAL_TIMEOUT")
            }
        }
    }

    /// Route with caller-driven cancellation. Cancelling drops the
    /// in-flight provider call and its timers; no simplified result is
    /// produced for a cancelled call.
    pub async fn route_with_cancellation(
        &self,
        task: &str,
        content: &TaskContent,
        requirements: &Requirements,
        cancel: &CancellationToken,
    ) -> RouteOutcome {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!("LLM routing for task '{}' was cancelled by caller", task);
                RouteOutcome::Cancelled
            }
            result = self.route(task, content, requirements) => RouteOutcome::Completed(result),
        }
    }

    /// The routing policy, evaluated in order; first matching rule wins.
    async fn pick_and_call(
        &self,
        task: &str,
        content: &TaskContent,
        requirements: &Requirements,
    ) -> ProviderResult {
        // 1. Explicit provider, when configured.
        if let Some(kind) = requirements.provider {
            match kind {
                ProviderKind::Ollama => {
                    return self.process_with_local(task, content, requirements).await
                }
                ProviderKind::Fallback => {
                    return generate_simplified(task, content, "FALLBACK_REQUESTED")
                }
                ProviderKind::Openai | ProviderKind::Anthropic => {
                    if let Some(provider) = self.cloud(kind) {
                        return self
                            .call_provider(provider.as_ref(), task, content, requirements)
                            .await;
                    }
                    tracing::warn!(
                        "Requested provider '{}' is not configured; continuing with policy",
                        kind
                    );
                }
            }
        }

        // 2. Explicit locality preference.
        match requirements.model_preference {
            Some(ModelPreference::Local) => {
                return self.process_with_local(task, content, requirements).await
            }
            Some(ModelPreference::Cloud) => {
                if let Some(provider) = self.openai.clone() {
                    return self
                        .call_provider(provider.as_ref(), task, content, requirements)
                        .await;
                }
                if let Some(provider) = self.anthropic.clone() {
                    return self
                        .call_provider(provider.as_ref(), task, content, requirements)
                        .await;
                }
                return generate_simplified(task, content, "NO_CLOUD_PROVIDERS");
            }
            None => {}
        }

        let complexity = match tokio::time::timeout(
            COMPLEXITY_TIMEOUT,
            self.assess_complexity(task, content),
        )
        .await
        {
            Ok(complexity) => complexity,
            Err(_) => {
                tracing::warn!("Complexity assessment timed out; using default");
                0.5
            }
        };

        let local_available =
            match tokio::time::timeout(AVAILABILITY_TIMEOUT, self.local_available()).await {
                Ok(available) => available,
                Err(_) => {
                    tracing::warn!("Local availability check timed out");
                    false
                }
            };

        // 3. Task-specific override: structured extraction goes to the
        // provider known best for it when available.
        if task == "extract_entities" {
            if let Some(provider) = self.anthropic.clone() {
                return self
                    .call_provider(provider.as_ref(), task, content, requirements)
                    .await;
            }
        }

        // 4. Local first when it is up.
        if local_available {
            tracing::info!("Attempting task '{}' with local LLM first", task);
            return self.process_with_local(task, content, requirements).await;
        }

        tracing::info!(
            "Local LLM not available, routing task '{}' to cloud or fallback",
            task
        );

        // 5. Cloud by capability and task complexity.
        if let Some(provider) = self.anthropic.clone() {
            if complexity >= CAPABLE_PROVIDER_THRESHOLD
                || matches!(task, "extract_entities" | "tag_content")
            {
                return self
                    .call_provider(provider.as_ref(), task, content, requirements)
                    .await;
            }
        }
        if let Some(provider) = self.openai.clone() {
            return self
                .call_provider(provider.as_ref(), task, content, requirements)
                .await;
        }
        if let Some(provider) = self.anthropic.clone() {
            return self
                .call_provider(provider.as_ref(), task, content, requirements)
                .await;
        }

        // 6. Nothing configured at all.
        generate_simplified(task, content, "NO_PROVIDERS_AVAILABLE")
    }

    fn cloud(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        match kind {
            ProviderKind::Openai => self.openai.clone(),
            ProviderKind::Anthropic => self.anthropic.clone(),
            _ => None,
        }
    }

    /// Task complexity in [0, 1]; a lookup today, bounded by a timeout so
    /// a model-backed assessment can slot in without changing `route`.
    async fn assess_complexity(&self, task: &str, _content: &TaskContent) -> f32 {
        TASK_COMPLEXITY.get(task).copied().unwrap_or(0.5)
    }

    async fn local_available(&self) -> bool {
        match &self.local {
            Some(provider) => provider.is_available().await,
            None => false,
        }
    }

    async fn process_with_local(
        &self,
        task: &str,
        content: &TaskContent,
        requirements: &Requirements,
    ) -> ProviderResult {
        let Some(local) = self.local.clone() else {
            tracing::warn!("Local LLM processing requested but no local provider configured");
            return generate_simplified(task, content, "LOCAL_LLM_NOT_INITIALIZED");
        };

        let available = tokio::time::timeout(AVAILABILITY_TIMEOUT, local.is_available())
            .await
            .unwrap_or(false);
        if !available {
            tracing::warn!("Local LLM not available, using fallback");
            return generate_simplified(task, content, "LOCAL_LLM_UNAVAILABLE");
        }

        self.call_provider(local.as_ref(), task, content, requirements)
            .await
    }

    async fn call_provider(
        &self,
        provider: &dyn Provider,
        task: &str,
        content: &TaskContent,
        requirements: &Requirements,
    ) -> ProviderResult {
        let request = self.build_request(provider, task, content, requirements);

        let outcome =
            match tokio::time::timeout(request.timeout, provider.generate(&request)).await {
                Ok(Ok(generation)) => CallOutcome::Success(generation),
                Ok(Err(e)) => CallOutcome::Failure(e.to_string()),
                Err(_) => CallOutcome::Timeout,
            };

        match outcome {
            CallOutcome::Success(generation) => {
                ProviderResult::success(provider.kind(), generation)
            }
            CallOutcome::Failure(message) => {
                tracing::error!(
                    "Error processing with {}: {}. Using fallback.",
                    provider.kind(),
                    message
                );
                let reason = if provider.kind() == ProviderKind::Ollama {
                    format!("LOCAL_PROCESSING_FAILED: {message}")
                } else {
                    format!("ERROR: {message}")
                };
                generate_simplified(task, content, &reason)
            }
            CallOutcome::Timeout => {
                tracing::warn!(
                    "{} processing timed out after {:?}. Using fallback.",
                    provider.kind(),
                    request.timeout
                );
                generate_simplified(task, content, "TIMEOUT")
            }
        }
    }

    fn build_request(
        &self,
        provider: &dyn Provider,
        task: &str,
        content: &TaskContent,
        requirements: &Requirements,
    ) -> GenerateRequest {
        GenerateRequest {
            prompt: self.task_prompt(task, content),
            system_prompt: self.system_prompt(task),
            model: requirements.model.clone(),
            temperature: requirements.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: requirements.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout: requirements
                .timeout
                .unwrap_or_else(|| provider.default_timeout()),
        }
    }

    /// System prompt resolution: a `system_prompt_<task>` component if
    /// one is registered, else the built-in.
    fn system_prompt(&self, task: &str) -> String {
        if let Some(components) = &self.components {
            let component_id = format!("system_prompt_{task}");
            if let Some(component) = components.get(&component_id) {
                match component.render(&Map::new()) {
                    Ok(rendered) => return rendered,
                    Err(e) => tracing::warn!(
                        "Error rendering system prompt component {}: {}",
                        component_id,
                        e
                    ),
                }
            }
        }
        builtin_system_prompt(task)
    }

    /// Task prompt resolution: a `task_<task>` component rendered with
    /// `{text: content.text, ...extra}`, else the built-in.
    fn task_prompt(&self, task: &str, content: &TaskContent) -> String {
        if let Some(components) = &self.components {
            let component_id = format!("task_{task}");
            if let Some(component) = components.get(&component_id) {
                let mut inputs = Map::new();
                inputs.insert("text".to_string(), Value::String(content.text.clone()));
                for (key, value) in &content.extra {
                    if key != "text" {
                        inputs.insert(key.clone(), value.clone());
                    }
                }
                match component.render(&inputs) {
                    Ok(rendered) => return rendered,
                    Err(e) => {
                        tracing::warn!("Error rendering task component {}: {}", component_id, e)
                    }
                }
            }
        }
        builtin_task_prompt(task, content)
    }
}
