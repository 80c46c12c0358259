use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::component::ComponentError;
use super::registry::ComponentRegistry;
use super::versioning::FieldChange;
use crate::router::{
    ModelRouter, ProviderKind, Requirements, RouteStatus, TaskContent, TokenUsage,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestMetrics {
    pub render_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
}

/// One test execution of a component: the inputs, the output or error,
/// and timing.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub id: String,
    pub component_id: String,
    pub component_version: String,
    pub inputs: Value,
    pub result: Option<String>,
    pub error: Option<String>,
    pub metrics: TestMetrics,
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    fn new(component_id: &str, component_version: &str, inputs: &Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            component_id: component_id.to_string(),
            component_version: component_version.to_string(),
            inputs: inputs.clone(),
            result: None,
            error: None,
            metrics: TestMetrics::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Comparison of two retained test results.
#[derive(Debug, Clone, Serialize)]
pub struct ResultComparison {
    pub from_id: String,
    pub to_id: String,
    pub component_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_diff: Option<FieldChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_time_delta_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_diff: Option<FieldChange>,
    pub has_changes: bool,
}

/// Retains test results per component for retrieval and pairwise
/// comparison.
#[derive(Default)]
pub struct TestResultStore {
    results: DashMap<String, Vec<TestResult>>,
}

impl TestResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, result: TestResult) {
        tracing::debug!(
            "Added test result for component {}: {}",
            result.component_id,
            result.id
        );
        self.results
            .entry(result.component_id.clone())
            .or_default()
            .push(result);
    }

    pub fn results_for(&self, component_id: &str) -> Vec<TestResult> {
        self.results
            .get(component_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn get(&self, result_id: &str) -> Option<TestResult> {
        self.results
            .iter()
            .find_map(|entry| entry.iter().find(|r| r.id == result_id).cloned())
    }

    pub fn clear(&self, component_id: &str) {
        if self.results.remove(component_id).is_some() {
            tracing::info!("Cleared test results for component {}", component_id);
        }
    }

    pub fn compare(
        &self,
        from_id: &str,
        to_id: &str,
    ) -> Result<ResultComparison, ComponentError> {
        let from = self
            .get(from_id)
            .ok_or_else(|| ComponentError::NotFound(format!("test result {from_id}")))?;
        let to = self
            .get(to_id)
            .ok_or_else(|| ComponentError::NotFound(format!("test result {to_id}")))?;

        let output_diff = if from.result != to.result {
            Some(FieldChange {
                from: from.result.clone().unwrap_or_default(),
                to: to.result.clone().unwrap_or_default(),
            })
        } else {
            None
        };

        let llm_time_delta_ms = match (from.metrics.llm_time_ms, to.metrics.llm_time_ms) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };

        let provider_diff = if from.metrics.provider != to.metrics.provider {
            Some(FieldChange {
                from: from.metrics.provider.clone().unwrap_or_default(),
                to: to.metrics.provider.clone().unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(ResultComparison {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            component_id: from.component_id,
            has_changes: output_diff.is_some() || provider_diff.is_some(),
            output_diff,
            llm_time_delta_ms,
            provider_diff,
        })
    }
}

/// Test harness for components: pure renders and end-to-end runs through
/// the model router. Without a router only rendering is supported.
pub struct ComponentTester {
    registry: Arc<ComponentRegistry>,
    router: Option<Arc<ModelRouter>>,
    store: TestResultStore,
}

impl ComponentTester {
    pub fn new(registry: Arc<ComponentRegistry>, router: Option<Arc<ModelRouter>>) -> Self {
        Self {
            registry,
            router,
            store: TestResultStore::new(),
        }
    }

    /// Render a component and time it. Failures land in
    /// `TestResult.error`, never as an `Err`.
    pub fn test_render(&self, component_id: &str, inputs: &Value) -> TestResult {
        let Some(component) = self.registry.get(component_id) else {
            let mut result = TestResult::new(component_id, "unknown", inputs);
            result.error = Some(format!("Component not found: {component_id}"));
            self.store.add(result.clone());
            return result;
        };

        let mut result = TestResult::new(component_id, &component.version, inputs);
        let started = Instant::now();
        match component.render_value(inputs) {
            Ok(rendered) => result.result = Some(rendered),
            Err(e) => result.error = Some(e.to_string()),
        }
        result.metrics.render_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.store.add(result.clone());
        result
    }

    /// Render a component and send the output through the model router,
    /// recording provider, model, token counts, and latency.
    pub async fn test_with_llm(
        &self,
        component_id: &str,
        inputs: &Value,
        task_type: &str,
        provider: Option<ProviderKind>,
        model: Option<String>,
    ) -> Result<TestResult, ComponentError> {
        let Some(router) = self.router.clone() else {
            return Err(ComponentError::RouterUnavailable);
        };

        let Some(component) = self.registry.get(component_id) else {
            let mut result = TestResult::new(component_id, "unknown", inputs);
            result.error = Some(format!("Component not found: {component_id}"));
            self.store.add(result.clone());
            return Ok(result);
        };

        let mut result = TestResult::new(component_id, &component.version, inputs);

        let render_started = Instant::now();
        let rendered = match component.render_value(inputs) {
            Ok(rendered) => rendered,
            Err(e) => {
                result.error = Some(format!("Error rendering template: {e}"));
                result.metrics.render_time_ms =
                    render_started.elapsed().as_secs_f64() * 1000.0;
                self.store.add(result.clone());
                return Ok(result);
            }
        };
        result.metrics.render_time_ms = render_started.elapsed().as_secs_f64() * 1000.0;

        let requirements = Requirements {
            provider,
            model,
            ..Default::default()
        };

        let llm_started = Instant::now();
        let response = router
            .route(task_type, &TaskContent::text(rendered), &requirements)
            .await;
        result.metrics.llm_time_ms = Some(llm_started.elapsed().as_secs_f64() * 1000.0);
        result.metrics.provider = Some(response.provider.clone());
        result.metrics.model = Some(response.model.clone());
        result.metrics.tokens = response.tokens.clone();

        match response.status {
            RouteStatus::Success => result.result = Some(response.result),
            RouteStatus::Error => {
                result.error = Some(format!(
                    "LLM error: {}",
                    response.message.unwrap_or_else(|| "Unknown error".to_string())
                ));
            }
        }

        self.store.add(result.clone());
        Ok(result)
    }

    pub fn results_for(&self, component_id: &str) -> Vec<TestResult> {
        self.store.results_for(component_id)
    }

    pub fn get_result(&self, result_id: &str) -> Option<TestResult> {
        self.store.get(result_id)
    }

    pub fn compare_results(
        &self,
        from_id: &str,
        to_id: &str,
    ) -> Result<ResultComparison, ComponentError> {
        self.store.compare(from_id, to_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::tempdir;

    use super::super::component::PromptComponent;

    fn harness() -> (tempfile::TempDir, ComponentTester, String) {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ComponentRegistry::new(dir.path()).unwrap());
        let component = PromptComponent::new(
            "greet",
            "greeting",
            "Hello {name}, you are {role:optional}.",
            vec![],
            HashMap::new(),
        );
        let id = component.id.clone();
        registry.register(component).unwrap();
        // Router with no providers: every call degrades deterministically.
        let router = Arc::new(ModelRouter::new());
        let tester = ComponentTester::new(registry, Some(router));
        (dir, tester, id)
    }

    #[test]
    fn test_render_success_records_timing() {
        let (_dir, tester, id) = harness();
        let result = tester.test_render(&id, &json!({"name": "Ada"}));
        assert!(result.is_success());
        assert_eq!(result.result.as_deref(), Some("Hello Ada, you are ."));
        assert!(result.metrics.render_time_ms >= 0.0);
        assert_eq!(tester.results_for(&id).len(), 1);
    }

    #[test]
    fn test_render_failure_is_captured_not_raised() {
        let (_dir, tester, id) = harness();
        let result = tester.test_render(&id, &json!({}));
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("Missing required input"));
    }

    #[test]
    fn test_render_unknown_component() {
        let (_dir, tester, _) = harness();
        let result = tester.test_render("missing", &json!({"name": "Ada"}));
        assert!(!result.is_success());
        assert_eq!(result.component_version, "unknown");
    }

    #[tokio::test]
    async fn test_with_llm_records_provider_and_latency() {
        let (_dir, tester, id) = harness();
        let result = tester
            .test_with_llm(&id, &json!({"name": "Ada"}), "summarize", None, None)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.metrics.provider.as_deref(), Some("fallback"));
        assert_eq!(result.metrics.model.as_deref(), Some("none"));
        assert!(result.metrics.llm_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_with_llm_requires_router() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ComponentRegistry::new(dir.path()).unwrap());
        let tester = ComponentTester::new(registry, None);
        let err = tester
            .test_with_llm("any", &json!({}), "summarize", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::RouterUnavailable));
    }

    #[tokio::test]
    async fn test_result_comparison() {
        let (_dir, tester, id) = harness();
        let a = tester.test_render(&id, &json!({"name": "Ada"}));
        let b = tester.test_render(&id, &json!({"name": "Grace"}));

        let comparison = tester.compare_results(&a.id, &b.id).unwrap();
        assert!(comparison.has_changes);
        let diff = comparison.output_diff.unwrap();
        assert!(diff.from.contains("Ada"));
        assert!(diff.to.contains("Grace"));

        let same = tester.compare_results(&a.id, &a.id).unwrap();
        assert!(!same.has_changes);
    }
}
