use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Placeholder grammar: `{name}` (required) or `{name:optional}`.
/// Names match `[A-Za-z0-9_]+`; anything else inside braces is invalid.
pub static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)(?::([A-Za-z0-9_]+))?\}").unwrap());

static OPTIONAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+):optional\}").unwrap());

#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("Component not found: {0}")]
    NotFound(String),
    #[error("Component with ID {0} already exists")]
    AlreadyExists(String),
    #[error("Missing required input: {0}")]
    MissingInput(String),
    #[error("Required input '{0}' has an empty value")]
    EmptyInput(String),
    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),
    #[error("Invalid version string: {0}")]
    InvalidVersion(String),
    #[error("Version {version} of component {id} not found")]
    VersionNotFound { id: String, version: String },
    #[error("Model router not available for LLM testing")]
    RouterUnavailable,
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parse a `major.minor.patch` version string.
pub(crate) fn parse_version(version: &str) -> Result<(u64, u64, u64), ComponentError> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 {
        return Err(ComponentError::InvalidVersion(version.to_string()));
    }
    let nums: Result<Vec<u64>, _> = parts.iter().map(|p| p.parse::<u64>()).collect();
    match nums {
        Ok(nums) => Ok((nums[0], nums[1], nums[2])),
        Err(_) => Err(ComponentError::InvalidVersion(version.to_string())),
    }
}

/// A reusable prompt template with metadata, input validation, and
/// rendering. Prior versions are immutable snapshots kept by the
/// version store; the live record always carries the current version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptComponent {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub template: String,
    pub required_inputs: Vec<String>,
    pub optional_inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromptComponent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        template: impl Into<String>,
        tags: Vec<String>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        let mut component = Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            template: template.into(),
            required_inputs: Vec::new(),
            optional_inputs: Vec::new(),
            outputs: Vec::new(),
            tags,
            metadata,
            created_at: now,
            updated_at: now,
        };
        component.extract_placeholders();
        component
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Reconcile `required_inputs`/`optional_inputs` with the placeholders
    /// actually present in the template. `{name:optional}` wins over a
    /// declared required input of the same name; undeclared template
    /// variables become required.
    pub fn extract_placeholders(&mut self) {
        let mut template_vars: Vec<String> = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(&self.template) {
            let var_name = caps[1].to_string();
            if !template_vars.contains(&var_name) {
                template_vars.push(var_name.clone());
            }
            if caps.get(2).map(|m| m.as_str()) == Some("optional") {
                self.required_inputs.retain(|r| r != &var_name);
                if !self.optional_inputs.contains(&var_name) {
                    self.optional_inputs.push(var_name);
                }
            }
        }

        for req in &self.required_inputs {
            if !template_vars.contains(req) {
                tracing::warn!("Required input '{}' not found in template", req);
            }
        }
        for opt in &self.optional_inputs {
            if !template_vars.contains(opt) {
                tracing::warn!("Optional input '{}' not found in template", opt);
            }
        }

        for var in template_vars {
            if !self.required_inputs.contains(&var) && !self.optional_inputs.contains(&var) {
                self.required_inputs.push(var);
            }
        }
    }

    fn stringify(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Render with a JSON value at the boundary; `null` and non-object
    /// inputs are rejected.
    pub fn render_value(&self, inputs: &Value) -> Result<String, ComponentError> {
        match inputs {
            Value::Null => Err(ComponentError::InvalidInputs(
                "inputs cannot be null".to_string(),
            )),
            Value::Object(map) => self.render(map),
            _ => Err(ComponentError::InvalidInputs(
                "inputs must be an object".to_string(),
            )),
        }
    }

    /// Render the template with the provided inputs.
    ///
    /// Required inputs must be present and non-empty after trimming.
    /// Optional placeholders resolve to the empty string when absent or
    /// null. Any required placeholder left unreplaced is logged as a
    /// warning but rendering still succeeds.
    pub fn render(&self, inputs: &Map<String, Value>) -> Result<String, ComponentError> {
        let missing: Vec<&String> = self
            .required_inputs
            .iter()
            .filter(|req| !inputs.contains_key(*req))
            .collect();
        if !missing.is_empty() {
            let joined = missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ComponentError::MissingInput(joined));
        }

        for req in &self.required_inputs {
            match inputs.get(req) {
                Some(Value::Null) => return Err(ComponentError::EmptyInput(req.clone())),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(ComponentError::EmptyInput(req.clone()))
                }
                _ => {}
            }
        }

        // First pass: optional placeholders.
        let rendered = OPTIONAL_RE.replace_all(&self.template, |caps: &regex::Captures| {
            match inputs.get(&caps[1]) {
                Some(value) if !value.is_null() => Self::stringify(value),
                _ => String::new(),
            }
        });
        let mut rendered = rendered.into_owned();

        // Second pass: standard placeholders.
        for (var_name, value) in inputs {
            let placeholder = format!("{{{var_name}}}");
            if rendered.contains(&placeholder) {
                rendered = rendered.replace(&placeholder, &Self::stringify(value));
            }
        }

        let remaining: Vec<String> = PLACEHOLDER_RE
            .captures_iter(&rendered)
            .filter(|caps| caps.get(2).map(|m| m.as_str()) != Some("optional"))
            .map(|caps| caps[1].to_string())
            .collect();
        if !remaining.is_empty() {
            tracing::warn!(
                "Component {}: some placeholders were not replaced: {}",
                self.id,
                remaining.join(", ")
            );
        }

        Ok(rendered)
    }

    pub fn to_json(&self) -> Result<String, ComponentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json_str: &str) -> Result<Self, ComponentError> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Apply partial changes; re-derives inputs when the template changes
    /// and stamps `updated_at`.
    pub fn apply(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        template: Option<String>,
        outputs: Option<Vec<String>>,
        tags: Option<Vec<String>>,
        metadata: Option<HashMap<String, Value>>,
    ) {
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(template) = template {
            self.template = template;
            self.extract_placeholders();
        }
        if let Some(outputs) = outputs {
            self.outputs = outputs;
        }
        if let Some(tags) = tags {
            self.tags = tags;
        }
        if let Some(metadata) = metadata {
            self.metadata = metadata;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn component(template: &str) -> PromptComponent {
        PromptComponent::new("test", "test component", template, vec![], HashMap::new())
    }

    #[test]
    fn test_placeholder_extraction() {
        let c = component("Hello {name}, welcome to {place}. Mood: {mood:optional}");
        assert_eq!(c.required_inputs, vec!["name", "place"]);
        assert_eq!(c.optional_inputs, vec!["mood"]);
    }

    #[test]
    fn test_optional_wins_over_declared_required() {
        let mut c = component("{a:optional}");
        c.required_inputs = vec!["a".to_string()];
        c.optional_inputs.clear();
        c.extract_placeholders();
        assert!(c.required_inputs.is_empty());
        assert_eq!(c.optional_inputs, vec!["a"]);
    }

    #[test]
    fn test_render_with_optional_absent() {
        let c = component("Hello {name}, you are {role:optional}.");
        let rendered = c
            .render_value(&json!({"name": "Ada"}))
            .unwrap();
        assert_eq!(rendered, "Hello Ada, you are .");
    }

    #[test]
    fn test_render_with_optional_present() {
        let c = component("Hello {name}, you are {role:optional}.");
        let rendered = c
            .render_value(&json!({"name": "Ada", "role": "an engineer"}))
            .unwrap();
        assert_eq!(rendered, "Hello Ada, you are an engineer.");
    }

    #[test]
    fn test_render_rejects_null_inputs() {
        let c = component("Hello {name}");
        let err = c.render_value(&Value::Null).unwrap_err();
        assert!(matches!(err, ComponentError::InvalidInputs(_)));
    }

    #[test]
    fn test_render_rejects_missing_required() {
        let c = component("Hello {name}");
        let err = c.render_value(&json!({})).unwrap_err();
        assert!(matches!(err, ComponentError::MissingInput(_)));
    }

    #[test]
    fn test_render_rejects_empty_required() {
        let c = component("Hello {name}");
        let err = c.render_value(&json!({"name": "   "})).unwrap_err();
        assert!(matches!(err, ComponentError::EmptyInput(_)));
    }

    #[test]
    fn test_render_stringifies_values() {
        let c = component("{count} items, valid: {valid}");
        let rendered = c
            .render_value(&json!({"count": 3, "valid": true}))
            .unwrap();
        assert_eq!(rendered, "3 items, valid: true");
    }

    #[test]
    fn test_rendered_output_has_no_grammar_placeholders() {
        let c = component("A {x} and {y:optional} done");
        let rendered = c.render_value(&json!({"x": "1"})).unwrap();
        assert!(!PLACEHOLDER_RE.is_match(&rendered));
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(parse_version("1.0.0").unwrap(), (1, 0, 0));
        assert_eq!(parse_version("2.13.4").unwrap(), (2, 13, 4));
        assert!(parse_version("1.0").is_err());
        assert!(parse_version("a.b.c").is_err());
    }
}
