use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::component::{parse_version, ComponentError, PromptComponent, PLACEHOLDER_RE};
use super::registry::ComponentRegistry;
use super::validator::{validate_template, Validation};

/// Partial changes for `update`. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ComponentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub template: Option<String>,
    pub outputs: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, Value>>,
}

impl ComponentUpdate {
    fn changes(&self, current: &PromptComponent) -> bool {
        if let Some(name) = &self.name {
            if name != &current.name {
                return true;
            }
        }
        if let Some(description) = &self.description {
            if description != &current.description {
                return true;
            }
        }
        if let Some(template) = &self.template {
            if template != &current.template {
                return true;
            }
        }
        if let Some(outputs) = &self.outputs {
            if outputs != &current.outputs {
                return true;
            }
        }
        if let Some(tags) = &self.tags {
            let mut a = tags.clone();
            let mut b = current.tags.clone();
            a.sort_unstable();
            b.sort_unstable();
            if a != b {
                return true;
            }
        }
        if let Some(metadata) = &self.metadata {
            if metadata != &current.metadata {
                return true;
            }
        }
        false
    }
}

/// High-level interface for creating and modifying components: change
/// detection, automatic patch bumps, duplication, previews.
pub struct ComponentEditor {
    registry: Arc<ComponentRegistry>,
}

impl ComponentEditor {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    pub fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        template: impl Into<String>,
        tags: Vec<String>,
        metadata: HashMap<String, Value>,
    ) -> Result<PromptComponent, ComponentError> {
        let component = PromptComponent::new(name, description, template, tags, metadata);
        let component = self.registry.register(component)?;
        tracing::info!("Created new component: {} - {}", component.id, component.name);
        Ok(component)
    }

    /// Create with a caller-chosen id, used for well-known components the
    /// router resolves by name (`system_prompt_<task>`, `task_<task>`).
    pub fn create_with_id(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        template: impl Into<String>,
        tags: Vec<String>,
        metadata: HashMap<String, Value>,
    ) -> Result<PromptComponent, ComponentError> {
        let component =
            PromptComponent::new(name, description, template, tags, metadata).with_id(id);
        let component = self.registry.register(component)?;
        tracing::info!("Created new component: {} - {}", component.id, component.name);
        Ok(component)
    }

    /// Update a component. When nothing differs from the current state the
    /// call is a no-op and the current component is returned unchanged;
    /// otherwise the prior state is snapshotted and, unless
    /// `increment_version` is false, the patch version is bumped.
    pub fn update(
        &self,
        component_id: &str,
        changes: ComponentUpdate,
        increment_version: bool,
    ) -> Result<PromptComponent, ComponentError> {
        let mut component = self
            .registry
            .get(component_id)
            .ok_or_else(|| ComponentError::NotFound(component_id.to_string()))?;

        if !changes.changes(&component) {
            tracing::info!("No changes detected for component: {component_id}");
            return Ok(component);
        }

        if increment_version {
            let (major, minor, patch) = parse_version(&component.version)?;
            component.version = format!("{major}.{minor}.{}", patch + 1);
        }

        component.apply(
            changes.name,
            changes.description,
            changes.template,
            changes.outputs,
            changes.tags,
            changes.metadata,
        );

        let component = self.registry.update(component)?;
        tracing::info!(
            "Updated component: {} to version {}",
            component_id,
            component.version
        );
        Ok(component)
    }

    /// Duplicate a component under a fresh id, resetting the version to
    /// 1.0.0.
    pub fn duplicate(
        &self,
        component_id: &str,
        new_name: Option<&str>,
    ) -> Result<PromptComponent, ComponentError> {
        let source = self
            .registry
            .get(component_id)
            .ok_or_else(|| ComponentError::NotFound(component_id.to_string()))?;

        let name = new_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} (Copy)", source.name));
        let mut copy = PromptComponent::new(
            name,
            source.description.clone(),
            source.template.clone(),
            source.tags.clone(),
            source.metadata.clone(),
        );
        copy.outputs = source.outputs.clone();

        let copy = self.registry.register(copy)?;
        tracing::info!("Duplicated component {} to {}", component_id, copy.id);
        Ok(copy)
    }

    /// Extract `(required, optional)` input names from a template.
    pub fn extract_inputs(template: &str) -> (Vec<String>, Vec<String>) {
        let mut required = Vec::new();
        let mut optional = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let var_name = caps[1].to_string();
            if caps.get(2).map(|m| m.as_str()) == Some("optional") {
                if !optional.contains(&var_name) {
                    optional.push(var_name);
                }
            } else if !required.contains(&var_name) && !optional.contains(&var_name) {
                required.push(var_name);
            }
        }
        (required, optional)
    }

    /// Preview a render of an unregistered template. Missing required
    /// inputs are substituted with `[name]` markers and reported.
    pub fn preview(
        &self,
        template: &str,
        inputs: &Map<String, Value>,
    ) -> (String, Vec<String>) {
        let (required, _) = Self::extract_inputs(template);
        let missing: Vec<String> = required
            .into_iter()
            .filter(|r| !inputs.contains_key(r))
            .collect();

        let temp = PromptComponent::new(
            "Preview",
            "Temporary component for preview",
            template,
            vec![],
            HashMap::new(),
        );

        let mut render_inputs = inputs.clone();
        for name in &missing {
            render_inputs.insert(name.clone(), Value::String(format!("[{name}]")));
        }

        match temp.render(&render_inputs) {
            Ok(rendered) => (rendered, missing),
            Err(e) => (format!("Error rendering template: {e}"), missing),
        }
    }

    /// Validate a component: its template plus consistency between the
    /// declared inputs and the placeholders actually present.
    pub fn validate_component(&self, component: &PromptComponent) -> Validation {
        let mut validation = validate_template(&component.template);

        if component.name.trim().is_empty() {
            validation.errors.push("Component name cannot be empty".to_string());
        }
        if component.description.trim().is_empty() {
            validation.warnings.push("Component has no description".to_string());
        }

        let (required, optional) = Self::extract_inputs(&component.template);
        for input in &component.required_inputs {
            if !required.contains(input) && !optional.contains(input) {
                validation
                    .warnings
                    .push(format!("Required input '{input}' not found in template"));
            }
        }
        for input in &component.optional_inputs {
            if !required.contains(input) && !optional.contains(input) {
                validation
                    .warnings
                    .push(format!("Optional input '{input}' not found in template"));
            }
        }
        for input in required.iter().chain(optional.iter()) {
            if !component.required_inputs.contains(input)
                && !component.optional_inputs.contains(input)
            {
                validation.warnings.push(format!(
                    "Template variable '{input}' not listed in component inputs"
                ));
            }
        }

        validation.is_valid = validation.errors.is_empty();
        validation
    }
}
