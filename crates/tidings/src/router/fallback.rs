use chrono::Utc;

use super::base::{ProviderResult, RouteStatus, TaskContent};

const FALLBACK_MODEL: &str = "none";

/// Produce a deterministic, non-LLM result for a task. Every simplified
/// result is a `Success` from provider `fallback` carrying the reason it
/// was needed.
pub fn generate_simplified(task: &str, content: &TaskContent, reason: &str) -> ProviderResult {
    tracing::info!(
        "Generating simplified result for task '{}' due to: {}",
        task,
        reason
    );

    let result = match task {
        "summarize" => simple_summary(&content.text),
        "extract_entities" => "{}".to_string(),
        "tag_content" => simple_tags(&content.text),
        _ => "Unable to process with LLM. Using fallback mechanism.".to_string(),
    };

    ProviderResult {
        status: RouteStatus::Success,
        provider: "fallback".to_string(),
        model: FALLBACK_MODEL.to_string(),
        result,
        tokens: None,
        processed_at: Utc::now(),
        fallback_reason: Some(reason.to_string()),
        message: None,
    }
}

/// First three sentences of the text.
fn simple_summary(text: &str) -> String {
    let sentences: Vec<&str> = text
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(3)
        .collect();
    if sentences.is_empty() {
        "No text available for summary.".to_string()
    } else {
        format!("{}.", sentences.join(". "))
    }
}

/// Up to five distinct lowercased tokens longer than four characters.
fn simple_tags(text: &str) -> String {
    let mut tags: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        if word.chars().count() <= 4 {
            continue;
        }
        let tag = word.to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == 5 {
            break;
        }
    }
    tags.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_takes_first_three_sentences() {
        let content = TaskContent::text("A. B. C. D. E.");
        let result = generate_simplified("summarize", &content, "NO_PROVIDERS_AVAILABLE");
        assert_eq!(result.result, "A. B. C.");
        assert_eq!(result.provider, "fallback");
        assert_eq!(result.status, RouteStatus::Success);
        assert_eq!(result.fallback_reason.as_deref(), Some("NO_PROVIDERS_AVAILABLE"));
    }

    #[test]
    fn test_summarize_empty_text() {
        let content = TaskContent::text("");
        let result = generate_simplified("summarize", &content, "TIMEOUT");
        assert_eq!(result.result, "No text available for summary.");
    }

    #[test]
    fn test_entities_fall_back_to_empty_object() {
        let content = TaskContent::text("Anything at all.");
        let result = generate_simplified("extract_entities", &content, "TIMEOUT");
        assert_eq!(result.result, "{}");
    }

    #[test]
    fn test_tags_are_distinct_lowercased_and_capped() {
        let content = TaskContent::text(
            "Kernel kernel SCHEDULING scheduling latency throughput threads memory pages",
        );
        let result = generate_simplified("tag_content", &content, "ERROR: boom");
        assert_eq!(
            result.result,
            "kernel, scheduling, latency, throughput, threads"
        );
    }

    #[test]
    fn test_tags_skip_short_tokens() {
        let content = TaskContent::text("the and cat runs quickly");
        let result = generate_simplified("tag_content", &content, "TIMEOUT");
        assert_eq!(result.result, "quickly");
    }

    #[test]
    fn test_unknown_task_gets_generic_message() {
        let content = TaskContent::text("data");
        let result = generate_simplified("translate", &content, "NO_PROVIDERS_AVAILABLE");
        assert!(result.result.contains("fallback mechanism"));
        assert!(result.is_degraded());
    }
}
