use indoc::indoc;

use super::base::TaskContent;

/// Built-in system prompt for a task, used when no
/// `system_prompt_<task>` component is registered.
pub fn builtin_system_prompt(task: &str) -> String {
    match task {
        "summarize" => indoc! {"
            You are a precise summarization assistant. Your task is to create concise, \
            accurate summaries of content that capture the key points and main message. \
            Focus on the most important information and maintain the original meaning. \
            Be clear, factual, and objective."}
        .to_string(),

        "extract_entities" => indoc! {"
            You are an entity extraction assistant. Your task is to identify and categorize \
            key entities mentioned in the content. Focus on people, organizations, products, \
            concepts, and technologies. Format your output as a valid JSON object with \
            categories as keys and arrays of entities as values. Do not include any \
            explanatory text - only output the JSON object."}
        .to_string(),

        "tag_content" => indoc! {"
            You are a content tagging assistant. Your task is to generate relevant tags for \
            content that accurately represent the topics, themes, and subjects covered. \
            Create 5-10 tags that would help categorize and discover this content. Return \
            only a comma-separated list of tags without any explanations or additional text."}
        .to_string(),

        _ => "You are a helpful assistant that processes content.".to_string(),
    }
}

/// Built-in task prompt, used when no `task_<task>` component is
/// registered.
pub fn builtin_task_prompt(task: &str, content: &TaskContent) -> String {
    let text = &content.text;
    match task {
        "summarize" => format!(
            indoc! {"
                Summarize the following content in a concise way that captures the key points:

                {}

                Summary:"},
            text
        ),

        "extract_entities" => format!(
            indoc! {"
                Extract the key entities from the following content. Focus on people, organizations, products, concepts, and technologies.
                Format the output as a JSON object with categories as keys and arrays of entities as values.

                {}

                Entities (in JSON format):"},
            text
        ),

        "tag_content" => format!(
            indoc! {"
                Generate appropriate tags for the following content. Tags should be relevant keywords that categorize the content.
                Return a comma-separated list of 5-10 tags.

                {}

                Tags:"},
            text
        ),

        _ => format!("Process the following content for task '{task}':\n\n{text}"),
    }
}
