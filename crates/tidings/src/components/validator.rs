use once_cell::sync::Lazy;
use regex::Regex;

use super::component::PLACEHOLDER_RE;

static INVALID_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^A-Za-z0-9_:{}][^}]*)\}").unwrap());

static WHITESPACE_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[A-Za-z0-9_\s]*\s[A-Za-z0-9_\s]*\}").unwrap());

/// Outcome of a structural template check. Errors make the template
/// unusable; warnings are advisory.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate a prompt template.
///
/// Errors: empty template, mismatched braces, invalid placeholder syntax.
/// Warnings: no placeholders, placeholders with whitespace, the same name
/// marked both required and optional.
pub fn validate_template(template: &str) -> Validation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if template.trim().is_empty() {
        errors.push("Template cannot be empty".to_string());
        return Validation {
            is_valid: false,
            errors,
            warnings,
        };
    }

    let placeholders: Vec<(String, Option<String>)> = PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| (caps[1].to_string(), caps.get(2).map(|m| m.as_str().to_string())))
        .collect();

    if placeholders.is_empty() {
        warnings.push("Template contains no placeholders".to_string());
    }

    let open_count = template.matches('{').count();
    let close_count = template.matches('}').count();
    if open_count != close_count {
        errors.push(format!(
            "Mismatched braces: {open_count} opening and {close_count} closing braces"
        ));
    }

    for caps in INVALID_PLACEHOLDER_RE.captures_iter(template) {
        errors.push(format!("Invalid placeholder syntax: {{{}}}", &caps[1]));
    }

    for (name, flag) in &placeholders {
        if let Some(flag) = flag {
            if flag != "optional" {
                errors.push(format!("Invalid placeholder syntax: {{{name}:{flag}}}"));
            }
        }
    }

    if WHITESPACE_PLACEHOLDER_RE.is_match(template) {
        warnings.push("Some placeholders contain whitespace which may cause issues".to_string());
    }

    // The same name marked both `{name}` and `{name:optional}`.
    let mut seen: Vec<(String, bool)> = Vec::new();
    for (name, flag) in &placeholders {
        let is_optional = flag.as_deref() == Some("optional");
        if seen.contains(&(name.clone(), is_optional)) {
            continue;
        }
        if seen.contains(&(name.clone(), !is_optional)) {
            warnings.push(format!(
                "Placeholder '{name}' is marked as both required and optional in different places"
            ));
            continue;
        }
        seen.push((name.clone(), is_optional));
    }

    Validation {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_template_is_an_error() {
        let v = validate_template("   ");
        assert!(!v.is_valid);
        assert_eq!(v.errors, vec!["Template cannot be empty"]);
    }

    #[test]
    fn test_valid_template() {
        let v = validate_template("Summarize the following:\n\n{text}\n\nSummary:");
        assert!(v.is_valid);
        assert!(v.errors.is_empty());
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn test_mismatched_braces() {
        let v = validate_template("Hello {name");
        assert!(!v.is_valid);
        assert!(v.errors.iter().any(|e| e.contains("Mismatched braces")));
    }

    #[test]
    fn test_invalid_placeholder_syntax() {
        let v = validate_template("Hello {!name}");
        assert!(!v.is_valid);
        assert!(v
            .errors
            .iter()
            .any(|e| e.contains("Invalid placeholder syntax")));
    }

    #[test]
    fn test_whitespace_in_placeholder_warns() {
        let v = validate_template("Hello {my name}");
        assert!(v.is_valid);
        assert!(v.warnings.iter().any(|w| w.contains("whitespace")));
    }

    #[test]
    fn test_unknown_flag_is_invalid() {
        let v = validate_template("Hello {name:maybe}");
        assert!(!v.is_valid);
        assert!(v
            .errors
            .iter()
            .any(|e| e.contains("{name:maybe}")));
    }

    #[test]
    fn test_no_placeholders_warns() {
        let v = validate_template("Just a static prompt with no inputs at all.");
        assert!(v.is_valid);
        assert!(v
            .warnings
            .iter()
            .any(|w| w.contains("no placeholders")));
    }

    #[test]
    fn test_mixed_required_and_optional_warns() {
        let v = validate_template("{name} and later {name:optional}");
        assert!(v.is_valid);
        assert!(v
            .warnings
            .iter()
            .any(|w| w.contains("both required and optional")));
    }
}
