//! Structured response parsing.
//!
//! A schema-constrained value is used when the provider returned one.
//! Otherwise the text is tried, in order, as a whole JSON document, as the
//! contents of a fenced ```json block, and as the first balanced `{...}`
//! object in the text.

use crate::invoker::Invocation;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)```").expect("valid regex")
});

/// Why a response could not be turned into the expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The response had neither text nor a structured value.
    Empty,
    /// No JSON object could be located in the text.
    NoJson,
    /// JSON was found but does not match the expected shape.
    Shape(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "response was empty"),
            Self::NoJson => write!(f, "no JSON object found in response"),
            Self::Shape(detail) => write!(f, "response does not match expected shape: {detail}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses an invocation into a typed value.
///
/// # Errors
///
/// Returns a `ParseError` if no candidate deserializes into `T`.
pub fn parse_structured<T: DeserializeOwned>(invocation: &Invocation) -> Result<T, ParseError> {
    if let Some(ref value) = invocation.structured {
        return serde_json::from_value(value.clone()).map_err(|e| ParseError::Shape(e.to_string()));
    }
    let text = invocation
        .text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or(ParseError::Empty)?;
    parse_text(text)
}

/// Parses free text into a typed value.
///
/// # Errors
///
/// Returns a `ParseError` if no candidate deserializes into `T`.
pub fn parse_text<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let candidates = json_candidates(text);
    if candidates.is_empty() {
        return Err(ParseError::NoJson);
    }
    let mut last_error = None;
    for candidate in candidates {
        match serde_json::from_value(candidate) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => last_error = Some(e.to_string()),
        }
    }
    Err(ParseError::Shape(last_error.unwrap_or_default()))
}

fn json_candidates(text: &str) -> Vec<Value> {
    let trimmed = text.trim();
    let mut candidates = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        candidates.push(value);
    }
    if let Some(body) = FENCED.captures(text).and_then(|caps| caps.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
            candidates.push(value);
        }
    }
    if let Some(object) = first_balanced_object(text) {
        if let Ok(value) = serde_json::from_str::<Value>(object) {
            candidates.push(value);
        }
    }
    candidates
}

/// Finds the first `{...}` span whose braces balance, skipping braces
/// inside JSON strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Crux {
        episode_crux: String,
    }

    #[test]
    fn test_structured_value_first() {
        let invocation = Invocation {
            text: Some("ignored".to_string()),
            structured: Some(json!({"episode_crux": "soil"})),
            ..Invocation::default()
        };
        let parsed: Crux = parse_structured(&invocation).unwrap();
        assert_eq!(parsed.episode_crux, "soil");
    }

    #[test]
    fn test_plain_json_text() {
        let parsed: Crux = parse_text(r#" {"episode_crux": "soil"} "#).unwrap();
        assert_eq!(parsed.episode_crux, "soil");
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here you go:\n```json\n{\"episode_crux\": \"soil\"}\n```\nThanks";
        let parsed: Crux = parse_text(text).unwrap();
        assert_eq!(parsed.episode_crux, "soil");
    }

    #[test]
    fn test_balanced_object_with_braces_in_strings() {
        let text = r#"Sure! {"episode_crux": "a {tricky} one"} trailing {"#;
        let parsed: Crux = parse_text(text).unwrap();
        assert_eq!(parsed.episode_crux, "a {tricky} one");
    }

    #[test]
    fn test_no_json() {
        assert_eq!(parse_text::<Crux>("no braces here"), Err(ParseError::NoJson));
    }

    #[test]
    fn test_wrong_shape() {
        let err = parse_text::<Crux>(r#"{"other": 1}"#).unwrap_err();
        assert!(matches!(err, ParseError::Shape(_)));
    }

    #[test]
    fn test_empty_invocation() {
        assert_eq!(
            parse_structured::<Crux>(&Invocation::text("  ")),
            Err(ParseError::Empty)
        );
    }
}
