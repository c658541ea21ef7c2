//! Lenient JSON extraction

use regex::Regex;
use std::sync::LazyLock;

use super::{ParseError, ParseResult};

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").expect("valid code fence regex")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"));

/// Extracts the first JSON document from a model reply
#[derive(Debug, Clone, Copy)]
pub struct JsonParser {
    repair: bool,
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonParser {
    /// Parser that strips fences, extracts embedded JSON and drops trailing commas
    pub fn new() -> Self {
        Self { repair: true }
    }

    /// Parser that only strips fences and extracts embedded JSON
    pub fn strict() -> Self {
        Self { repair: false }
    }

    pub fn parse(&self, raw: &str) -> ParseResult<serde_json::Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let unfenced = CODE_FENCE_RE
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or(trimmed);

        if let Ok(value) = serde_json::from_str(unfenced) {
            return Ok(value);
        }

        let document = balanced_document(unfenced).ok_or(ParseError::NoJson)?;

        match serde_json::from_str(document) {
            Ok(value) => Ok(value),
            Err(_) if self.repair => {
                let repaired = TRAILING_COMMA_RE.replace_all(document, "$1");
                serde_json::from_str(&repaired)
                    .map_err(|e| ParseError::InvalidFormat(e.to_string()))
            }
            Err(e) => Err(ParseError::InvalidFormat(e.to_string())),
        }
    }
}

/// Slice of `input` spanning the first balanced `{...}` or `[...]`.
fn balanced_document(input: &str) -> Option<&str> {
    let start = input.find(['{', '['])?;
    let body = &input[start..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&body[..=i]);
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

    #[test]
    fn test_plain_json() {
        let value = JsonParser::new().parse(r#"{"key": "value"}"#).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_code_fence() {
        let input = "Here you go:\n```json\n{\"key\": \"value\"}\n```\nAnything else?";
        let value = JsonParser::new().parse(input).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_embedded_in_prose() {
        let input = r#"My answer is {"selection": "billing", "note": "a } inside"} as requested."#;
        let value = JsonParser::new().parse(input).unwrap();
        assert_eq!(value["selection"], "billing");
        assert_eq!(value["note"], "a } inside");
    }

    #[test]
    fn test_trailing_comma_repair() {
        let value = JsonParser::new().parse(r#"{"tasks": [1, 2,],}"#).unwrap();
        assert_eq!(value["tasks"].as_array().unwrap().len(), 2);

        let result = JsonParser::strict().parse(r#"{"tasks": [1, 2,],}"#);
        assert!(matches!(result, Err(ParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_empty_and_missing() {
        assert_eq!(JsonParser::new().parse("   "), Err(ParseError::EmptyInput));
        assert_eq!(
            JsonParser::new().parse("no structure here"),
            Err(ParseError::NoJson)
        );
    }
}
