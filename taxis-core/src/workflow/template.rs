//! Prompt templates with `{{name}}` placeholders

use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable prompt text with `{{name}}` placeholders.
///
/// `{{input}}` is the conventional slot for the previous step's output.
/// Placeholders with no bound value are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the template mentions `{{name}}`
    pub fn has_slot(&self, name: &str) -> bool {
        self.0.contains(&slot(name))
    }

    /// Render with `{{input}}` bound to `input`
    pub fn render_input(&self, input: &str) -> String {
        self.render(&[("input", input)])
    }

    /// Render with each `(name, value)` substituted.
    ///
    /// Only placeholders in the template text are replaced; inserted values
    /// are copied as-is, even when they contain `{{...}}` themselves.
    pub fn render(&self, bindings: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];

            let Some(close) = after.find("}}") else {
                rest = &rest[open..];
                break;
            };
            let name = &after[..close];

            // `{{{x}}}`: emit one brace and retry from the next one
            if name.contains('{') {
                out.push('{');
                rest = &rest[open + 1..];
                continue;
            }

            match bindings.iter().find(|(bound, _)| *bound == name) {
                Some((_, value)) => out.push_str(value),
                None => out.push_str(&slot(name)),
            }
            rest = &after[close + 2..];
        }

        out.push_str(rest);
        out
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PromptTemplate {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PromptTemplate {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn slot(name: &str) -> String {
    format!("{{{{{name}}}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_input() {
        let template = PromptTemplate::new("Summarize: {{input}}");
        assert_eq!(template.render_input("the text"), "Summarize: the text");
        assert!(template.has_slot("input"));
        assert!(!template.has_slot("task"));
    }

    #[test]
    fn test_unknown_slots_left_verbatim() {
        let template = PromptTemplate::new("{{task}} in {{style}}");
        assert_eq!(template.render(&[("task", "write")]), "write in {{style}}");
    }

    #[test]
    fn test_inserted_values_are_not_rescanned() {
        let template = PromptTemplate::new("{{a}} {{b}}");
        assert_eq!(template.render(&[("a", "{{b}}"), ("b", "X")]), "{{b}} X");
        assert_eq!(template.render(&[("b", "{{a}}"), ("a", "X")]), "X {{a}}");
    }

    #[test]
    fn test_render_edge_braces() {
        let template = PromptTemplate::new("{{{input}}} and {{unclosed");
        assert_eq!(template.render_input("x"), "{x} and {{unclosed");
        assert_eq!(PromptTemplate::new("{{input}}{{input}}").render_input("ab"), "abab");
    }

    #[test]
    fn test_deserializes_from_plain_string() {
        let template: PromptTemplate = serde_json::from_str(r#""Hi {{input}}""#).unwrap();
        assert_eq!(template.as_str(), "Hi {{input}}");
    }
}
