//! Classification step for the Router Workflow Pattern
//!
//! The classifier asks the model to pick exactly one category key, stating
//! the key set both in the prompt and as a JSON schema `enum`.

use serde::{Deserialize, Serialize};

use crate::llm::{InvocationRequest, ModelInvoker, StructuredOutput, request_with_schema};

use super::execution::{InvocationTrace, Stage, WorkflowResult};
use super::step::{self, CallOptions};
use super::template::PromptTemplate;

/// Default classification prompt.
///
/// Slots: `{{categories}}` (one key per line, with its description when
/// set) and `{{input}}`.
pub const DEFAULT_CLASSIFICATION_PROMPT: &str = "Analyze the input and select the most appropriate \
support team from these options:\n{{categories}}\n\n\
First explain your reasoning, then provide your selection.\n\n\
Input: {{input}}";

/// Model's classification of an input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Why the category was chosen
    #[serde(default)]
    pub reasoning: String,

    /// Selected category key, as produced by the model
    pub selection: String,
}

impl Classification {
    /// Schema restricting `selection` to `keys`
    pub fn schema_for(keys: &[String]) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Brief explanation of why this category was chosen"
                },
                "selection": {
                    "type": "string",
                    "enum": keys,
                    "description": "The chosen category key"
                }
            },
            "required": ["reasoning", "selection"]
        })
    }
}

impl StructuredOutput for Classification {
    /// Open schema; `selection` is any string
    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Brief explanation of why this category was chosen"
                },
                "selection": {
                    "type": "string",
                    "description": "The chosen category key"
                }
            },
            "required": ["reasoning", "selection"]
        })
    }
}

/// Builds and issues the classification call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    template: PromptTemplate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_CLASSIFICATION_PROMPT)
    }
}

impl Classifier {
    pub fn new(template: impl Into<PromptTemplate>) -> Self {
        Self {
            template: template.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Render the classification request for `input` over `categories`,
    /// given as `(key, description)` pairs.
    pub fn request(&self, input: &str, categories: &[(String, Option<String>)]) -> InvocationRequest {
        let listing = categories
            .iter()
            .map(|(key, description)| match description {
                Some(description) => format!("- {key}: {description}"),
                None => format!("- {key}"),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = self
            .template
            .render(&[("categories", listing.as_str()), ("input", input)]);
        let keys: Vec<String> = categories.iter().map(|(key, _)| key.clone()).collect();

        request_with_schema(
            Classification::schema_for(&keys),
            self.system_prompt.as_deref(),
            &prompt,
        )
    }

    /// Issue the classification call and decode its reply
    pub(crate) async fn classify(
        &self,
        input: &str,
        categories: &[(String, Option<String>)],
        invoker: &dyn ModelInvoker,
        options: &CallOptions,
    ) -> (WorkflowResult<Classification>, InvocationTrace) {
        let request = options.apply(self.request(input, categories));
        let (outcome, trace) = step::invoke(invoker, &request, Stage::Classification, options).await;
        let classification = outcome
            .and_then(|completion| step::decode::<Classification>(&completion, &Stage::Classification));

        if let Ok(classification) = &classification {
            tracing::debug!(
                selection = %classification.selection,
                reasoning = %classification.reasoning,
                "Input classified"
            );
        }

        (classification, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedInvoker;
    use crate::workflow::WorkflowError;

    fn categories() -> Vec<(String, Option<String>)> {
        vec![
            ("billing".to_string(), Some("Payments and invoices".to_string())),
            ("technical".to_string(), None),
        ]
    }

    #[test]
    fn test_request_lists_keys_in_prompt_and_schema() {
        let request = Classifier::default().request("I was charged twice", &categories());

        let prompt = request.user_prompt();
        assert!(prompt.contains("- billing: Payments and invoices"));
        assert!(prompt.contains("- technical"));
        assert!(prompt.contains("Input: I was charged twice"));

        let schema = request.output_schema.unwrap();
        assert_eq!(
            schema["properties"]["selection"]["enum"],
            serde_json::json!(["billing", "technical"])
        );
    }

    #[test]
    fn test_open_schema_has_no_enum() {
        let schema = Classification::schema();
        assert_eq!(schema["properties"]["selection"]["type"], "string");
        assert!(schema["properties"]["selection"].get("enum").is_none());
        assert_eq!(schema["required"], serde_json::json!(["reasoning", "selection"]));
    }

    #[test]
    fn test_input_with_placeholder_stays_literal() {
        let request = Classifier::default().request("What does {{categories}} mean?", &categories());

        let prompt = request.user_prompt();
        assert!(prompt.contains("Input: What does {{categories}} mean?\n"));
        assert_eq!(prompt.matches("- billing").count(), 1);
    }

    #[tokio::test]
    async fn test_classify_decodes_reply() {
        let invoker = ScriptedInvoker::new().with_reply(
            "```json\n{\"reasoning\": \"mentions a charge\", \"selection\": \"billing\"}\n```",
        );

        let (result, trace) = Classifier::default()
            .classify("charged twice", &categories(), &invoker, &CallOptions::default())
            .await;

        let classification = result.unwrap();
        assert_eq!(classification.selection, "billing");
        assert_eq!(classification.reasoning, "mentions a charge");
        assert_eq!(trace.stage, Stage::Classification);
    }

    #[tokio::test]
    async fn test_classify_rejects_prose() {
        let invoker = ScriptedInvoker::new().with_reply("billing, probably");

        let (result, _) = Classifier::default()
            .classify("charged twice", &categories(), &invoker, &CallOptions::default())
            .await;

        assert!(matches!(result, Err(WorkflowError::Decode { .. })));
    }
}
