//! Structured output: asking for JSON and decoding it

use serde::de::DeserializeOwned;

use crate::parsing::{JsonParser, ParseError, ParseResult};

use super::InvocationRequest;

/// A reply shape the model is asked to produce as JSON.
pub trait StructuredOutput: DeserializeOwned {
    /// JSON schema describing the expected reply
    fn schema() -> serde_json::Value;

    /// Decode a raw model reply into this type
    fn decode(raw: &str) -> ParseResult<Self> {
        let value = JsonParser::new().parse(raw)?;
        serde_json::from_value(value).map_err(|e| ParseError::InvalidFormat(e.to_string()))
    }
}

/// Build a request whose reply should decode into `T`.
///
/// Format instructions carrying the schema are appended to the user prompt,
/// and the schema is attached to the request for invokers that support
/// native structured output.
pub fn structured_request<T: StructuredOutput>(
    system_prompt: Option<&str>,
    prompt: &str,
) -> InvocationRequest {
    request_with_schema(T::schema(), system_prompt, prompt)
}

/// Like [`structured_request`], for a schema built at run time
pub fn request_with_schema(
    schema: serde_json::Value,
    system_prompt: Option<&str>,
    prompt: &str,
) -> InvocationRequest {
    let schema_text = serde_json::to_string_pretty(&schema).unwrap_or_default();
    let prompt = format!(
        "{prompt}\n\nYour response should be in JSON format.\n\
         Do not include any explanations, only provide a RFC8259 compliant JSON response \
         following this format without deviation.\n\
         Here is the JSON Schema instance your output must adhere to:\n```{schema_text}```"
    );

    let mut request = InvocationRequest::with_system(system_prompt, prompt);
    request.output_schema = Some(schema);
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        left: String,
        right: i64,
    }

    impl StructuredOutput for Pair {
        fn schema() -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "left": {"type": "string"},
                    "right": {"type": "integer"}
                },
                "required": ["left", "right"]
            })
        }
    }

    #[test]
    fn test_structured_request_attaches_schema() {
        let request = structured_request::<Pair>(Some("sys"), "Make a pair");
        assert_eq!(request.output_schema, Some(Pair::schema()));
        assert!(request.user_prompt().starts_with("Make a pair"));
        assert!(request.user_prompt().contains("\"left\""));
    }

    #[test]
    fn test_decode_fenced_reply() {
        let raw = "Sure!\n```json\n{\"left\": \"a\", \"right\": 2}\n```";
        let pair = Pair::decode(raw).unwrap();
        assert_eq!(
            pair,
            Pair {
                left: "a".to_string(),
                right: 2
            }
        );
    }

    #[test]
    fn test_decode_schema_mismatch() {
        let result = Pair::decode(r#"{"left": "a"}"#);
        assert!(matches!(result, Err(ParseError::InvalidFormat(_))));
    }
}
