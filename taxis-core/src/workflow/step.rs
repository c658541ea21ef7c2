//! Single invoker calls: responses, per-call options, and the traced call helper

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::{Duration, Instant};

use crate::llm::{Completion, InvocationRequest, ModelInvoker, StructuredOutput};
use crate::parsing::JsonParser;

use super::execution::{InvocationTrace, Stage, WorkflowError, WorkflowResult};

/// Output of one invoker call: free text, or a decoded JSON value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    Text(String),
    Structured(serde_json::Value),
}

impl Response {
    /// Text form, used when threading a response into the next prompt.
    ///
    /// Structured values render as compact JSON; plain JSON strings render
    /// without quotes.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Response::Text(text) => Cow::Borrowed(text),
            Response::Structured(serde_json::Value::String(s)) => Cow::Borrowed(s),
            Response::Structured(value) => Cow::Owned(value.to_string()),
        }
    }

    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Response::Structured(value) => Some(value),
            Response::Text(_) => None,
        }
    }

    /// Deserialize a structured response into `T`
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match self {
            Response::Structured(value) => serde_json::from_value(value.clone()),
            Response::Text(text) => serde_json::from_str(text),
        }
    }

    pub(crate) fn from_completion(
        completion: &Completion,
        expect_json: bool,
        stage: &Stage,
    ) -> WorkflowResult<Self> {
        if !expect_json {
            return Ok(Response::Text(completion.content.clone()));
        }

        JsonParser::new()
            .parse(&completion.content)
            .map(Response::Structured)
            .map_err(|e| WorkflowError::Decode {
                stage: stage.clone(),
                message: e.to_string(),
            })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Sampling and timeout settings applied to every call a composer makes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub call_timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub(crate) fn apply(&self, request: InvocationRequest) -> InvocationRequest {
        let request = match self.temperature {
            Some(_) => request.temperature(self.temperature),
            None => request,
        };
        match self.max_tokens {
            Some(_) => request.max_tokens(self.max_tokens),
            None => request,
        }
    }
}

/// Issue one call and trace it, whatever the outcome.
pub(crate) async fn invoke(
    invoker: &dyn ModelInvoker,
    request: &InvocationRequest,
    stage: Stage,
    options: &CallOptions,
) -> (WorkflowResult<Completion>, InvocationTrace) {
    let start = Instant::now();

    let outcome = match options.call_timeout {
        Some(after) => match tokio::time::timeout(after, invoker.invoke(request)).await {
            Ok(result) => result.map_err(|e| WorkflowError::from_invoker(stage.clone(), e)),
            Err(_) => Err(WorkflowError::Timeout {
                stage: stage.clone(),
                after,
            }),
        },
        None => invoker
            .invoke(request)
            .await
            .map_err(|e| WorkflowError::from_invoker(stage.clone(), e)),
    };

    let duration_ms = start.elapsed().as_millis() as u64;

    match &outcome {
        Ok(_) => tracing::debug!(stage = %stage, duration_ms, "Model invocation completed"),
        Err(e) => tracing::warn!(stage = %stage, duration_ms, error = %e, "Model invocation failed"),
    }

    let trace = InvocationTrace {
        stage,
        prompt: request.user_prompt().to_string(),
        response: outcome.as_ref().ok().map(|c| c.content.clone()),
        error: outcome.as_ref().err().map(|e| e.to_string()),
        duration_ms,
        usage: outcome.as_ref().ok().and_then(|c| c.usage),
    };

    (outcome, trace)
}

/// Decode a completion into a structured output type
pub(crate) fn decode<T: StructuredOutput>(
    completion: &Completion,
    stage: &Stage,
) -> WorkflowResult<T> {
    T::decode(&completion.content).map_err(|e| WorkflowError::Decode {
        stage: stage.clone(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedInvoker, ScriptedReply};

    #[test]
    fn test_response_as_text() {
        assert_eq!(Response::Text("hi".into()).as_text(), "hi");
        assert_eq!(
            Response::Structured(serde_json::json!("plain")).as_text(),
            "plain"
        );
        assert_eq!(
            Response::Structured(serde_json::json!({"a": 1})).as_text(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn test_response_from_completion() {
        let stage = Stage::FanOutItem { index: 0 };
        let completion = Completion::text("```json\n{\"a\": 1}\n```");

        let text = Response::from_completion(&completion, false, &stage).unwrap();
        assert!(matches!(text, Response::Text(_)));

        let structured = Response::from_completion(&completion, true, &stage).unwrap();
        assert_eq!(structured.as_structured(), Some(&serde_json::json!({"a": 1})));

        let err = Response::from_completion(&Completion::text("nope"), true, &stage).unwrap_err();
        assert!(matches!(err, WorkflowError::Decode { .. }));
    }

    #[test]
    fn test_call_options_apply() {
        let options = CallOptions::default()
            .with_temperature(0.2)
            .with_max_tokens(64);
        let request = options.apply(InvocationRequest::from_prompt("x"));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(64));

        let request = CallOptions::default().apply(InvocationRequest::from_prompt("x").max_tokens(Some(9)));
        assert_eq!(request.max_tokens, Some(9));
    }

    #[test]
    fn test_call_options_humantime() {
        let options: CallOptions = serde_json::from_str(r#"{"call_timeout": "2s"}"#).unwrap();
        assert_eq!(options.call_timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.temperature, None);
    }

    #[tokio::test]
    async fn test_invoke_traces_success() {
        let invoker = ScriptedInvoker::new().with_scripted(ScriptedReply::text("ok").with_usage(3, 4));
        let request = InvocationRequest::from_prompt("hello");

        let (result, trace) = invoke(
            &invoker,
            &request,
            Stage::Synthesis,
            &CallOptions::default(),
        )
        .await;

        assert_eq!(result.unwrap().content, "ok");
        assert!(trace.succeeded());
        assert_eq!(trace.prompt, "hello");
        assert_eq!(trace.usage.unwrap().total_tokens, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_timeout() {
        let invoker =
            ScriptedInvoker::new().with_scripted(ScriptedReply::text("slow").with_delay(5_000));
        let options = CallOptions::default().with_call_timeout(Duration::from_millis(100));

        let (result, trace) = invoke(
            &invoker,
            &InvocationRequest::from_prompt("x"),
            Stage::Decomposition,
            &options,
        )
        .await;

        assert!(matches!(result, Err(WorkflowError::Timeout { .. })));
        assert!(!trace.succeeded());
    }
}
