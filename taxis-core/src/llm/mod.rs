//! Model invocation abstraction
//!
//! Every composer in [`crate::workflow`] talks to a language model through the
//! [`ModelInvoker`] trait. Taxis ships no network clients: bring your own
//! implementation, or use [`ScriptedInvoker`] for tests and replays.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod cancel;
pub mod scripted;
pub mod structured;

pub use cancel::CancellableInvoker;
pub use scripted::{Script, ScriptRule, ScriptedInvoker, ScriptedReply};
pub use structured::{StructuredOutput, request_with_schema, structured_request};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Prompt configuration handed to a [`ModelInvoker`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Temperature for generation (0.0-2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,

    /// JSON schema the reply is expected to match, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl InvocationRequest {
    /// Create a request from a single user prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    /// Create a request with an optional system prompt ahead of the user prompt
    pub fn with_system(system_prompt: Option<&str>, user_prompt: impl Into<String>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user_prompt));
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature.map(|t| t.clamp(0.0, 2.0));
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Text of the last user message, used for tracing and scripted matching
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Raw reply from a [`ModelInvoker`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated content
    pub content: String,

    /// Token usage information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// The one capability every composer orchestrates: turn a prompt into a reply.
///
/// Implementations must be stateless with respect to concurrent calls; the
/// fan-out composer issues several `invoke` futures against the same invoker
/// at once.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send the request to the model and return its reply.
    async fn invoke(&self, request: &InvocationRequest) -> Result<Completion>;

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

#[async_trait]
impl<T: ModelInvoker + ?Sized> ModelInvoker for std::sync::Arc<T> {
    async fn invoke(&self, request: &InvocationRequest) -> Result<Completion> {
        (**self).invoke(request).await
    }

    fn model_info(&self) -> ModelInfo {
        (**self).model_info()
    }
}

/// Model information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_system() {
        let request = InvocationRequest::with_system(Some("be brief"), "hello");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.user_prompt(), "hello");

        let request = InvocationRequest::with_system(None, "hello");
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_temperature_clamping() {
        let request = InvocationRequest::from_prompt("x").temperature(Some(5.0));
        assert_eq!(request.temperature, Some(2.0));

        let request = InvocationRequest::from_prompt("x").temperature(Some(-1.0));
        assert_eq!(request.temperature, Some(0.0));
    }

    #[test]
    fn test_user_prompt_picks_last_user_message() {
        let request = InvocationRequest {
            messages: vec![
                Message::user("first"),
                Message::system("sys"),
                Message::user("second"),
            ],
            ..Default::default()
        };
        assert_eq!(request.user_prompt(), "second");
    }
}
