//! Scripted model invoker for deterministic runs
//!
//! Replies come from substring-matched rules first, then from an ordered
//! queue, then from an optional fallback. Every request is recorded so tests
//! can assert on call counts and rendered prompts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{Result, TaxisError};

use super::{Completion, InvocationRequest, ModelInfo, ModelInvoker, TokenUsage};

/// Predetermined reply for one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedReply {
    /// Content to return on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Provider error to return instead of content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Simulated latency in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Token usage reported with the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ScriptedReply {
    /// A successful reply
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A reply carrying a JSON value, serialized compactly
    pub fn json(value: serde_json::Value) -> Self {
        Self::text(value.to_string())
    }

    /// A provider failure
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Add simulated latency
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Report token usage
    pub fn with_usage(mut self, prompt_tokens: usize, completion_tokens: usize) -> Self {
        self.usage = Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });
        self
    }
}

/// Reply chosen whenever the user prompt contains `when_contains`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRule {
    pub when_contains: String,
    pub reply: ScriptedReply,
    /// Match at most once
    #[serde(default)]
    pub once: bool,
}

/// Serializable script, the on-disk form used by the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub rules: Vec<ScriptRule>,
    #[serde(default)]
    pub replies: Vec<ScriptedReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<ScriptedReply>,
}

/// [`ModelInvoker`] that plays back a script
pub struct ScriptedInvoker {
    rules: Vec<(ScriptRule, AtomicBool)>,
    queue: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    history: Mutex<Vec<InvocationRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl std::fmt::Debug for ScriptedInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInvoker")
            .field("rule_count", &self.rules.len())
            .field("call_count", &self.call_count())
            .finish()
    }
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInvoker {
    /// Create an invoker with an empty script
    pub fn new() -> Self {
        Self::from_script(Script::default())
    }

    /// Create an invoker from a script
    pub fn from_script(script: Script) -> Self {
        Self {
            rules: script
                .rules
                .into_iter()
                .map(|rule| (rule, AtomicBool::new(false)))
                .collect(),
            queue: Mutex::new(script.replies.into()),
            fallback: script.fallback,
            history: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Load a JSON script from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let script: Script = serde_json::from_str(&raw)?;
        Ok(Self::from_script(script))
    }

    /// Queue a text reply
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.with_scripted(ScriptedReply::text(content))
    }

    /// Queue several text replies in order
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        replies
            .into_iter()
            .fold(self, |invoker, reply| invoker.with_reply(reply))
    }

    /// Queue a JSON reply
    pub fn with_json(self, value: serde_json::Value) -> Self {
        self.with_scripted(ScriptedReply::json(value))
    }

    /// Queue a provider failure
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.with_scripted(ScriptedReply::failure(message))
    }

    /// Queue an arbitrary reply
    pub fn with_scripted(self, reply: ScriptedReply) -> Self {
        lock(&self.queue).push_back(reply);
        self
    }

    /// Add a rule answering every prompt containing `needle`
    pub fn with_rule(mut self, needle: impl Into<String>, reply: ScriptedReply) -> Self {
        self.rules.push((
            ScriptRule {
                when_contains: needle.into(),
                reply,
                once: false,
            },
            AtomicBool::new(false),
        ));
        self
    }

    /// Reply used once rules and queue have nothing left
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Number of invocations received so far
    pub fn call_count(&self) -> usize {
        lock(&self.history).len()
    }

    /// Requests received, in arrival order
    pub fn requests(&self) -> Vec<InvocationRequest> {
        lock(&self.history).clone()
    }

    /// User prompts received, in arrival order
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.history)
            .iter()
            .map(|r| r.user_prompt().to_string())
            .collect()
    }

    /// Highest number of calls observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Replies still queued
    pub fn remaining(&self) -> usize {
        lock(&self.queue).len()
    }

    fn next_reply(&self, prompt: &str) -> Option<ScriptedReply> {
        for (rule, used) in &self.rules {
            if !prompt.contains(&rule.when_contains) {
                continue;
            }
            if rule.once && used.swap(true, Ordering::SeqCst) {
                continue;
            }
            return Some(rule.reply.clone());
        }

        lock(&self.queue)
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<Completion> {
        lock(&self.history).push(request.clone());
        let reply = self.next_reply(request.user_prompt());

        let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        let reply = reply.ok_or_else(|| {
            TaxisError::Provider("scripted invoker has no reply left".to_string())
        })?;

        if reply.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(reply.delay_ms)).await;
        }

        if let Some(error) = reply.error {
            return Err(TaxisError::Provider(error));
        }

        Ok(Completion {
            content: reply.content.unwrap_or_default(),
            usage: reply.usage,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "script".to_string(),
        }
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_order() {
        let invoker = ScriptedInvoker::new().with_replies(["one", "two"]);

        let first = invoker.invoke(&InvocationRequest::from_prompt("a")).await.unwrap();
        let second = invoker.invoke(&InvocationRequest::from_prompt("b")).await.unwrap();

        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");
        assert_eq!(invoker.prompts(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rules_take_precedence() {
        let invoker = ScriptedInvoker::new()
            .with_reply("queued")
            .with_rule("weather", ScriptedReply::text("sunny"));

        let reply = invoker
            .invoke(&InvocationRequest::from_prompt("what is the weather?"))
            .await
            .unwrap();
        assert_eq!(reply.content, "sunny");
        assert_eq!(invoker.remaining(), 1);
    }

    #[tokio::test]
    async fn test_once_rule() {
        let script = Script {
            rules: vec![ScriptRule {
                when_contains: "x".to_string(),
                reply: ScriptedReply::text("rule"),
                once: true,
            }],
            replies: vec![],
            fallback: Some(ScriptedReply::text("fallback")),
        };
        let invoker = ScriptedInvoker::from_script(script);

        let request = InvocationRequest::from_prompt("x");
        assert_eq!(invoker.invoke(&request).await.unwrap().content, "rule");
        assert_eq!(invoker.invoke(&request).await.unwrap().content, "fallback");
    }

    #[tokio::test]
    async fn test_failure_and_exhaustion() {
        let invoker = ScriptedInvoker::new().with_failure("quota exceeded");

        let err = invoker
            .invoke(&InvocationRequest::from_prompt("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaxisError::Provider(ref m) if m == "quota exceeded"));

        let err = invoker
            .invoke(&InvocationRequest::from_prompt("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaxisError::Provider(_)));
        assert_eq!(invoker.call_count(), 2);
    }

    #[test]
    fn test_script_from_json() {
        let script: Script = serde_json::from_str(
            r#"{
                "rules": [{"when_contains": "billing", "reply": {"content": "refund"}}],
                "replies": [{"content": "hi", "delay_ms": 5}],
                "fallback": {"error": "boom"}
            }"#,
        )
        .unwrap();

        assert_eq!(script.rules.len(), 1);
        assert!(!script.rules[0].once);
        assert_eq!(script.replies[0].delay_ms, 5);
        assert_eq!(script.fallback.unwrap().error.as_deref(), Some("boom"));
    }
}
