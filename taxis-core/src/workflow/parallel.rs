//! Parallel Workflow Pattern
//!
//! Runs one prompt template over many independent inputs with a bounded
//! number of calls in flight. Responses come back in input order no matter
//! which call finishes first.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::llm::{InvocationRequest, ModelInvoker};

use super::execution::{ExecutionTrace, Stage, WorkflowError, WorkflowResult};
use super::step::{self, CallOptions, Response};
use super::template::PromptTemplate;

/// What to do when one input fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the first failure in completion time and drop in-flight calls
    #[default]
    FailFast,
    /// Run every input and report a result per input
    CollectAll,
}

fn default_max_concurrency() -> usize {
    4
}

/// Fan-out configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Maximum calls in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Timeout applied to each call
    #[serde(default, with = "humantime_serde")]
    pub call_timeout: Option<Duration>,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            failure_policy: FailurePolicy::default(),
            call_timeout: None,
        }
    }
}

impl FanOutConfig {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.max_concurrency == 0 {
            return Err(WorkflowError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-input results of a fan-out, in input order
#[derive(Debug)]
pub struct FanOutOutcome {
    results: Vec<WorkflowResult<Response>>,
}

impl FanOutOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[WorkflowResult<Response>] {
        &self.results
    }

    /// Successful response per input, `None` where the input failed
    pub fn responses(&self) -> Vec<Option<&Response>> {
        self.results.iter().map(|r| r.as_ref().ok()).collect()
    }

    /// Failed inputs with their index
    pub fn failures(&self) -> Vec<(usize, &WorkflowError)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, r)| r.as_ref().err().map(|e| (index, e)))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    /// All responses, or the failure with the lowest input index
    pub fn into_responses(self) -> WorkflowResult<Vec<Response>> {
        self.results.into_iter().collect()
    }

    pub fn into_results(self) -> Vec<WorkflowResult<Response>> {
        self.results
    }
}

/// Run prepared requests through the bounded pool.
///
/// Under [`FailurePolicy::FailFast`] the first error in completion time is
/// returned and the remaining futures are dropped, which cancels them.
pub(crate) async fn dispatch(
    invoker: &dyn ModelInvoker,
    jobs: Vec<(Stage, InvocationRequest)>,
    expect_json: bool,
    config: &FanOutConfig,
    options: &CallOptions,
    trace: &mut ExecutionTrace,
) -> WorkflowResult<Vec<WorkflowResult<Response>>> {
    config.validate()?;

    let total = jobs.len();
    let options = CallOptions {
        call_timeout: config.call_timeout.or(options.call_timeout),
        ..options.clone()
    };
    let options = &options;

    let mut pending = stream::iter(jobs.into_iter().enumerate())
        .map(|(index, (stage, request))| async move {
            let (outcome, invocation) = step::invoke(invoker, &request, stage.clone(), options).await;
            let response = outcome
                .and_then(|completion| Response::from_completion(&completion, expect_json, &stage));
            (index, response, invocation)
        })
        .buffer_unordered(config.max_concurrency);

    let mut slots: Vec<Option<WorkflowResult<Response>>> = (0..total).map(|_| None).collect();

    while let Some((index, response, invocation)) = pending.next().await {
        trace.record(invocation);
        match response {
            Err(e) if config.failure_policy == FailurePolicy::FailFast => {
                tracing::warn!(index, error = %e, "Fan-out aborted, dropping in-flight calls");
                return Err(e);
            }
            other => slots[index] = Some(other),
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Parallel fan-out of one prompt over many inputs
#[derive(Debug, Clone)]
pub struct FanOut {
    name: String,
    template: PromptTemplate,
    system_prompt: Option<String>,
    expect_json: bool,
    config: FanOutConfig,
    options: CallOptions,
}

impl FanOut {
    /// Create a new fan-out builder
    pub fn builder() -> FanOutBuilder {
        FanOutBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Invoke the template once per input.
    ///
    /// Under [`FailurePolicy::FailFast`] any failure is returned as `Err`;
    /// under [`FailurePolicy::CollectAll`] failures appear in the outcome.
    pub async fn execute<S: AsRef<str>>(
        &self,
        inputs: &[S],
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<(FanOutOutcome, ExecutionTrace)> {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(&self.name);

        tracing::debug!(
            fan_out = %self.name,
            inputs = inputs.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting fan-out"
        );

        let jobs = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let prompt = self.template.render_input(input.as_ref());
                let request = self.options.apply(InvocationRequest::with_system(
                    self.system_prompt.as_deref(),
                    prompt,
                ));
                (Stage::FanOutItem { index }, request)
            })
            .collect();

        let dispatched = dispatch(
            invoker,
            jobs,
            self.expect_json,
            &self.config,
            &self.options,
            &mut trace,
        )
        .await;
        trace.finish(start.elapsed());

        match dispatched {
            Ok(results) => {
                let outcome = FanOutOutcome { results };
                if !outcome.is_complete() {
                    trace.success = false;
                    trace.error = Some(format!("{} input(s) failed", outcome.failures().len()));
                }
                tracing::debug!(
                    fan_out = %self.name,
                    failed = outcome.failures().len(),
                    duration_ms = trace.total_duration_ms,
                    "Fan-out completed"
                );
                Ok((outcome, trace))
            }
            Err(e) => {
                trace.fail(&e);
                Err(e)
            }
        }
    }

    /// Invoke the template once per input and return every response
    pub async fn run<S: AsRef<str>>(
        &self,
        inputs: &[S],
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<Vec<Response>> {
        let (outcome, _) = self.execute(inputs, invoker).await?;
        outcome.into_responses()
    }
}

/// Builder for creating FanOut workflows
#[derive(Debug, Clone)]
pub struct FanOutBuilder {
    name: String,
    template: Option<PromptTemplate>,
    system_prompt: Option<String>,
    expect_json: bool,
    config: FanOutConfig,
    options: CallOptions,
}

impl FanOutBuilder {
    pub fn new() -> Self {
        Self {
            name: "fan-out".to_string(),
            template: None,
            system_prompt: None,
            expect_json: false,
            config: FanOutConfig::default(),
            options: CallOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Prompt rendered with `{{input}}` bound to each input
    pub fn template(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn expect_json(mut self, expect_json: bool) -> Self {
        self.expect_json = expect_json;
        self
    }

    pub fn config(mut self, config: FanOutConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> WorkflowResult<FanOut> {
        self.config.validate()?;
        let template = self.template.ok_or_else(|| {
            WorkflowError::InvalidConfig(format!("fan-out '{}' has no template", self.name))
        })?;

        Ok(FanOut {
            name: self.name,
            template,
            system_prompt: self.system_prompt,
            expect_json: self.expect_json,
            config: self.config,
            options: self.options,
        })
    }
}

impl Default for FanOutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedInvoker, ScriptedReply};

    fn fan_out(max_concurrency: usize, policy: FailurePolicy) -> FanOut {
        FanOut::builder()
            .name("test")
            .template("Review: {{input}}")
            .max_concurrency(max_concurrency)
            .failure_policy(policy)
            .build()
            .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config: FanOutConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.call_timeout, None);

        let config: FanOutConfig =
            serde_json::from_str(r#"{"failure_policy": "collect_all", "call_timeout": "30s"}"#)
                .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::CollectAll);
        assert_eq!(config.call_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_builder_validation() {
        let result = FanOut::builder().template("{{input}}").max_concurrency(0).build();
        assert!(matches!(result, Err(WorkflowError::InvalidConfig(_))));

        let result = FanOut::builder().build();
        assert!(matches!(result, Err(WorkflowError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let invoker = ScriptedInvoker::new();
        let inputs: Vec<String> = Vec::new();

        let (outcome, trace) = fan_out(2, FailurePolicy::FailFast)
            .execute(&inputs, &invoker)
            .await
            .unwrap();

        assert!(outcome.is_empty());
        assert_eq!(trace.invocation_count(), 0);
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_order_under_reversed_latency() {
        let invoker = ScriptedInvoker::new()
            .with_rule("alpha", ScriptedReply::text("A").with_delay(300))
            .with_rule("beta", ScriptedReply::text("B").with_delay(200))
            .with_rule("gamma", ScriptedReply::text("C").with_delay(100));

        let responses = fan_out(3, FailurePolicy::FailFast)
            .run(&["alpha", "beta", "gamma"], &invoker)
            .await
            .unwrap();

        let texts: Vec<_> = responses.iter().map(|r| r.as_text().into_owned()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap() {
        let invoker =
            ScriptedInvoker::new().with_fallback(ScriptedReply::text("ok").with_delay(50));
        let inputs: Vec<String> = (0..8).map(|i| format!("item {i}")).collect();

        let responses = fan_out(2, FailurePolicy::FailFast)
            .run(&inputs, &invoker)
            .await
            .unwrap();

        assert_eq!(responses.len(), 8);
        assert_eq!(invoker.peak_concurrency(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_drops_in_flight_calls() {
        let invoker = ScriptedInvoker::new()
            .with_rule("bad", ScriptedReply::failure("rejected").with_delay(10))
            .with_fallback(ScriptedReply::text("ok").with_delay(1_000));

        let err = fan_out(2, FailurePolicy::FailFast)
            .run(&["slow", "bad", "x", "y", "z"], &invoker)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(&Stage::FanOutItem { index: 1 }));
        assert!(invoker.call_count() < 5);
    }

    #[tokio::test]
    async fn test_collect_all_reports_failures() {
        let invoker = ScriptedInvoker::new()
            .with_rule("bad", ScriptedReply::failure("rejected"))
            .with_fallback(ScriptedReply::text("ok"));

        let (outcome, trace) = fan_out(4, FailurePolicy::CollectAll)
            .execute(&["one", "bad", "three"], &invoker)
            .await
            .unwrap();

        assert_eq!(outcome.len(), 3);
        let failures = outcome.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 1);
        assert!(outcome.responses()[0].is_some());
        assert!(outcome.responses()[1].is_none());
        assert!(!trace.success);
        assert_eq!(trace.invocation_count(), 3);
        assert!(outcome.into_responses().is_err());
    }
}
