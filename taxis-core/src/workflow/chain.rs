//! Chain Workflow Pattern
//!
//! Sequential execution where each step's output feeds the next step's input.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::llm::{InvocationRequest, ModelInvoker};

use super::execution::{ExecutionTrace, Stage, WorkflowError, WorkflowResult};
use super::step::{self, CallOptions, Response};
use super::template::PromptTemplate;

/// One prompt in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    /// Step name, reported in errors and traces
    pub name: String,

    /// Prompt rendered with `{{input}}` bound to the running response
    pub template: PromptTemplate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Decode the reply as JSON instead of keeping raw text
    #[serde(default)]
    pub expect_json: bool,
}

impl ChainStep {
    pub fn new(name: impl Into<String>, template: impl Into<PromptTemplate>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            system_prompt: None,
            expect_json: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// Chain workflow for sequential LLM operations
///
/// Step 0 receives the initial input; every later step receives the previous
/// step's response. The first failure aborts the chain.
#[derive(Debug, Clone)]
pub struct Chain {
    name: String,
    steps: Vec<ChainStep>,
    options: CallOptions,
}

impl Chain {
    /// Create a new chain builder
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// Number of steps, and of invoker calls per run
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a built chain
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute the chain with the given input
    pub async fn execute(
        &self,
        input: &str,
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<(Response, ExecutionTrace)> {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(&self.name);
        let mut current = Response::Text(input.to_string());

        tracing::debug!(chain = %self.name, steps = self.steps.len(), "Starting chain");

        for (index, chain_step) in self.steps.iter().enumerate() {
            let stage = Stage::ChainStep {
                index,
                name: chain_step.name.clone(),
            };
            let prompt = chain_step.template.render_input(&current.as_text());
            let request = self.options.apply(InvocationRequest::with_system(
                chain_step.system_prompt.as_deref(),
                prompt,
            ));

            let (outcome, invocation) =
                step::invoke(invoker, &request, stage.clone(), &self.options).await;
            trace.record(invocation);

            let response = outcome.and_then(|completion| {
                Response::from_completion(&completion, chain_step.expect_json, &stage)
            });

            match response {
                Ok(response) => current = response,
                Err(e) => {
                    tracing::warn!(chain = %self.name, step = index, error = %e, "Chain aborted");
                    trace.fail(&e);
                    trace.finish(start.elapsed());
                    return Err(e);
                }
            }
        }

        trace.finish(start.elapsed());
        tracing::debug!(
            chain = %self.name,
            duration_ms = trace.total_duration_ms,
            "Chain completed"
        );

        Ok((current, trace))
    }

    /// Execute the chain and return only the final response
    pub async fn run(&self, input: &str, invoker: &dyn ModelInvoker) -> WorkflowResult<Response> {
        let (output, _) = self.execute(input, invoker).await?;
        Ok(output)
    }
}

/// Builder for creating Chain workflows
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    name: String,
    steps: Vec<ChainStep>,
    options: CallOptions,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            name: "chain".to_string(),
            steps: Vec::new(),
            options: CallOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a step
    pub fn step(mut self, step: ChainStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a plain text step
    pub fn prompt(self, name: impl Into<String>, template: impl Into<PromptTemplate>) -> Self {
        self.step(ChainStep::new(name, template))
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = ChainStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Apply one system prompt to every step that has none
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        for chain_step in self.steps.iter_mut().filter(|s| s.system_prompt.is_none()) {
            chain_step.system_prompt = Some(prompt.clone());
        }
        self
    }

    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.options.call_timeout = Some(timeout);
        self
    }

    /// Build the chain, rejecting an empty step list
    pub fn build(self) -> WorkflowResult<Chain> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidConfig(format!(
                "chain '{}' has no steps",
                self.name
            )));
        }

        Ok(Chain {
            name: self.name,
            steps: self.steps,
            options: self.options,
        })
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}
