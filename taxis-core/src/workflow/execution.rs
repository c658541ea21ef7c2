//! Workflow execution types and error handling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::TaxisError;
use crate::llm::TokenUsage;

/// Where in a composer run an invoker call happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// One step of a chain
    ChainStep { index: usize, name: String },
    /// One input of a fan-out
    FanOutItem { index: usize },
    /// Router classification call
    Classification,
    /// Router handler call for the selected category
    RouteHandler { category: String },
    /// Orchestrator decomposition call
    Decomposition,
    /// One orchestrator worker
    Worker { index: usize, task_type: String },
    /// Optional orchestrator synthesis call
    Synthesis,
    /// Evaluator-optimizer generation, 1-indexed
    Generation { iteration: usize },
    /// Evaluator-optimizer evaluation, 1-indexed
    Evaluation { iteration: usize },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ChainStep { index, name } => write!(f, "chain step {index} ('{name}')"),
            Stage::FanOutItem { index } => write!(f, "fan-out item {index}"),
            Stage::Classification => f.write_str("classification"),
            Stage::RouteHandler { category } => write!(f, "route handler '{category}'"),
            Stage::Decomposition => f.write_str("decomposition"),
            Stage::Worker { index, task_type } => write!(f, "worker {index} ('{task_type}')"),
            Stage::Synthesis => f.write_str("synthesis"),
            Stage::Generation { iteration } => write!(f, "generation (iteration {iteration})"),
            Stage::Evaluation { iteration } => write!(f, "evaluation (iteration {iteration})"),
        }
    }
}

static CLASSIFICATION: Stage = Stage::Classification;

/// Error type for workflow operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The model invoker failed
    #[error("Invocation failed at {stage}: {source}")]
    Invocation {
        stage: Stage,
        #[source]
        source: TaxisError,
    },

    /// The reply could not be decoded into the expected structure
    #[error("Failed to decode reply at {stage}: {message}")]
    Decode { stage: Stage, message: String },

    /// Classification selected a category outside the route table
    #[error("Classification selected unknown route '{selection}' (known: {})", .known.join(", "))]
    InvalidRoute {
        selection: String,
        known: Vec<String>,
    },

    /// Evaluator-optimizer hit its bound without an accepted solution
    #[error("No solution accepted after {iterations} iterations")]
    IterationExhausted {
        iterations: usize,
        last_response: String,
    },

    /// A single call exceeded the configured timeout
    #[error("Invocation at {stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// The call was cancelled
    #[error("Invocation at {stage} was cancelled")]
    Cancelled { stage: Stage },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WorkflowError {
    /// Stage the error occurred at, when it is tied to one call
    pub fn stage(&self) -> Option<&Stage> {
        match self {
            WorkflowError::Invocation { stage, .. }
            | WorkflowError::Decode { stage, .. }
            | WorkflowError::Timeout { stage, .. }
            | WorkflowError::Cancelled { stage } => Some(stage),
            WorkflowError::InvalidRoute { .. } => Some(&CLASSIFICATION),
            WorkflowError::IterationExhausted { .. } | WorkflowError::InvalidConfig(_) => None,
        }
    }

    pub(crate) fn from_invoker(stage: Stage, error: TaxisError) -> Self {
        match error {
            TaxisError::Cancelled => WorkflowError::Cancelled { stage },
            source => WorkflowError::Invocation { stage, source },
        }
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Trace of a single invoker call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationTrace {
    /// Where the call happened
    pub stage: Stage,

    /// Rendered user prompt
    pub prompt: String,

    /// Raw reply, when the call succeeded
    pub response: Option<String>,

    /// Error message, when it failed
    pub error: Option<String>,

    pub duration_ms: u64,

    pub usage: Option<TokenUsage>,
}

impl InvocationTrace {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Complete execution trace for one composer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Composer name
    pub workflow_name: String,

    /// Unique id of this run
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    /// Invoker calls in completion order
    pub invocations: Vec<InvocationTrace>,

    pub total_duration_ms: u64,

    /// Whether the run completed without error
    pub success: bool,

    /// Final error if failed
    pub error: Option<String>,
}

impl ExecutionTrace {
    /// Start a trace for a new run
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            invocations: Vec::new(),
            total_duration_ms: 0,
            success: true,
            error: None,
        }
    }

    /// Record one invoker call
    pub fn record(&mut self, invocation: InvocationTrace) {
        self.invocations.push(invocation);
    }

    /// Close the trace with the elapsed wall time
    pub fn finish(&mut self, elapsed: Duration) {
        self.total_duration_ms = elapsed.as_millis() as u64;
    }

    /// Mark the run as failed
    pub fn fail(&mut self, error: &WorkflowError) {
        self.success = false;
        self.error = Some(error.to_string());
    }

    /// Number of invoker calls issued
    pub fn invocation_count(&self) -> usize {
        self.invocations.len()
    }

    /// Calls made at stages matching `predicate`
    pub fn count_stages(&self, predicate: impl Fn(&Stage) -> bool) -> usize {
        self.invocations.iter().filter(|i| predicate(&i.stage)).count()
    }

    /// Get total token usage across all calls
    pub fn total_token_usage(&self) -> Option<TokenUsage> {
        self.invocations
            .iter()
            .filter_map(|i| i.usage)
            .reduce(|acc, usage| TokenUsage {
                prompt_tokens: acc.prompt_tokens + usage.prompt_tokens,
                completion_tokens: acc.completion_tokens + usage.completion_tokens,
                total_tokens: acc.total_tokens + usage.total_tokens,
            })
    }
}
