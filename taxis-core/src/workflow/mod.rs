//! Workflow Patterns for composing model calls
//!
//! Five composition shapes over a single [`ModelInvoker`](crate::llm::ModelInvoker):
//!
//! - **Chain**: Sequential steps where each output feeds the next input
//! - **Parallel**: One prompt over many inputs with bounded concurrency
//! - **Router**: Classifies input into one category and answers with its prompt
//! - **Orchestrator**: Decomposes a task and runs one worker per subtask
//! - **Evaluator-Optimizer**: Iteratively refines output based on evaluation
//!
//! Every composer holds only immutable definitions; one run owns its trace
//! and its intermediate responses.
//!
//! # Example
//!
//! ```rust,ignore
//! use taxis_core::workflow::{Chain, FanOut, Route, RouteTable, Router};
//!
//! // Chain example
//! let chain = Chain::builder()
//!     .prompt("summarize", "Summarize: {{input}}")
//!     .prompt("translate", "Translate to French: {{input}}")
//!     .build()?;
//!
//! let (output, trace) = chain.execute(input, &invoker).await?;
//!
//! // Router example
//! let table = RouteTable::builder()
//!     .route("billing".to_string(), Route::new("You are a billing specialist."))
//!     .route("technical".to_string(), Route::new("You are a support engineer."))
//!     .build()?;
//!
//! let router = Router::builder().table(table).build()?;
//! let (outcome, trace) = router.execute(ticket, &invoker).await?;
//! ```
//!
//! # References
//!
//! - [Anthropic Building Effective Agents](https://www.anthropic.com/research/building-effective-agents)

mod chain;
mod classifier;
mod evaluator_optimizer;
mod execution;
mod orchestrator;
mod parallel;
mod router;
mod step;
mod template;

pub use chain::{Chain, ChainBuilder, ChainStep};
pub use classifier::{Classification, Classifier, DEFAULT_CLASSIFICATION_PROMPT};
pub use evaluator_optimizer::{
    Cycle, DEFAULT_EVALUATOR_PROMPT, DEFAULT_GENERATOR_PROMPT, EvaluationStatus,
    EvaluatorOptimizer, EvaluatorOptimizerBuilder, FeedbackCarry, Generation, LoopOutcome,
    LoopState, RefinementConfig, RefinementResult, Transition, Verdict,
};
pub use execution::{ExecutionTrace, InvocationTrace, Stage, WorkflowError, WorkflowResult};
pub use orchestrator::{
    DEFAULT_DECOMPOSITION_PROMPT, DEFAULT_WORKER_PROMPT, Decomposition, OrchestrationResult,
    Orchestrator, OrchestratorBuilder, SubTask, WorkerFailure, WorkerOutput,
};
pub use parallel::{FailurePolicy, FanOut, FanOutBuilder, FanOutConfig, FanOutOutcome};
pub use router::{
    Category, Route, RouteTable, RouteTableBuilder, Router, RouterBuilder, RouterOutcome,
};
pub use step::{CallOptions, Response};
pub use template::PromptTemplate;
