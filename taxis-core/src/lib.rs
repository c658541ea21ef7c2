//! # Taxis - Composition Patterns for Language Model Calls
//!
//! Taxis (Τάξις, "arrangement") composes one capability, "send a prompt to a
//! language model and get a reply", into five orchestration shapes:
//! - **Chain**: each step's reply becomes the next step's input
//! - **Parallel fan-out**: one prompt over many inputs, bounded concurrency
//! - **Router**: classify the input, then answer with the matching prompt
//! - **Orchestrator-workers**: decompose a task and fan the subtasks out
//! - **Evaluator-optimizer**: generate, evaluate, and refine until accepted
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taxis_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), WorkflowError> {
//!     let invoker = ScriptedInvoker::new().with_replies(["A summary", "Un résumé"]);
//!
//!     let chain = Chain::builder()
//!         .prompt("summarize", "Summarize: {{input}}")
//!         .prompt("translate", "Translate to French: {{input}}")
//!         .build()?;
//!
//!     let (response, trace) = chain.execute("Long article...", &invoker).await?;
//!     println!("{response} ({} calls)", trace.invocation_count());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Composers talk to models only through the [`llm::ModelInvoker`] trait.
//! Taxis ships no network clients; [`llm::ScriptedInvoker`] replays scripted
//! replies for tests and dry runs, and [`llm::CancellableInvoker`] adds
//! cooperative cancellation to any invoker.

pub mod config;
pub mod error;
pub mod llm;
pub mod parsing;
pub mod workflow;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{InvocationConfig, LoggingConfig, TaxisConfig};
    pub use crate::error::{Result, TaxisError};
    pub use crate::llm::{
        CancellableInvoker, Completion, InvocationRequest, Message, MessageRole, ModelInvoker,
        ScriptedInvoker, ScriptedReply, StructuredOutput, TokenUsage,
    };
    pub use crate::parsing::{JsonParser, ParseError};
    pub use crate::workflow::{
        CallOptions, Category, Chain, ChainStep, EvaluatorOptimizer, ExecutionTrace,
        FailurePolicy, FanOut, FanOutConfig, FeedbackCarry, LoopOutcome, OrchestrationResult,
        Orchestrator, PromptTemplate, RefinementResult, Response, Route, RouteTable, Router,
        RouterOutcome, Stage, WorkflowError, WorkflowResult,
    };
}
