//! Evaluator-Optimizer Workflow Pattern
//!
//! Iterative refinement with generate-evaluate-refine loops. A generator call
//! proposes a solution, an evaluator call judges it, and rejected attempts
//! feed their feedback into the next generation until the evaluator passes
//! one or the iteration bound is reached.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::llm::{ModelInvoker, StructuredOutput, structured_request};

use super::execution::{ExecutionTrace, Stage, WorkflowError, WorkflowResult};
use super::step::{self, CallOptions};
use super::template::PromptTemplate;

/// Default generator prompt. Slots: `{{task}}`, `{{context}}`.
pub const DEFAULT_GENERATOR_PROMPT: &str = "Your goal is to complete the task below. \
If there is feedback from your previous generations, reflect on it to improve your solution.\n\n\
Task: {{task}}\n\n{{context}}";

/// Default evaluator prompt. Slots: `{{task}}`, `{{response}}`.
pub const DEFAULT_EVALUATOR_PROMPT: &str = "Evaluate the following solution for correctness \
and completeness against the task.\n\
You should be evaluating only and not attempting to solve the task.\n\
Only output \"PASS\" if all criteria are met and you have no further suggestions for improvements.\n\n\
Task: {{task}}\n\nSolution:\n{{response}}";

/// Generator reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// How the task and prior feedback were understood
    #[serde(default)]
    pub thoughts: String,

    /// Proposed solution
    pub response: String,
}

impl StructuredOutput for Generation {
    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "thoughts": {
                    "type": "string",
                    "description": "Your understanding of the task and feedback and how you plan to improve"
                },
                "response": {
                    "type": "string",
                    "description": "The proposed solution"
                }
            },
            "required": ["thoughts", "response"]
        })
    }
}

/// Evaluator judgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationStatus {
    Pass,
    NeedsImprovement,
    Fail,
}

impl EvaluationStatus {
    /// Only `PASS` accepts a solution
    pub fn is_accept(self) -> bool {
        self == EvaluationStatus::Pass
    }
}

/// Evaluator reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub evaluation: EvaluationStatus,

    /// What to improve, and why
    #[serde(default)]
    pub feedback: String,
}

impl StructuredOutput for Verdict {
    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "evaluation": {
                    "type": "string",
                    "enum": ["PASS", "NEEDS_IMPROVEMENT", "FAIL"]
                },
                "feedback": {
                    "type": "string",
                    "description": "What needs improvement and why"
                }
            },
            "required": ["evaluation", "feedback"]
        })
    }
}

/// How rejected attempts are carried into the next generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCarry {
    /// Every previous attempt with its feedback
    #[default]
    Cumulative,
    /// Only the most recent attempt and its feedback
    Latest,
}

fn default_max_iterations() -> usize {
    5
}

/// Loop bounds and feedback format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Maximum generate/evaluate cycles
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default)]
    pub feedback: FeedbackCarry,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            feedback: FeedbackCarry::default(),
        }
    }
}

impl RefinementConfig {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.max_iterations == 0 {
            return Err(WorkflowError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Refinement loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Generating,
    Evaluating,
    Accepted,
    Exhausted,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Accepted | LoopState::Exhausted)
    }

    /// Whether `self -> to` is a legal move
    pub fn can_transition(self, to: LoopState) -> bool {
        matches!(
            (self, to),
            (LoopState::Generating, LoopState::Evaluating)
                | (LoopState::Evaluating, LoopState::Generating)
                | (LoopState::Evaluating, LoopState::Accepted)
                | (LoopState::Evaluating, LoopState::Exhausted)
        )
    }
}

/// One observed state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub iteration: usize,
    pub from: LoopState,
    pub to: LoopState,
}

/// One generate/evaluate cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// 1-indexed
    pub iteration: usize,
    pub generation: Generation,
    pub verdict: Verdict,
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    Accepted,
    Exhausted,
}

/// Final solution plus the full refinement history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementResult {
    pub outcome: LoopOutcome,

    /// Accepted solution, or the last one when exhausted
    pub solution: String,

    /// Every cycle, in order
    pub history: Vec<Cycle>,

    pub transitions: Vec<Transition>,
}

impl RefinementResult {
    pub fn is_accepted(&self) -> bool {
        self.outcome == LoopOutcome::Accepted
    }

    pub fn iterations(&self) -> usize {
        self.history.len()
    }

    /// One generation per cycle
    pub fn chain_of_thought(&self) -> Vec<&Generation> {
        self.history.iter().map(|c| &c.generation).collect()
    }

    /// Treat exhaustion as an error
    pub fn into_accepted(self) -> WorkflowResult<Self> {
        match self.outcome {
            LoopOutcome::Accepted => Ok(self),
            LoopOutcome::Exhausted => Err(WorkflowError::IterationExhausted {
                iterations: self.history.len(),
                last_response: self.solution,
            }),
        }
    }
}

struct LoopMachine {
    state: LoopState,
    transitions: Vec<Transition>,
}

impl LoopMachine {
    fn new() -> Self {
        Self {
            state: LoopState::Generating,
            transitions: Vec::new(),
        }
    }

    fn advance(&mut self, to: LoopState, iteration: usize) {
        debug_assert!(self.state.can_transition(to), "{:?} -> {to:?}", self.state);
        self.transitions.push(Transition {
            iteration,
            from: self.state,
            to,
        });
        self.state = to;
    }
}

/// Evaluator-optimizer workflow
#[derive(Debug, Clone)]
pub struct EvaluatorOptimizer {
    name: String,
    generator_prompt: PromptTemplate,
    evaluator_prompt: PromptTemplate,
    generator_system_prompt: Option<String>,
    evaluator_system_prompt: Option<String>,
    config: RefinementConfig,
    options: CallOptions,
}

impl EvaluatorOptimizer {
    /// Create a new evaluator-optimizer builder
    pub fn builder() -> EvaluatorOptimizerBuilder {
        EvaluatorOptimizerBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    /// Refine a solution to `task` until it passes or the bound is hit.
    ///
    /// Exhaustion is reported as [`LoopOutcome::Exhausted`], not an error;
    /// invocation and decode failures abort the loop.
    pub async fn execute(
        &self,
        task: &str,
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<(RefinementResult, ExecutionTrace)> {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(&self.name);

        tracing::debug!(
            workflow = %self.name,
            max_iterations = self.config.max_iterations,
            "Starting refinement"
        );

        let result = self.refine(task, invoker, &mut trace).await;
        trace.finish(start.elapsed());

        match result {
            Ok(result) => {
                tracing::debug!(
                    workflow = %self.name,
                    outcome = ?result.outcome,
                    iterations = result.iterations(),
                    duration_ms = trace.total_duration_ms,
                    "Refinement completed"
                );
                Ok((result, trace))
            }
            Err(e) => {
                tracing::warn!(workflow = %self.name, error = %e, "Refinement failed");
                trace.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn run(&self, task: &str, invoker: &dyn ModelInvoker) -> WorkflowResult<RefinementResult> {
        let (result, _) = self.execute(task, invoker).await?;
        Ok(result)
    }

    async fn refine(
        &self,
        task: &str,
        invoker: &dyn ModelInvoker,
        trace: &mut ExecutionTrace,
    ) -> WorkflowResult<RefinementResult> {
        let max_iterations = self.config.max_iterations;
        let mut machine = LoopMachine::new();
        let mut history: Vec<Cycle> = Vec::new();

        for iteration in 1..=max_iterations {
            let context = self.carried_context(&history);
            let generation = self.generate(task, &context, iteration, invoker, trace).await?;
            machine.advance(LoopState::Evaluating, iteration);

            let verdict = self
                .evaluate(task, &generation.response, iteration, invoker, trace)
                .await?;

            tracing::debug!(
                workflow = %self.name,
                iteration,
                evaluation = ?verdict.evaluation,
                "Attempt evaluated"
            );

            let accepted = verdict.evaluation.is_accept();
            history.push(Cycle {
                iteration,
                generation,
                verdict,
            });

            let outcome = if accepted {
                machine.advance(LoopState::Accepted, iteration);
                LoopOutcome::Accepted
            } else if iteration == max_iterations {
                machine.advance(LoopState::Exhausted, iteration);
                tracing::info!(
                    workflow = %self.name,
                    iterations = iteration,
                    "Iteration bound reached without an accepted solution"
                );
                LoopOutcome::Exhausted
            } else {
                machine.advance(LoopState::Generating, iteration);
                continue;
            };

            let solution = history
                .last()
                .map(|c| c.generation.response.clone())
                .unwrap_or_default();

            return Ok(RefinementResult {
                outcome,
                solution,
                history,
                transitions: machine.transitions,
            });
        }

        Err(WorkflowError::InvalidConfig(
            "max_iterations must be at least 1".to_string(),
        ))
    }

    fn carried_context(&self, history: &[Cycle]) -> String {
        let carried = match self.config.feedback {
            FeedbackCarry::Cumulative => history,
            FeedbackCarry::Latest => &history[history.len().saturating_sub(1)..],
        };
        if carried.is_empty() {
            return String::new();
        }

        let mut context = String::from("Previous attempts:");
        for cycle in carried {
            context.push_str(&format!(
                "\n\nAttempt {}:\n{}\nFeedback: {}",
                cycle.iteration, cycle.generation.response, cycle.verdict.feedback
            ));
        }
        context
    }

    async fn generate(
        &self,
        task: &str,
        context: &str,
        iteration: usize,
        invoker: &dyn ModelInvoker,
        trace: &mut ExecutionTrace,
    ) -> WorkflowResult<Generation> {
        let stage = Stage::Generation { iteration };
        let prompt = if self.generator_prompt.has_slot("context") || context.is_empty() {
            self.generator_prompt
                .render(&[("task", task), ("context", context)])
        } else {
            format!(
                "{}\n\n{context}",
                self.generator_prompt.render(&[("task", task)])
            )
        };
        let request = self.options.apply(structured_request::<Generation>(
            self.generator_system_prompt.as_deref(),
            prompt.trim_end(),
        ));

        let (outcome, invocation) = step::invoke(invoker, &request, stage.clone(), &self.options).await;
        trace.record(invocation);

        step::decode::<Generation>(&outcome?, &stage)
    }

    async fn evaluate(
        &self,
        task: &str,
        response: &str,
        iteration: usize,
        invoker: &dyn ModelInvoker,
        trace: &mut ExecutionTrace,
    ) -> WorkflowResult<Verdict> {
        let stage = Stage::Evaluation { iteration };
        let prompt = self
            .evaluator_prompt
            .render(&[("task", task), ("response", response)]);
        let request = self.options.apply(structured_request::<Verdict>(
            self.evaluator_system_prompt.as_deref(),
            &prompt,
        ));

        let (outcome, invocation) = step::invoke(invoker, &request, stage.clone(), &self.options).await;
        trace.record(invocation);

        step::decode::<Verdict>(&outcome?, &stage)
    }
}

/// Builder for creating EvaluatorOptimizer workflows
#[derive(Debug, Clone)]
pub struct EvaluatorOptimizerBuilder {
    name: String,
    generator_prompt: PromptTemplate,
    evaluator_prompt: PromptTemplate,
    generator_system_prompt: Option<String>,
    evaluator_system_prompt: Option<String>,
    config: RefinementConfig,
    options: CallOptions,
}

impl EvaluatorOptimizerBuilder {
    pub fn new() -> Self {
        Self {
            name: "evaluator-optimizer".to_string(),
            generator_prompt: PromptTemplate::new(DEFAULT_GENERATOR_PROMPT),
            evaluator_prompt: PromptTemplate::new(DEFAULT_EVALUATOR_PROMPT),
            generator_system_prompt: None,
            evaluator_system_prompt: None,
            config: RefinementConfig::default(),
            options: CallOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn generator_prompt(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.generator_prompt = template.into();
        self
    }

    pub fn evaluator_prompt(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.evaluator_prompt = template.into();
        self
    }

    pub fn generator_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.generator_system_prompt = Some(prompt.into());
        self
    }

    pub fn evaluator_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.evaluator_system_prompt = Some(prompt.into());
        self
    }

    pub fn config(mut self, config: RefinementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn feedback(mut self, carry: FeedbackCarry) -> Self {
        self.config.feedback = carry;
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

    pub fn build(self) -> WorkflowResult<EvaluatorOptimizer> {
        self.config.validate()?;

        Ok(EvaluatorOptimizer {
            name: self.name,
            generator_prompt: self.generator_prompt,
            evaluator_prompt: self.evaluator_prompt,
            generator_system_prompt: self.generator_system_prompt,
            evaluator_system_prompt: self.evaluator_system_prompt,
            config: self.config,
            options: self.options,
        })
    }
}

impl Default for EvaluatorOptimizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
