//! Orchestrator-Workers Pattern
//!
//! One decomposition call splits a task into subtasks; the fan-out pool then
//! runs the worker prompt once per subtask, and an optional synthesis call
//! combines the worker responses.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::llm::{InvocationRequest, ModelInvoker, StructuredOutput, structured_request};

use super::execution::{ExecutionTrace, Stage, WorkflowError, WorkflowResult};
use super::parallel::{self, FailurePolicy, FanOutConfig};
use super::step::{self, CallOptions, Response};
use super::template::PromptTemplate;

/// Default decomposition prompt. Slot: `{{task}}`.
pub const DEFAULT_DECOMPOSITION_PROMPT: &str = "Analyze this task and break it down into \
distinct approaches or subtasks that can be worked on independently.\n\n\
Task: {{task}}\n\n\
Explain your understanding of the task and which variations would be valuable, \
then list the subtasks.";

/// Default worker prompt. Slots: `{{task}}`, `{{task_type}}`, `{{task_description}}`.
pub const DEFAULT_WORKER_PROMPT: &str = "Generate content based on:\n\
Task: {{task}}\n\
Style: {{task_type}}\n\
Guidelines: {{task_description}}";

/// A unit of work produced by decomposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    /// Short label for the kind of work
    #[serde(alias = "type")]
    pub task_type: String,

    /// What the worker should do
    pub description: String,
}

impl SubTask {
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            description: description.into(),
        }
    }
}

/// Structured reply of the decomposition call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    #[serde(default)]
    pub analysis: String,

    pub tasks: Vec<SubTask>,
}

impl StructuredOutput for Decomposition {
    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "analysis": {
                    "type": "string",
                    "description": "Understanding of the task and the approaches worth taking"
                },
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task_type": {"type": "string"},
                            "description": {"type": "string"}
                        },
                        "required": ["task_type", "description"]
                    }
                }
            },
            "required": ["analysis", "tasks"]
        })
    }
}

/// One completed worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    /// Position of the subtask in the decomposition
    pub index: usize,
    pub subtask: SubTask,
    pub response: Response,
}

/// One failed worker, reported under [`FailurePolicy::CollectAll`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub index: usize,
    pub subtask: SubTask,
    pub error: String,
}

/// Bundled result of an orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// Analysis text from decomposition
    pub analysis: String,

    /// Completed workers, in subtask order
    pub workers: Vec<WorkerOutput>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<WorkerFailure>,

    /// Synthesis reply, when a synthesis prompt is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
}

impl OrchestrationResult {
    /// Worker responses in subtask order
    pub fn responses(&self) -> Vec<&Response> {
        self.workers.iter().map(|w| &w.response).collect()
    }
}

/// Orchestrator-workers workflow
#[derive(Debug, Clone)]
pub struct Orchestrator {
    name: String,
    decomposition_prompt: PromptTemplate,
    worker_prompt: PromptTemplate,
    synthesis_prompt: Option<PromptTemplate>,
    system_prompt: Option<String>,
    max_subtasks: Option<usize>,
    fan_out: FanOutConfig,
    options: CallOptions,
}

impl Orchestrator {
    /// Create a new orchestrator builder
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decompose `task`, run one worker per subtask, and bundle the results
    pub async fn execute(
        &self,
        task: &str,
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<(OrchestrationResult, ExecutionTrace)> {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(&self.name);

        let result = self.orchestrate(task, invoker, &mut trace).await;
        trace.finish(start.elapsed());

        match result {
            Ok(result) => {
                if !result.failures.is_empty() {
                    trace.success = false;
                    trace.error = Some(format!("{} worker(s) failed", result.failures.len()));
                }
                tracing::debug!(
                    orchestrator = %self.name,
                    workers = result.workers.len(),
                    failed = result.failures.len(),
                    duration_ms = trace.total_duration_ms,
                    "Orchestration completed"
                );
                Ok((result, trace))
            }
            Err(e) => {
                tracing::warn!(orchestrator = %self.name, error = %e, "Orchestration failed");
                trace.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn run(
        &self,
        task: &str,
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<OrchestrationResult> {
        let (result, _) = self.execute(task, invoker).await?;
        Ok(result)
    }

    async fn orchestrate(
        &self,
        task: &str,
        invoker: &dyn ModelInvoker,
        trace: &mut ExecutionTrace,
    ) -> WorkflowResult<OrchestrationResult> {
        let decomposition = self.decompose(task, invoker, trace).await?;

        if let Some(max) = self.max_subtasks {
            if decomposition.tasks.len() > max {
                return Err(WorkflowError::InvalidConfig(format!(
                    "decomposition produced {} subtasks, limit is {max}",
                    decomposition.tasks.len()
                )));
            }
        }

        tracing::debug!(
            orchestrator = %self.name,
            subtasks = decomposition.tasks.len(),
            "Task decomposed"
        );

        let jobs = decomposition
            .tasks
            .iter()
            .enumerate()
            .map(|(index, subtask)| {
                let prompt = self.worker_prompt.render(&[
                    ("task", task),
                    ("task_type", subtask.task_type.as_str()),
                    ("task_description", subtask.description.as_str()),
                ]);
                let request = self.options.apply(InvocationRequest::with_system(
                    self.system_prompt.as_deref(),
                    prompt,
                ));
                let stage = Stage::Worker {
                    index,
                    task_type: subtask.task_type.clone(),
                };
                (stage, request)
            })
            .collect();

        let results =
            parallel::dispatch(invoker, jobs, false, &self.fan_out, &self.options, trace).await?;

        let mut workers = Vec::new();
        let mut failures = Vec::new();
        for ((index, subtask), result) in decomposition.tasks.into_iter().enumerate().zip(results) {
            match result {
                Ok(response) => workers.push(WorkerOutput {
                    index,
                    subtask,
                    response,
                }),
                Err(e) => failures.push(WorkerFailure {
                    index,
                    subtask,
                    error: e.to_string(),
                }),
            }
        }

        let synthesis = match &self.synthesis_prompt {
            Some(template) => Some(
                self.synthesize(template, task, &decomposition.analysis, &workers, invoker, trace)
                    .await?,
            ),
            None => None,
        };

        Ok(OrchestrationResult {
            analysis: decomposition.analysis,
            workers,
            failures,
            synthesis,
        })
    }

    async fn decompose(
        &self,
        task: &str,
        invoker: &dyn ModelInvoker,
        trace: &mut ExecutionTrace,
    ) -> WorkflowResult<Decomposition> {
        let prompt = self.decomposition_prompt.render(&[("task", task)]);
        let request = self.options.apply(structured_request::<Decomposition>(
            self.system_prompt.as_deref(),
            &prompt,
        ));

        let (outcome, invocation) =
            step::invoke(invoker, &request, Stage::Decomposition, &self.options).await;
        trace.record(invocation);

        step::decode::<Decomposition>(&outcome?, &Stage::Decomposition)
    }

    async fn synthesize(
        &self,
        template: &PromptTemplate,
        task: &str,
        analysis: &str,
        workers: &[WorkerOutput],
        invoker: &dyn ModelInvoker,
        trace: &mut ExecutionTrace,
    ) -> WorkflowResult<String> {
        let results = workers
            .iter()
            .map(|w| format!("### {}\n{}", w.subtask.task_type, w.response))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = template.render(&[
            ("task", task),
            ("analysis", analysis),
            ("results", results.as_str()),
        ]);
        let request = self.options.apply(InvocationRequest::with_system(
            self.system_prompt.as_deref(),
            prompt,
        ));

        let (outcome, invocation) =
            step::invoke(invoker, &request, Stage::Synthesis, &self.options).await;
        trace.record(invocation);

        Ok(outcome?.content)
    }
}

/// Builder for creating Orchestrator workflows
#[derive(Debug, Clone)]
pub struct OrchestratorBuilder {
    name: String,
    decomposition_prompt: PromptTemplate,
    worker_prompt: PromptTemplate,
    synthesis_prompt: Option<PromptTemplate>,
    system_prompt: Option<String>,
    max_subtasks: Option<usize>,
    fan_out: FanOutConfig,
    options: CallOptions,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            name: "orchestrator".to_string(),
            decomposition_prompt: PromptTemplate::new(DEFAULT_DECOMPOSITION_PROMPT),
            worker_prompt: PromptTemplate::new(DEFAULT_WORKER_PROMPT),
            synthesis_prompt: None,
            system_prompt: None,
            max_subtasks: None,
            fan_out: FanOutConfig::default(),
            options: CallOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn decomposition_prompt(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.decomposition_prompt = template.into();
        self
    }

    pub fn worker_prompt(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.worker_prompt = template.into();
        self
    }

    /// Enable a synthesis call over the worker responses
    pub fn synthesis_prompt(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.synthesis_prompt = Some(template.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_subtasks(mut self, max: usize) -> Self {
        self.max_subtasks = Some(max);
        self
    }

    /// Pool settings for the worker phase
    pub fn fan_out(mut self, config: FanOutConfig) -> Self {
        self.fan_out = config;
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.fan_out.max_concurrency = max;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.fan_out.failure_policy = policy;
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

    pub fn build(self) -> WorkflowResult<Orchestrator> {
        self.fan_out.validate()?;
        if self.max_subtasks == Some(0) {
            return Err(WorkflowError::InvalidConfig(
                "max_subtasks must be at least 1".to_string(),
            ));
        }

        Ok(Orchestrator {
            name: self.name,
            decomposition_prompt: self.decomposition_prompt,
            worker_prompt: self.worker_prompt,
            synthesis_prompt: self.synthesis_prompt,
            system_prompt: self.system_prompt,
            max_subtasks: self.max_subtasks,
            fan_out: self.fan_out,
            options: self.options,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
