//! Router Workflow Pattern
//!
//! Classifies input into exactly one category of a fixed route table, then
//! answers it with that category's prompt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::llm::{InvocationRequest, ModelInvoker};

use super::classifier::{Classification, Classifier};
use super::execution::{ExecutionTrace, Stage, WorkflowError, WorkflowResult};
use super::step::{self, CallOptions, Response};
use super::template::PromptTemplate;

/// A route table key.
///
/// Implement this for a closed enum to get exhaustive, typed dispatch;
/// tables loaded from files use `String`.
pub trait Category: Clone + fmt::Debug + Send + Sync {
    /// Key the model is asked to select
    fn key(&self) -> &str;
}

impl Category for String {
    fn key(&self) -> &str {
        self
    }
}

impl Category for &'static str {
    fn key(&self) -> &str {
        self
    }
}

/// Handler prompt for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Handler prompt. `{{input}}` is bound to the original input; without
    /// that slot the input is appended.
    pub template: PromptTemplate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Shown next to the key in the classification prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Route {
    pub fn new(template: impl Into<PromptTemplate>) -> Self {
        Self {
            template: template.into(),
            system_prompt: None,
            description: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn render(&self, input: &str) -> String {
        if self.template.has_slot("input") {
            self.template.render_input(input)
        } else {
            format!("{}\nInput: {input}", self.template)
        }
    }
}

/// Fixed mapping from category to handler, in insertion order
#[derive(Debug, Clone)]
pub struct RouteTable<C: Category> {
    routes: Vec<(C, Route)>,
}

impl<C: Category> RouteTable<C> {
    pub fn builder() -> RouteTableBuilder<C> {
        RouteTableBuilder { routes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Always false for a built table
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.routes.iter().map(|(c, _)| c.key().to_string()).collect()
    }

    pub fn get(&self, category: &C) -> Option<&Route> {
        self.routes
            .iter()
            .find(|(c, _)| c.key() == category.key())
            .map(|(_, route)| route)
    }

    /// Match a model selection to a table key.
    ///
    /// Surrounding whitespace and ASCII case are ignored; anything else must
    /// match a key exactly.
    pub fn resolve(&self, selection: &str) -> WorkflowResult<(&C, &Route)> {
        let wanted = selection.trim();
        self.routes
            .iter()
            .find(|(c, _)| c.key() == wanted)
            .or_else(|| {
                self.routes
                    .iter()
                    .find(|(c, _)| c.key().eq_ignore_ascii_case(wanted))
            })
            .map(|(c, route)| (c, route))
            .ok_or_else(|| WorkflowError::InvalidRoute {
                selection: selection.to_string(),
                known: self.keys(),
            })
    }

    fn listing(&self) -> Vec<(String, Option<String>)> {
        self.routes
            .iter()
            .map(|(c, route)| (c.key().to_string(), route.description.clone()))
            .collect()
    }
}

/// Builder for route tables
#[derive(Debug, Clone)]
pub struct RouteTableBuilder<C: Category> {
    routes: Vec<(C, Route)>,
}

impl<C: Category> RouteTableBuilder<C> {
    pub fn route(mut self, category: C, route: Route) -> Self {
        self.routes.push((category, route));
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = (C, Route)>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Build the table, rejecting duplicate keys and empty tables
    pub fn build(self) -> WorkflowResult<RouteTable<C>> {
        if self.routes.is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "route table has no routes".to_string(),
            ));
        }

        for (i, (category, _)) in self.routes.iter().enumerate() {
            if self.routes[..i].iter().any(|(c, _)| c.key() == category.key()) {
                return Err(WorkflowError::InvalidConfig(format!(
                    "duplicate route '{}'",
                    category.key()
                )));
            }
        }

        Ok(RouteTable {
            routes: self.routes,
        })
    }
}

/// Result of one routed run
#[derive(Debug, Clone, Serialize)]
pub struct RouterOutcome<C: Category> {
    /// Classification reply; `None` when the category was given
    pub classification: Option<Classification>,

    /// Category whose handler answered
    pub category: C,

    pub response: Response,
}

/// Router workflow that directs input to handlers based on classification
#[derive(Debug, Clone)]
pub struct Router<C: Category> {
    name: String,
    table: RouteTable<C>,
    classifier: Classifier,
    options: CallOptions,
}

impl<C: Category> Router<C> {
    /// Create a new router builder
    pub fn builder() -> RouterBuilder<C> {
        RouterBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &RouteTable<C> {
        &self.table
    }

    /// Classify the input, then invoke the selected route.
    ///
    /// An unknown selection fails with [`WorkflowError::InvalidRoute`]
    /// before any handler call.
    pub async fn execute(
        &self,
        input: &str,
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<(RouterOutcome<C>, ExecutionTrace)> {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(&self.name);

        tracing::debug!(router = %self.name, routes = self.table.len(), "Starting router");

        let (classification, invocation) = self
            .classifier
            .classify(input, &self.table.listing(), invoker, &self.options)
            .await;
        trace.record(invocation);

        let resolved = classification.and_then(|classification| {
            let (category, route) = self.table.resolve(&classification.selection)?;
            Ok((classification, category, route))
        });

        let (classification, category, route) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(router = %self.name, error = %e, "Routing failed");
                trace.fail(&e);
                trace.finish(start.elapsed());
                return Err(e);
            }
        };

        tracing::debug!(router = %self.name, category = category.key(), "Route selected");

        let response = self.handle(category, route, input, invoker, &mut trace).await;
        trace.finish(start.elapsed());

        match response {
            Ok(response) => {
                tracing::debug!(
                    router = %self.name,
                    duration_ms = trace.total_duration_ms,
                    "Router completed"
                );
                Ok((
                    RouterOutcome {
                        classification: Some(classification),
                        category: category.clone(),
                        response,
                    },
                    trace,
                ))
            }
            Err(e) => {
                tracing::warn!(router = %self.name, error = %e, "Route handler failed");
                trace.fail(&e);
                Err(e)
            }
        }
    }

    /// Classify and route, returning only the handler response
    pub async fn run(&self, input: &str, invoker: &dyn ModelInvoker) -> WorkflowResult<Response> {
        let (outcome, _) = self.execute(input, invoker).await?;
        Ok(outcome.response)
    }

    /// Invoke a known category's handler without classifying
    pub async fn execute_with_category(
        &self,
        category: &C,
        input: &str,
        invoker: &dyn ModelInvoker,
    ) -> WorkflowResult<(RouterOutcome<C>, ExecutionTrace)> {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(&self.name);

        let (category, route) = self.table.resolve(category.key())?;
        let response = self.handle(category, route, input, invoker, &mut trace).await;
        trace.finish(start.elapsed());

        match response {
            Ok(response) => Ok((
                RouterOutcome {
                    classification: None,
                    category: category.clone(),
                    response,
                },
                trace,
            )),
            Err(e) => {
                trace.fail(&e);
                Err(e)
            }
        }
    }

    async fn handle(
        &self,
        category: &C,
        route: &Route,
        input: &str,
        invoker: &dyn ModelInvoker,
        trace: &mut ExecutionTrace,
    ) -> WorkflowResult<Response> {
        let stage = Stage::RouteHandler {
            category: category.key().to_string(),
        };
        let request = self.options.apply(InvocationRequest::with_system(
            route.system_prompt.as_deref(),
            route.render(input),
        ));

        let (outcome, invocation) = step::invoke(invoker, &request, stage, &self.options).await;
        trace.record(invocation);

        outcome.map(|completion| Response::Text(completion.content))
    }
}

/// Builder for creating Router workflows
#[derive(Debug, Clone)]
pub struct RouterBuilder<C: Category> {
    name: String,
    table: Option<RouteTable<C>>,
    classifier: Classifier,
    options: CallOptions,
}

impl<C: Category> RouterBuilder<C> {
    pub fn new() -> Self {
        Self {
            name: "router".to_string(),
            table: None,
            classifier: Classifier::default(),
            options: CallOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn table(mut self, table: RouteTable<C>) -> Self {
        self.table = Some(table);
        self
    }

    /// Override the classification prompt
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> WorkflowResult<Router<C>> {
        let table = self.table.ok_or_else(|| {
            WorkflowError::InvalidConfig(format!("router '{}' has no route table", self.name))
        })?;

        Ok(Router {
            name: self.name,
            table,
            classifier: self.classifier,
            options: self.options,
        })
    }
}

impl<C: Category> Default for RouterBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedInvoker;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    enum Team {
        Billing,
        Technical,
    }

    impl Category for Team {
        fn key(&self) -> &str {
            match self {
                Team::Billing => "billing",
                Team::Technical => "technical",
            }
        }
    }

    fn router() -> Router<Team> {
        let table = RouteTable::builder()
            .route(Team::Billing, Route::new("You handle billing.\nTicket: {{input}}"))
            .route(Team::Technical, Route::new("You handle technical issues."))
            .build()
            .unwrap();

        Router::builder().name("support").table(table).build().unwrap()
    }

    fn selection(key: &str) -> String {
        serde_json::json!({"reasoning": "because", "selection": key}).to_string()
    }

    #[test]
    fn test_table_rejects_duplicates_and_empty() {
        let result = RouteTable::<String>::builder()
            .route("a".to_string(), Route::new("x"))
            .route("a".to_string(), Route::new("y"))
            .build();
        assert!(matches!(result, Err(WorkflowError::InvalidConfig(_))));

        let result = RouteTable::<String>::builder().build();
        assert!(matches!(result, Err(WorkflowError::InvalidConfig(_))));
    }

    #[test]
    fn test_resolve() {
        let router = router();
        let (team, _) = router.table().resolve(" Billing ").unwrap();
        assert_eq!(*team, Team::Billing);

        let err = router.table().resolve("sales").unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRoute { .. }));
    }

    #[tokio::test]
    async fn test_router_execution() {
        let invoker = ScriptedInvoker::new()
            .with_reply(selection("billing"))
            .with_reply("Refund issued");

        let (outcome, trace) = router().execute("I was charged twice", &invoker).await.unwrap();

        assert_eq!(outcome.category, Team::Billing);
        assert_eq!(outcome.response.as_text(), "Refund issued");
        assert_eq!(outcome.classification.unwrap().reasoning, "because");
        assert_eq!(trace.invocation_count(), 2);
        assert_eq!(
            invoker.prompts()[1],
            "You handle billing.\nTicket: I was charged twice"
        );
    }

    #[tokio::test]
    async fn test_input_appended_without_slot() {
        let invoker = ScriptedInvoker::new()
            .with_reply(selection("technical"))
            .with_reply("Restart it");

        router().run("It crashes", &invoker).await.unwrap();

        assert_eq!(
            invoker.prompts()[1],
            "You handle technical issues.\nInput: It crashes"
        );
    }

    #[tokio::test]
    async fn test_unknown_selection_issues_no_handler_call() {
        let invoker = ScriptedInvoker::new()
            .with_reply(selection("sales"))
            .with_reply("should not be used");

        let err = router().run("Buy more", &invoker).await.unwrap_err();

        match err {
            WorkflowError::InvalidRoute { selection, known } => {
                assert_eq!(selection, "sales");
                assert_eq!(known, vec!["billing", "technical"]);
            }
            other => panic!("Expected InvalidRoute, got {other:?}"),
        }
        assert_eq!(invoker.call_count(), 1);
    }

    #[tokio::test]
    async fn test_execute_with_category() {
        let invoker = ScriptedInvoker::new().with_reply("Handled");

        let (outcome, trace) = router()
            .execute_with_category(&Team::Technical, "It crashes", &invoker)
            .await
            .unwrap();

        assert!(outcome.classification.is_none());
        assert_eq!(outcome.category, Team::Technical);
        assert_eq!(trace.invocation_count(), 1);
    }
}
