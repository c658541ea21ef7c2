//! Composer definitions loaded from TOML, YAML or JSON files

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Format, Json, Toml, Yaml};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use taxis_core::config::TaxisConfig;
use taxis_core::workflow::{
    Chain, ChainStep, Classifier, EvaluatorOptimizer, FanOut, FanOutConfig, Orchestrator,
    PromptTemplate, RefinementConfig, Route, RouteTable, Router,
};

/// Load a definition, choosing the format by extension
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Figment::new().merge(Yaml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        _ => Figment::new().merge(Toml::file(path)),
    };

    figment
        .extract()
        .with_context(|| format!("Failed to load definition {}", path.display()))
}

#[derive(Debug, Deserialize)]
pub struct ChainDefinition {
    #[serde(default)]
    pub name: Option<String>,

    /// Applied to steps without their own system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,

    pub steps: Vec<ChainStep>,
}

impl ChainDefinition {
    pub fn build(self, config: &TaxisConfig) -> Result<Chain> {
        let mut builder = Chain::builder()
            .steps(self.steps)
            .options(config.invocation.call_options());
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(prompt) = self.system_prompt {
            builder = builder.system_prompt(prompt);
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Deserialize)]
pub struct FanOutDefinition {
    #[serde(default)]
    pub name: Option<String>,

    pub template: PromptTemplate,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub expect_json: bool,

    /// Overrides the configured pool settings
    #[serde(default)]
    pub fan_out: Option<FanOutConfig>,
}

impl FanOutDefinition {
    pub fn build(self, config: &TaxisConfig) -> Result<FanOut> {
        let mut builder = FanOut::builder()
            .template(self.template)
            .expect_json(self.expect_json)
            .config(self.fan_out.unwrap_or_else(|| config.fan_out.clone()))
            .options(config.invocation.call_options());
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(prompt) = self.system_prompt {
            builder = builder.system_prompt(prompt);
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Deserialize)]
pub struct RouteDefinition {
    pub key: String,

    pub template: PromptTemplate,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RouterDefinition {
    #[serde(default)]
    pub name: Option<String>,

    /// Overrides the default classification prompt
    #[serde(default)]
    pub classification_prompt: Option<PromptTemplate>,

    pub routes: Vec<RouteDefinition>,
}

impl RouterDefinition {
    pub fn build(self, config: &TaxisConfig) -> Result<Router<String>> {
        let table = RouteTable::builder()
            .routes(self.routes.into_iter().map(|r| {
                let mut route = Route::new(r.template);
                route.system_prompt = r.system_prompt;
                route.description = r.description;
                (r.key, route)
            }))
            .build()?;

        let mut builder = Router::builder()
            .table(table)
            .options(config.invocation.call_options());
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(template) = self.classification_prompt {
            builder = builder.classifier(Classifier::new(template));
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorDefinition {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub decomposition_prompt: Option<PromptTemplate>,

    #[serde(default)]
    pub worker_prompt: Option<PromptTemplate>,

    #[serde(default)]
    pub synthesis_prompt: Option<PromptTemplate>,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub max_subtasks: Option<usize>,

    #[serde(default)]
    pub fan_out: Option<FanOutConfig>,
}

impl OrchestratorDefinition {
    pub fn build(self, config: &TaxisConfig) -> Result<Orchestrator> {
        let mut builder = Orchestrator::builder()
            .fan_out(self.fan_out.unwrap_or_else(|| config.fan_out.clone()))
            .options(config.invocation.call_options());
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(template) = self.decomposition_prompt {
            builder = builder.decomposition_prompt(template);
        }
        if let Some(template) = self.worker_prompt {
            builder = builder.worker_prompt(template);
        }
        if let Some(template) = self.synthesis_prompt {
            builder = builder.synthesis_prompt(template);
        }
        if let Some(prompt) = self.system_prompt {
            builder = builder.system_prompt(prompt);
        }
        if let Some(max) = self.max_subtasks {
            builder = builder.max_subtasks(max);
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Deserialize)]
pub struct RefineDefinition {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub generator_prompt: Option<PromptTemplate>,

    #[serde(default)]
    pub evaluator_prompt: Option<PromptTemplate>,

    #[serde(default)]
    pub generator_system_prompt: Option<String>,

    #[serde(default)]
    pub evaluator_system_prompt: Option<String>,

    /// Overrides the configured loop bounds
    #[serde(default)]
    pub refinement: Option<RefinementConfig>,
}

impl RefineDefinition {
    pub fn build(self, config: &TaxisConfig) -> Result<EvaluatorOptimizer> {
        let mut builder = EvaluatorOptimizer::builder()
            .config(self.refinement.unwrap_or_else(|| config.refinement.clone()))
            .options(config.invocation.call_options());
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(template) = self.generator_prompt {
            builder = builder.generator_prompt(template);
        }
        if let Some(template) = self.evaluator_prompt {
            builder = builder.evaluator_prompt(template);
        }
        if let Some(prompt) = self.generator_system_prompt {
            builder = builder.generator_system_prompt(prompt);
        }
        if let Some(prompt) = self.evaluator_system_prompt {
            builder = builder.evaluator_system_prompt(prompt);
        }
        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use taxis_core::workflow::FailurePolicy;

    fn write(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_chain_from_toml() {
        let file = write(
            ".toml",
            r#"
name = "summarize-translate"
system_prompt = "Be concise."

[[steps]]
name = "summarize"
template = "Summarize: {{input}}"

[[steps]]
name = "translate"
template = "Translate: {{input}}"
"#,
        );

        let definition: ChainDefinition = load(file.path()).unwrap();
        let chain = definition.build(&TaxisConfig::default()).unwrap();

        assert_eq!(chain.name(), "summarize-translate");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.steps()[1].system_prompt.as_deref(), Some("Be concise."));
    }

    #[test]
    fn test_empty_chain_rejected() {
        let file = write(".json", r#"{"steps": []}"#);
        let definition: ChainDefinition = load(file.path()).unwrap();
        assert!(definition.build(&TaxisConfig::default()).is_err());
    }

    #[test]
    fn test_fan_out_override_from_yaml() {
        let file = write(
            ".yaml",
            "template: \"Review: {{input}}\"\nfan_out:\n  max_concurrency: 2\n  failure_policy: collect_all\n",
        );

        let definition: FanOutDefinition = load(file.path()).unwrap();
        let fan_out = definition.build(&TaxisConfig::default()).unwrap();

        assert_eq!(fan_out.config().max_concurrency, 2);
        assert_eq!(fan_out.config().failure_policy, FailurePolicy::CollectAll);
    }

    #[test]
    fn test_router_rejects_duplicate_keys() {
        let file = write(
            ".json",
            r#"{"routes": [
                {"key": "billing", "template": "a"},
                {"key": "billing", "template": "b"}
            ]}"#,
        );

        let definition: RouterDefinition = load(file.path()).unwrap();
        assert!(definition.build(&TaxisConfig::default()).is_err());
    }

    #[test]
    fn test_refine_uses_config_bounds() {
        let file = write(".toml", "name = \"code\"\n");
        let mut config = TaxisConfig::default();
        config.refinement.max_iterations = 2;

        let definition: RefineDefinition = load(file.path()).unwrap();
        let optimizer = definition.build(&config).unwrap();

        assert_eq!(optimizer.config().max_iterations, 2);
    }
}
