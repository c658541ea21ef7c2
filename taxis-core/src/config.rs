//! Configuration types for Taxis

use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TaxisError};
use crate::workflow::{CallOptions, FanOutConfig, RefinementConfig};

/// Main configuration for Taxis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxisConfig {
    /// Sampling and timeout settings for every invoker call
    pub invocation: InvocationConfig,

    /// Fan-out pool settings, also used by the orchestrator's worker phase
    pub fan_out: FanOutConfig,

    /// Evaluator-optimizer bounds
    pub refinement: RefinementConfig,

    pub logging: LoggingConfig,
}

/// Per-call settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Timeout applied to each call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Option<Duration>,
}

impl InvocationConfig {
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            call_timeout: self.call_timeout,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl TaxisConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `taxis.toml` in the working directory
    /// 3. The file named by `TAXIS_CONFIG_PATH`
    /// 4. `TAXIS_` environment variables, nested keys split on `__`
    ///    (`TAXIS_FAN_OUT__MAX_CONCURRENCY=8`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("taxis.toml"));

        if let Ok(path) = std::env::var("TAXIS_CONFIG_PATH") {
            figment = merge_file(figment, Path::new(&path));
        }

        let figment = figment.merge(Env::prefixed("TAXIS_").ignore(&["CONFIG_PATH"]).split("__"));

        let config: TaxisConfig = figment.extract().map_err(|e| {
            TaxisError::Configuration(format!("Failed to load configuration: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.json`, otherwise TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TaxisError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: TaxisConfig = merge_file(Figment::new(), path).extract().map_err(|e| {
            TaxisError::Configuration(format!("Failed to load configuration file: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the fan-out allows no concurrency or refinement
    /// allows no iterations.
    pub fn validate(&self) -> Result<()> {
        self.fan_out
            .validate()
            .map_err(|e| TaxisError::Configuration(e.to_string()))?;
        self.refinement
            .validate()
            .map_err(|e| TaxisError::Configuration(e.to_string()))?;
        Ok(())
    }
}

/// Merge a file into `figment`, choosing the format by extension
pub(crate) fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{FailurePolicy, FeedbackCarry};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = TaxisConfig::default();
        assert_eq!(config.fan_out.max_concurrency, 4);
        assert_eq!(config.fan_out.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.refinement.max_iterations, 5);
        assert_eq!(config.refinement.feedback, FeedbackCarry::Cumulative);
        assert_eq!(config.logging.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let file = write_config(
            ".toml",
            r#"
[invocation]
temperature = 0.3
call_timeout = "45s"

[fan_out]
max_concurrency = 8
failure_policy = "collect_all"

[refinement]
max_iterations = 3
feedback = "latest"
"#,
        );

        let config = TaxisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.invocation.temperature, Some(0.3));
        assert_eq!(config.invocation.call_timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.fan_out.max_concurrency, 8);
        assert_eq!(config.fan_out.failure_policy, FailurePolicy::CollectAll);
        assert_eq!(config.refinement.max_iterations, 3);
        assert_eq!(config.refinement.feedback, FeedbackCarry::Latest);
        assert_eq!(config.logging.filter, "info");

        let options = config.invocation.call_options();
        assert_eq!(options.call_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_from_yaml_file() {
        let file = write_config(".yaml", "fan_out:\n  max_concurrency: 2\nlogging:\n  filter: debug\n");

        let config = TaxisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.fan_out.max_concurrency, 2);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_validation_rejects_zero_bounds() {
        let file = write_config(".toml", "[fan_out]\nmax_concurrency = 0\n");
        assert!(matches!(
            TaxisConfig::from_file(file.path()),
            Err(TaxisError::Configuration(_))
        ));

        let file = write_config(".json", r#"{"refinement": {"max_iterations": 0}}"#);
        assert!(matches!(
            TaxisConfig::from_file(file.path()),
            Err(TaxisError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = TaxisConfig::from_file("/nonexistent/taxis.toml");
        assert!(matches!(result, Err(TaxisError::Configuration(_))));
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("taxis.toml", "[fan_out]\nmax_concurrency = 6\n")?;
            jail.set_env("TAXIS_REFINEMENT__MAX_ITERATIONS", "9");

            let config = TaxisConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.fan_out.max_concurrency, 6);
            assert_eq!(config.refinement.max_iterations, 9);
            Ok(())
        });
    }
}
