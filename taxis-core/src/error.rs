//! Error types for Taxis operations

/// Result type for Taxis operations
pub type Result<T> = std::result::Result<T, TaxisError>;

/// Error types for the Taxis framework
#[derive(Debug, thiserror::Error)]
pub enum TaxisError {
    /// The model invoker could not produce a completion (network, provider, quota)
    #[error("Provider error: {0}")]
    Provider(String),

    /// The call was cancelled before a completion arrived
    #[error("Invocation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for TaxisError {
    fn from(s: String) -> Self {
        TaxisError::Other(s)
    }
}

impl From<&str> for TaxisError {
    fn from(s: &str) -> Self {
        TaxisError::Other(s.to_string())
    }
}

impl From<figment::Error> for TaxisError {
    fn from(err: figment::Error) -> Self {
        TaxisError::Configuration(err.to_string())
    }
}
