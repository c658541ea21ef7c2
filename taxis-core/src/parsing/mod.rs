//! Parsing of model replies
//!
//! Models wrap JSON in prose, code fences and trailing commas. The parser
//! here digs the first JSON document out of a reply before structured
//! output decoding.

mod json;

pub use json::JsonParser;

use thiserror::Error;

/// Error type for parsing operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Reply was blank
    #[error("Empty input")]
    EmptyInput,

    /// No JSON object or array found in the reply
    #[error("No JSON document found in reply")]
    NoJson,

    /// JSON found but malformed, or not matching the expected shape
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;
