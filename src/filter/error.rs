//! Error types for filter compilation.

use thiserror::Error;

/// Errors that can occur while compiling a filter expression.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Parse error with context
    #[error("Parse error in '{expression}': {message}")]
    ParseError { expression: String, message: String },

    /// Empty filter
    #[error("Empty filter expression")]
    EmptyFilter,

    /// The capture's link layer cannot be decoded by the matcher
    #[error("Cannot filter captures with link type {link_type}")]
    UnsupportedLinkType { link_type: u32 },
}

impl FilterError {
    /// Create a parse error for `expression`.
    pub fn parse_error(expression: &str, message: impl Into<String>) -> Self {
        FilterError::ParseError {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}
