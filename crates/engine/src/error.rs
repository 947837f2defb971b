//! Error types for helper registration and token resolution.

use thiserror::Error;

/// Errors raised synchronously by construction, registration, and wrapping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("helper not found: {name}")]
    NotFound { name: String },

    #[error("invalid token prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("runtime error: {message}")]
    Runtime { message: String },
}

/// Errors raised while resolving tokens.
///
/// Failures are tagged with the helper closest to their origin and are cached
/// on the invocation record, so resolving the same token again yields an
/// identical error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown async token: {token}")]
    UnknownToken { token: String },

    #[error("helper '{helper}' failed: {message}")]
    HelperExecution { helper: String, message: String },

    #[error("circular reference detected while resolving {}", describe_origin(.helper))]
    CircularReference { helper: Option<String> },
}

fn describe_origin(helper: &Option<String>) -> String {
    match helper {
        Some(name) => format!("arguments of helper '{name}'"),
        None => "the requested value".to_string(),
    }
}

impl EngineError {
    /// Create a helper not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create an invalid prefix error.
    pub fn invalid_prefix(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPrefix {
            prefix: prefix.into(),
            reason: reason.into(),
        }
    }

    /// Create a runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime { message: message.into() }
    }
}

impl ResolveError {
    /// Create an unknown token error.
    pub fn unknown_token(token: impl Into<String>) -> Self {
        Self::UnknownToken { token: token.into() }
    }

    /// Create a helper execution error from the helper's own failure.
    ///
    /// The full `anyhow` context chain is kept in the message.
    pub fn helper_execution(helper: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::HelperExecution {
            helper: helper.into(),
            message: format!("{error:#}"),
        }
    }

    /// Create a circular reference error attributed to `helper`, if any.
    pub fn circular_reference(helper: Option<&str>) -> Self {
        Self::CircularReference {
            helper: helper.map(str::to_string),
        }
    }

    /// Name of the helper this error is attributed to.
    pub fn helper(&self) -> Option<&str> {
        match self {
            Self::UnknownToken { .. } => None,
            Self::HelperExecution { helper, .. } => Some(helper.as_str()),
            Self::CircularReference { helper } => helper.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_engine_error_creation() {
        let err = EngineError::not_found("upper");
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert_eq!(err.to_string(), "helper not found: upper");

        let err = EngineError::invalid_prefix("", "prefix must not be empty");
        assert!(matches!(err, EngineError::InvalidPrefix { .. }));
    }

    #[test]
    fn helper_execution_keeps_context_chain() {
        let failure = anyhow!("UPPER Error").context("while upper-casing");
        let err = ResolveError::helper_execution("upper", &failure);
        assert_eq!(err.helper(), Some("upper"));
        assert_eq!(err.to_string(), "helper 'upper' failed: while upper-casing: UPPER Error");
    }

    #[test]
    fn circular_reference_names_its_origin() {
        let tagged = ResolveError::circular_reference(Some("upper"));
        assert_eq!(tagged.helper(), Some("upper"));
        assert_eq!(
            tagged.to_string(),
            "circular reference detected while resolving arguments of helper 'upper'"
        );

        let untagged = ResolveError::circular_reference(None);
        assert_eq!(untagged.helper(), None);
        assert_eq!(untagged.to_string(), "circular reference detected while resolving the requested value");
        assert_eq!(ResolveError::unknown_token("{$ASYNCID$9$9$}").helper(), None);
    }
}
