//! Error types for the EMA backend abstraction.

use thiserror::Error;

/// Errors that can occur while declaring, sampling or running scenarios.
///
/// Apart from `InvalidParameter` and `Config`, every variant is attached to a
/// single (scenario, backend) pair and never aborts a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmaError {
    /// Parameter declaration is malformed (bounds, name)
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A single backend run failed (missing resource, bad output, crash)
    #[error("Backend execution failed: {0}")]
    BackendExecution(String),

    /// Outcome series cannot be compared with the reference backend's
    #[error("Shape mismatch against '{reference}': expected {expected}, got {actual}")]
    ShapeMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    /// Run did not finish within the caller's timeout
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Configuration could not be loaded or applied
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EmaError {
    /// Creates a backend execution error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendExecution(msg.into())
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Short stable label for summaries and exports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::BackendExecution(_) => "backend_execution",
            Self::ShapeMismatch { .. } => "shape_mismatch",
            Self::Timeout(_) => "timeout",
            Self::Config(_) => "config",
        }
    }
}
