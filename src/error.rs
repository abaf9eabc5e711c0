//! Error handling module for the sequencing engine
//!
//! Provides centralized error types using thiserror. Protocol misuse is a
//! programmer error and is reported through [`ProtocolError`]; everything a
//! collaborator can raise during a pass is folded into [`SequenceError`].

use crate::tree::NodeKey;
use thiserror::Error;

/// Misuse of the reset / has-next / apply-next protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// `has_next` or `apply_next` called before `reset`
    #[error("Builder for node {node} not reset")]
    NotReset { node: NodeKey },

    /// `apply_next` called after the builder reported no further steps
    #[error("Builder for node {node} has no further steps")]
    Exhausted { node: NodeKey },
}

/// Main error type for a sequencing pass
#[derive(Error, Debug)]
pub enum SequenceError {
    /// Reset / iteration contract violated
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The calibration provider failed to answer a lookup
    #[error("Calibration provider error: {0}")]
    Provider(String),

    /// A calibration record could not be parsed or is inconsistent
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// A post-processing hook rejected the sequence
    #[error("Post-processing failed in {hook}: {message}")]
    PostProcess { hook: String, message: String },

    /// An item key could not be parsed
    #[error("Invalid item key '{0}'")]
    InvalidKey(String),

    /// Plan document errors (structure, references)
    #[error("Plan error: {0}")]
    Plan(String),

    /// IO errors while reading or writing plan and calibration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for sequencing operations
pub type Result<T> = std::result::Result<T, SequenceError>;

impl SequenceError {
    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a calibration error
    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::Calibration(msg.into())
    }

    /// Create a post-processing error attributed to a hook
    pub fn post_process(hook: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PostProcess {
            hook: hook.into(),
            message: msg.into(),
        }
    }

    /// Create a plan error
    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan(msg.into())
    }

    /// True if this error is a protocol-usage error
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
