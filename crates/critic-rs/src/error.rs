//! Error taxonomy for the review runtime.
//!
//! Two layers:
//!
//! - [`AgentError`] is what the loop, the subagent machinery, and the model
//!   adapter return. Cancellation and unsupported-model errors bubble to the
//!   top-level caller; everything else is folded into structured results at
//!   the lowest reasonable boundary.
//! - [`ToolError`] is what a [`Tool`](crate::tools::Tool) returns. The
//!   [`ToolExecutor`](crate::tools::ToolExecutor) re-raises cancellation and
//!   fatal-model variants and turns the rest into `{success: false}` results.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the conversation runner, subagents, and model clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// The session (or a subagent) was cancelled by its owner.
    #[error("operation cancelled")]
    Cancelled,

    /// A deadline fired before the work finished.
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// The selected model cannot serve this workload (unknown model, no
    /// tool-calling support). Callers render a dedicated message for it.
    #[error("model not supported: {0}")]
    ModelUnsupported(String),

    /// Transport or API failure from the model collaborator.
    #[error("model request failed: {0}")]
    Model(String),

    /// The session-wide subagent cap is exhausted.
    #[error("subagent limit reached: at most {max} subagents per session")]
    SubagentLimitExceeded { max: u32 },

    /// Settings could not be loaded or are inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Anything else.
    #[error("{0}")]
    Failed(String),
}

impl AgentError {
    /// `true` for user aborts and deadline aborts. These are never converted
    /// into text results.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled | AgentError::TimedOut(_))
    }

    /// `true` for errors that must reach the top-level caller untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::ModelUnsupported(_))
    }
}

/// Errors returned from [`Tool::execute`](crate::tools::Tool::execute).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Raised by tools that run a nested conversation (subagents).
    #[error("model not supported: {0}")]
    ModelUnsupported(String),

    #[error("{0}")]
    Failed(String),
}

impl From<AgentError> for ToolError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Cancelled | AgentError::TimedOut(_) => ToolError::Cancelled,
            AgentError::ModelUnsupported(msg) => ToolError::ModelUnsupported(msg),
            other => ToolError::Failed(other.to_string()),
        }
    }
}
