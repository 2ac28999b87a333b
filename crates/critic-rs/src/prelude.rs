//! Convenience re-exports for common `critic-rs` types.
//!
//! Meant to be glob-imported when embedding the reviewer:
//!
//! ```ignore
//! use critic_rs::prelude::*;
//! ```
//!
//! This pulls in what most programs need: the [`OpenRouterClient`],
//! settings, [`ReviewSession`] with its request and report types, the
//! [`Tool`] trait for caller-supplied tools, and progress sinks. The
//! lower-level pieces (waterfall truncator, runner internals, snippet
//! selector) live in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{AgentError, Message, ToolDef, ToolError, json_schema_for};

// ── Model access ────────────────────────────────────────────────────
pub use crate::api::openrouter::DEFAULT_MODEL;
pub use crate::api::{ModelClient, OpenRouterClient, RetryConfig};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentSettings, CompositeProgress, ExecutionContext, FnProgress, LoggingProgress,
    NoopProgress, ProgressSink, RunOutcome, SettingsProvider, SharedSettings,
};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{ContentPrioritization, ContentType, ContextSnippet, TokenCounter};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{Tool, ToolFuture, ToolOutput, ToolRegistry, parse_tool_args};

// ── Review ──────────────────────────────────────────────────────────
pub use crate::review::{
    Finding, ReviewReport, ReviewRequest, ReviewSession, Severity, SubmittedReview,
};
