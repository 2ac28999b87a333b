//! Model-invocation layer.
//!
//! - [`client`]: the [`ModelClient`] trait the runner depends on.
//! - [`openrouter`]: the production adapter over the OpenRouter chat
//!   completions API, with cancellation and retry.
//! - [`retry`]: transient error detection and exponential backoff; also
//!   classifies unsupported-model failures as fatal.
//! - [`tracing`]: correlation IDs for runs, subagents, and iterations.

pub mod client;
pub mod openrouter;
pub mod retry;
pub mod tracing;

pub use client::{ModelClient, ModelFuture};
pub use openrouter::OpenRouterClient;
pub use retry::RetryConfig;
pub use tracing::{generate_span_id, generate_trace_id, subagent_trace_id};
