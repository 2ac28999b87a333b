//! Tool abstractions for the review agent.
//!
//! Every capability the model can invoke is a [`Tool`] implementor. Tools are
//! collected into a [`ToolRegistry`] and dispatched through a
//! [`ToolExecutor`], which validates arguments, enforces the call budget,
//! truncates oversized output, and records every call.
//!
//! - [`core`]: [`Tool`] trait, [`ToolRegistry`], argument helpers.
//! - [`executor`]: [`ToolExecutor`] and [`ToolResult`].
//! - [`names`]: canonical tool names and the subagent exclusion list.

pub mod core;
pub mod executor;
pub mod names;

pub use core::{
    DEFAULT_MAX_RESULT_BYTES, Tool, ToolFuture, ToolOutput, ToolRegistry, parse_tool_args,
    truncate_result, validate_tool_arguments,
};
pub use executor::{ToolExecutor, ToolResult};
