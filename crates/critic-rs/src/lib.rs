//! Agentic code-review runtime.
//!
//! `critic-rs` drives a language model through iterative tool calls to review
//! a code change. Three pieces carry the weight:
//!
//! - The **token-budget engine** ([`context`]) decides which parts of the diff
//!   and the pre-gathered context snippets fit in a bounded prompt window.
//!   Content is kept by a configurable priority waterfall; diffs fall back to
//!   hunk-preserving truncation when a proportional cut would leave nothing
//!   usable.
//! - The **conversation runner** ([`ConversationRunner`](agent::runner::ConversationRunner))
//!   is the state machine that sends history plus tool specs to the model,
//!   executes requested tools in order through a budgeted
//!   [`ToolExecutor`](tools::ToolExecutor), and stops on completion,
//!   cancellation, a fatal model error, or the iteration ceiling.
//! - **Subagents** ([`agent::sub_agent`]) are isolated, budget-capped
//!   sub-investigations spawned through the `run_subagent` tool. A
//!   session-scoped [`SubagentSessionManager`](agent::session::SubagentSessionManager)
//!   caps fan-out and cascades cancellation.
//!
//! [`review::ReviewSession`] wires all of it together for one review.
//!
//! ```ignore
//! use critic_rs::prelude::*;
//! use std::sync::Arc;
//!
//! let settings = Arc::new(SharedSettings::new(AgentSettings::default()));
//! let client = Arc::new(OpenRouterClient::new(api_key, DEFAULT_MODEL, settings.clone())?);
//! let session = ReviewSession::new(client, settings);
//!
//! let report = session.run(ReviewRequest::new(diff)).await?;
//! println!("{}", report.render());
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Runner, settings, progress sink, execution context, subagents |
//! | [`tools`] | [`Tool`](tools::Tool) trait, registry, budgeted executor |
//! | [`context`] | Token calculator, waterfall truncator, diff fallback, snippet selector |
//! | [`api`] | [`ModelClient`](api::ModelClient) trait, OpenRouter adapter, retry, trace ids |
//! | [`review`] | Review orchestration and the `submit_review` / `update_plan` tools |

pub mod agent;
pub mod api;
pub mod context;
pub mod error;
pub mod prelude;
pub mod review;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::{AgentError, ToolError};

// Re-export schemars for downstream tool authors.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Tool argument structs derive `JsonSchema` and
/// hand the result to [`ToolDef::new`].
///
/// # Example
///
/// ```
/// use critic_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     symbol: String,
///     #[serde(default)]
///     file: Option<String>,
/// }
///
/// let schema = json_schema_for::<LookupArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"symbol".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn requesting tool calls. Interim text the model emitted
    /// alongside the calls is kept in `content`.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Text content, or `""` for content-less turns.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the model (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallData {
    pub name: String,
    /// Raw JSON arguments exactly as the model produced them.
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// One model response: optional text plus zero or more tool-call requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

impl ChatCompletion {
    /// A text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A response that requests tool calls.
    pub fn with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content,
            tool_calls,
            ..Default::default()
        }
    }
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
