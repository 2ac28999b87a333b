//! Agent runtime: the conversation loop and everything it shares with
//! subagents.
//!
//! - [`runner::ConversationRunner`]: the model-request / tool-response state
//!   machine. Start here.
//! - [`config`]: [`AgentSettings`], the live [`SettingsProvider`] accessor,
//!   and per-run [`RunnerConfig`].
//! - [`context`]: the [`ExecutionContext`] every tool call receives and the
//!   [`ToolCallRecord`] call log.
//! - [`session`]: session-wide subagent budget and cancellation fan-out.
//! - [`sub_agent`]: the subagent executor and the `run_subagent` tool.
//! - [`events`]: [`ProgressSink`] and its stock implementations.

pub mod config;
pub mod context;
pub mod events;
pub mod runner;
pub mod session;
pub mod sub_agent;

pub use config::{
    AgentSettings, CompletionPredicate, RunnerConfig, SettingsProvider, SharedSettings,
};
pub use context::{CallLog, ExecutionContext, ToolCallRecord};
pub use events::{CompositeProgress, FnProgress, LoggingProgress, NoopProgress, ProgressSink};
pub use runner::{ConversationRunner, ConversationState, RunOutcome, RunResult};
pub use session::SubagentSessionManager;
pub use sub_agent::{
    RunSubagentTool, SubagentExecutor, SubagentFailure, SubagentResult, SubagentTask,
};
