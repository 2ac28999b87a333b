//! Subagents: isolated, budget-capped sub-investigations.
//!
//! The main analysis can delegate a focused question ("is this function
//! called with a null argument anywhere?") to a subagent through the
//! [`RunSubagentTool`]. Each subagent gets:
//! - its own conversation, seeded with a single user turn describing the task
//! - a tool registry without recursive spawning or main-analysis-only tools
//! - its own [`ToolExecutor`], so its call budget is independent of the parent
//! - a cancellation token that is a child of the session token, plus a
//!   wall-clock timeout
//!
//! How many subagents a session may spawn is governed by the shared
//! [`SubagentSessionManager`](super::session::SubagentSessionManager).

use crate::agent::config::{RunnerConfig, SettingsProvider};
use crate::agent::context::{CallLog, ExecutionContext, ToolCallRecord};
use crate::agent::events::{NoopProgress, ProgressSink};
use crate::agent::runner::{ConversationRunner, RunOutcome};
use crate::api::client::ModelClient;
use crate::error::{AgentError, ToolError};
use crate::tools::core::{Tool, ToolFuture, ToolOutput, ToolRegistry, parse_tool_args};
use crate::tools::executor::ToolExecutor;
use crate::tools::names::{RUN_SUBAGENT, SUBAGENT_EXCLUDED_TOOLS};
use crate::{Message, ToolDef};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// System prompt for every subagent conversation.
pub const SUBAGENT_SYSTEM_PROMPT: &str = "You are a focused investigator assisting a code \
     reviewer. Use the available tools to answer the task you are given, then reply with a \
     concise summary of what you found, citing files and lines. Do not review unrelated code.";

/// A unit of delegated work.
#[derive(Debug, Clone, PartialEq)]
pub struct SubagentTask {
    pub description: String,
    /// Free-form material from the parent (findings, snippets).
    pub context: Option<String>,
}

impl SubagentTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn to_prompt(&self) -> String {
        match self.context.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(ctx) => format!("{}\n\nContext from the reviewer:\n{ctx}", self.description),
            None => self.description.clone(),
        }
    }
}

/// Why a subagent did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubagentFailure {
    Cancelled,
    TimedOut,
    MaxIterations,
    Failed(String),
}

impl SubagentFailure {
    pub fn tag(&self) -> &str {
        match self {
            SubagentFailure::Cancelled => "cancelled",
            SubagentFailure::TimedOut => "timed_out",
            SubagentFailure::MaxIterations => "max_iterations",
            SubagentFailure::Failed(msg) => msg,
        }
    }
}

impl std::fmt::Display for SubagentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone)]
pub struct SubagentResult {
    pub id: u32,
    pub success: bool,
    /// Findings. Partial on `MaxIterations`/`TimedOut`, empty on `Cancelled`.
    pub response: String,
    pub tool_calls_made: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub error: Option<SubagentFailure>,
    pub duration: Duration,
}

impl SubagentResult {
    /// Compact report handed back to the parent conversation.
    pub fn to_parent_text(&self) -> String {
        let status = match &self.error {
            None => "completed".to_string(),
            Some(f) => format!("stopped: {f}"),
        };
        let body = if self.response.trim().is_empty() {
            "(no findings)"
        } else {
            self.response.as_str()
        };
        format!(
            "[Subagent #{} {status}] ({} tool call(s), {:.1}s)\n{body}",
            self.id,
            self.tool_calls_made,
            self.duration.as_secs_f64()
        )
    }
}

// ── Executor ───────────────────────────────────────────────────────

/// Runs subagent conversations.
pub struct SubagentExecutor {
    client: Arc<dyn ModelClient>,
    registry: ToolRegistry,
    settings: Arc<dyn SettingsProvider>,
    progress: Arc<dyn ProgressSink>,
    system_prompt: String,
    timeout_override: Option<Duration>,
}

impl std::fmt::Debug for SubagentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentExecutor")
            .field("model", &self.client.model_name())
            .field("registry", &self.registry)
            .finish()
    }
}

impl SubagentExecutor {
    /// `registry` is the parent's full registry; excluded tools are removed
    /// for every run.
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: ToolRegistry,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            client,
            registry,
            settings,
            progress: Arc::new(NoopProgress),
            system_prompt: SUBAGENT_SYSTEM_PROMPT.to_string(),
            timeout_override: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Use a fixed timeout instead of `subagent_timeout_secs`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// Tools a subagent would receive.
    pub fn subagent_registry(&self) -> ToolRegistry {
        self.registry.without(SUBAGENT_EXCLUDED_TOOLS)
    }

    /// Run one investigation under `signal`.
    ///
    /// Returns `Err(Cancelled)` when `signal` is already cancelled (the
    /// subagent never ran) and propagates unsupported-model errors. Every
    /// other ending is an `Ok` result.
    pub async fn execute(
        &self,
        task: &SubagentTask,
        signal: CancellationToken,
        id: u32,
        parent: &ExecutionContext,
    ) -> Result<SubagentResult, AgentError> {
        if signal.is_cancelled() {
            debug!("Subagent #{id} cancelled before start");
            return Err(AgentError::Cancelled);
        }

        let started = Instant::now();
        let settings = self.settings.settings();
        let timeout = self
            .timeout_override
            .unwrap_or_else(|| settings.subagent_timeout());

        let executor = ToolExecutor::new(self.subagent_registry(), Arc::clone(&self.settings));
        let log = CallLog::new();
        let run_token = signal.child_token();
        let ctx = parent.for_subagent(id, run_token.clone(), log.clone());
        let config = RunnerConfig::new(ctx.label.clone())
            .with_system_prompt(self.system_prompt.as_str())
            .with_max_iterations(settings.subagent_max_iterations);

        info!(
            "Subagent #{id} started ({}): {}",
            ctx.trace_id,
            task.description.chars().take(100).collect::<String>()
        );
        self.progress
            .report(&format!("Subagent #{id}: investigating"), 0.0);

        let runner = ConversationRunner::new(
            self.client.as_ref(),
            &executor,
            Arc::clone(&self.settings),
            config,
        )
        .with_progress(self.progress.as_ref());
        let run = runner.run(vec![Message::user(task.to_prompt())], &ctx);
        tokio::pin!(run);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut timed_out = false;
        let outcome = loop {
            tokio::select! {
                r = &mut run => break r,
                _ = &mut deadline, if !timed_out => {
                    warn!("Subagent #{id} timed out after {}s", timeout.as_secs_f64());
                    timed_out = true;
                    run_token.cancel();
                }
            }
        };

        let duration = started.elapsed();
        let tool_calls = log.snapshot();
        let tool_calls_made = executor.call_count();

        let (success, response, error) = match outcome {
            Ok(run) => match run.outcome {
                RunOutcome::Completed => (true, run.response, None),
                RunOutcome::MaxIterationsReached => {
                    (false, run.response, Some(SubagentFailure::MaxIterations))
                }
                RunOutcome::Cancelled if timed_out => {
                    (false, run.response, Some(SubagentFailure::TimedOut))
                }
                RunOutcome::Cancelled => (false, String::new(), Some(SubagentFailure::Cancelled)),
                RunOutcome::Failed(msg) => (false, run.response, Some(SubagentFailure::Failed(msg))),
            },
            Err(e) if e.is_cancellation() => {
                let failure = if timed_out {
                    SubagentFailure::TimedOut
                } else {
                    SubagentFailure::Cancelled
                };
                (false, String::new(), Some(failure))
            }
            Err(e) => {
                warn!("Subagent #{id} aborted: {e}");
                return Err(e);
            }
        };

        let status = error.as_ref().map_or("completed", SubagentFailure::tag);
        info!(
            "Subagent #{id} finished: {status} in {:.1}s with {tool_calls_made} tool call(s)",
            duration.as_secs_f64()
        );
        self.progress
            .report(&format!("Subagent #{id}: {status}"), 0.0);

        Ok(SubagentResult {
            id,
            success,
            response,
            tool_calls_made,
            tool_calls,
            error,
            duration,
        })
    }
}

// ── Tool ───────────────────────────────────────────────────────────

/// Typed arguments for `run_subagent`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunSubagentArgs {
    /// The question the subagent should investigate. Be specific.
    pub task: String,
    /// Findings, file paths, or code the subagent should start from.
    #[serde(default)]
    pub context: Option<String>,
}

/// Spawns a subagent through the session in the caller's
/// [`ExecutionContext`].
pub struct RunSubagentTool;

impl Tool for RunSubagentTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            RUN_SUBAGENT,
            "Delegate a focused investigation to a subagent with its own conversation and \
             tools (it cannot spawn further subagents). Use it for questions that need several \
             lookups, such as tracing how a changed function is used. Pass what you already \
             know in `context`. The number of subagents per review is limited.",
            crate::json_schema_for::<RunSubagentArgs>(),
        )
    }

    fn execute<'a>(
        &'a self,
        args: &'a serde_json::Value,
        ctx: &'a ExecutionContext,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: RunSubagentArgs = parse_tool_args(args)?;
            let Some(executor) = ctx.subagent_executor.clone() else {
                return Err(ToolError::Failed(
                    "subagents are not available in this session".into(),
                ));
            };

            let id = ctx.session.record_spawn().map_err(|e| {
                ToolError::Failed(format!(
                    "{e}. Continue the review with the information you have."
                ))
            })?;
            let signal = ctx.session.register_child();

            let task = SubagentTask {
                description: args.task,
                context: args.context,
            };
            let result = executor.execute(&task, signal, id, ctx).await?;

            let metadata = serde_json::json!({
                "subagent_id": result.id,
                "success": result.success,
                "error": result.error.as_ref().map(SubagentFailure::tag),
                "tool_calls_made": result.tool_calls_made,
                "duration_ms": u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            });
            Ok(ToolOutput::text(result.to_parent_text())
                .with_metadata(metadata)
                .with_nested_calls(result.tool_calls))
        })
    }
}
