//! The conversation runner: the model-request / tool-response loop.
//!
//! One [`ConversationRunner`] drives one conversation to a terminal state:
//!
//! ```text
//! Idle → Running → (awaiting tool results → Running)* →
//!     Completed | MaxIterationsReached | Cancelled | Failed
//! ```
//!
//! Each iteration sends the history and tool definitions to the model. Tool
//! calls are executed sequentially in request order and their results are
//! appended before the next iteration. A text-only response ends the run,
//! unless the caller installed a completion predicate that rejects it, in
//! which case the model is nudged to continue.
//!
//! Cancellation is never reported as an error: it produces a `Cancelled`
//! result that keeps whatever text was produced. Unsupported-model errors are
//! returned as `Err` so the caller can render a dedicated message. Every
//! other failure becomes a `Failed` result.

use crate::agent::config::{RunnerConfig, SettingsProvider};
use crate::agent::context::ExecutionContext;
use crate::agent::events::{NoopProgress, ProgressSink};
use crate::api::client::ModelClient;
use crate::api::tracing::generate_span_id;
use crate::error::AgentError;
use crate::tools::executor::{ToolExecutor, ToolResult};
use crate::{Message, MessageRole, ToolCall};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ── State ──────────────────────────────────────────────────────────

/// Message history and iteration bookkeeping of one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    iteration: u32,
    max_iterations: u32,
    completed: bool,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>, max_iterations: u32) -> Self {
        Self {
            messages,
            iteration: 0,
            max_iterations,
            completed: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Iterations completed so far.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether the model has requested a call to `tool` at any point.
    pub fn has_tool_call(&self, tool: &str) -> bool {
        self.messages
            .iter()
            .filter_map(|m| m.tool_calls.as_ref())
            .flatten()
            .any(|c| c.function.name == tool)
    }

    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

// ── Result ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    MaxIterationsReached,
    Cancelled,
    Failed(String),
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::MaxIterationsReached => write!(f, "max_iterations"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// What a run produced. Partial text and call counts are kept on every
/// outcome.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// Assistant text from every iteration, joined by blank lines.
    pub response: String,
    /// Tool calls dispatched and charged against the call budget.
    pub tool_calls_made: u32,
    pub iterations: u32,
    /// Full history, including the system prompt.
    pub messages: Vec<Message>,
}

impl RunResult {
    fn failed(message: String) -> Self {
        Self {
            outcome: RunOutcome::Failed(message),
            response: String::new(),
            tool_calls_made: 0,
            iterations: 0,
            messages: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcome == RunOutcome::Cancelled
    }

    /// `None` on success; otherwise `max_iterations`, `cancelled`, or the
    /// failure message.
    pub fn error_tag(&self) -> Option<String> {
        match &self.outcome {
            RunOutcome::Completed => None,
            RunOutcome::MaxIterationsReached => Some("max_iterations".into()),
            RunOutcome::Cancelled => Some("cancelled".into()),
            RunOutcome::Failed(msg) => Some(msg.clone()),
        }
    }
}

// ── Runner ─────────────────────────────────────────────────────────

/// Drives one conversation.
///
/// ```ignore
/// let executor = ToolExecutor::new(registry, settings.clone());
/// let result = ConversationRunner::new(&client, &executor, settings, RunnerConfig::new("review"))
///     .with_progress(&LoggingProgress)
///     .run(vec![Message::user(prompt)], &ctx)
///     .await?;
/// ```
pub struct ConversationRunner<'a> {
    client: &'a dyn ModelClient,
    executor: &'a ToolExecutor,
    settings: Arc<dyn SettingsProvider>,
    config: RunnerConfig,
    progress: &'a dyn ProgressSink,
}

impl<'a> ConversationRunner<'a> {
    pub fn new(
        client: &'a dyn ModelClient,
        executor: &'a ToolExecutor,
        settings: Arc<dyn SettingsProvider>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            client,
            executor,
            settings,
            config,
            progress: &NoopProgress,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Run with a ready-made history.
    pub async fn run(
        self,
        messages: Vec<Message>,
        ctx: &ExecutionContext,
    ) -> Result<RunResult, AgentError> {
        self.run_prepared(async move { Ok(messages) }, ctx).await
    }

    /// Run after `setup` builds the initial history.
    ///
    /// A setup error becomes a `Failed` result, except cancellation, which is
    /// returned as `Err` so the caller can tell "never ran" apart from "ran
    /// and was cancelled".
    pub async fn run_prepared<F>(
        self,
        setup: F,
        ctx: &ExecutionContext,
    ) -> Result<RunResult, AgentError>
    where
        F: Future<Output = Result<Vec<Message>, AgentError>>,
    {
        let messages = match setup.await {
            Ok(messages) => messages,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!("[{}] Setup failed before the first request: {e}", self.config.label);
                return Ok(RunResult::failed(e.to_string()));
            }
        };
        self.drive(messages, ctx).await
    }

    fn max_iterations(&self) -> u32 {
        self.config
            .max_iterations
            .unwrap_or_else(|| self.settings.settings().max_iterations)
            .max(1)
    }

    async fn drive(
        self,
        mut messages: Vec<Message>,
        ctx: &ExecutionContext,
    ) -> Result<RunResult, AgentError> {
        if let Some(prompt) = &self.config.system_prompt
            && !messages.first().is_some_and(|m| m.role == MessageRole::System)
        {
            messages.insert(0, Message::system(prompt.as_str()));
        }

        let label = self.config.label.clone();
        let mut state = ConversationState::new(messages, self.max_iterations());
        let mut run = RunAccumulator {
            text_parts: Vec::new(),
            calls_at_start: self.executor.call_count(),
        };

        info!(
            "[{label}] Conversation started: trace_id={}, model={}",
            ctx.trace_id,
            self.client.model_name()
        );

        loop {
            if ctx.is_cancelled() {
                info!("[{label}] Cancellation observed before iteration {}", state.iteration + 1);
                return Ok(self.finish(run, state, RunOutcome::Cancelled));
            }

            state.max_iterations = self.max_iterations();
            let iteration = state.iteration + 1;
            ctx.set_iteration(iteration);
            self.progress.report(
                &format!("{label}: iteration {iteration}/{}", state.max_iterations),
                1.0 / f64::from(state.max_iterations),
            );

            let tool_defs = self.executor.definitions();
            let started = Instant::now();
            debug!(
                span_id = %generate_span_id(&ctx.trace_id, iteration),
                "[{label}] Iteration {iteration}: sending {} message(s), {} tool(s)",
                state.messages.len(),
                tool_defs.len()
            );

            let completion = match self
                .client
                .send_request(state.messages(), &tool_defs, &ctx.cancellation)
                .await
            {
                Ok(c) => c,
                Err(e) if e.is_cancellation() => {
                    info!("[{label}] Model request cancelled: {e}");
                    return Ok(self.finish(run, state, RunOutcome::Cancelled));
                }
                Err(e) if e.is_fatal() => {
                    warn!("[{label}] Fatal model error: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!("[{label}] Model request failed: {e}");
                    return Ok(self.finish(run, state, RunOutcome::Failed(e.to_string())));
                }
            };

            debug!(
                "[{label}] Iteration {iteration}: response in {:.1}s, {} tool call(s)",
                started.elapsed().as_secs_f64(),
                completion.tool_calls.len()
            );

            let text = completion.content.filter(|t| !t.trim().is_empty());
            if let Some(t) = &text {
                run.text_parts.push(t.clone());
            }

            if !completion.tool_calls.is_empty() {
                let round_text = text.clone().unwrap_or_default();
                state.push(Message::assistant_tool_calls(
                    text,
                    completion.tool_calls.clone(),
                ));
                for call in &completion.tool_calls {
                    match self.dispatch(call, ctx).await {
                        Ok(result) => {
                            state.push(Message::tool_result(&call.id, result.to_model_text()));
                        }
                        Err(e) if e.is_cancellation() => {
                            return Ok(self.finish(run, state, RunOutcome::Cancelled));
                        }
                        Err(e) => return Err(e),
                    }
                }
                state.iteration += 1;
                if self.config.complete_after_tools
                    && let Some(predicate) = &self.config.completion_predicate
                    && predicate(&state, &round_text)
                {
                    debug!("[{label}] Completion signalled by a tool call");
                    state.completed = true;
                    return Ok(self.finish(run, state, RunOutcome::Completed));
                }
                if state.iteration >= state.max_iterations {
                    info!(
                        "[{label}] Iteration limit of {} reached",
                        state.max_iterations
                    );
                    return Ok(self.finish(run, state, RunOutcome::MaxIterationsReached));
                }
                continue;
            }

            let response = text.unwrap_or_default();
            if let Some(predicate) = &self.config.completion_predicate
                && !predicate(&state, &response)
            {
                debug!("[{label}] Response is not an explicit completion; nudging");
                if !response.is_empty() {
                    state.push(Message::assistant_text(response));
                }
                state.push(Message::user(self.config.nudge_message.as_str()));
                state.iteration += 1;
                if state.iteration >= state.max_iterations {
                    info!("[{label}] Iteration limit reached without explicit completion");
                    return Ok(self.finish(run, state, RunOutcome::MaxIterationsReached));
                }
                continue;
            }

            if !response.is_empty() {
                state.push(Message::assistant_text(response));
            }
            state.iteration += 1;
            state.completed = true;
            return Ok(self.finish(run, state, RunOutcome::Completed));
        }
    }

    fn finish(&self, run: RunAccumulator, state: ConversationState, outcome: RunOutcome) -> RunResult {
        let tool_calls_made = self.executor.call_count().saturating_sub(run.calls_at_start);
        info!(
            "[{}] Conversation finished: outcome={outcome}, iterations={}, tool_calls={tool_calls_made}",
            self.config.label, state.iteration
        );
        RunResult {
            outcome,
            response: run.text_parts.join("\n\n"),
            tool_calls_made,
            iterations: state.iteration,
            messages: state.into_messages(),
        }
    }

    /// Parse arguments and hand the call to the executor.
    async fn dispatch(
        &self,
        call: &ToolCall,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, AgentError> {
        let args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(msg) => {
                debug!("Tool call {} has malformed arguments: {msg}", call.id);
                return Ok(self
                    .executor
                    .reject_arguments(&call.id, &call.function.name, msg, ctx));
            }
        };
        self.executor
            .execute_tool(&call.id, &call.function.name, &args, ctx)
            .await
    }
}

struct RunAccumulator {
    text_parts: Vec<String>,
    calls_at_start: u32,
}

/// Raw model arguments to a JSON object. Empty input means no arguments.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err("tool arguments must be a JSON object".into()),
        Err(e) => Err(format!(
            "invalid JSON arguments: {e}. Please provide valid JSON matching the tool's parameter schema."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatCompletion;
    use crate::agent::config::AgentSettings;
    use crate::test_support::{
        EchoTool, RecordingProgress, ScriptedModel, context_with, root_context, tool_call,
    };
    use crate::tools::core::ToolRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> Arc<dyn SettingsProvider> {
        Arc::new(AgentSettings::default())
    }

    fn executor() -> ToolExecutor {
        ToolExecutor::new(ToolRegistry::new().with(EchoTool), settings())
    }

    #[tokio::test]
    async fn text_response_completes() {
        let model = ScriptedModel::new(vec![ChatCompletion::text("All good.")]);
        let executor = executor();
        let progress = RecordingProgress::default();
        let ctx = root_context();

        let result = ConversationRunner::new(
            &model,
            &executor,
            settings(),
            RunnerConfig::new("main").with_system_prompt("Be brief."),
        )
        .with_progress(&progress)
        .run(vec![Message::user("Review this")], &ctx)
        .await
        .unwrap();

        assert!(result.is_success());
        assert_eq!(result.response, "All good.");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.error_tag(), None);
        assert_eq!(model.requests()[0][0].role, MessageRole::System);
        assert_eq!(progress.messages(), vec!["main: iteration 1/25"]);
    }

    #[tokio::test]
    async fn tool_results_follow_request_order() {
        let model = ScriptedModel::new(vec![
            ChatCompletion::with_tool_calls(
                Some("Checking.".into()),
                vec![
                    ToolCall::new("a", "echo", r#"{"text": "first"}"#),
                    ToolCall::new("b", "echo", r#"{"text": "second"}"#),
                ],
            ),
            ChatCompletion::text("Done."),
        ]);
        let executor = executor();
        let ctx = root_context();

        let result = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.tool_calls_made, 2);
        assert_eq!(result.response, "Checking.\n\nDone.");
        let second_request = &model.requests()[1];
        let tail: Vec<(&str, &str)> = second_request
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| (m.tool_call_id.as_deref().unwrap_or_default(), m.text()))
            .collect();
        assert_eq!(tail, vec![("a", "first"), ("b", "second")]);
    }

    #[tokio::test]
    async fn iteration_limit_keeps_partial_findings() {
        let mut looping = tool_call("c", "echo", json!({"text": "x"}));
        looping.content = Some("Still digging.".into());
        let model = ScriptedModel::repeating(looping);
        let executor = executor();
        let ctx = root_context();

        let result = ConversationRunner::new(
            &model,
            &executor,
            settings(),
            RunnerConfig::new("main").with_max_iterations(2),
        )
        .run(vec![Message::user("go")], &ctx)
        .await
        .unwrap();

        assert_eq!(result.outcome, RunOutcome::MaxIterationsReached);
        assert_eq!(result.error_tag().as_deref(), Some("max_iterations"));
        assert_eq!(result.tool_calls_made, 2);
        assert_eq!(result.iterations, 2);
        assert!(!result.response.is_empty());
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_the_model() {
        let model = ScriptedModel::new(vec![ChatCompletion::text("never")]);
        let executor = executor();
        let ctx = root_context();
        ctx.cancellation.cancel();

        let result = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();

        assert!(result.was_cancelled());
        assert_eq!(result.error_tag().as_deref(), Some("cancelled"));
        assert!(result.response.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_request_is_not_a_failure() {
        let model = ScriptedModel::new(vec![ChatCompletion::text("late")])
            .with_delay(Duration::from_secs(30));
        let executor = executor();
        let ctx = root_context();
        let token = ctx.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();
        assert_eq!(result.outcome, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn unsupported_model_propagates() {
        let model = ScriptedModel::with_results(vec![Err(AgentError::ModelUnsupported(
            "no tool use".into(),
        ))]);
        let executor = executor();
        let ctx = root_context();

        let err = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn other_model_errors_become_failed_results() {
        let model = ScriptedModel::with_results(vec![Err(AgentError::Model("HTTP 400".into()))]);
        let executor = executor();
        let ctx = root_context();

        let result = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();
        assert!(matches!(result.outcome, RunOutcome::Failed(ref m) if m.contains("HTTP 400")));
    }

    #[tokio::test]
    async fn setup_errors() {
        let model = ScriptedModel::default();
        let executor = executor();
        let ctx = root_context();

        let result = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run_prepared(async { Err(AgentError::Failed("prompt build failed".into())) }, &ctx)
            .await
            .unwrap();
        assert_eq!(result.error_tag().as_deref(), Some("prompt build failed"));

        let err = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run_prepared(async { Err(AgentError::Cancelled) }, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn nudges_until_explicit_completion() {
        let model = ScriptedModel::new(vec![
            ChatCompletion::text("Looks fine, I think."),
            ChatCompletion::text("FINAL: approve"),
        ]);
        let executor = executor();
        let ctx = root_context();
        let config = RunnerConfig::new("main")
            .with_completion_predicate(|_, text| text.starts_with("FINAL"))
            .with_nudge_message("Finish with FINAL.");

        let result = ConversationRunner::new(&model, &executor, settings(), config)
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.iterations, 2);
        let second = &model.requests()[1];
        assert_eq!(second.last().unwrap().text(), "Finish with FINAL.");
    }

    #[tokio::test]
    async fn nudging_respects_the_iteration_limit() {
        let model = ScriptedModel::repeating(ChatCompletion::text("maybe"));
        let executor = executor();
        let ctx = root_context();
        let config = RunnerConfig::new("main")
            .with_max_iterations(3)
            .with_completion_predicate(|_, _| false);

        let result = ConversationRunner::new(&model, &executor, settings(), config)
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();
        assert_eq!(result.outcome, RunOutcome::MaxIterationsReached);
        assert_eq!(model.calls(), 3);
        assert_eq!(result.response, "maybe\n\nmaybe\n\nmaybe");
    }

    #[tokio::test]
    async fn tool_round_can_complete_the_run() {
        let model = ScriptedModel::new(vec![
            tool_call("a", "echo", json!({"text": "submitted"})),
            ChatCompletion::text("never requested"),
        ]);
        let executor = executor();
        let ctx = root_context();
        let done = |state: &ConversationState, _: &str| {
            state.messages().iter().any(|m| m.role == MessageRole::Tool)
        };

        let config = RunnerConfig::new("main")
            .with_completion_predicate(done)
            .with_completion_after_tools();
        let result = ConversationRunner::new(&model, &executor, settings(), config)
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(model.calls(), 1);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.tool_calls_made, 1);

        // Without the opt-in the predicate only judges text responses.
        let model = ScriptedModel::new(vec![
            tool_call("a", "echo", json!({"text": "submitted"})),
            ChatCompletion::text("done"),
        ]);
        let config = RunnerConfig::new("main").with_completion_predicate(done);
        let result = ConversationRunner::new(&model, &executor, settings(), config)
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_arguments_are_recorded_and_reported() {
        let model = ScriptedModel::new(vec![
            ChatCompletion::with_tool_calls(None, vec![ToolCall::new("a", "echo", "{not json")]),
            ChatCompletion::text("ok"),
        ]);
        let executor = executor();
        let ctx = root_context();

        let result = ConversationRunner::new(&model, &executor, settings(), RunnerConfig::new("main"))
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.tool_calls_made, 1);
        let tool_msg = result
            .messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .unwrap();
        assert!(tool_msg.text().starts_with("Error: invalid JSON arguments"));

        let records = executor.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[0].tool_name, "echo");
        assert!(!records[0].success);
        assert!(records[0].arguments.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_calls_are_not_counted() {
        let settings: Arc<dyn SettingsProvider> = Arc::new(AgentSettings {
            max_tool_calls: 1,
            ..Default::default()
        });
        let model = ScriptedModel::new(vec![
            tool_call("a", "echo", json!({"text": "1"})),
            tool_call("b", "echo", json!({"text": "2"})),
            ChatCompletion::text("wrapping up"),
        ]);
        let executor = ToolExecutor::new(ToolRegistry::new().with(EchoTool), Arc::clone(&settings));
        let ctx = context_with(Arc::clone(&settings));

        let result = ConversationRunner::new(&model, &executor, settings, RunnerConfig::new("main"))
            .run(vec![Message::user("go")], &ctx)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.tool_calls_made, 1);
        let last_tool = result
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Tool)
            .unwrap();
        assert!(last_tool.text().contains("tool call limit reached"));
    }

    #[test]
    fn has_tool_call_scans_history() {
        let state = ConversationState::new(
            vec![Message::assistant_tool_calls(
                None,
                vec![ToolCall::new("1", "submit_review", "{}")],
            )],
            5,
        );
        assert!(state.has_tool_call("submit_review"));
        assert!(!state.has_tool_call("echo"));
    }
}
