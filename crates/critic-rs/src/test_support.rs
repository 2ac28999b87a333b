//! Fakes shared by the unit tests: a scripted model, a few tools, and a
//! recording progress sink.

use crate::agent::config::{AgentSettings, SettingsProvider};
use crate::agent::context::ExecutionContext;
use crate::agent::events::ProgressSink;
use crate::agent::session::SubagentSessionManager;
use crate::api::client::{ModelClient, ModelFuture};
use crate::error::{AgentError, ToolError};
use crate::tools::core::{Tool, ToolFuture, ToolOutput};
use crate::{ChatCompletion, Message, ToolCall, ToolDef};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Model ──────────────────────────────────────────────────────────

/// Replays queued responses, then `fallback` forever (or "done").
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatCompletion, AgentError>>>,
    fallback: Option<ChatCompletion>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
    tool_names: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ChatCompletion>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<ChatCompletion, AgentError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Default::default()
        }
    }

    pub fn repeating(response: ChatCompletion) -> Self {
        Self {
            fallback: Some(response),
            ..Default::default()
        }
    }

    /// Wait this long before answering. The wait honours cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn tool_names(&self) -> Vec<Vec<String>> {
        self.tool_names.lock().unwrap().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn send_request<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
        cancel: &'a CancellationToken,
    ) -> ModelFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(messages.to_vec());
            self.tool_names
                .lock()
                .unwrap()
                .push(tools.iter().map(|t| t.function.name.clone()).collect());

            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(r) => r,
                None => Ok(self
                    .fallback
                    .clone()
                    .unwrap_or_else(|| ChatCompletion::text("done"))),
            }
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// A response requesting one tool call.
pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ChatCompletion {
    ChatCompletion::with_tool_calls(None, vec![ToolCall::new(id, name, args.to_string())])
}

// ── Tools ──────────────────────────────────────────────────────────

pub struct EchoTool;

impl Tool for EchoTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "echo",
            "Echo the input",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        )
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value, _ctx: &'a ExecutionContext) -> ToolFuture<'a> {
        Box::pin(async move {
            Ok(ToolOutput::text(args["text"].as_str().unwrap_or_default()))
        })
    }
}

pub struct FailTool;

impl Tool for FailTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new("fail", "Always fails", json!({"type": "object", "properties": {}}))
    }

    fn execute<'a>(&'a self, _args: &'a serde_json::Value, _ctx: &'a ExecutionContext) -> ToolFuture<'a> {
        Box::pin(async { Err(ToolError::Failed("intentional failure".into())) })
    }
}

/// Counts its invocations.
pub struct CountingTool {
    runs: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(runs: Arc<AtomicUsize>) -> Self {
        Self { runs }
    }
}

impl Tool for CountingTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new("count", "Counts calls", json!({"type": "object", "properties": {}}))
    }

    fn execute<'a>(&'a self, _args: &'a serde_json::Value, _ctx: &'a ExecutionContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ToolOutput::text(format!("call {n}")))
        })
    }
}

/// Never finishes on its own.
pub struct HangingTool;

impl Tool for HangingTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new("hang", "Never returns", json!({"type": "object", "properties": {}}))
    }

    fn execute<'a>(&'a self, _args: &'a serde_json::Value, _ctx: &'a ExecutionContext) -> ToolFuture<'a> {
        Box::pin(std::future::pending::<Result<ToolOutput, ToolError>>())
    }
}

// ── Progress ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(String, f64)>>,
}

impl RecordingProgress {
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, message: &str, increment: f64) {
        self.events
            .lock()
            .unwrap()
            .push((message.to_string(), increment));
    }
}

// ── Context ────────────────────────────────────────────────────────

pub fn context_with(settings: Arc<dyn SettingsProvider>) -> ExecutionContext {
    let token = CancellationToken::new();
    let session = Arc::new(SubagentSessionManager::new(settings, token.clone()));
    ExecutionContext::new("tr-test", "test", session, token)
}

pub fn root_context() -> ExecutionContext {
    context_with(Arc::new(AgentSettings::default()))
}
