//! Tool dispatch with a per-executor call budget.
//!
//! A [`ToolExecutor`] owns one conversation's tool registry and its call
//! counter. The main analysis and every subagent each get their own
//! executor, so a nested investigation can never exhaust the parent's budget
//! (or the other way around). The ceiling itself is read from settings on
//! every call.

use crate::agent::config::SettingsProvider;
use crate::agent::context::{ExecutionContext, ToolCallRecord};
use crate::error::{AgentError, ToolError};
use crate::tools::core::{
    DEFAULT_MAX_RESULT_BYTES, ToolRegistry, log_tool_call, truncate_result,
    validate_tool_arguments,
};
use crate::ToolDef;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Outcome of one tool call as seen by the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Rejected because the call budget was exhausted.
    pub rate_limited: bool,
}

impl ToolResult {
    fn ok(data: String, metadata: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            data: Some(data),
            metadata,
            ..Default::default()
        }
    }

    pub(crate) fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn rate_limited(max: u32) -> Self {
        Self {
            rate_limited: true,
            ..Self::failure(format!(
                "tool call limit reached ({max} calls). No further tools will run in \
                 this session; finish with the information you already have."
            ))
        }
    }

    /// Text placed in the tool-result message.
    pub fn to_model_text(&self) -> String {
        if self.success {
            self.data.clone().unwrap_or_default()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    settings: Arc<dyn SettingsProvider>,
    calls: AtomicU32,
    records: Mutex<Vec<ToolCallRecord>>,
    max_result_bytes: usize,
    validate_args: bool,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .field("calls", &self.call_count())
            .finish()
    }
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            registry,
            settings,
            calls: AtomicU32::new(0),
            records: Mutex::new(Vec::new()),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: true,
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Toggle JSON Schema validation of arguments (on by default).
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.registry.definitions()
    }

    /// Calls charged against the budget so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every call this executor handled, in order.
    pub fn records(&self) -> Vec<ToolCallRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run one tool call.
    ///
    /// Tool failures come back as `Ok` with `success: false` so the model can
    /// adapt. Only cancellation and unsupported-model errors are `Err`.
    pub async fn execute_tool(
        &self,
        call_id: &str,
        name: &str,
        args: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, AgentError> {
        let started = Instant::now();

        let Some(tool) = self.registry.get(name) else {
            warn!("[{}] Unknown tool requested: {name}", ctx.label);
            let result = ToolResult::failure(format!(
                "unknown tool '{name}'. Available tools: {}",
                self.registry.names().join(", ")
            ));
            self.record(call_id, name, args, &result, Vec::new(), started, ctx);
            return Ok(result);
        };

        if let Err(result) = self.charge(name, ctx) {
            self.record(call_id, name, args, &result, Vec::new(), started, ctx);
            return Ok(result);
        }

        if self.validate_args
            && let Some(msg) = validate_tool_arguments(tool.as_ref(), args)
        {
            debug!("[{}] Tool {name} arguments rejected", ctx.label);
            let result = ToolResult::failure(msg);
            self.record(call_id, name, args, &result, Vec::new(), started, ctx);
            return Ok(result);
        }

        log_tool_call(name, args);

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => Err(ToolError::Cancelled),
            r = tool.execute(args, ctx) => r,
        };

        let (result, nested) = match outcome {
            Ok(output) => {
                let data = truncate_result(output.data, self.max_result_bytes);
                (ToolResult::ok(data, output.metadata), output.nested_calls)
            }
            Err(ToolError::Cancelled) => {
                info!("[{}] Tool {name} cancelled", ctx.label);
                return Err(AgentError::Cancelled);
            }
            Err(ToolError::ModelUnsupported(msg)) => {
                return Err(AgentError::ModelUnsupported(msg));
            }
            Err(e) => (ToolResult::failure(e.to_string()), Vec::new()),
        };

        let elapsed = started.elapsed();
        debug!(
            "[{}] Tool {name} {} in {:.0}ms",
            ctx.label,
            if result.success { "completed" } else { "failed" },
            elapsed.as_secs_f64() * 1000.0
        );
        if let Some(data) = &result.data {
            trace!(
                "Tool {name} result preview: {}",
                data.chars().take(300).collect::<String>()
            );
        }

        self.record(call_id, name, args, &result, nested, started, ctx);
        Ok(result)
    }

    /// Record a call whose arguments could not be parsed into a JSON object.
    ///
    /// It is charged like a schema-validation failure so a model that keeps
    /// sending broken JSON still runs into the call budget.
    pub fn reject_arguments(
        &self,
        call_id: &str,
        name: &str,
        error: impl Into<String>,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        let started = Instant::now();
        let empty = serde_json::Value::Object(serde_json::Map::new());
        let result = match self.charge(name, ctx) {
            Ok(()) => {
                debug!("[{}] Tool {name} arguments are not valid JSON", ctx.label);
                ToolResult::failure(error)
            }
            Err(limited) => limited,
        };
        self.record(call_id, name, &empty, &result, Vec::new(), started, ctx);
        result
    }

    /// Take one call from the budget, or the rate-limit result if it is spent.
    fn charge(&self, name: &str, ctx: &ExecutionContext) -> Result<(), ToolResult> {
        // Check and increment in one step so the counter can never pass the cap.
        let max = self.settings.settings().max_tool_calls;
        match self
            .calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            }) {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(
                    "[{}] Tool call {name} rejected: limit of {max} calls reached",
                    ctx.label
                );
                Err(ToolResult::rate_limited(max))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        call_id: &str,
        name: &str,
        args: &serde_json::Value,
        result: &ToolResult,
        nested_calls: Vec<ToolCallRecord>,
        started: Instant,
        ctx: &ExecutionContext,
    ) {
        let record = ToolCallRecord {
            id: call_id.to_string(),
            tool_name: name.to_string(),
            arguments: args.as_object().cloned().unwrap_or_default(),
            result: result.to_model_text(),
            success: result.success,
            error: result.error.clone(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            timestamp: chrono::Utc::now(),
            nested_calls,
        };
        ctx.record_nested(&record);
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::AgentSettings;
    use crate::agent::context::CallLog;
    use crate::test_support::{CountingTool, EchoTool, FailTool, HangingTool, root_context};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn settings(max_tool_calls: u32) -> Arc<dyn SettingsProvider> {
        Arc::new(AgentSettings {
            max_tool_calls,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn successful_call_is_recorded() {
        let ctx = root_context();
        let executor = ToolExecutor::new(ToolRegistry::new().with(EchoTool), settings(5));

        let result = executor
            .execute_tool("c1", "echo", &json!({"text": "hello"}), &ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.to_model_text(), "hello");
        assert_eq!(executor.call_count(), 1);

        let records = executor.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "c1");
        assert_eq!(records[0].arguments["text"], "hello");
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn call_past_the_limit_is_rejected_without_running() {
        let ctx = root_context();
        let runs = Arc::new(AtomicUsize::new(0));
        let executor = ToolExecutor::new(
            ToolRegistry::new().with(CountingTool::new(Arc::clone(&runs))),
            settings(3),
        );

        for i in 0..3 {
            let r = executor
                .execute_tool(&format!("c{i}"), "count", &json!({}), &ctx)
                .await
                .unwrap();
            assert!(r.success);
        }
        let fourth = executor
            .execute_tool("c3", "count", &json!({}), &ctx)
            .await
            .unwrap();
        assert!(!fourth.success);
        assert!(fourth.rate_limited);
        assert!(fourth.to_model_text().contains("limit"));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(executor.call_count(), 3);
        assert_eq!(executor.records().len(), 4);
    }

    #[tokio::test]
    async fn tool_errors_become_failure_results() {
        let ctx = root_context();
        let executor = ToolExecutor::new(ToolRegistry::new().with(FailTool), settings(5));
        let result = executor
            .execute_tool("c1", "fail", &json!({}), &ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.to_model_text(), "Error: intentional failure");
        assert_eq!(executor.records()[0].error.as_deref(), Some("intentional failure"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_charged() {
        let ctx = root_context();
        let executor = ToolExecutor::new(ToolRegistry::new().with(EchoTool), settings(5));
        let result = executor
            .execute_tool("c1", "nope", &json!({}), &ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool 'nope'"));
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_arguments_are_charged() {
        let ctx = root_context();
        let executor = ToolExecutor::new(ToolRegistry::new().with(EchoTool), settings(5));
        let result = executor
            .execute_tool("c1", "echo", &json!({"text": 5}), &ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("validation failed"));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn unparsable_arguments_are_charged_and_recorded() {
        let ctx = root_context();
        let executor = ToolExecutor::new(ToolRegistry::new().with(EchoTool), settings(1));

        let first = executor.reject_arguments("c1", "echo", "invalid JSON arguments", &ctx);
        assert!(!first.success);
        assert!(!first.rate_limited);
        assert_eq!(first.to_model_text(), "Error: invalid JSON arguments");
        assert_eq!(executor.call_count(), 1);

        let second = executor.reject_arguments("c2", "echo", "invalid JSON arguments", &ctx);
        assert!(second.rate_limited);
        assert_eq!(executor.call_count(), 1);

        let records = executor.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "c1");
        assert_eq!(records[0].error.as_deref(), Some("invalid JSON arguments"));
        assert!(records[0].arguments.is_empty());
    }

    #[tokio::test]
    async fn cancellation_is_propagated() {
        let ctx = root_context();
        let executor = ToolExecutor::new(ToolRegistry::new().with(HangingTool), settings(5));
        let token = ctx.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = executor
            .execute_tool("c1", "hang", &json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
        assert!(executor.records().is_empty());
    }

    #[tokio::test]
    async fn long_results_are_truncated() {
        let ctx = root_context();
        let executor = ToolExecutor::new(ToolRegistry::new().with(EchoTool), settings(5))
            .with_max_result_bytes(10);
        let result = executor
            .execute_tool("c1", "echo", &json!({"text": "x".repeat(50)}), &ctx)
            .await
            .unwrap();
        assert!(result.to_model_text().contains("[truncated: 50 bytes total]"));
    }

    #[tokio::test]
    async fn subagent_calls_land_in_nested_log() {
        let parent = root_context();
        let log = CallLog::new();
        let ctx = parent.for_subagent(1, parent.cancellation.child_token(), log.clone());
        let executor = ToolExecutor::new(ToolRegistry::new().with(EchoTool), settings(5));
        executor
            .execute_tool("c1", "echo", &json!({"text": "x"}), &ctx)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.snapshot()[0].tool_name, "echo");
    }
}
