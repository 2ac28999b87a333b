//! Review orchestration.
//!
//! [`ReviewSession`] turns a [`ReviewRequest`] into a finished review: it fits
//! the diff and context into the prompt window ([`prompt`]), registers the
//! review tools next to any caller-supplied ones, and drives the
//! [`ConversationRunner`] until the model calls `submit_review` (or the run
//! stops for another reason).
//!
//! ```ignore
//! let session = ReviewSession::new(client, settings)
//!     .with_tool(LookupSymbol::new(index))
//!     .with_progress(Arc::new(LoggingProgress));
//! let report = session.run(ReviewRequest::new(diff)).await?;
//! println!("{}", report.render());
//! ```

pub mod plan;
pub mod prompt;
pub mod submit;

pub use plan::{PlanStep, StepStatus, UpdatePlanTool};
pub use prompt::{PreparedPrompt, REVIEW_NUDGE, REVIEW_SYSTEM_PROMPT, ReviewRequest, SnippetStats};
pub use submit::{Finding, ReviewSlot, Severity, SubmitReviewTool, SubmittedReview};

use crate::Message;
use crate::agent::config::{RunnerConfig, SettingsProvider};
use crate::agent::context::{ExecutionContext, ToolCallRecord};
use crate::agent::events::{NoopProgress, ProgressSink};
use crate::agent::runner::{ConversationRunner, RunOutcome};
use crate::agent::session::SubagentSessionManager;
use crate::agent::sub_agent::{RunSubagentTool, SubagentExecutor};
use crate::api::client::ModelClient;
use crate::api::tracing::generate_trace_id;
use crate::context::calculator::TokenAllocation;
use crate::context::tokenizer::{CharEstimateCounter, TokenCounter};
use crate::error::AgentError;
use crate::tools::core::{Tool, ToolRegistry};
use crate::tools::executor::ToolExecutor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything a finished review run produced.
#[derive(Debug, Clone)]
pub struct ReviewReport {
    pub trace_id: String,
    /// The structured review, if `submit_review` succeeded.
    pub review: Option<SubmittedReview>,
    /// Concatenated assistant text from the main conversation.
    pub response: String,
    pub outcome: RunOutcome,
    pub iterations: u32,
    /// Main-conversation tool calls. Subagent calls hang off their
    /// `run_subagent` record.
    pub tool_calls: Vec<ToolCallRecord>,
    pub subagents_spawned: u32,
    pub plan: Vec<PlanStep>,
    /// `None` when the prompt was never built.
    pub allocation: Option<TokenAllocation>,
    pub was_truncated: bool,
}

impl ReviewReport {
    /// Whether a structured review was submitted.
    pub fn is_complete(&self) -> bool {
        self.review.is_some()
    }

    pub fn render(&self) -> String {
        if let Some(review) = &self.review {
            let mut out = review.render();
            if self.was_truncated {
                out.push_str("\n_Part of the change did not fit in the context window._\n");
            }
            return out;
        }
        let body = if self.response.trim().is_empty() {
            "(no response)"
        } else {
            self.response.trim()
        };
        format!("No review was submitted ({}).\n\n{body}\n", self.outcome)
    }
}

/// One configured reviewer. Each [`run`](Self::run) is an independent
/// session with its own subagent budget.
pub struct ReviewSession {
    client: Arc<dyn ModelClient>,
    settings: Arc<dyn SettingsProvider>,
    counter: Arc<dyn TokenCounter>,
    extra_tools: ToolRegistry,
    progress: Arc<dyn ProgressSink>,
    cancellation: CancellationToken,
}

impl ReviewSession {
    pub fn new(client: Arc<dyn ModelClient>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            client,
            settings,
            counter: Arc::new(CharEstimateCounter::new()),
            extra_tools: ToolRegistry::new(),
            progress: Arc::new(NoopProgress),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Make `tool` available to the main analysis and to subagents.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.extra_tools.register(tool);
        self
    }

    pub fn with_tools(mut self, tools: &ToolRegistry) -> Self {
        self.extra_tools = self.extra_tools.merge(tools);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Use an externally owned token. Cancelling it stops the running review
    /// and every subagent it spawned.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Fit `request` into the prompt window without calling the model.
    pub fn prepare(&self, request: &ReviewRequest) -> Result<PreparedPrompt, AgentError> {
        prompt::prepare(request, &self.settings.settings(), Arc::clone(&self.counter))
    }

    /// Run one review.
    ///
    /// Returns `Err(Cancelled)` if the token was cancelled before the first
    /// model request, and propagates unsupported-model errors. Every other
    /// ending, including cancellation mid-run, is reported through
    /// [`ReviewReport::outcome`].
    pub async fn run(&self, request: ReviewRequest) -> Result<ReviewReport, AgentError> {
        let trace_id = generate_trace_id();
        let subagents = Arc::new(SubagentSessionManager::new(
            Arc::clone(&self.settings),
            self.cancellation.clone(),
        ));

        let slot = ReviewSlot::default();
        let plan = Arc::new(UpdatePlanTool::new());
        let registry = self
            .extra_tools
            .clone()
            .with(RunSubagentTool)
            .with(SubmitReviewTool::new(slot.clone()))
            .with_shared(plan.clone());

        let subagent_executor = SubagentExecutor::new(
            Arc::clone(&self.client),
            registry.clone(),
            Arc::clone(&self.settings),
        )
        .with_progress(Arc::clone(&self.progress));
        let ctx = ExecutionContext::new(
            trace_id.clone(),
            "review",
            Arc::clone(&subagents),
            self.cancellation.clone(),
        )
        .with_subagent_executor(Arc::new(subagent_executor));

        let executor = ToolExecutor::new(registry, Arc::clone(&self.settings));
        let submitted = slot.clone();
        let config = RunnerConfig::new("review")
            .with_system_prompt(REVIEW_SYSTEM_PROMPT)
            .with_completion_predicate(move |_, _| submitted.is_submitted())
            .with_completion_after_tools()
            .with_nudge_message(REVIEW_NUDGE);

        info!(
            trace_id = %trace_id,
            diff_bytes = request.diff.len(),
            snippets = request.snippets.len(),
            "Starting review"
        );

        let mut prepared: Option<PreparedPrompt> = None;
        let setup = async {
            if self.cancellation.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let fitted = self.prepare(&request)?;
            let messages = vec![Message::user(fitted.user_prompt())];
            prepared = Some(fitted);
            Ok::<_, AgentError>(messages)
        };
        let result = ConversationRunner::new(
            self.client.as_ref(),
            &executor,
            Arc::clone(&self.settings),
            config,
        )
        .with_progress(self.progress.as_ref())
        .run_prepared(setup, &ctx)
        .await?;

        let report = ReviewReport {
            trace_id,
            review: slot.take(),
            response: result.response,
            outcome: result.outcome,
            iterations: result.iterations,
            tool_calls: executor.records(),
            subagents_spawned: subagents.count(),
            plan: plan.steps(),
            allocation: prepared.as_ref().map(|p| p.allocation.clone()),
            was_truncated: prepared.as_ref().is_some_and(|p| p.was_truncated),
        };
        info!(
            trace_id = %report.trace_id,
            outcome = %report.outcome,
            submitted = report.is_complete(),
            tool_calls = report.tool_calls.len(),
            subagents = report.subagents_spawned,
            "Review finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::AgentSettings;
    use crate::test_support::{EchoTool, RecordingProgress, ScriptedModel, tool_call};
    use crate::{ChatCompletion, MessageRole};
    use serde_json::json;

    const DIFF: &str = "diff --git a/src/lib.rs b/src/lib.rs\n\
--- a/src/lib.rs\n\
+++ b/src/lib.rs\n\
@@ -1,3 +1,3 @@\n\
 fn add(a: i32, b: i32) -> i32 {\n\
-    a + b\n\
+    a - b\n\
 }\n";

    fn submit_call(id: &str) -> ChatCompletion {
        tool_call(
            id,
            "submit_review",
            json!({
                "summary": "add() subtracts.",
                "findings": [{
                    "file": "src/lib.rs", "line": 2, "severity": "critical",
                    "message": "Operator flipped from + to -."
                }]
            }),
        )
    }

    fn session(model: &Arc<ScriptedModel>, settings: AgentSettings) -> ReviewSession {
        ReviewSession::new(model.clone(), Arc::new(settings))
    }

    #[tokio::test]
    async fn completes_once_review_is_submitted() {
        let model = Arc::new(ScriptedModel::new(vec![submit_call("c1")]));
        let progress = Arc::new(RecordingProgress::default());
        let report = session(&model, AgentSettings::default())
            .with_progress(progress.clone())
            .run(ReviewRequest::new(DIFF))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.is_complete());
        assert_eq!(model.calls(), 1);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.tool_calls.len(), 1);
        assert!(report.tool_calls[0].success);
        assert!(!report.was_truncated);
        assert!(report.allocation.as_ref().is_some_and(|a| a.fits));
        assert!(report.render().contains("`src/lib.rs:2`"));
        assert!(report.trace_id.starts_with("tr-"));

        let first = &model.requests()[0];
        assert_eq!(first[0].role, MessageRole::System);
        assert!(first[1].text().contains("## Changes under review"));
        assert_eq!(
            model.tool_names()[0],
            vec!["run_subagent", "submit_review", "update_plan"]
        );
        assert_eq!(progress.messages()[0], "review: iteration 1/25");
    }

    #[tokio::test]
    async fn nudges_until_review_is_submitted() {
        let model = Arc::new(ScriptedModel::new(vec![
            ChatCompletion::text("Looks fine to me."),
            submit_call("c1"),
        ]));
        let report = session(&model, AgentSettings::default())
            .run(ReviewRequest::new(DIFF))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.is_complete());
        assert_eq!(model.calls(), 2);
        let second = &model.requests()[1];
        let last = second.last().unwrap();
        assert_eq!(last.role, MessageRole::User);
        assert_eq!(last.text(), REVIEW_NUDGE);
    }

    #[tokio::test]
    async fn stops_at_iteration_limit_without_review() {
        let settings = AgentSettings {
            max_iterations: 2,
            ..Default::default()
        };
        let model = Arc::new(ScriptedModel::repeating(ChatCompletion::text("LGTM")));
        let report = session(&model, settings)
            .run(ReviewRequest::new(DIFF))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::MaxIterationsReached);
        assert!(!report.is_complete());
        assert_eq!(model.calls(), 2);
        assert!(report.render().starts_with("No review was submitted"));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let model = Arc::new(ScriptedModel::default());
        let review = session(&model, AgentSettings::default());
        review.cancellation_token().cancel();

        let err = review.run(ReviewRequest::new(DIFF)).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_settings_fail_without_model_call() {
        let settings = AgentSettings {
            safety_ratio: 2.0,
            ..Default::default()
        };
        let model = Arc::new(ScriptedModel::default());
        let report = session(&model, settings)
            .run(ReviewRequest::new(DIFF))
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::Failed(_)));
        assert!(report.allocation.is_none());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn subagent_findings_feed_the_review() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_call("c1", "run_subagent", json!({"task": "Check callers of add"})),
            // Subagent turn: one tool call, then findings.
            tool_call("s1", "echo", json!({"text": "main.rs:10 add(1, 2)"})),
            ChatCompletion::text("add is only called from main with constants."),
            submit_call("c2"),
        ]));
        let report = session(&model, AgentSettings::default())
            .with_tool(EchoTool)
            .run(ReviewRequest::new(DIFF))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.subagents_spawned, 1);
        assert_eq!(model.tool_names()[1], vec!["echo"]);

        let spawn = &report.tool_calls[0];
        assert_eq!(spawn.tool_name, "run_subagent");
        assert!(spawn.success);
        assert!(spawn.result.contains("add is only called from main"));
        assert_eq!(spawn.nested_calls.len(), 1);
        assert_eq!(spawn.nested_calls[0].tool_name, "echo");
        assert_eq!(report.tool_calls[1].tool_name, "submit_review");
    }

    #[tokio::test]
    async fn plan_updates_are_reported() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_call(
                "c1",
                "update_plan",
                json!({"steps": [
                    {"step": "Read the diff", "status": "completed"},
                    {"step": "Submit", "status": "in_progress"}
                ]}),
            ),
            submit_call("c2"),
        ]));
        let report = session(&model, AgentSettings::default())
            .run(ReviewRequest::new(DIFF))
            .await
            .unwrap();

        assert_eq!(report.plan.len(), 2);
        assert_eq!(report.plan[1].status, StepStatus::InProgress);
    }

    #[test]
    fn dry_run_prepare_reports_budget() {
        let model = Arc::new(ScriptedModel::default());
        let prepared = session(&model, AgentSettings::default())
            .prepare(&ReviewRequest::new(DIFF))
            .unwrap();
        assert_eq!(prepared.allocation.budget_tokens, 6_553);
        assert_eq!(model.calls(), 0);
    }
}
