//! The `update_plan` tool: a checklist the main analysis keeps across
//! iterations. Each call replaces the whole plan.

use crate::agent::context::ExecutionContext;
use crate::error::ToolError;
use crate::tools::core::{Tool, ToolFuture, ToolOutput, parse_tool_args};
use crate::tools::names;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "[ ]"),
            StepStatus::InProgress => write!(f, "[~]"),
            StepStatus::Completed => write!(f, "[x]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// What to check.
    pub step: String,
    pub status: StepStatus,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdatePlanArgs {
    /// The complete plan, replacing the previous one.
    steps: Vec<PlanStep>,
}

pub struct UpdatePlanTool {
    steps: Mutex<Vec<PlanStep>>,
}

impl UpdatePlanTool {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
        }
    }

    /// Current plan.
    pub fn steps(&self) -> Vec<PlanStep> {
        self.steps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn format_plan(steps: &[PlanStep]) -> String {
        if steps.is_empty() {
            return "Plan is empty.".into();
        }
        let done = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let mut out = format!("Plan ({done}/{} done):\n", steps.len());
        for (i, s) in steps.iter().enumerate() {
            out.push_str(&format!("  {}. {} {}\n", i + 1, s.status, s.step));
        }
        out
    }
}

impl Default for UpdatePlanTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for UpdatePlanTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            names::UPDATE_PLAN,
            "Replace the review plan. Send every step with its status; at most one step \
             may be in_progress.",
            json_schema_for::<UpdatePlanArgs>(),
        )
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value, _ctx: &'a ExecutionContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: UpdatePlanArgs = parse_tool_args(args)?;
            if args.steps.iter().any(|s| s.step.trim().is_empty()) {
                return Err(ToolError::InvalidArguments("plan steps must not be empty".into()));
            }
            let active = args
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::InProgress)
                .count();
            if active > 1 {
                return Err(ToolError::InvalidArguments(format!(
                    "{active} steps are in_progress; at most one may be"
                )));
            }

            let text = Self::format_plan(&args.steps);
            debug!(steps = args.steps.len(), "Plan updated");
            *self.steps.lock().unwrap_or_else(|e| e.into_inner()) = args.steps;
            Ok(ToolOutput::text(text))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::root_context;
    use serde_json::json;

    #[tokio::test]
    async fn replaces_plan() {
        let tool = UpdatePlanTool::new();
        let ctx = root_context();
        tool.execute(
            &json!({"steps": [{"step": "read diff", "status": "pending"}]}),
            &ctx,
        )
        .await
        .unwrap();

        let out = tool
            .execute(
                &json!({"steps": [
                    {"step": "read diff", "status": "completed"},
                    {"step": "check callers", "status": "in_progress"},
                    {"step": "write review", "status": "pending"}
                ]}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(
            out.data,
            "Plan (1/3 done):\n  1. [x] read diff\n  2. [~] check callers\n  3. [ ] write review\n"
        );
        assert_eq!(tool.steps().len(), 3);
        assert_eq!(tool.steps()[1].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn rejects_two_active_steps() {
        let tool = UpdatePlanTool::new();
        let err = tool
            .execute(
                &json!({"steps": [
                    {"step": "a", "status": "in_progress"},
                    {"step": "b", "status": "in_progress"}
                ]}),
                &root_context(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(tool.steps().is_empty());
    }

    #[tokio::test]
    async fn empty_plan() {
        let tool = UpdatePlanTool::new();
        let out = tool.execute(&json!({"steps": []}), &root_context()).await.unwrap();
        assert_eq!(out.data, "Plan is empty.");
    }
}
