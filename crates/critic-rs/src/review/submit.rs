//! The `submit_review` tool: the review's completion marker.

use crate::agent::context::ExecutionContext;
use crate::error::ToolError;
use crate::tools::core::{Tool, ToolFuture, ToolOutput, parse_tool_args};
use crate::tools::names;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Nit,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Nit => "nit",
        })
    }
}

/// One issue found in the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    /// Path of the affected file.
    pub file: String,
    /// Line in the new version of the file, when the issue has one.
    #[serde(default)]
    pub line: Option<u32>,
    pub severity: Severity,
    /// What is wrong and how to fix it.
    pub message: String,
}

impl Finding {
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{line}", self.file),
            None => self.file.clone(),
        }
    }
}

/// The final review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubmittedReview {
    /// Overall assessment in a few sentences.
    pub summary: String,
    /// Issues found, most severe first. Empty when the change looks good.
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl SubmittedReview {
    /// Markdown rendering, findings sorted by severity.
    pub fn render(&self) -> String {
        let mut out = format!("## Summary\n\n{}\n", self.summary.trim());
        if self.findings.is_empty() {
            out.push_str("\nNo issues found.\n");
            return out;
        }
        let mut findings: Vec<&Finding> = self.findings.iter().collect();
        findings.sort_by_key(|f| f.severity);
        out.push_str("\n## Findings\n\n");
        for f in findings {
            out.push_str(&format!("- **{}** `{}`: {}\n", f.severity, f.location(), f.message));
        }
        out
    }
}

/// Where the submitted review lands. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct ReviewSlot(Arc<Mutex<Option<SubmittedReview>>>);

impl ReviewSlot {
    pub fn is_submitted(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn get(&self) -> Option<SubmittedReview> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn take(&self) -> Option<SubmittedReview> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Store `review` unless one is already there.
    fn fill(&self, review: SubmittedReview) -> bool {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(review);
        true
    }
}

/// Accepts the final review. Only the first valid submission counts.
pub struct SubmitReviewTool {
    slot: ReviewSlot,
}

impl SubmitReviewTool {
    pub fn new(slot: ReviewSlot) -> Self {
        Self { slot }
    }
}

impl Tool for SubmitReviewTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            names::SUBMIT_REVIEW,
            "Submit the final review. Call exactly once, after the investigation is complete.",
            json_schema_for::<SubmittedReview>(),
        )
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value, _ctx: &'a ExecutionContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let review: SubmittedReview = parse_tool_args(args)?;
            if review.summary.trim().is_empty() {
                return Err(ToolError::InvalidArguments("summary must not be empty".into()));
            }
            if let Some(f) = review.findings.iter().find(|f| f.message.trim().is_empty()) {
                return Err(ToolError::InvalidArguments(format!(
                    "finding at {} has an empty message",
                    f.location()
                )));
            }

            let count = review.findings.len();
            if !self.slot.fill(review) {
                return Err(ToolError::Failed(
                    "a review was already submitted; it cannot be replaced".into(),
                ));
            }
            info!(findings = count, "Review submitted");
            Ok(ToolOutput::text(format!("Review recorded with {count} finding(s).")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::root_context;
    use serde_json::json;

    #[tokio::test]
    async fn stores_first_submission() {
        let slot = ReviewSlot::default();
        let tool = SubmitReviewTool::new(slot.clone());
        let ctx = root_context();
        let args = json!({
            "summary": "Subtraction replaces addition.",
            "findings": [{
                "file": "src/lib.rs", "line": 3, "severity": "critical",
                "message": "add() now subtracts"
            }]
        });

        let out = tool.execute(&args, &ctx).await.unwrap();
        assert_eq!(out.data, "Review recorded with 1 finding(s).");
        let review = slot.get().unwrap();
        assert_eq!(review.findings[0].severity, Severity::Critical);
        assert_eq!(review.findings[0].location(), "src/lib.rs:3");

        let again = tool.execute(&json!({"summary": "second"}), &ctx).await;
        assert!(matches!(again, Err(ToolError::Failed(_))));
        assert_eq!(slot.get().unwrap().summary, "Subtraction replaces addition.");
    }

    #[tokio::test]
    async fn rejects_empty_summary() {
        let slot = ReviewSlot::default();
        let tool = SubmitReviewTool::new(slot.clone());
        let err = tool
            .execute(&json!({"summary": "  "}), &root_context())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(!slot.is_submitted());
    }

    #[test]
    fn render_sorts_by_severity() {
        let review = SubmittedReview {
            summary: "Two issues.".into(),
            findings: vec![
                Finding {
                    file: "a.rs".into(),
                    line: None,
                    severity: Severity::Nit,
                    message: "typo".into(),
                },
                Finding {
                    file: "b.rs".into(),
                    line: Some(7),
                    severity: Severity::Major,
                    message: "race".into(),
                },
            ],
        };
        let text = review.render();
        assert!(text.find("`b.rs:7`").unwrap() < text.find("`a.rs`").unwrap());
        assert!(text.contains("- **major** `b.rs:7`: race"));
    }

    #[test]
    fn schema_requires_summary() {
        let def = SubmitReviewTool::new(ReviewSlot::default()).definition();
        assert_eq!(def.function.name, "submit_review");
        let required = def.function.parameters["required"].as_array().unwrap();
        assert!(required.contains(&json!("summary")));
    }
}
