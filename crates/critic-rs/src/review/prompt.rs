//! Fitting a review request into the prompt window.
//!
//! Snippets are packed into their per-type buckets first, then the waterfall
//! truncator trims the diff and the buckets against
//! `safety_ratio × max_input_tokens`. The section frame (headings and the diff
//! fence) is charged as part of the fixed cost, so the rendered prompt never
//! exceeds what the allocation reports.

use crate::agent::config::AgentSettings;
use crate::context::calculator::{TokenAllocation, TokenCalculator, TokenComponents};
use crate::context::priority::{ContentPrioritization, ContentType};
use crate::context::snippets::{ContextSnippet, SnippetSelector};
use crate::context::tokenizer::TokenCounter;
use crate::context::truncator::{BucketAction, WaterfallTruncator};
use crate::error::AgentError;
use crate::tools::names;
use std::sync::Arc;
use tracing::{debug, info};

pub const REVIEW_SYSTEM_PROMPT: &str = "You are critic, a meticulous code reviewer. \
Read the change and the supporting context, look for correctness bugs, security problems, \
broken invariants, and missing tests. Prefer a few well-supported findings over many \
speculative ones.\n\n\
Use `run_subagent` to delegate a focused, multi-step investigation; each subagent starts \
with a clean history and returns only its findings. Use `update_plan` to keep track of \
what you still need to check.\n\n\
When you are done, call `submit_review` exactly once with a short summary and your \
findings. The review is not finished until `submit_review` succeeds.";

pub const REVIEW_NUDGE: &str = "You have not submitted the review yet. Continue the \
investigation if something is still unclear, then call `submit_review` with your summary \
and findings.";

/// A change to review, plus pre-gathered context.
#[derive(Debug, Clone, Default)]
pub struct ReviewRequest {
    pub diff: String,
    pub snippets: Vec<ContextSnippet>,
    /// Extra reviewer guidance appended to the opening message.
    pub instructions: Option<String>,
}

impl ReviewRequest {
    pub fn new(diff: impl Into<String>) -> Self {
        Self {
            diff: diff.into(),
            ..Default::default()
        }
    }

    pub fn with_snippets(mut self, snippets: Vec<ContextSnippet>) -> Self {
        self.snippets = snippets;
        self
    }

    pub fn with_snippet(mut self, snippet: ContextSnippet) -> Self {
        self.snippets.push(snippet);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Snippet packing statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnippetStats {
    pub selected: usize,
    pub duplicates_removed: usize,
    pub dropped: usize,
    pub truncated_id: Option<String>,
}

/// A request after budget fitting, ready to render.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub intro: String,
    pub components: TokenComponents,
    pub allocation: TokenAllocation,
    pub was_truncated: bool,
    /// Per-bucket decisions from the waterfall, in priority order.
    pub actions: Vec<(ContentType, BucketAction)>,
    pub snippets: SnippetStats,
    priority: ContentPrioritization,
}

impl PreparedPrompt {
    /// The opening user message: intro, then the non-empty buckets in
    /// priority order under their headings.
    pub fn user_prompt(&self) -> String {
        let mut sections = vec![self.intro.clone()];
        for ty in self.priority.order() {
            let text = self.components.bucket(*ty);
            if text.trim().is_empty() {
                continue;
            }
            sections.push(render_section(*ty, text));
        }
        sections.join("\n\n")
    }
}

fn render_section(ty: ContentType, text: &str) -> String {
    match ty {
        ContentType::Diff => format!("## {}\n```diff\n{}\n```", ty.heading(), text),
        _ => format!("## {}\n{}", ty.heading(), text),
    }
}

/// Every heading and fence a rendered prompt can contain.
fn frame_text() -> String {
    let frames: Vec<String> = ContentType::ALL
        .iter()
        .map(|ty| render_section(*ty, ""))
        .collect();
    frames.join("\n\n")
}

fn intro_text(instructions: Option<&str>) -> String {
    let mut intro = String::from(
        "Review the following change. The diff comes first, followed by related code \
         gathered ahead of time. Parts may have been truncated to fit the context window.",
    );
    if let Some(extra) = instructions.map(str::trim).filter(|s| !s.is_empty()) {
        intro.push_str("\n\nReviewer instructions:\n");
        intro.push_str(extra);
    }
    intro.push_str(&format!(
        "\n\nFinish by calling `{}`.",
        names::SUBMIT_REVIEW
    ));
    intro
}

/// Fit `request` into the window described by `settings`.
pub fn prepare(
    request: &ReviewRequest,
    settings: &AgentSettings,
    counter: Arc<dyn TokenCounter>,
) -> Result<PreparedPrompt, AgentError> {
    settings.validate()?;
    let priority = settings.content_priority.clone();
    let calculator = TokenCalculator::new(Arc::clone(&counter))
        .with_max_input_tokens(settings.max_input_tokens);
    let budget = calculator.safe_budget(settings.safety_ratio);

    let intro = intro_text(request.instructions.as_deref());
    let mut components = TokenComponents {
        system_prompt: REVIEW_SYSTEM_PROMPT.to_string(),
        messages: vec![format!("{intro}\n\n{}", frame_text())],
        diff: request.diff.clone(),
        ..Default::default()
    };

    // Snippets get whatever the fixed cost leaves; the waterfall below
    // settles the contest between the diff and the context buckets.
    let snippet_budget = budget.saturating_sub(calculator.fixed_tokens(&components));
    let selection = SnippetSelector::new(counter, priority.clone())
        .select(&request.snippets, snippet_budget);
    for ty in ContentType::ALL {
        let text = selection.bucket_text(ty);
        if text.is_empty() {
            continue;
        }
        let bucket = components.bucket_mut(ty);
        if !bucket.is_empty() {
            bucket.push('\n');
        }
        bucket.push_str(&text);
    }
    debug!(
        selected = selection.snippets.len(),
        dropped = selection.dropped,
        duplicates = selection.duplicates_removed,
        "Packed context snippets"
    );

    let outcome = WaterfallTruncator::new(calculator.clone(), priority.clone())
        .truncate(&components, budget);
    let allocation = calculator.calculate_allocation(&outcome.components, settings.safety_ratio);
    info!("Prompt budget: {}", allocation.to_log_string());

    Ok(PreparedPrompt {
        intro,
        components: outcome.components,
        allocation,
        was_truncated: outcome.was_truncated,
        actions: outcome.actions,
        snippets: SnippetStats {
            selected: selection.snippets.len(),
            duplicates_removed: selection.duplicates_removed,
            dropped: selection.dropped,
            truncated_id: selection.truncated_id,
        },
        priority,
    })
}
