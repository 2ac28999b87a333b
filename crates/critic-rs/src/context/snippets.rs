//! Context snippet selection.
//!
//! Snippets are gathered elsewhere (embedding search, LSP lookups); this
//! module only decides which of them make it into the prompt. Identical
//! content is deduplicated (highest relevance wins), the rest is ordered by
//! type priority and then relevance, and snippets are accepted greedily until
//! the budget runs out. The snippet that only partially fits is cut in place,
//! and an unterminated code fence in the kept part is closed before the
//! truncation marker so the rendered prompt stays well-formed.

use crate::context::priority::{ContentPrioritization, ContentType};
use crate::context::tokenizer::TokenCounter;
use crate::context::truncator::{TRUNCATION_MARKER, fit_prefix};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A unit of supplementary context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub content: String,
    /// Relevance score in `0.0..=1.0`.
    #[serde(default)]
    pub relevance: f64,
}

impl ContextSnippet {
    pub fn new(
        id: impl Into<String>,
        kind: ContentType,
        content: impl Into<String>,
        relevance: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            relevance,
        }
    }

    /// The snippet as it appears inside its prompt bucket.
    pub fn render(&self) -> String {
        format!("{}{}\n", self.render_header(), self.content)
    }

    fn render_header(&self) -> String {
        format!("// {}\n", self.id)
    }
}

/// Snippets chosen by [`SnippetSelector::select`], in acceptance order.
#[derive(Debug, Clone, Default)]
pub struct SnippetSelection {
    pub snippets: Vec<ContextSnippet>,
    pub duplicates_removed: usize,
    /// Unique snippets that did not fit at all.
    pub dropped: usize,
    /// ID of the snippet that was cut to fit, if any.
    pub truncated_id: Option<String>,
    pub tokens_used: usize,
}

impl SnippetSelection {
    /// Rendered text for one prompt bucket.
    pub fn bucket_text(&self, kind: ContentType) -> String {
        let rendered: Vec<String> = self
            .snippets
            .iter()
            .filter(|s| s.kind == kind)
            .map(ContextSnippet::render)
            .collect();
        rendered.join("\n")
    }
}

/// Greedy, priority-ordered snippet packer.
#[derive(Clone)]
pub struct SnippetSelector {
    counter: Arc<dyn TokenCounter>,
    priority: ContentPrioritization,
}

impl SnippetSelector {
    pub fn new(counter: Arc<dyn TokenCounter>, priority: ContentPrioritization) -> Self {
        Self { counter, priority }
    }

    /// Pick snippets to fill at most `budget` tokens.
    pub fn select(&self, snippets: &[ContextSnippet], budget: usize) -> SnippetSelection {
        let (mut unique, duplicates_removed) = dedupe(snippets);
        unique.sort_by(|a, b| {
            self.priority
                .rank(a.kind)
                .cmp(&self.priority.rank(b.kind))
                .then(b.relevance.total_cmp(&a.relevance))
        });

        let mut selection = SnippetSelection {
            duplicates_removed,
            ..Default::default()
        };
        let mut remaining = budget;
        let total = unique.len();

        for snippet in unique {
            let cost = self.counter.count(&snippet.render());
            if cost <= remaining {
                remaining -= cost;
                selection.tokens_used += cost;
                selection.snippets.push(snippet);
                continue;
            }

            if let Some(cut) = self.truncate_snippet(&snippet, remaining) {
                let cost = self.counter.count(&cut.render());
                debug!(
                    "Snippet {} truncated to fit {remaining} remaining tokens",
                    snippet.id
                );
                selection.tokens_used += cost;
                selection.truncated_id = Some(cut.id.clone());
                selection.snippets.push(cut);
            }
            break;
        }

        selection.dropped = total - selection.snippets.len();
        debug!(
            "Selected {} snippet(s) ({} tokens), dropped {}, {} duplicate(s) removed",
            selection.snippets.len(),
            selection.tokens_used,
            selection.dropped,
            selection.duplicates_removed
        );
        selection
    }

    /// Cut `snippet` so its rendered form fits in `budget` tokens.
    fn truncate_snippet(&self, snippet: &ContextSnippet, budget: usize) -> Option<ContextSnippet> {
        // Header and trailing newline are charged separately from the content.
        let framing = self.counter.count(&format!("{}\n", snippet.render_header()));
        let content_budget = budget.checked_sub(framing)?;
        let content = fit_prefix(
            self.counter.as_ref(),
            &snippet.content,
            content_budget,
            close_fence_and_mark,
        )?;
        let cut = ContextSnippet {
            content,
            ..snippet.clone()
        };
        (self.counter.count(&cut.render()) <= budget).then_some(cut)
    }
}

/// Drop snippets with identical content, keeping the most relevant copy at
/// the position of the first occurrence.
pub fn dedupe(snippets: &[ContextSnippet]) -> (Vec<ContextSnippet>, usize) {
    let mut unique: Vec<ContextSnippet> = Vec::with_capacity(snippets.len());
    let mut index: HashMap<&str, usize> = HashMap::new();
    for snippet in snippets {
        match index.get(snippet.content.as_str()) {
            Some(&i) => {
                if snippet.relevance > unique[i].relevance {
                    unique[i] = snippet.clone();
                }
            }
            None => {
                index.insert(snippet.content.as_str(), unique.len());
                unique.push(snippet.clone());
            }
        }
    }
    let removed = snippets.len() - unique.len();
    (unique, removed)
}

/// Append the truncation marker, closing an open ``` fence first.
fn close_fence_and_mark(prefix: &str) -> String {
    let fences = prefix
        .lines()
        .filter(|l| l.trim_start().starts_with("```"))
        .count();
    if fences % 2 == 1 {
        format!("{}\n```{TRUNCATION_MARKER}", prefix.trim_end_matches('\n'))
    } else {
        format!("{prefix}{TRUNCATION_MARKER}")
    }
}
