//! Waterfall truncation of prompt buckets.
//!
//! Given a target token count, the truncator keeps the fixed parts of a
//! [`TokenComponents`] bundle untouched and walks the four truncatable
//! buckets in [`ContentPrioritization`] order: buckets that fit are kept
//! whole, the first one that does not is cut down to exactly the remaining
//! budget, and every bucket after it is cleared. Lower-priority content is
//! never kept at the expense of higher-priority content.
//!
//! Cuts are character-proportional (via the counter's chars-per-token ratio),
//! snapped back to a line boundary, and end with [`TRUNCATION_MARKER`] whose
//! cost is reserved up front. Every candidate cut is re-measured, so the
//! result never exceeds the target even when the ratio is only an estimate.
//!
//! Diffs get a structure-aware fallback (see [`super::diff`]) when a
//! proportional cut would not contain any hunk content.

use crate::context::calculator::{TokenCalculator, TokenComponents};
use crate::context::diff;
use crate::context::priority::{ContentPrioritization, ContentType};
use crate::context::tokenizer::TokenCounter;
use serde::Serialize;
use tracing::{debug, info};

/// Appended to every proportionally truncated bucket.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// How a truncated bucket was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    Proportional,
    HunkPreserving,
    EmergencySummary,
}

/// What happened to one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BucketAction {
    Kept {
        tokens: usize,
    },
    Truncated {
        from: usize,
        to: usize,
        strategy: TruncationStrategy,
    },
    Cleared {
        from: usize,
    },
}

/// Result of [`WaterfallTruncator::truncate`].
#[derive(Debug, Clone)]
pub struct TruncationOutcome {
    pub components: TokenComponents,
    pub was_truncated: bool,
    /// Per-bucket decisions, in priority order.
    pub actions: Vec<(ContentType, BucketAction)>,
    pub target_tokens: usize,
}

impl TruncationOutcome {
    pub fn action(&self, ty: ContentType) -> Option<BucketAction> {
        self.actions.iter().find(|(t, _)| *t == ty).map(|(_, a)| *a)
    }
}

/// Priority-ordered budget allocator for [`TokenComponents`].
#[derive(Debug, Clone)]
pub struct WaterfallTruncator {
    calculator: TokenCalculator,
    priority: ContentPrioritization,
}

impl WaterfallTruncator {
    pub fn new(calculator: TokenCalculator, priority: ContentPrioritization) -> Self {
        Self {
            calculator,
            priority,
        }
    }

    pub fn priority(&self) -> &ContentPrioritization {
        &self.priority
    }

    /// Fit `components` into `target_tokens`. Never fails; the worst case is
    /// every bucket cleared with `was_truncated = true`.
    pub fn truncate(&self, components: &TokenComponents, target_tokens: usize) -> TruncationOutcome {
        let calc = &self.calculator;
        let mut out = components.clone();
        let order = self.priority.order();
        let sizes: Vec<usize> = order
            .iter()
            .map(|ty| calc.bucket_tokens(components, *ty))
            .collect();

        let fixed = calc.fixed_tokens(components);
        if fixed > target_tokens {
            info!(
                "Fixed prompt cost {fixed} exceeds target {target_tokens}; clearing all context buckets"
            );
            let actions = order
                .iter()
                .zip(&sizes)
                .map(|(ty, from)| {
                    out.bucket_mut(*ty).clear();
                    (*ty, BucketAction::Cleared { from: *from })
                })
                .collect();
            return TruncationOutcome {
                components: out,
                was_truncated: true,
                actions,
                target_tokens,
            };
        }

        let mut remaining = target_tokens - fixed;
        let requested: usize = sizes.iter().sum();
        if requested <= remaining {
            debug!("Prompt fits: {requested} bucket tokens within {remaining} available");
            return TruncationOutcome {
                components: out,
                was_truncated: false,
                actions: order
                    .iter()
                    .zip(&sizes)
                    .map(|(ty, t)| (*ty, BucketAction::Kept { tokens: *t }))
                    .collect(),
                target_tokens,
            };
        }

        info!(
            "Truncating context: {requested} bucket tokens requested, {remaining} available after {fixed} fixed"
        );

        let mut actions = Vec::with_capacity(order.len());
        let mut exhausted = false;
        for (ty, size) in order.iter().copied().zip(sizes) {
            if exhausted {
                if size > 0 {
                    debug!("Clearing {ty} ({size} tokens): budget exhausted by higher priority");
                }
                out.bucket_mut(ty).clear();
                actions.push((ty, BucketAction::Cleared { from: size }));
                continue;
            }
            if size <= remaining {
                remaining -= size;
                actions.push((ty, BucketAction::Kept { tokens: size }));
                continue;
            }

            let (text, strategy) = self.cut_bucket(ty, components.bucket(ty), remaining);
            let to = calc.count(&text);
            debug!("Truncated {ty}: {size} -> {to} tokens ({strategy:?})");
            let action = if text.is_empty() {
                BucketAction::Cleared { from: size }
            } else {
                BucketAction::Truncated {
                    from: size,
                    to,
                    strategy,
                }
            };
            *out.bucket_mut(ty) = text;
            actions.push((ty, action));
            remaining = 0;
            exhausted = true;
        }

        TruncationOutcome {
            components: out,
            was_truncated: true,
            actions,
            target_tokens,
        }
    }

    fn cut_bucket(
        &self,
        ty: ContentType,
        text: &str,
        budget: usize,
    ) -> (String, TruncationStrategy) {
        let counter = self.calculator.counter();
        let proportional = fit_prefix(counter, text, budget, |p| format!("{p}{TRUNCATION_MARKER}"));

        if ty != ContentType::Diff {
            return (proportional.unwrap_or_default(), TruncationStrategy::Proportional);
        }

        if let Some(cut) = proportional
            && diff::is_usable_cut(text, &cut)
        {
            return (cut, TruncationStrategy::Proportional);
        }
        if let Some(cut) = diff::truncate_preserving_hunks(counter, text, budget) {
            return (cut, TruncationStrategy::HunkPreserving);
        }
        info!("No diff hunk fits in {budget} tokens; emitting changed-file summary");
        (
            diff::emergency_summary(counter, text, budget).unwrap_or_default(),
            TruncationStrategy::EmergencySummary,
        )
    }
}

// ── Cut helpers ────────────────────────────────────────────────────

/// Longest prefix of `text` with at most `max_chars` characters, snapped back
/// to the last line break. A single overlong line is cut mid-line.
pub(crate) fn snap_to_line(text: &str, max_chars: usize) -> &str {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    let (head, _) = text.split_at(end);
    if end == text.len() {
        return head;
    }
    match head.rfind('\n') {
        Some(pos) if pos > 0 => head.split_at(pos).0,
        _ => head,
    }
}

/// Cut `text` so that `finish(prefix)` measures at most `budget` tokens.
///
/// `finish` appends whatever trailer the caller needs (marker, closing
/// fence). Its cost on an empty prefix is reserved before the first cut.
/// Returns `None` when no non-empty prefix fits.
pub(crate) fn fit_prefix<F>(
    counter: &dyn TokenCounter,
    text: &str,
    budget: usize,
    finish: F,
) -> Option<String>
where
    F: Fn(&str) -> String,
{
    if budget == 0 || text.is_empty() {
        return None;
    }
    let reserve = counter.count(&finish(""));
    if reserve >= budget {
        return None;
    }
    let cpt = counter.chars_per_token();
    let mut max_chars = ((budget - reserve) as f64 * cpt).floor() as usize;
    while max_chars > 0 {
        let prefix = snap_to_line(text, max_chars);
        if prefix.is_empty() {
            return None;
        }
        let candidate = finish(prefix);
        let used = counter.count(&candidate);
        if used <= budget {
            return Some(candidate);
        }
        let overshoot = ((used - budget) as f64 * cpt).ceil() as usize;
        max_chars = prefix.chars().count().saturating_sub(overshoot.max(1));
    }
    None
}
