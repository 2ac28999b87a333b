//! Token calculator: measures a prompt bundle and breaks the cost down.
//!
//! A prompt is modelled as [`TokenComponents`]: fixed parts (system prompt,
//! turn messages, response prefill) plus four truncatable buckets (diff and
//! three kinds of context). The calculator charges
//! [`MESSAGE_OVERHEAD_TOKENS`] per logical message and a single
//! [`FORMATTING_OVERHEAD_TOKENS`] for the request envelope, mirroring how the
//! request is framed on the wire.

use crate::context::priority::ContentType;
use crate::context::tokenizer::{CharEstimateCounter, FALLBACK_CONTEXT_WINDOW, TokenCounter};
use serde::Serialize;
use std::sync::Arc;

/// Role/separator tokens charged for every logical message.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Fixed envelope cost of one request (priming tokens, tool-list framing).
pub const FORMATTING_OVERHEAD_TOKENS: usize = 16;

/// Fraction of the model's input window the prompt may use by default.
pub const DEFAULT_SAFETY_RATIO: f64 = 0.8;

/// Everything that goes into one review prompt.
///
/// The four bucket fields are rendered together as a single user turn, so
/// they count as one logical message regardless of content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenComponents {
    pub system_prompt: String,
    /// Additional user/assistant turns that are never truncated.
    pub messages: Vec<String>,
    /// Optional assistant prefill the response continues from.
    pub response_prefill: Option<String>,
    pub diff: String,
    pub embedding_context: String,
    pub lsp_reference_context: String,
    pub lsp_definition_context: String,
}

impl TokenComponents {
    /// Content of one truncatable bucket.
    pub fn bucket(&self, ty: ContentType) -> &str {
        match ty {
            ContentType::Diff => &self.diff,
            ContentType::Embedding => &self.embedding_context,
            ContentType::LspReference => &self.lsp_reference_context,
            ContentType::LspDefinition => &self.lsp_definition_context,
        }
    }

    pub fn bucket_mut(&mut self, ty: ContentType) -> &mut String {
        match ty {
            ContentType::Diff => &mut self.diff,
            ContentType::Embedding => &mut self.embedding_context,
            ContentType::LspReference => &mut self.lsp_reference_context,
            ContentType::LspDefinition => &mut self.lsp_definition_context,
        }
    }

    /// System + turn messages + the content turn + prefill.
    pub fn message_count(&self) -> usize {
        2 + self.messages.len() + usize::from(self.response_prefill.is_some())
    }
}

/// Per-type token counts for the context buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextTokens {
    pub embedding: usize,
    pub lsp_reference: usize,
    pub lsp_definition: usize,
}

impl ContextTokens {
    pub fn total(&self) -> usize {
        self.embedding + self.lsp_reference + self.lsp_definition
    }
}

/// Structured budget breakdown for a [`TokenComponents`] bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenAllocation {
    pub system_prompt_tokens: usize,
    /// Turn messages plus response prefill.
    pub message_tokens: usize,
    pub diff_tokens: usize,
    pub context_tokens: ContextTokens,
    pub message_overhead_tokens: usize,
    pub formatting_overhead_tokens: usize,
    /// Everything except the truncatable buckets.
    pub fixed_tokens: usize,
    pub total_required_tokens: usize,
    pub max_input_tokens: usize,
    pub safety_ratio: f64,
    /// `max_input_tokens * safety_ratio`, rounded down.
    pub budget_tokens: usize,
    pub fits: bool,
}

impl TokenAllocation {
    /// Tokens the prompt is over budget by (0 when it fits).
    pub fn overflow(&self) -> usize {
        self.total_required_tokens.saturating_sub(self.budget_tokens)
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "{} / {} tokens (fixed {}, diff {}, context {}){}",
            self.total_required_tokens,
            self.budget_tokens,
            self.fixed_tokens,
            self.diff_tokens,
            self.context_tokens.total(),
            if self.fits { "" } else { " [over budget]" },
        )
    }
}

/// Computes token costs through an injected [`TokenCounter`].
#[derive(Clone)]
pub struct TokenCalculator {
    counter: Arc<dyn TokenCounter>,
    max_input_override: Option<usize>,
}

impl std::fmt::Debug for TokenCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCalculator")
            .field("max_input_tokens", &self.max_input_tokens())
            .finish()
    }
}

impl TokenCalculator {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            max_input_override: None,
        }
    }

    /// Override the model's input window (e.g. from settings).
    pub fn with_max_input_tokens(mut self, max: Option<usize>) -> Self {
        self.max_input_override = max;
        self
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Model input window: explicit override, then the tokenizer's own limit,
    /// then [`FALLBACK_CONTEXT_WINDOW`].
    pub fn max_input_tokens(&self) -> usize {
        self.max_input_override
            .or_else(|| self.counter.max_input_tokens())
            .unwrap_or(FALLBACK_CONTEXT_WINDOW)
    }

    /// Safe prompt budget for `safety_ratio` (clamped to `0.0..=1.0`).
    pub fn safe_budget(&self, safety_ratio: f64) -> usize {
        let ratio = if safety_ratio.is_finite() {
            safety_ratio.clamp(0.0, 1.0)
        } else {
            DEFAULT_SAFETY_RATIO
        };
        (self.max_input_tokens() as f64 * ratio).floor() as usize
    }

    pub fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Cost of everything that is never truncated.
    pub fn fixed_tokens(&self, c: &TokenComponents) -> usize {
        self.count(&c.system_prompt)
            + self.turn_message_tokens(c)
            + c.message_count() * MESSAGE_OVERHEAD_TOKENS
            + FORMATTING_OVERHEAD_TOKENS
    }

    pub fn bucket_tokens(&self, c: &TokenComponents, ty: ContentType) -> usize {
        self.count(c.bucket(ty))
    }

    /// Flat total for the whole bundle.
    pub fn total_tokens(&self, c: &TokenComponents) -> usize {
        self.fixed_tokens(c)
            + ContentType::ALL
                .iter()
                .map(|ty| self.bucket_tokens(c, *ty))
                .sum::<usize>()
    }

    /// Full breakdown against `safety_ratio` of the input window.
    pub fn calculate_allocation(&self, c: &TokenComponents, safety_ratio: f64) -> TokenAllocation {
        let system_prompt_tokens = self.count(&c.system_prompt);
        let message_tokens = self.turn_message_tokens(c);
        let message_overhead_tokens = c.message_count() * MESSAGE_OVERHEAD_TOKENS;
        let diff_tokens = self.bucket_tokens(c, ContentType::Diff);
        let context_tokens = ContextTokens {
            embedding: self.bucket_tokens(c, ContentType::Embedding),
            lsp_reference: self.bucket_tokens(c, ContentType::LspReference),
            lsp_definition: self.bucket_tokens(c, ContentType::LspDefinition),
        };
        let fixed_tokens = system_prompt_tokens
            + message_tokens
            + message_overhead_tokens
            + FORMATTING_OVERHEAD_TOKENS;
        let total_required_tokens = fixed_tokens + diff_tokens + context_tokens.total();
        let budget_tokens = self.safe_budget(safety_ratio);

        TokenAllocation {
            system_prompt_tokens,
            message_tokens,
            diff_tokens,
            context_tokens,
            message_overhead_tokens,
            formatting_overhead_tokens: FORMATTING_OVERHEAD_TOKENS,
            fixed_tokens,
            total_required_tokens,
            max_input_tokens: self.max_input_tokens(),
            safety_ratio,
            budget_tokens,
            fits: total_required_tokens <= budget_tokens,
        }
    }

    fn turn_message_tokens(&self, c: &TokenComponents) -> usize {
        c.messages.iter().map(|m| self.count(m)).sum::<usize>()
            + c.response_prefill.as_deref().map_or(0, |p| self.count(p))
    }
}

impl Default for TokenCalculator {
    fn default() -> Self {
        Self::new(Arc::new(CharEstimateCounter::new()))
    }
}
