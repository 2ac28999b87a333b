//! Token-budget engine: what prompt content fits in a bounded window.
//!
//! 1. **[`tokenizer`]**: [`TokenCounter`] abstraction and the
//!    chars-per-token [`CharEstimateCounter`].
//! 2. **[`calculator`]**: [`TokenCalculator`] turns a [`TokenComponents`]
//!    bundle into a [`TokenAllocation`], charging per-message and formatting
//!    overhead.
//! 3. **[`truncator`]**: [`WaterfallTruncator`] fits the truncatable buckets
//!    into a target in [`ContentPrioritization`] order.
//! 4. **[`diff`]**: hunk-preserving and emergency fallbacks for diffs.
//! 5. **[`snippets`]**: [`SnippetSelector`] dedupes and packs pre-gathered
//!    [`ContextSnippet`]s.

pub mod calculator;
pub mod diff;
pub mod priority;
pub mod snippets;
pub mod tokenizer;
pub mod truncator;

pub use calculator::{TokenAllocation, TokenCalculator, TokenComponents};
pub use priority::{ContentPrioritization, ContentType};
pub use snippets::{ContextSnippet, SnippetSelection, SnippetSelector};
pub use tokenizer::{CharEstimateCounter, DEFAULT_CHARS_PER_TOKEN, TokenCounter};
pub use truncator::{BucketAction, TruncationOutcome, WaterfallTruncator};
