//! Token counting.
//!
//! The budget engine never hard-codes a tokenizer; it asks a [`TokenCounter`].
//! [`CharEstimateCounter`] is the default and is what the truncator's
//! character-proportional cuts are calibrated against.

/// Default characters per token (conservative estimate for English and code).
/// Most tokenizers average 3-4 chars per token; 3.5 is a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Input window assumed when the tokenizer does not report one.
pub const FALLBACK_CONTEXT_WINDOW: usize = 8_192;

/// Counts tokens for arbitrary text.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` occupies.
    fn count(&self, text: &str) -> usize;

    /// The model's maximum input size, if known.
    fn max_input_tokens(&self) -> Option<usize> {
        None
    }

    /// Average characters per token, used to turn token budgets into cut points.
    fn chars_per_token(&self) -> f64 {
        DEFAULT_CHARS_PER_TOKEN
    }
}

/// Character-ratio estimate: `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone)]
pub struct CharEstimateCounter {
    chars_per_token: f64,
    max_input_tokens: Option<usize>,
}

impl CharEstimateCounter {
    pub fn new() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            max_input_tokens: None,
        }
    }

    /// Override the chars-per-token ratio. Non-positive values are ignored.
    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        if cpt > 0.0 {
            self.chars_per_token = cpt;
        }
        self
    }

    pub fn with_max_input_tokens(mut self, max: Option<usize>) -> Self {
        self.max_input_tokens = max;
        self
    }
}

impl Default for CharEstimateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for CharEstimateCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }

    fn max_input_tokens(&self) -> Option<usize> {
        self.max_input_tokens
    }

    fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_free() {
        assert_eq!(CharEstimateCounter::new().count(""), 0);
    }

    #[test]
    fn rounds_up() {
        let counter = CharEstimateCounter::new().with_chars_per_token(4.0);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let counter = CharEstimateCounter::new().with_chars_per_token(1.0);
        assert_eq!(counter.count("héllo"), 5);
    }

    #[test]
    fn ignores_nonpositive_ratio() {
        let counter = CharEstimateCounter::new().with_chars_per_token(0.0);
        assert_eq!(counter.chars_per_token(), DEFAULT_CHARS_PER_TOKEN);
    }
}
