//! Token counting capability.
//!
//! Chunking budgets are expressed in tokens. When an exact tokenizer is not
//! available the count is estimated from character length.

/// Deterministic, monotonic token counter: appending text never lowers the
/// count.
pub trait TokenCounter: Send + Sync {
    fn name(&self) -> &str;

    fn count(&self, text: &str) -> usize;
}

/// Character-based estimate: `ceil(chars / chars_per_token)`.
///
/// ~4 characters per token is accurate within ~10% for BPE tokenizers on
/// English text.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimate {
    chars_per_token: usize,
}

impl CharEstimate {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharEstimate {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for CharEstimate {
    fn name(&self) -> &str {
        "char_estimate"
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}
