//! Token-budgeted text chunking.
//!
//! Splits oversized text into pieces whose counted length fits a token
//! budget. Chunks are borrowed slices of the input, produced lazily; the
//! iterator is `Clone`, so a sequence can be restarted from any point.
//!
//! Boundaries are found by binary search over character boundaries, so an
//! exact tokenizer costs `O(log n)` counts per chunk.

use std::sync::Arc;

use ragline_config::ChunkingStrategy;
use ragline_core::{CharEstimate, TokenCounter};
use tracing::warn;

/// Splits text against a [`TokenCounter`].
#[derive(Clone)]
pub struct Chunker {
    counter: Arc<dyn TokenCounter>,
}

impl Chunker {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Chunker over `ceil(chars / chars_per_token)`.
    pub fn char_estimate(chars_per_token: usize) -> Self {
        Self::new(Arc::new(CharEstimate::new(chars_per_token)))
    }

    /// Pick the counter for `strategy`. `None` disables chunking; an exact
    /// strategy without a tokenizer degrades to the character estimate.
    pub fn for_strategy(
        strategy: ChunkingStrategy,
        exact: Option<Arc<dyn TokenCounter>>,
        chars_per_token: usize,
    ) -> Option<Self> {
        match (strategy, exact) {
            (ChunkingStrategy::None, _) => None,
            (ChunkingStrategy::ExactTokenizer, Some(counter)) => Some(Self::new(counter)),
            (ChunkingStrategy::ExactTokenizer, None) => {
                warn!("No exact tokenizer available, chunking with character estimate");
                Some(Self::char_estimate(chars_per_token))
            }
            (ChunkingStrategy::CharEstimate, _) => Some(Self::char_estimate(chars_per_token)),
        }
    }

    pub fn counter_name(&self) -> &str {
        self.counter.name()
    }

    /// Counted length of `text`.
    pub fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Lazily split `text` into chunks of at most `max_tokens` each.
    /// A budget of 0 is treated as 1.
    pub fn chunks<'t>(&self, text: &'t str, max_tokens: usize) -> Chunks<'t> {
        Chunks {
            counter: self.counter.clone(),
            rest: text,
            max_tokens: max_tokens.max(1),
        }
    }
}

/// Iterator over the chunks of one text. See [`Chunker::chunks`].
#[derive(Clone)]
pub struct Chunks<'t> {
    counter: Arc<dyn TokenCounter>,
    rest: &'t str,
    max_tokens: usize,
}

impl Chunks<'_> {
    /// Byte length of the longest prefix of `self.rest` that fits the
    /// budget, or of its first character when even that does not fit.
    fn next_boundary(&self) -> usize {
        let rest = self.rest;
        if self.counter.count(rest) <= self.max_tokens {
            return rest.len();
        }

        let first = rest.chars().next().map_or(rest.len(), char::len_utf8);
        if self.counter.count(&rest[..first]) > self.max_tokens {
            return first;
        }

        // Invariant: rest[..fits] fits, rest[..overflows] does not.
        let (mut fits, mut overflows) = (first, rest.len());
        while overflows - fits > 1 {
            let mid = fits + (overflows - fits) / 2;
            let Some(mid) = nearest_boundary(rest, mid, fits, overflows) else {
                break;
            };
            if self.counter.count(&rest[..mid]) <= self.max_tokens {
                fits = mid;
            } else {
                overflows = mid;
            }
        }
        fits
    }
}

/// A char boundary strictly between `lo` and `hi`, starting the search at
/// `mid` and moving down first.
fn nearest_boundary(text: &str, mid: usize, lo: usize, hi: usize) -> Option<usize> {
    (lo + 1..=mid)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .or_else(|| (mid + 1..hi).find(|&i| text.is_char_boundary(i)))
}

impl<'t> Iterator for Chunks<'t> {
    type Item = &'t str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let end = self.next_boundary();
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
