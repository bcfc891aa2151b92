//! Exact token counting with the model's own HuggingFace tokenizer.

use ragline_core::{CharEstimate, ConfigurationError, TokenCounter};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::trace;

/// Counts tokens with a `tokenizer.json`. Falls back to the character
/// estimate for text the tokenizer rejects.
pub struct TokenizerCounter {
    tokenizer: Tokenizer,
    fallback: CharEstimate,
}

impl TokenizerCounter {
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| ConfigurationError::LoadFailed {
            what: format!("tokenizer {}", path.display()),
            reason: e.to_string(),
        })?;
        Ok(Self {
            tokenizer,
            fallback: CharEstimate::default(),
        })
    }
}

impl TokenCounter for TokenizerCounter {
    fn name(&self) -> &str {
        "tokenizer"
    }

    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                trace!(error = %e, "Tokenizer rejected text, estimating");
                self.fallback.count(text)
            }
        }
    }
}
