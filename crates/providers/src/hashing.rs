//! Feature-hashing embedder.
//!
//! Maps every word to a fixed-width row by hashing its character trigrams
//! into signed buckets. No model download, deterministic across processes
//! and releases, good enough for lexical recall on small knowledge bases.

use async_trait::async_trait;
use ragline_core::{Embedder, EmbeddingError, TokenEmbeddings};

/// Pure-Rust embedder producing one hashed row per word.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_word(&self, word: &str) -> Vec<f32> {
        let mut row = vec![0.0f32; self.dimensions];
        let padded: Vec<char> = std::iter::once('#')
            .chain(word.chars())
            .chain(std::iter::once('#'))
            .collect();

        for gram in padded.windows(3) {
            let hash = fnv1a(gram);
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            row[bucket] += sign;
        }
        row
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

/// 64-bit FNV-1a over the UTF-8 bytes of `chars`. Stable by construction,
/// unlike `DefaultHasher`, so stored vectors stay valid across builds.
fn fnv1a(chars: &[char]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    let mut buf = [0u8; 4];
    for c in chars {
        for byte in c.encode_utf8(&mut buf).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn token_embeddings(&self, text: &str) -> Result<TokenEmbeddings, EmbeddingError> {
        let rows: Vec<Vec<f32>> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| self.embed_word(&w.to_lowercase()))
            .collect();

        if rows.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(TokenEmbeddings::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_row_per_word() {
        let embedder = HashingEmbedder::new(64);
        let out = embedder.token_embeddings("Rust, async & tokio!").await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.dimensions(), Some(64));
    }

    #[tokio::test]
    async fn deterministic_and_case_insensitive() {
        let embedder = HashingEmbedder::default();
        let a = embedder.token_embeddings("Ownership").await.unwrap();
        let b = embedder.token_embeddings("ownership").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn punctuation_only_is_empty_input() {
        let embedder = HashingEmbedder::default();
        assert!(matches!(
            embedder.token_embeddings("?! ...").await,
            Err(EmbeddingError::EmptyInput)
        ));
    }

    #[test]
    fn single_char_word_is_not_zero() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_word("a").iter().any(|v| *v != 0.0));
    }

    #[test]
    fn fnv_known_vector() {
        // FNV-1a 64 of "a"
        assert_eq!(fnv1a(&['a']), 0xaf63_dc4c_8601_ec8c);
    }
}
