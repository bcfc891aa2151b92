//! Vector similarity search.
//!
//! Stored and query vectors are mean-pooled and L2-normalized upstream, so
//! cosine similarity is the ranking metric for every local backend.

use ragline_core::KnowledgeEntry;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank entries by cosine similarity to `query`, most similar first.
///
/// Entries whose vector width differs from the query are skipped. Ties keep
/// insertion order.
pub fn vector_search<'a>(
    entries: &'a [KnowledgeEntry],
    query: &[f32],
    limit: usize,
) -> Vec<(f32, &'a KnowledgeEntry)> {
    let mut scored: Vec<(f32, &KnowledgeEntry)> = entries
        .iter()
        .filter(|entry| entry.vector.len() == query.len())
        .map(|entry| (cosine_similarity(&entry.vector, query), entry))
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Texts of the `limit` nearest entries.
pub fn nearest_texts(entries: &[KnowledgeEntry], query: &[f32], limit: usize) -> Vec<String> {
    vector_search(entries, query, limit)
        .into_iter()
        .map(|(_, entry)| entry.text.clone())
        .collect()
}
