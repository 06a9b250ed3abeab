//! Cosine similarity ranking over catalog candidates.
//!
//! The ranker is a pure function: it never mutates items and never fails on a
//! bad candidate. Candidates without a usable embedding are skipped.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::Item;

/// Upper bound on the number of results a single search may return.
pub const MAX_LIMIT: usize = 50;

/// A catalog item paired with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub item: Arc<Item>,
    /// Cosine similarity in [-1.0, 1.0], unclamped.
    pub similarity: f32,
}

/// Errors that indicate invalid internal state rather than bad candidates.
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("query embedding is empty")]
    EmptyQuery,
}

/// Rank `candidates` by cosine similarity to `query`.
///
/// Results are sorted by similarity (highest first), ties broken by ascending
/// item id, filtered by `min_similarity` and truncated to `limit`.
/// `min_similarity` is clamped to [0, 1] and `limit` to [1, MAX_LIMIT].
pub fn rank(
    query: &[f32],
    candidates: &[Arc<Item>],
    min_similarity: f32,
    limit: usize,
) -> Result<Vec<SearchResult>, RankingError> {
    if query.is_empty() {
        return Err(RankingError::EmptyQuery);
    }

    let min_similarity = clamp_similarity(min_similarity);
    let limit = limit.clamp(1, MAX_LIMIT);

    let mut mismatched = 0usize;
    let mut with_embedding = 0usize;

    let mut results: Vec<SearchResult> = candidates
        .iter()
        .filter_map(|item| {
            let embedding = item.embedding.as_deref().filter(|e| !e.is_empty())?;
            with_embedding += 1;

            if embedding.len() != query.len() {
                mismatched += 1;
                return None;
            }

            let similarity = cosine_similarity(query, embedding);
            (similarity >= min_similarity).then(|| SearchResult {
                item: item.clone(),
                similarity,
            })
        })
        .collect();

    if with_embedding > 0 && mismatched == with_embedding {
        log::warn!(
            "all {mismatched} candidates have embeddings of a different dimension than the query ({})",
            query.len()
        );
    } else if mismatched > 0 {
        log::debug!("skipped {mismatched} candidates with mismatched embedding dimension");
    }

    results.sort_by(compare_results);
    results.truncate(limit);

    Ok(results)
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when the lengths differ or either magnitude is zero, so the
/// result is never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (a_norm, b_norm) = (l2_norm(a), l2_norm(b));
    if !usable_norm(a_norm) || !usable_norm(b_norm) {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let similarity = dot_product / (a_norm * b_norm);

    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

fn usable_norm(norm: f32) -> bool {
    norm != 0.0 && norm.is_finite()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn clamp_similarity(min_similarity: f32) -> f32 {
    if min_similarity.is_nan() {
        0.0
    } else {
        min_similarity.clamp(0.0, 1.0)
    }
}

fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.item.id.cmp(&b.item.id))
}
