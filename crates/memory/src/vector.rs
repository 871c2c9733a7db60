//! Vector similarity utilities for semantic recall.
//!
//! Pure-Rust cosine similarity and ranked search over message embeddings.
//! Embedding *generation* is a pluggable collaborator (the [`Embedder`]
//! trait); stores that have one can answer semantic recall by vector,
//! stores that don't fall back to keyword scoring.

use std::sync::Arc;

use taskweave_core::message::Message;

/// Produces embedding vectors for text.
///
/// Implementations wrap whatever embedding service is configured. The
/// reference stores only require a synchronous call because embeddings are
/// computed per message at append time.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

impl<F> Embedder for F
where
    F: Fn(&str) -> Vec<f32> + Send + Sync,
{
    fn embed(&self, text: &str) -> Vec<f32> {
        self(text)
    }
}

/// A shared embedder handle.
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal.
/// Returns 0.0 if either vector is zero-length or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank messages by cosine similarity to a query embedding.
///
/// Only messages that carry an embedding and meet the minimum score are
/// considered. Returns the top `top_k` matches in chronological order
/// (the caller merges them into history, so trace order matters more than
/// score order).
pub fn vector_search(
    messages: &[Message],
    query_embedding: &[f32],
    top_k: usize,
    min_score: f32,
) -> Vec<Message> {
    let mut scored: Vec<(f32, &Message)> = messages
        .iter()
        .filter_map(|msg| {
            let emb = msg.embedding.as_ref()?;
            let sim = cosine_similarity(emb, query_embedding);
            (sim >= min_score).then_some((sim, msg))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);

    let mut selected: Vec<Message> = scored.into_iter().map(|(_, m)| m.clone()).collect();
    selected.sort_by_key(|m| m.timestamp);
    selected
}

/// Score a message against a query by lowercase word overlap.
///
/// The keyword fallback for stores without an embedder: fraction of query
/// words present in the message content, in [0, 1].
pub fn keyword_score(content: &str, query: &str) -> f32 {
    let content = content.to_lowercase();
    let words: Vec<&str> = query
        .split_whitespace()
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words
        .iter()
        .filter(|w| content.contains(&w.to_lowercase()))
        .count();
    hits as f32 / words.len() as f32
}
