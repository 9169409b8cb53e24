//! Semantic similarity for review comments.
//!
//! Provides the [`embedding::Embedder`] capability with an HTTP client for
//! OpenAI-compatible embedding APIs, plus cosine similarity helpers.

pub mod embedding;
pub mod similarity;
