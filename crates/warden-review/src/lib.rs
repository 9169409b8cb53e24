//! Review workflow for pull requests.
//!
//! Fetches a pull request, runs static analysis and several model-backed
//! review stages concurrently, deduplicates the resulting comments against
//! each other and against what is already posted, then posts the rest.

pub mod analyzer;
pub mod chain;
pub mod dedup;
pub mod github;
pub mod graph;
pub mod llm;
pub mod nodes;
pub mod prompt;
