//! Unified-diff bookkeeping for pull request review.
//!
//! Splits diffs into per-file patches, extracts change blocks with their
//! line numbers, rebuilds annotated file context from a base version plus a
//! patch, and filters out files not worth reviewing.

pub mod diff;
pub mod filter;
pub mod patch;
