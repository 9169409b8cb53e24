//! Core types, configuration, and error handling for Warden.
//!
//! This crate provides the shared foundation used by all other Warden crates:
//! - [`WardenError`]: unified error type using `thiserror`
//! - [`WardenConfig`]: configuration loaded from `.warden.toml`
//! - Shared types: [`ChangeBlock`], [`ChangeStatus`], [`ReviewComment`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{DedupConfig, EmbeddingConfig, LlmConfig, ReviewConfig, WardenConfig};
pub use error::WardenError;
pub use types::{ChangeBlock, ChangeStatus, OutputFormat, ReviewComment};

/// A convenience `Result` type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
