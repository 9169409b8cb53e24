use std::path::PathBuf;

/// Errors that can occur across the Warden crates.
///
/// Library crates use this type directly; the binary converts to
/// `miette::Report` at the boundary.
///
/// # Examples
///
/// ```
/// use warden_core::WardenError;
///
/// let err = WardenError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum WardenError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed patch or hunk header. Scoped to a single file.
    #[error("parse error: {0}")]
    Parse(String),

    /// A review stage produced unusable output.
    #[error("stage '{stage}' failed: {message}")]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// What went wrong.
        message: String,
    },

    /// LLM API or transport error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// GitHub API failure.
    #[error("GitHub error: {0}")]
    GitHub(String),

    /// Embedding service failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Workflow wiring or execution error.
    #[error("graph error: {0}")]
    Graph(String),

    /// Static analysis could not be run.
    #[error("static analysis error: {0}")]
    Analyzer(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl WardenError {
    /// Build a [`WardenError::Stage`] for the named stage.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        WardenError::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: WardenError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = WardenError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn stage_error_names_the_stage() {
        let err = WardenError::stage("code_reviewer", "empty response");
        assert_eq!(err.to_string(), "stage 'code_reviewer' failed: empty response");
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = WardenError::FileNotFound(PathBuf::from("/tmp/missing.tf"));
        assert!(err.to_string().contains("/tmp/missing.tf"));
    }
}
