use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::WardenError;

/// Top-level configuration loaded from `.warden.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use warden_core::WardenConfig;
///
/// let config = WardenConfig::default();
/// assert_eq!(config.review.reflection_message_limit, 4);
/// assert_eq!(config.dedup.line_window, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Embedding provider settings used for comment dedup.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Review workflow settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// Comment dedup thresholds.
    #[serde(default)]
    pub dedup: DedupConfig,
}

impl WardenConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Io`] if the file cannot be read, or
    /// [`WardenError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use warden_core::WardenConfig;
    /// use std::path::Path;
    ///
    /// let config = WardenConfig::from_file(Path::new(".warden.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, WardenError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Toml`] if parsing fails, or
    /// [`WardenError::Config`] if the dedup thresholds are out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_core::WardenConfig;
    ///
    /// let toml = r#"
    /// [dedup]
    /// line_window = 3
    /// "#;
    /// let config = WardenConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.dedup.line_window, 3);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, WardenError> {
        let config: Self = toml::from_str(content)?;
        config.dedup.validate()?;
        Ok(config)
    }
}

/// LLM provider configuration.
///
/// Any OpenAI-compatible `/v1/chat/completions` endpoint works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key; falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
        }
    }
}

/// Configuration for the embedding provider.
///
/// # Examples
///
/// ```
/// use warden_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.model, "text-embedding-3-small");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// API key; falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Custom base URL (default: `https://api.openai.com/v1`).
    pub base_url: Option<String>,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Review workflow configuration.
///
/// # Examples
///
/// ```
/// use warden_core::ReviewConfig;
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.recursion_limit, 25);
/// assert!(config.static_analysis);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Additional glob patterns to skip before any stage sees the file.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
    /// Additional file extensions to skip.
    #[serde(default)]
    pub skip_extensions: Vec<String>,
    /// Files with more changed lines than this are skipped (default: 1000).
    #[serde(default = "default_max_file_lines")]
    pub max_file_lines: usize,
    /// Transcript length above which the cross-reference loop stops (default: 4).
    #[serde(default = "default_reflection_message_limit")]
    pub reflection_message_limit: usize,
    /// Maximum node executions per run (default: 25).
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    /// Run terraform validate / tflint on changed modules (default: true).
    #[serde(default = "default_true")]
    pub static_analysis: bool,
}

fn default_max_file_lines() -> usize {
    1000
}

fn default_reflection_message_limit() -> usize {
    4
}

fn default_recursion_limit() -> usize {
    25
}

fn default_true() -> bool {
    true
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            skip_patterns: Vec::new(),
            skip_extensions: Vec::new(),
            max_file_lines: default_max_file_lines(),
            reflection_message_limit: default_reflection_message_limit(),
            recursion_limit: default_recursion_limit(),
            static_analysis: true,
        }
    }
}

/// Thresholds for semantic comment dedup.
///
/// Two comments on the same file are duplicates when their similarity is
/// above `high_similarity`, or above `low_similarity` while less than
/// `line_window` lines apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Similarity that marks a duplicate anywhere in the same file (default: 0.9).
    #[serde(default = "default_high_similarity")]
    pub high_similarity: f32,
    /// Similarity that marks a duplicate on nearby lines (default: 0.6).
    #[serde(default = "default_low_similarity")]
    pub low_similarity: f32,
    /// Line distance considered "nearby" (exclusive, default: 5).
    #[serde(default = "default_line_window")]
    pub line_window: u32,
    /// Body of the comment posted when every new comment was a duplicate.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_high_similarity() -> f32 {
    0.9
}

fn default_low_similarity() -> f32 {
    0.6
}

fn default_line_window() -> u32 {
    5
}

fn default_placeholder() -> String {
    "No new issues found.".into()
}

impl DedupConfig {
    fn validate(&self) -> Result<(), WardenError> {
        for (name, value) in [
            ("high_similarity", self.high_similarity),
            ("low_similarity", self.low_similarity),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(WardenError::Config(format!(
                    "dedup.{name} must be within [-1, 1], got {value}"
                )));
            }
        }
        if self.low_similarity > self.high_similarity {
            return Err(WardenError::Config(
                "dedup.low_similarity must not exceed dedup.high_similarity".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            high_similarity: default_high_similarity(),
            low_similarity: default_low_similarity(),
            line_window: default_line_window(),
            placeholder: default_placeholder(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = WardenConfig::default();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.review.max_file_lines, 1000);
        assert_eq!(config.review.reflection_message_limit, 4);
        assert_eq!(config.review.recursion_limit, 25);
        assert!(config.review.static_analysis);
        assert_eq!(config.dedup.high_similarity, 0.9);
        assert_eq!(config.dedup.low_similarity, 0.6);
        assert_eq!(config.dedup.line_window, 5);
        assert_eq!(config.dedup.placeholder, "No new issues found.");
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = WardenConfig::from_toml("").unwrap();
        assert_eq!(config.review.recursion_limit, 25);
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[llm]
model = "gpt-4o-mini"
base_url = "http://localhost:11434"
temperature = 0.0

[embedding]
model = "nomic-embed-text"

[review]
skip_patterns = ["*.lock.hcl", "docs/**"]
reflection_message_limit = 6
static_analysis = false

[dedup]
high_similarity = 0.95
low_similarity = 0.7
line_window = 3
"#;
        let config = WardenConfig::from_toml(toml).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.base_url.as_deref(), Some("http://localhost:11434"));
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.review.skip_patterns, vec!["*.lock.hcl", "docs/**"]);
        assert_eq!(config.review.reflection_message_limit, 6);
        assert!(!config.review.static_analysis);
        assert_eq!(config.dedup.line_window, 3);
        assert_eq!(config.dedup.placeholder, "No new issues found.");
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(WardenConfig::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let toml = r#"
[dedup]
high_similarity = 0.5
low_similarity = 0.8
"#;
        let err = WardenConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("low_similarity"));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let toml = r#"
[dedup]
high_similarity = 1.5
"#;
        assert!(WardenConfig::from_toml(toml).is_err());
    }
}
