use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which side of a diff a line or comment belongs to.
///
/// Serialized as `"added"`, `"removed"`, or `""` when the side is unknown
/// (PR-level comments, comments on unchanged lines).
///
/// # Examples
///
/// ```
/// use warden_core::ChangeStatus;
///
/// let s: ChangeStatus = serde_json::from_str("\"removed\"").unwrap();
/// assert_eq!(s, ChangeStatus::Removed);
/// assert_eq!(serde_json::to_string(&ChangeStatus::Unspecified).unwrap(), "\"\"");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    /// Line present only in the new version.
    #[serde(rename = "added")]
    Added,
    /// Line present only in the old version.
    #[serde(rename = "removed")]
    Removed,
    /// No particular side.
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl ChangeStatus {
    /// Diff marker character for this side, if any.
    pub fn marker(self) -> Option<char> {
        match self {
            ChangeStatus::Added => Some('+'),
            ChangeStatus::Removed => Some('-'),
            ChangeStatus::Unspecified => None,
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStatus::Added => write!(f, "added"),
            ChangeStatus::Removed => write!(f, "removed"),
            ChangeStatus::Unspecified => Ok(()),
        }
    }
}

impl FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "added" | "add" | "+" => Ok(ChangeStatus::Added),
            "removed" | "remove" | "deleted" | "-" => Ok(ChangeStatus::Removed),
            "" => Ok(ChangeStatus::Unspecified),
            other => Err(format!("unknown change status: {other}")),
        }
    }
}

/// A maximal run of consecutive same-status lines inside one hunk.
///
/// `start_line` is the line number on the matching side of the diff
/// (new file for added blocks, old file for removed blocks). `changed_code`
/// keeps the `+`/`-` markers, one diff line per text line.
///
/// # Examples
///
/// ```
/// use warden_core::{ChangeBlock, ChangeStatus};
///
/// let block = ChangeBlock {
///     filename: "main.tf".into(),
///     start_line: 2,
///     changed_code: "+line2".into(),
///     status: ChangeStatus::Added,
/// };
/// assert_eq!(block.line_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBlock {
    /// Path of the changed file.
    pub filename: String,
    /// First line of the block on its own side of the diff.
    pub start_line: u32,
    /// Diff lines of the block, markers included.
    pub changed_code: String,
    /// Added or removed.
    pub status: ChangeStatus,
}

impl ChangeBlock {
    /// Number of diff lines in the block.
    pub fn line_count(&self) -> usize {
        self.changed_code.lines().count()
    }
}

/// A review comment, either anchored to a file line or PR-level.
///
/// An empty `filename` together with `line_number == 0` marks a PR-level
/// (issue) comment.
///
/// # Examples
///
/// ```
/// use warden_core::{ChangeStatus, ReviewComment};
///
/// let line = ReviewComment {
///     filename: "modules/vpc/main.tf".into(),
///     line_number: 12,
///     comment: "CIDR overlaps with the peering range".into(),
///     status: ChangeStatus::Added,
/// };
/// assert!(!line.is_pr_level());
/// assert!(ReviewComment::pr_level("Looks good").is_pr_level());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// File the comment refers to; empty for PR-level comments.
    #[serde(default)]
    pub filename: String,
    /// Line number on the `status` side; 0 for PR-level comments.
    #[serde(default)]
    pub line_number: u32,
    /// Comment body.
    pub comment: String,
    /// Side of the diff the line number refers to.
    #[serde(default)]
    pub status: ChangeStatus,
}

impl ReviewComment {
    /// Create a PR-level comment.
    pub fn pr_level(comment: impl Into<String>) -> Self {
        Self {
            filename: String::new(),
            line_number: 0,
            comment: comment.into(),
            status: ChangeStatus::Unspecified,
        }
    }

    /// Returns `true` for comments not anchored to any file line.
    pub fn is_pr_level(&self) -> bool {
        self.filename.is_empty() || self.line_number == 0
    }
}

impl fmt::Display for ReviewComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pr_level() {
            write!(f, "[PR] {}", self.comment)
        } else {
            write!(f, "{}:{}", self.filename, self.line_number)?;
            if self.status != ChangeStatus::Unspecified {
                write!(f, " ({})", self.status)?;
            }
            write!(f, " {}", self.comment)
        }
    }
}

/// Output format for CLI subcommands.
///
/// # Examples
///
/// ```
/// use warden_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn change_status_wire_names() {
        assert_eq!(serde_json::to_string(&ChangeStatus::Added).unwrap(), "\"added\"");
        assert_eq!(serde_json::to_string(&ChangeStatus::Removed).unwrap(), "\"removed\"");
        let parsed: ChangeStatus = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, ChangeStatus::Unspecified);
    }

    #[test]
    fn change_status_from_str_is_lenient() {
        assert_eq!("Added".parse::<ChangeStatus>().unwrap(), ChangeStatus::Added);
        assert_eq!("deleted".parse::<ChangeStatus>().unwrap(), ChangeStatus::Removed);
        assert_eq!(" ".parse::<ChangeStatus>().unwrap(), ChangeStatus::Unspecified);
        assert!("moved".parse::<ChangeStatus>().is_err());
    }

    #[test]
    fn review_comment_wire_schema() {
        let comment = ReviewComment {
            filename: "a.tf".into(),
            line_number: 10,
            comment: "X".into(),
            status: ChangeStatus::Added,
        };
        let json = serde_json::to_value(&comment).unwrap();
        assert_eq!(json["filename"], "a.tf");
        assert_eq!(json["line_number"], 10);
        assert_eq!(json["comment"], "X");
        assert_eq!(json["status"], "added");
    }

    #[test]
    fn review_comment_defaults_missing_fields() {
        let comment: ReviewComment = serde_json::from_str(r#"{"comment":"hi"}"#).unwrap();
        assert!(comment.is_pr_level());
        assert_eq!(comment.status, ChangeStatus::Unspecified);
    }

    #[test]
    fn review_comment_display() {
        let comment = ReviewComment {
            filename: "a.tf".into(),
            line_number: 3,
            comment: "typo".into(),
            status: ChangeStatus::Removed,
        };
        assert_eq!(comment.to_string(), "a.tf:3 (removed) typo");
        assert_eq!(ReviewComment::pr_level("ok").to_string(), "[PR] ok");
    }

    #[test]
    fn change_block_counts_lines() {
        let block = ChangeBlock {
            filename: "x".into(),
            start_line: 4,
            changed_code: "-a\n-b\n-c".into(),
            status: ChangeStatus::Removed,
        };
        assert_eq!(block.line_count(), 3);
    }
}
