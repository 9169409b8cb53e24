use std::fmt;

use serde::{Deserialize, Serialize};
use warden_core::WardenError;

use crate::patch::HunkHeader;

/// How a file changed in a pull request.
///
/// Mirrors the `status` field of GitHub's pull request files API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// File created by the change.
    Added,
    /// File deleted by the change.
    Removed,
    /// Content changed in place.
    #[default]
    Modified,
    /// File moved, possibly with edits.
    Renamed,
    /// File copied from another path.
    Copied,
    /// Any other status reported by the host.
    #[serde(other)]
    Changed,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Added => "added",
            FileStatus::Removed => "removed",
            FileStatus::Modified => "modified",
            FileStatus::Renamed => "renamed",
            FileStatus::Copied => "copied",
            FileStatus::Changed => "changed",
        };
        write!(f, "{s}")
    }
}

/// The patch of a single file in a pull request.
///
/// `patch` is `None` for binary files and pure renames.
///
/// # Examples
///
/// ```
/// use warden_difflens::diff::{FilePatch, FileStatus};
///
/// let file = FilePatch {
///     filename: "main.tf".into(),
///     previous_filename: None,
///     status: FileStatus::Modified,
///     patch: Some("@@ -1 +1 @@\n-a\n+b".into()),
/// };
/// assert_eq!(file.changed_lines(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    /// Path in the new version.
    pub filename: String,
    /// Path in the old version, for renames.
    #[serde(default)]
    pub previous_filename: Option<String>,
    /// Kind of change.
    #[serde(default)]
    pub status: FileStatus,
    /// Hunks of the file, starting at the first `@@` header.
    #[serde(default)]
    pub patch: Option<String>,
}

impl FilePatch {
    /// Count `+`/`-` lines in the patch body.
    pub fn changed_lines(&self) -> usize {
        let Some(patch) = &self.patch else {
            return 0;
        };
        patch
            .lines()
            .filter(|l| !l.starts_with("@@") && (l.starts_with('+') || l.starts_with('-')))
            .count()
    }

    /// Path to read the base version from (the old name for renames).
    pub fn base_path(&self) -> &str {
        self.previous_filename.as_deref().unwrap_or(&self.filename)
    }
}

/// Split a multi-file unified diff (as produced by `git diff`) into
/// per-file [`FilePatch`] entries.
///
/// Binary files are kept with `patch: None`. Only the hunk part of each file
/// is kept, matching what the GitHub files API returns.
///
/// # Errors
///
/// Returns [`WardenError::Parse`] if a file section has a malformed hunk
/// header.
///
/// # Examples
///
/// ```
/// use warden_difflens::diff::split_unified_diff;
///
/// let diff = "diff --git a/hello.tf b/hello.tf\n\
///             --- a/hello.tf\n\
///             +++ b/hello.tf\n\
///             @@ -1,2 +1,3 @@\n\
///              a\n\
///             +b\n\
///              c\n";
/// let files = split_unified_diff(diff).unwrap();
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].filename, "hello.tf");
/// ```
pub fn split_unified_diff(input: &str) -> Result<Vec<FilePatch>, WardenError> {
    let mut files: Vec<FilePatch> = Vec::new();
    let mut current: Option<Builder> = None;

    for line in input.lines() {
        if line.starts_with("diff --git ") {
            if let Some(done) = current.take() {
                files.push(done.finish());
            }
            current = Some(Builder::default());
            continue;
        }

        // Patches without the "diff --git" line start directly at "---".
        if line.starts_with("--- ") && current.is_none() {
            current = Some(Builder::default());
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if file.in_hunks {
            if line.starts_with("@@") && HunkHeader::parse(line).is_none() {
                return Err(WardenError::Parse(format!("invalid hunk header: {line}")));
            }
            file.patch.push_str(line);
            file.patch.push('\n');
            continue;
        }

        if line.starts_with("Binary files ") && line.ends_with(" differ") {
            file.binary = true;
        } else if line.starts_with("new file mode") {
            file.status = FileStatus::Added;
        } else if line.starts_with("deleted file mode") {
            file.status = FileStatus::Removed;
        } else if let Some(from) = line.strip_prefix("rename from ") {
            file.status = FileStatus::Renamed;
            file.old_path = Some(from.to_string());
        } else if let Some(to) = line.strip_prefix("rename to ") {
            file.new_path = Some(to.to_string());
        } else if let Some(path) = line.strip_prefix("--- ") {
            let path = parse_path(path);
            if path.is_none() {
                file.status = FileStatus::Added;
            }
            file.old_path = path.or(file.old_path.take());
        } else if let Some(path) = line.strip_prefix("+++ ") {
            let path = parse_path(path);
            if path.is_none() {
                file.status = FileStatus::Removed;
            }
            file.new_path = path.or(file.new_path.take());
        } else if line.starts_with("@@") {
            if HunkHeader::parse(line).is_none() {
                return Err(WardenError::Parse(format!("invalid hunk header: {line}")));
            }
            file.in_hunks = true;
            file.patch.push_str(line);
            file.patch.push('\n');
        }
    }

    if let Some(done) = current.take() {
        files.push(done.finish());
    }
    Ok(files)
}

#[derive(Default)]
struct Builder {
    old_path: Option<String>,
    new_path: Option<String>,
    status: FileStatus,
    binary: bool,
    in_hunks: bool,
    patch: String,
}

impl Builder {
    fn finish(self) -> FilePatch {
        let filename = self
            .new_path
            .clone()
            .or_else(|| self.old_path.clone())
            .unwrap_or_default();
        let previous_filename = match (&self.old_path, self.status) {
            (Some(old), FileStatus::Renamed) if Some(old) != self.new_path.as_ref() => {
                Some(old.clone())
            }
            _ => None,
        };
        let patch = if self.binary || self.patch.is_empty() {
            None
        } else {
            Some(self.patch.trim_end_matches('\n').to_string())
        };
        FilePatch {
            filename,
            previous_filename,
            status: self.status,
            patch,
        }
    }
}

fn parse_path(raw: &str) -> Option<String> {
    let normalized = raw.trim_matches('"');
    if normalized == "/dev/null" {
        return None;
    }
    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);
    Some(stripped.to_string())
}
