//! Pre-review file filtering to eliminate noise at the source.
//!
//! Filters out lock files, generated code, vendored dependencies,
//! minified files, and files matching custom patterns before any review
//! stage sees them.

use std::path::Path;

use warden_core::ReviewConfig;

use crate::diff::FilePatch;

/// Files and patterns to skip before review.
///
/// # Examples
///
/// ```
/// use warden_difflens::filter::DiffFilter;
///
/// let filter = DiffFilter::default_filter();
/// assert!(filter.should_skip(".terraform.lock.hcl"));
/// assert!(!filter.should_skip("modules/vpc/main.tf"));
/// ```
pub struct DiffFilter {
    skip_patterns: Vec<glob::Pattern>,
    skip_extensions: Vec<String>,
    max_file_lines: usize,
}

impl DiffFilter {
    /// Create a filter with the built-in rules only.
    pub fn default_filter() -> Self {
        Self::from_config(&ReviewConfig::default())
    }

    /// Create a filter from review configuration.
    ///
    /// Invalid glob patterns are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_core::ReviewConfig;
    /// use warden_difflens::filter::DiffFilter;
    ///
    /// let config = ReviewConfig {
    ///     skip_patterns: vec!["docs/**".into()],
    ///     ..ReviewConfig::default()
    /// };
    /// let filter = DiffFilter::from_config(&config);
    /// assert!(filter.should_skip("docs/usage.md"));
    /// ```
    pub fn from_config(config: &ReviewConfig) -> Self {
        let skip_patterns = config
            .skip_patterns
            .iter()
            .filter_map(|pat| glob::Pattern::new(pat).ok())
            .collect();

        Self {
            skip_patterns,
            skip_extensions: config.skip_extensions.clone(),
            max_file_lines: config.max_file_lines,
        }
    }

    /// Check if a single file path should be skipped.
    pub fn should_skip(&self, path: &str) -> bool {
        self.check_skip(path, "", 0).is_some()
    }

    /// Split files into reviewable ones and skipped ones.
    ///
    /// Files without a patch (binary files, pure renames) are skipped.
    pub fn filter(&self, files: Vec<FilePatch>) -> FilterResult {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for file in files {
            let Some(patch) = file.patch.as_deref() else {
                skipped.push(SkippedFile {
                    path: file.filename,
                    reason: SkipReason::NoPatch,
                });
                continue;
            };
            match self.check_skip(&file.filename, patch, file.changed_lines()) {
                Some(reason) => skipped.push(SkippedFile {
                    path: file.filename,
                    reason,
                }),
                None => kept.push(file),
            }
        }

        FilterResult { kept, skipped }
    }

    fn check_skip(
        &self,
        path_str: &str,
        content: &str,
        changed_lines: usize,
    ) -> Option<SkipReason> {
        let path = Path::new(path_str);
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_lock_file(&file_name) {
            return Some(SkipReason::LockFile);
        }

        if is_vendored(path_str) {
            return Some(SkipReason::VendoredCode);
        }

        if is_minified(&file_name, content) {
            return Some(SkipReason::MinifiedFile);
        }

        if is_generated_by_name(&file_name) || is_generated_by_content(content) {
            return Some(SkipReason::GeneratedFile);
        }

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if self.skip_extensions.iter().any(|s| s == ext) {
                return Some(SkipReason::PatternMatch(format!("*.{ext}")));
            }
        }

        if let Some(pat) = self.skip_patterns.iter().find(|p| p.matches(path_str)) {
            return Some(SkipReason::PatternMatch(pat.to_string()));
        }

        if changed_lines > self.max_file_lines {
            return Some(SkipReason::TooLarge);
        }

        None
    }
}

/// Result of filtering files.
pub struct FilterResult {
    /// Files that passed the filter.
    pub kept: Vec<FilePatch>,
    /// Files that were skipped with reasons.
    pub skipped: Vec<SkippedFile>,
}

/// A file that was skipped during filtering.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    /// Path of the skipped file.
    pub path: String,
    /// Why the file was skipped.
    pub reason: SkipReason,
}

/// Reason a file was skipped.
///
/// # Examples
///
/// ```
/// use warden_difflens::filter::SkipReason;
///
/// assert_eq!(SkipReason::LockFile.to_string(), "lock file");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Package manager or provider lock file.
    LockFile,
    /// Auto-generated code.
    GeneratedFile,
    /// Third-party vendored code.
    VendoredCode,
    /// Minified or bundled file.
    MinifiedFile,
    /// Binary file or rename without content.
    NoPatch,
    /// File exceeds max changed lines threshold.
    TooLarge,
    /// Matched a custom skip pattern.
    PatternMatch(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::LockFile => write!(f, "lock file"),
            SkipReason::GeneratedFile => write!(f, "generated file"),
            SkipReason::VendoredCode => write!(f, "vendored code"),
            SkipReason::MinifiedFile => write!(f, "minified file"),
            SkipReason::NoPatch => write!(f, "no patch"),
            SkipReason::TooLarge => write!(f, "too large"),
            SkipReason::PatternMatch(pat) => write!(f, "pattern: {pat}"),
        }
    }
}

const LOCK_FILES: &[&str] = &[
    ".terraform.lock.hcl",
    "package-lock.json",
    "yarn.lock",
    "Cargo.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

fn is_lock_file(file_name: &str) -> bool {
    LOCK_FILES.contains(&file_name)
}

fn is_vendored(path: &str) -> bool {
    path.split('/')
        .any(|part| matches!(part, "vendor" | "third_party" | "node_modules" | ".terraform"))
}

fn is_minified(file_name: &str, content: &str) -> bool {
    if file_name.ends_with(".min.js") || file_name.ends_with(".min.css") {
        return true;
    }
    // any line longer than 500 chars suggests minification
    content.lines().any(|line| line.len() > 500)
}

fn is_generated_by_name(file_name: &str) -> bool {
    file_name.contains(".generated.")
        || file_name.ends_with(".g.dart")
        || file_name.ends_with(".pb.go")
        || file_name.ends_with(".pb.rs")
}

fn is_generated_by_content(content: &str) -> bool {
    content
        .lines()
        .filter(|line| !line.starts_with("@@"))
        .take(5)
        .map(|line| line.get(1..).unwrap_or(""))
        .any(|line| line.contains("// Code generated") || line.contains("# AUTO-GENERATED"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FileStatus;

    fn make_file(path: &str, body: &str) -> Vec<FilePatch> {
        vec![FilePatch {
            filename: path.into(),
            previous_filename: None,
            status: FileStatus::Modified,
            patch: Some(format!("@@ -1,1 +1,2 @@\n{body}")),
        }]
    }

    #[test]
    fn lock_files_skipped() {
        let filter = DiffFilter::default_filter();
        for name in LOCK_FILES {
            let result = filter.filter(make_file(name, "+new line"));
            assert!(result.kept.is_empty(), "expected {name} to be skipped");
            assert_eq!(result.skipped[0].reason, SkipReason::LockFile);
        }
    }

    #[test]
    fn generated_files_skipped() {
        let filter = DiffFilter::default_filter();
        for name in &["api.generated.ts", "model.g.dart", "proto.pb.go"] {
            let result = filter.filter(make_file(name, "+new line"));
            assert_eq!(result.skipped[0].reason, SkipReason::GeneratedFile);
        }

        let generated = make_file("gen.go", "+// Code generated by protoc. DO NOT EDIT.");
        let result = filter.filter(generated);
        assert_eq!(result.skipped[0].reason, SkipReason::GeneratedFile);
    }

    #[test]
    fn minified_files_skipped() {
        let filter = DiffFilter::default_filter();
        let result = filter.filter(make_file("app.min.js", "+var x=1;"));
        assert_eq!(result.skipped[0].reason, SkipReason::MinifiedFile);

        let long_line = format!("+{}", "x".repeat(501));
        let result = filter.filter(make_file("bundle.js", &long_line));
        assert_eq!(result.skipped[0].reason, SkipReason::MinifiedFile);
    }

    #[test]
    fn vendored_code_skipped() {
        let filter = DiffFilter::default_filter();
        for path in &["vendor/lib.go", ".terraform/modules/x/main.tf", "node_modules/p/i.js"] {
            let result = filter.filter(make_file(path, "+line"));
            assert_eq!(result.skipped[0].reason, SkipReason::VendoredCode, "{path}");
        }
    }

    #[test]
    fn normal_files_kept() {
        let filter = DiffFilter::default_filter();
        let result = filter.filter(make_file("modules/vpc/main.tf", "+cidr = \"10.0.0.0/16\""));
        assert_eq!(result.kept.len(), 1);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn files_without_patch_skipped() {
        let filter = DiffFilter::default_filter();
        let files = vec![FilePatch {
            filename: "logo.png".into(),
            previous_filename: None,
            status: FileStatus::Added,
            patch: None,
        }];
        let result = filter.filter(files);
        assert_eq!(result.skipped[0].reason, SkipReason::NoPatch);
    }

    #[test]
    fn custom_patterns_and_extensions() {
        let config = ReviewConfig {
            skip_patterns: vec!["fixtures/**".into()],
            skip_extensions: vec!["snap".into()],
            ..ReviewConfig::default()
        };
        let filter = DiffFilter::from_config(&config);
        let result = filter.filter(make_file("fixtures/a/b.tf", "+x"));
        assert!(matches!(result.skipped[0].reason, SkipReason::PatternMatch(_)));
        let result = filter.filter(make_file("ui.snap", "+x"));
        assert_eq!(result.skipped[0].reason, SkipReason::PatternMatch("*.snap".into()));
        let result = filter.filter(make_file("src/a.tf", "+x"));
        assert_eq!(result.kept.len(), 1);
    }

    #[test]
    fn too_large_files_skipped() {
        let config = ReviewConfig {
            max_file_lines: 3,
            ..ReviewConfig::default()
        };
        let filter = DiffFilter::from_config(&config);
        let result = filter.filter(make_file("big.tf", "+a\n+b\n+c\n+d"));
        assert_eq!(result.skipped[0].reason, SkipReason::TooLarge);
    }
}
