//! Change-block extraction and annotated file reconstruction for single-file
//! unified-diff patches, as returned by the GitHub "list pull request files"
//! endpoint.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;
use warden_core::{ChangeBlock, ChangeStatus, WardenError};

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

const NO_NEWLINE_MARKER: char = '\\';

/// Parsed `@@ -a,b +c,d @@` header. Omitted lengths default to 1.
///
/// # Examples
///
/// ```
/// use warden_difflens::patch::HunkHeader;
///
/// let h = HunkHeader::parse("@@ -10,3 +12 @@ fn main() {").unwrap();
/// assert_eq!((h.old_start, h.old_len, h.new_start, h.new_len), (10, 3, 12, 1));
/// assert!(HunkHeader::parse("@@ nonsense @@").is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    /// First line of the hunk in the old file.
    pub old_start: u32,
    /// Number of old-file lines covered.
    pub old_len: u32,
    /// First line of the hunk in the new file.
    pub new_start: u32,
    /// Number of new-file lines covered.
    pub new_len: u32,
}

impl HunkHeader {
    /// Parse a hunk header line; `None` if it does not carry two numeric ranges.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = HUNK_HEADER.captures(line)?;
        let num = |i: usize, default: u32| -> Option<u32> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(default),
            }
        };
        Some(Self {
            old_start: num(1, 0)?,
            old_len: num(2, 1)?,
            new_start: num(3, 0)?,
            new_len: num(4, 1)?,
        })
    }

    /// Zero-based index in the old file where this hunk's body is spliced.
    ///
    /// A pure insertion (`-N,0`) goes after old line `N`.
    fn splice_start(&self) -> usize {
        if self.old_len == 0 {
            self.old_start as usize
        } else {
            (self.old_start as usize).saturating_sub(1)
        }
    }
}

/// Extract ordered [`ChangeBlock`]s from a single-file patch.
///
/// Consecutive `-` lines (or `+` lines) inside one hunk collapse into a single
/// block starting at the cursor of their own side. Context lines and hunk
/// headers end the current block. A malformed `@@` line ends the block but
/// leaves the cursors untouched, so later well-formed hunks still parse.
///
/// # Examples
///
/// ```
/// use warden_core::ChangeStatus;
/// use warden_difflens::patch::parse_changes;
///
/// let blocks = parse_changes("main.tf", "@@ -1,3 +1,4 @@\n line1\n+line2\n line3\n line4");
/// assert_eq!(blocks.len(), 1);
/// assert_eq!(blocks[0].start_line, 2);
/// assert_eq!(blocks[0].changed_code, "+line2");
/// assert_eq!(blocks[0].status, ChangeStatus::Added);
/// ```
pub fn parse_changes(filename: &str, patch: &str) -> Vec<ChangeBlock> {
    let mut blocks = Vec::new();
    let mut pending: Option<ChangeBlock> = None;
    let mut removed_cursor: u32 = 0;
    let mut added_cursor: u32 = 0;
    let mut in_hunk = false;

    for line in patch.lines() {
        if line.starts_with("@@") {
            flush(&mut pending, &mut blocks);
            in_hunk = true;
            match HunkHeader::parse(line) {
                Some(header) => {
                    removed_cursor = header.old_start;
                    added_cursor = header.new_start;
                }
                None => debug!(filename, header = line, "skipping malformed hunk header"),
            }
            continue;
        }
        // File headers and anything else before the first hunk.
        if !in_hunk || line.starts_with(NO_NEWLINE_MARKER) {
            continue;
        }

        // `---` and `+++` read as file headers, so they count as unchanged.
        if line.starts_with('-') && !line.starts_with("---") {
            let status = ChangeStatus::Removed;
            push_line(&mut pending, &mut blocks, filename, status, removed_cursor, line);
            removed_cursor = removed_cursor.saturating_add(1);
        } else if line.starts_with('+') && !line.starts_with("+++") {
            let status = ChangeStatus::Added;
            push_line(&mut pending, &mut blocks, filename, status, added_cursor, line);
            added_cursor = added_cursor.saturating_add(1);
        } else {
            flush(&mut pending, &mut blocks);
            removed_cursor = removed_cursor.saturating_add(1);
            added_cursor = added_cursor.saturating_add(1);
        }
    }

    flush(&mut pending, &mut blocks);
    blocks
}

fn push_line(
    pending: &mut Option<ChangeBlock>,
    blocks: &mut Vec<ChangeBlock>,
    filename: &str,
    status: ChangeStatus,
    cursor: u32,
    line: &str,
) {
    if let Some(block) = pending.as_mut().filter(|b| b.status == status) {
        block.changed_code.push('\n');
        block.changed_code.push_str(line);
        return;
    }
    flush(pending, blocks);
    *pending = Some(ChangeBlock {
        filename: filename.to_string(),
        start_line: cursor,
        changed_code: line.to_string(),
        status,
    });
}

fn flush(pending: &mut Option<ChangeBlock>, blocks: &mut Vec<ChangeBlock>) {
    if let Some(block) = pending.take() {
        blocks.push(block);
    }
}

/// One line of an [`AnnotatedFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedLine {
    /// Added-side number for `+` lines, removed-side number for `-` lines,
    /// `0` for unchanged lines.
    pub number: u32,
    /// The line with its diff marker (`+`, `-` or a leading space).
    pub text: String,
}

/// A file reconstructed from its base version and a patch, every line
/// carrying the number a reviewer would use to anchor a comment.
///
/// Renders as one `"{number} {text}"` row per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedFile {
    /// Path of the file.
    pub filename: String,
    /// `true` when no base version existed and only added lines are shown.
    pub is_new_file: bool,
    /// Annotated lines in file order.
    pub lines: Vec<AnnotatedLine>,
}

impl AnnotatedFile {
    /// Number of lines in the reconstructed file.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if the file has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for AnnotatedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{} {}", line.number, line.text)?;
        }
        Ok(())
    }
}

struct Hunk<'a> {
    header: HunkHeader,
    body: Vec<&'a str>,
}

fn split_hunks<'a>(filename: &str, patch: &'a str) -> Result<Vec<Hunk<'a>>, WardenError> {
    let mut hunks: Vec<Hunk<'a>> = Vec::new();
    for line in patch.lines() {
        if line.starts_with("@@") {
            let header = HunkHeader::parse(line).ok_or_else(|| {
                WardenError::Parse(format!("{filename}: invalid hunk header: {line}"))
            })?;
            hunks.push(Hunk {
                header,
                body: Vec::new(),
            });
            continue;
        }
        if line.starts_with(NO_NEWLINE_MARKER) {
            continue;
        }
        if let Some(hunk) = hunks.last_mut() {
            hunk.body.push(line);
        }
    }
    Ok(hunks)
}

/// Merge a patch into the base version of its file and number every line.
///
/// `original` is the file content on the base ref, or `None` when the file
/// did not exist there; in that case only the patch's `+` lines are returned,
/// numbered from 1. Otherwise each hunk body replaces the old-file range its
/// header covers, and the result satisfies
/// `len == original_lines + added_lines`. Hunk ranges beyond the end of the
/// original are clamped.
///
/// # Errors
///
/// Returns [`WardenError::Parse`] if any hunk header lacks two numeric
/// ranges. The error is meant to exclude this file only.
///
/// # Examples
///
/// ```
/// use warden_difflens::patch::build_annotated_context;
///
/// let file = build_annotated_context(
///     "main.tf",
///     Some("a\nb\nc\n"),
///     "@@ -2,1 +2,1 @@\n-b\n+B",
/// )
/// .unwrap();
/// assert_eq!(file.to_string(), "0  a\n2 -b\n2 +B\n0  c\n");
/// ```
pub fn build_annotated_context(
    filename: &str,
    original: Option<&str>,
    patch: &str,
) -> Result<AnnotatedFile, WardenError> {
    let hunks = split_hunks(filename, patch)?;

    let Some(original) = original else {
        let lines = hunks
            .iter()
            .flat_map(|h| h.body.iter())
            .filter(|l| l.starts_with('+'))
            .zip(1..)
            .map(|(text, number)| AnnotatedLine {
                number,
                text: (*text).to_string(),
            })
            .collect();
        return Ok(AnnotatedFile {
            filename: filename.to_string(),
            is_new_file: true,
            lines,
        });
    };

    let original_lines: Vec<String> = original.lines().map(|l| format!(" {l}")).collect();
    let mut merged: Vec<String> = Vec::with_capacity(original_lines.len());
    let mut cursor = 0usize;

    for hunk in &hunks {
        let start = hunk.header.splice_start().clamp(cursor, original_lines.len());
        let end = (start + hunk.header.old_len as usize).min(original_lines.len());
        merged.extend_from_slice(&original_lines[cursor..start]);
        merged.extend(hunk.body.iter().map(|l| (*l).to_string()));
        cursor = end;
    }
    merged.extend_from_slice(&original_lines[cursor..]);

    Ok(AnnotatedFile {
        filename: filename.to_string(),
        is_new_file: false,
        lines: number_lines(merged),
    })
}

fn number_lines(lines: Vec<String>) -> Vec<AnnotatedLine> {
    let mut added = 0u32;
    let mut removed = 0u32;
    lines
        .into_iter()
        .map(|text| {
            let number = if text.starts_with('+') {
                added += 1;
                added
            } else if text.starts_with('-') {
                removed += 1;
                removed
            } else {
                added += 1;
                removed += 1;
                0
            };
            AnnotatedLine { number, text }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_without_lengths_defaults_to_one() {
        let h = HunkHeader::parse("@@ -3 +4 @@").unwrap();
        assert_eq!((h.old_start, h.old_len, h.new_start, h.new_len), (3, 1, 4, 1));
    }

    #[test]
    fn header_with_overflowing_number_is_rejected() {
        assert!(HunkHeader::parse("@@ -99999999999 +1 @@").is_none());
    }

    #[test]
    fn single_added_line() {
        let blocks = parse_changes("main.tf", "@@ -1,3 +1,4 @@\n line1\n+line2\n line3\n line4");
        assert_eq!(
            blocks,
            vec![ChangeBlock {
                filename: "main.tf".into(),
                start_line: 2,
                changed_code: "+line2".into(),
                status: ChangeStatus::Added,
            }]
        );
    }

    #[test]
    fn replacement_splits_into_removed_then_added() {
        let patch = "@@ -5,4 +5,4 @@\n keep\n-old1\n-old2\n+new1\n+new2\n keep";
        let blocks = parse_changes("f", patch);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].status, ChangeStatus::Removed);
        assert_eq!(blocks[0].start_line, 6);
        assert_eq!(blocks[0].changed_code, "-old1\n-old2");
        assert_eq!(blocks[1].status, ChangeStatus::Added);
        assert_eq!(blocks[1].start_line, 6);
        assert_eq!(blocks[1].changed_code, "+new1\n+new2");
    }

    #[test]
    fn cursors_advance_independently() {
        // Two removed lines shift the removed side only.
        let patch = "@@ -1,5 +1,4 @@\n-a\n-b\n+c\n x\n-d\n+e\n+f";
        let blocks = parse_changes("f", patch);
        let summary: Vec<(ChangeStatus, u32)> =
            blocks.iter().map(|b| (b.status, b.start_line)).collect();
        assert_eq!(
            summary,
            vec![
                (ChangeStatus::Removed, 1),
                (ChangeStatus::Added, 1),
                (ChangeStatus::Removed, 4),
                (ChangeStatus::Added, 3),
            ]
        );
    }

    #[test]
    fn blocks_never_span_hunks() {
        let patch = "@@ -1,1 +1,2 @@\n x\n+a\n@@ -10,1 +11,2 @@\n+b\n y";
        let blocks = parse_changes("f", patch);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start_line, 2);
        assert_eq!(blocks[1].start_line, 11);
    }

    #[test]
    fn malformed_header_is_skipped_not_fatal() {
        let patch = "@@ -1,2 +1,3 @@\n x\n+a\n@@ garbage @@\n+b\n@@ -20,1 +21,2 @@\n z\n+c";
        let blocks = parse_changes("f", patch);
        assert_eq!(blocks.len(), 3);
        // After the bad header the cursors keep counting from the first hunk.
        assert_eq!(blocks[1].start_line, 3);
        assert_eq!(blocks[2].start_line, 22);
    }

    #[test]
    fn file_headers_and_no_newline_marker_ignored() {
        let patch = "--- a/f\n+++ b/f\n@@ -1 +1 @@\n\
                     -old\n\\ No newline at end of file\n\
                     +new\n\\ No newline at end of file";
        let blocks = parse_changes("f", patch);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].changed_code, "-old");
        assert_eq!(blocks[1].changed_code, "+new");
    }

    #[test]
    fn triple_marker_lines_inside_hunk_are_unchanged() {
        assert!(parse_changes("q.sql", "@@ -1,2 +1,1 @@\n--- sql comment\n keep").is_empty());
        assert!(parse_changes("a.c", "@@ -1,1 +1,2 @@\n x\n+++i;").is_empty());

        // they still split blocks and advance both cursors
        let blocks = parse_changes("a.c", "@@ -1,3 +1,3 @@\n+a\n+++b\n+c");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start_line, 1);
        assert_eq!(blocks[1].start_line, 3);
        assert_eq!(blocks[1].changed_code, "+c");
    }

    #[test]
    fn max_start_line_does_not_overflow() {
        let blocks = parse_changes("f", "@@ -4294967295 +4294967295 @@\n x\n+y\n-z");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start_line, u32::MAX);
        assert_eq!(blocks[1].start_line, u32::MAX);
    }

    #[test]
    fn empty_patch_yields_nothing() {
        assert!(parse_changes("bin.png", "").is_empty());
    }

    #[test]
    fn annotated_numbers_follow_each_side() {
        let original = "l1\nl2\nl3\nl4\n";
        let patch = "@@ -1,4 +1,4 @@\n l1\n-l2\n+L2\n+L2b\n l3\n-l4";
        let file = build_annotated_context("f", Some(original), patch).unwrap();
        let numbers: Vec<u32> = file.lines.iter().map(|l| l.number).collect();
        // context advances both counters but shows 0
        assert_eq!(numbers, vec![0, 2, 2, 3, 0, 4]);
        assert_eq!(file.len(), 4 + 2);
    }

    #[test]
    fn untouched_lines_are_kept_around_hunks() {
        let original = "a\nb\nc\nd\ne\nf\n";
        let patch = "@@ -3,1 +3,2 @@\n c\n+c2";
        let file = build_annotated_context("f", Some(original), patch).unwrap();
        let texts: Vec<&str> = file.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec![" a", " b", " c", "+c2", " d", " e", " f"]);
        assert_eq!(file.lines[3].number, 4);
    }

    #[test]
    fn pure_insertion_goes_after_the_named_line() {
        let original = "a\nb\n";
        let patch = "@@ -1,0 +2,1 @@\n+x";
        let file = build_annotated_context("f", Some(original), patch).unwrap();
        let texts: Vec<&str> = file.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec![" a", "+x", " b"]);
    }

    #[test]
    fn insertion_at_top_of_file() {
        let original = "a\n";
        let patch = "@@ -0,0 +1,1 @@\n+first";
        let file = build_annotated_context("f", Some(original), patch).unwrap();
        let texts: Vec<&str> = file.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["+first", " a"]);
    }

    #[test]
    fn out_of_range_hunk_is_clamped() {
        let original = "a\nb\n";
        let patch = "@@ -40,2 +40,3 @@\n x\n y\n+z";
        let file = build_annotated_context("f", Some(original), patch).unwrap();
        assert_eq!(file.lines.last().unwrap().text, "+z");
        assert_eq!(file.lines[0].text, " a");
    }

    #[test]
    fn new_file_shows_only_added_lines() {
        let patch = "@@ -0,0 +1,3 @@\n+one\n+two\n+three";
        let file = build_annotated_context("new.tf", None, patch).unwrap();
        assert!(file.is_new_file);
        assert_eq!(file.to_string(), "1 +one\n2 +two\n3 +three\n");
    }

    #[test]
    fn bad_header_fails_the_file() {
        let err = build_annotated_context("f", Some("a\n"), "@@ -x +y @@\n+z").unwrap_err();
        assert!(matches!(err, WardenError::Parse(_)));
        assert!(err.to_string().contains("f: invalid hunk header"));
    }
}
