//! Stage prompts and parsing of structured model output.

use std::fmt::Write;

use serde::Deserialize;
use warden_core::{ChangeBlock, ChangeStatus, ReviewComment, WardenError};
use warden_difflens::patch::AnnotatedFile;

use crate::github::PullRequestInfo;

const COMMENT_SCHEMA: &str = "\
Respond with a JSON object:
{
  \"comments\": [
    {
      \"filename\": \"path/to/file.tf\",
      \"line_number\": 42,
      \"comment\": \"Clear explanation of the issue\",
      \"status\": \"added\" | \"removed\"
    }
  ]
}

`line_number` is the number printed in front of the line in the annotated \
file, and `status` is \"added\" for lines starting with `+` and \"removed\" \
for lines starting with `-`. Only comment on changed lines.
If you find no issues, return: { \"comments\": [] }";

/// System prompt for the code review stage.
pub const CODE_REVIEW_SYSTEM: &str = "\
You are Warden, an expert reviewer of infrastructure and application code. \
Find genuine bugs, security issues, misconfigurations and significant \
maintainability problems in the changed lines.

Rules:
- Only comment on issues you are certain about
- Reference the line numbers shown in the annotated files
- Use the static analysis report when one is given
- Do not comment on style or formatting unless it creates a bug";

/// System prompt for the title and description review stage.
pub const TITLE_DESCRIPTION_SYSTEM: &str = "\
You review pull request titles and descriptions. Check that the title is \
concise and accurate, and that the description explains what changes, why, \
and how it was tested. Reply with short markdown feedback. If both are good, \
say so in one sentence.";

/// System prompt for the cross-reference generator.
pub const CROSS_REFERENCE_GENERATOR_SYSTEM: &str = "\
You cross-reference changes across files of a pull request. Look for \
inconsistencies between files: renamed variables or outputs still referenced \
under the old name, module inputs that no longer match their callers, \
resources referenced but removed, values that must agree but differ. \
Produce a concise list of findings with file and line. If the user critiques \
your previous answer, produce a revised version.";

/// System prompt for the cross-reference reflector.
pub const CROSS_REFERENCE_REFLECTOR_SYSTEM: &str = "\
You are a senior reviewer critiquing a cross-file analysis of a pull request. \
Point out findings that are wrong or unsupported by the code, and \
inconsistencies that were missed. Be specific and brief.";

/// System prompt for turning the cross-reference transcript into comments.
pub const CROSS_REFERENCE_COMMENTER_SYSTEM: &str = "\
Convert the final cross-file analysis in this conversation into review \
comments. Drop findings the critique showed to be wrong.";

/// System prompt for the code review stage, including the output schema.
pub fn code_review_system() -> String {
    format!("{CODE_REVIEW_SYSTEM}\n\n{COMMENT_SCHEMA}")
}

/// System prompt for the cross-reference commenter, including the output schema.
pub fn cross_reference_commenter_system() -> String {
    format!("{CROSS_REFERENCE_COMMENTER_SYSTEM}\n\n{COMMENT_SCHEMA}")
}

/// Render change blocks grouped as the model sees them.
///
/// # Examples
///
/// ```
/// use warden_core::{ChangeBlock, ChangeStatus};
/// use warden_review::prompt::render_changes;
///
/// let blocks = vec![ChangeBlock {
///     filename: "main.tf".into(),
///     start_line: 2,
///     changed_code: "+line2".into(),
///     status: ChangeStatus::Added,
/// }];
/// assert!(render_changes(&blocks).contains("main.tf:2 (added)"));
/// ```
pub fn render_changes(changes: &[ChangeBlock]) -> String {
    let mut text = String::new();
    for block in changes {
        let _ = writeln!(
            text,
            "{}:{} ({})\n{}\n",
            block.filename, block.start_line, block.status, block.changed_code
        );
    }
    text
}

/// Render annotated files, one fenced block per file.
pub fn render_context(files: &[AnnotatedFile]) -> String {
    let mut text = String::new();
    for file in files {
        let _ = writeln!(text, "### {}\n```\n{file}```\n", file.filename);
    }
    text
}

/// User prompt for the code review stage.
pub fn code_review_prompt(
    changes: &[ChangeBlock],
    context: &[AnnotatedFile],
    static_analysis: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Annotated files:\n\n{}\nChanges:\n\n{}",
        render_context(context),
        render_changes(changes)
    );
    if let Some(report) = static_analysis {
        let _ = write!(prompt, "\nStatic analysis report:\n\n{report}\n");
    }
    prompt
}

/// User prompt for the title and description review stage.
pub fn title_description_prompt(pr: &PullRequestInfo, changes: &[ChangeBlock]) -> String {
    let body = if pr.body.trim().is_empty() {
        "(no description)"
    } else {
        pr.body.as_str()
    };
    format!(
        "Title: {}\n\nDescription:\n{body}\n\nChanges:\n\n{}",
        pr.title,
        render_changes(changes)
    )
}

/// First message of the cross-reference conversation.
pub fn cross_reference_seed(
    changes: &[ChangeBlock],
    context: &[AnnotatedFile],
    static_analysis: Option<&str>,
) -> String {
    format!(
        "Cross-reference the changes of this pull request.\n\n{}",
        code_review_prompt(changes, context, static_analysis)
    )
}

/// Strip a surrounding markdown code fence, if any.
///
/// # Examples
///
/// ```
/// use warden_review::prompt::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
/// assert_eq!(strip_code_fences("  {} "), "{}");
/// ```
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

#[derive(Deserialize)]
struct LlmResponse {
    comments: Vec<LlmComment>,
}

#[derive(Deserialize)]
struct LlmComment {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    line_number: Option<serde_json::Value>,
    comment: String,
    #[serde(default)]
    status: Option<String>,
}

/// Parse a `{"comments": [...]}` reply into [`ReviewComment`] entries.
///
/// Accepts numeric strings for `line_number`; entries with an empty comment
/// are dropped and an unknown `status` becomes unspecified.
///
/// # Errors
///
/// Returns [`WardenError::Stage`] naming `stage` if the reply is not the
/// expected JSON object.
///
/// # Examples
///
/// ```
/// use warden_review::prompt::parse_comments;
///
/// let json = r#"{"comments":[
///     {"filename":"a.tf","line_number":3,"comment":"typo","status":"added"}
/// ]}"#;
/// let comments = parse_comments("code_reviewer", json).unwrap();
/// assert_eq!(comments[0].line_number, 3);
/// assert!(parse_comments("code_reviewer", "not json").is_err());
/// ```
pub fn parse_comments(stage: &str, response: &str) -> Result<Vec<ReviewComment>, WardenError> {
    let parsed: LlmResponse = serde_json::from_str(strip_code_fences(response))
        .map_err(|e| WardenError::stage(stage, format!("malformed structured output: {e}")))?;

    Ok(parsed
        .comments
        .into_iter()
        .filter(|c| !c.comment.trim().is_empty())
        .map(|c| {
            let line_number = match &c.line_number {
                Some(serde_json::Value::Number(n)) => {
                    n.as_u64().and_then(|l| u32::try_from(l).ok()).unwrap_or(0)
                }
                Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
                _ => 0,
            };
            let status = c
                .status
                .as_deref()
                .and_then(|s| s.parse::<ChangeStatus>().ok())
                .unwrap_or_default();
            ReviewComment {
                filename: c.filename,
                line_number,
                comment: c.comment,
                status,
            }
        })
        .collect())
}
