#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use warden_codelens::embedding::Embedder;
use warden_core::{ChangeStatus, ReviewComment, WardenConfig, WardenError};
use warden_difflens::diff::{FilePatch, FileStatus};
use warden_review::analyzer::NoopAnalyzer;
use warden_review::chain::ReviewChains;
use warden_review::dedup::CommentDeduplicator;
use warden_review::github::{PullRequestHost, PullRequestInfo, PullRequestRef, Side};
use warden_review::llm::{ChatMessage, ChatModel, ResponseFormat};
use warden_review::nodes::NodeContext;
use warden_review::prompt;

pub const MAIN_TF: &str = "provider \"aws\" {\n  region = \"us-east-1\"\n}\n";

pub const MAIN_TF_PATCH: &str = "\
@@ -1,3 +1,4 @@
 provider \"aws\" {
-  region = \"us-east-1\"
+  region  = \"us-west-2\"
+  version = \"5.0\"
 }";

pub const VARIABLES_TF_PATCH: &str = "\
@@ -0,0 +1,3 @@
+variable \"env\" {
+  type = string
+}";

#[derive(Debug, Clone, PartialEq)]
pub enum Posted {
    Review {
        commit: String,
        path: String,
        line: u32,
        side: Side,
        body: String,
    },
    Issue {
        body: String,
    },
}

/// In-memory pull request host.
#[derive(Default)]
pub struct FakeHost {
    pub info: PullRequestInfo,
    pub files: Vec<FilePatch>,
    pub contents: HashMap<(String, String), String>,
    pub issue_comments: Vec<ReviewComment>,
    pub review_comments: Vec<ReviewComment>,
    pub reject_paths: HashSet<String>,
    pub posted: Mutex<Vec<Posted>>,
}

impl FakeHost {
    /// A Terraform pull request touching `main.tf`, a new `variables.tf`
    /// and a lock file.
    pub fn terraform_pr() -> Self {
        let file = |name: &str, status, patch: Option<&str>| FilePatch {
            filename: name.into(),
            previous_filename: None,
            status,
            patch: patch.map(String::from),
        };
        Self {
            info: PullRequestInfo {
                owner: "acme".into(),
                repo: "infra".into(),
                number: 7,
                title: "Move to us-west-2".into(),
                body: "Region migration.".into(),
                head_sha: "head".into(),
                base_sha: "base".into(),
            },
            files: vec![
                file("main.tf", FileStatus::Modified, Some(MAIN_TF_PATCH)),
                file("variables.tf", FileStatus::Added, Some(VARIABLES_TF_PATCH)),
                file("package-lock.json", FileStatus::Modified, Some("@@ -1 +1 @@\n-a\n+b")),
            ],
            contents: HashMap::from([(("main.tf".into(), "base".into()), MAIN_TF.into())]),
            issue_comments: vec![ReviewComment::pr_level("Please add a changelog entry.")],
            ..Self::default()
        }
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestHost for FakeHost {
    async fn pull_request(&self, _pr: &PullRequestRef) -> Result<PullRequestInfo, WardenError> {
        Ok(self.info.clone())
    }

    async fn files(&self, _pr: &PullRequestRef) -> Result<Vec<FilePatch>, WardenError> {
        Ok(self.files.clone())
    }

    async fn contents(
        &self,
        _pr: &PullRequestRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, WardenError> {
        Ok(self.contents.get(&(path.to_string(), git_ref.to_string())).cloned())
    }

    async fn issue_comments(
        &self,
        _pr: &PullRequestRef,
    ) -> Result<Vec<ReviewComment>, WardenError> {
        Ok(self.issue_comments.clone())
    }

    async fn review_comments(
        &self,
        _pr: &PullRequestRef,
    ) -> Result<Vec<ReviewComment>, WardenError> {
        Ok(self.review_comments.clone())
    }

    async fn create_review_comment(
        &self,
        _pr: &PullRequestRef,
        commit: &str,
        path: &str,
        line: u32,
        side: Side,
        body: &str,
    ) -> Result<(), WardenError> {
        if self.reject_paths.contains(path) {
            return Err(WardenError::GitHub(format!("line {line} of {path} is not in the diff")));
        }
        self.posted.lock().unwrap().push(Posted::Review {
            commit: commit.into(),
            path: path.into(),
            line,
            side,
            body: body.into(),
        });
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        _pr: &PullRequestRef,
        body: &str,
    ) -> Result<(), WardenError> {
        self.posted.lock().unwrap().push(Posted::Issue { body: body.into() });
        Ok(())
    }
}

fn comments_json(comments: &[(&str, u32, &str, &str)]) -> String {
    let items: Vec<_> = comments
        .iter()
        .map(|(file, line, comment, status)| {
            serde_json::json!({
                "filename": file,
                "line_number": line,
                "comment": comment,
                "status": status,
            })
        })
        .collect();
    serde_json::json!({ "comments": items }).to_string()
}

/// Answers each stage with a fixed reply, keyed on the system prompt.
///
/// Records `(stage, transcript length)` for every call, where the transcript
/// excludes the system message.
#[derive(Default)]
pub struct ScriptedModel {
    pub code_review_reply: Option<String>,
    pub calls: Mutex<Vec<(&'static str, usize)>>,
}

impl ScriptedModel {
    pub fn calls(&self, stage: &str) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, n)| *n)
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _format: ResponseFormat,
    ) -> Result<String, WardenError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        let (stage, reply) = if system == prompt::code_review_system() {
            let reply = self.code_review_reply.clone().unwrap_or_else(|| {
                comments_json(&[
                    ("main.tf", 2, "Pin the aws provider version in required_providers.", "Added"),
                    ("", 0, "Please add a changelog entry.", ""),
                ])
            });
            ("code_reviewer", reply)
        } else if system == prompt::cross_reference_commenter_system() {
            let reply = comments_json(&[(
                "main.tf",
                3,
                "Pin the aws provider version in required_providers.",
                "Added",
            )]);
            ("cross_reference_commenter", reply)
        } else if system == prompt::TITLE_DESCRIPTION_SYSTEM {
            ("title_description_reviewer", "The title matches the change.".into())
        } else if system == prompt::CROSS_REFERENCE_GENERATOR_SYSTEM {
            ("cross_reference_generator", "variables.tf declares env, unused.".into())
        } else if system == prompt::CROSS_REFERENCE_REFLECTOR_SYSTEM {
            ("cross_reference_reflector", "Check main.tf for usages.".into())
        } else {
            return Err(WardenError::Llm("unexpected system prompt".into()));
        };
        self.calls.lock().unwrap().push((stage, messages.len() - 1));
        Ok(reply)
    }
}

/// Hashes words into a small vector, so identical texts score 1.0.
pub struct WordEmbedder;

#[async_trait]
impl Embedder for WordEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, WardenError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 32];
                for word in text.split_whitespace() {
                    let bucket = word
                        .to_lowercase()
                        .bytes()
                        .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
                    v[bucket % 32] += 1.0;
                }
                v
            })
            .collect())
    }
}

pub fn context(host: Arc<FakeHost>, model: Arc<ScriptedModel>, dry_run: bool) -> Arc<NodeContext> {
    let config = WardenConfig::default();
    Arc::new(NodeContext {
        host,
        chains: ReviewChains::new(model),
        dedup: CommentDeduplicator::new(Arc::new(WordEmbedder), config.dedup.clone()),
        analyzer: Arc::new(NoopAnalyzer),
        config,
        dry_run,
    })
}

pub fn added_comment(file: &str, line: u32, text: &str) -> ReviewComment {
    ReviewComment {
        filename: file.into(),
        line_number: line,
        comment: text.into(),
        status: ChangeStatus::Added,
    }
}
