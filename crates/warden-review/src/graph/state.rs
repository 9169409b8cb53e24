use std::collections::BTreeMap;

use serde::Serialize;
use warden_core::{ChangeBlock, ReviewComment, WardenError};
use warden_difflens::patch::AnnotatedFile;

use super::node::NodeId;
use crate::github::{PullRequestInfo, PullRequestRef};
use crate::llm::ChatMessage;

/// Outcome of posting comments back to the pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostSummary {
    /// Comments created.
    pub posted: usize,
    /// Comments the host rejected.
    pub failed: usize,
    /// Nothing was posted because the run was a dry run.
    pub dry_run: bool,
}

/// The record threaded through one review run.
///
/// Only the engine mutates it, by applying [`StateUpdate`]s returned from
/// nodes. Every key except the cross-reference transcript may be written by
/// at most one node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowState {
    /// The pull request under review.
    pub target: Option<PullRequestRef>,
    /// Metadata fetched for `target`.
    pub pull_request: Option<PullRequestInfo>,
    /// Change blocks of every reviewable file.
    pub changes: Vec<ChangeBlock>,
    /// Annotated base-plus-patch view of every reviewable file.
    pub context_files: Vec<AnnotatedFile>,
    /// Static analysis report, if any.
    pub static_analysis: Option<String>,
    /// Comments already on the pull request before this run.
    pub existing_comments: Vec<ReviewComment>,
    /// Comments from the code review stage.
    pub code_review_comments: Vec<ReviewComment>,
    /// Comments from the cross-reference stage.
    pub cross_reference_comments: Vec<ReviewComment>,
    /// Feedback on the title and description.
    pub title_description_review: Option<String>,
    /// New comments left after dedup.
    pub filtered_comments: Vec<ReviewComment>,
    /// Cross-reference conversation, in order.
    pub cross_reference_messages: Vec<ChatMessage>,
    /// Set once the terminal node has posted.
    pub post_summary: Option<PostSummary>,
    /// Nodes in the order their updates were applied.
    pub executed: Vec<NodeId>,
    #[serde(skip)]
    writers: BTreeMap<StateKey, NodeId>,
}

/// Sparse update returned by a node. `None` fields leave state untouched;
/// `cross_reference_messages` is appended.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub pull_request: Option<PullRequestInfo>,
    pub changes: Option<Vec<ChangeBlock>>,
    pub context_files: Option<Vec<AnnotatedFile>>,
    pub static_analysis: Option<String>,
    pub existing_comments: Option<Vec<ReviewComment>>,
    pub code_review_comments: Option<Vec<ReviewComment>>,
    pub cross_reference_comments: Option<Vec<ReviewComment>>,
    pub title_description_review: Option<String>,
    pub filtered_comments: Option<Vec<ReviewComment>>,
    pub cross_reference_messages: Vec<ChatMessage>,
    pub post_summary: Option<PostSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StateKey {
    PullRequest,
    Changes,
    ContextFiles,
    StaticAnalysis,
    ExistingComments,
    CodeReviewComments,
    CrossReferenceComments,
    TitleDescriptionReview,
    FilteredComments,
    PostSummary,
}

impl WorkflowState {
    /// Initial state for reviewing `target`.
    pub fn for_pull_request(target: PullRequestRef) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    /// All new comments, code review first.
    pub fn new_comments(&self) -> Vec<ReviewComment> {
        self.code_review_comments
            .iter()
            .chain(&self.cross_reference_comments)
            .cloned()
            .collect()
    }

    /// Merge `update` produced by node `from`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Graph`] if a key was already written by a
    /// different node. Nothing is applied in that case.
    pub fn apply(&mut self, from: NodeId, update: StateUpdate) -> Result<(), WardenError> {
        let written = [
            (StateKey::PullRequest, update.pull_request.is_some()),
            (StateKey::Changes, update.changes.is_some()),
            (StateKey::ContextFiles, update.context_files.is_some()),
            (StateKey::StaticAnalysis, update.static_analysis.is_some()),
            (StateKey::ExistingComments, update.existing_comments.is_some()),
            (StateKey::CodeReviewComments, update.code_review_comments.is_some()),
            (StateKey::CrossReferenceComments, update.cross_reference_comments.is_some()),
            (StateKey::TitleDescriptionReview, update.title_description_review.is_some()),
            (StateKey::FilteredComments, update.filtered_comments.is_some()),
            (StateKey::PostSummary, update.post_summary.is_some()),
        ];
        for (key, _) in written.iter().filter(|(_, w)| *w) {
            if let Some(owner) = self.writers.get(key).filter(|owner| **owner != from) {
                return Err(WardenError::Graph(format!(
                    "{from} wrote {key:?}, which {owner} already owns"
                )));
            }
        }
        for (key, _) in written.iter().filter(|(_, w)| *w) {
            self.writers.insert(*key, from);
        }

        if let Some(v) = update.pull_request {
            self.pull_request = Some(v);
        }
        if let Some(v) = update.changes {
            self.changes = v;
        }
        if let Some(v) = update.context_files {
            self.context_files = v;
        }
        if let Some(v) = update.static_analysis {
            self.static_analysis = Some(v);
        }
        if let Some(v) = update.existing_comments {
            self.existing_comments = v;
        }
        if let Some(v) = update.code_review_comments {
            self.code_review_comments = v;
        }
        if let Some(v) = update.cross_reference_comments {
            self.cross_reference_comments = v;
        }
        if let Some(v) = update.title_description_review {
            self.title_description_review = Some(v);
        }
        if let Some(v) = update.filtered_comments {
            self.filtered_comments = v;
        }
        if let Some(v) = update.post_summary {
            self.post_summary = Some(v);
        }
        self.cross_reference_messages
            .extend(update.cross_reference_messages);
        self.executed.push(from);
        Ok(())
    }
}
