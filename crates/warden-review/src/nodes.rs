//! The review workflow: its nodes and how they are wired.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, warn};
use warden_core::{ReviewComment, WardenConfig, WardenError};
use warden_difflens::diff::FileStatus;
use warden_difflens::filter::DiffFilter;
use warden_difflens::patch::{build_annotated_context, parse_changes};

use crate::analyzer::StaticAnalyzer;
use crate::chain::ReviewChains;
use crate::dedup::CommentDeduplicator;
use crate::github::{PullRequestHost, PullRequestInfo, PullRequestRef, Side};
use crate::graph::{
    GraphBuilder, Node, NodeId, PostSummary, ReflectionRouter, ReviewGraph, StateUpdate,
    WorkflowState,
};

const TITLE_DESCRIPTION_HEADING: &str = "### Title and description";

/// Collaborators shared by every node, built once per process.
pub struct NodeContext {
    /// Code host the pull request lives on.
    pub host: Arc<dyn PullRequestHost>,
    /// Model-backed review stages.
    pub chains: ReviewChains,
    /// Filter for new comments.
    pub dedup: CommentDeduplicator,
    /// Static analysis run before the model stages.
    pub analyzer: Arc<dyn StaticAnalyzer>,
    /// Loaded configuration.
    pub config: WardenConfig,
    /// Skip posting; the final state still holds every comment.
    pub dry_run: bool,
}

fn pull_request(state: &WorkflowState) -> Result<&PullRequestInfo, WardenError> {
    state
        .pull_request
        .as_ref()
        .ok_or_else(|| WardenError::Graph("pull request metadata missing from state".into()))
}

/// Fetches the pull request, its patches, base file contents and existing
/// comments, and turns patches into change blocks and annotated files.
pub struct FetchPrNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for FetchPrNode {
    fn id(&self) -> NodeId {
        NodeId::FetchPr
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let target = state
            .target
            .as_ref()
            .ok_or_else(|| WardenError::Graph("no pull request to review".into()))?;
        let host = self.0.host.as_ref();

        let pr = host.pull_request(target).await?;
        let files = host.files(target).await?;
        let filtered = DiffFilter::from_config(&self.0.config.review).filter(files);
        for skipped in &filtered.skipped {
            debug!(path = %skipped.path, reason = %skipped.reason, "skipping file");
        }

        let base_sha = pr.base_sha.as_str();
        let originals = try_join_all(filtered.kept.iter().map(|file| async move {
            if file.status == FileStatus::Added {
                return Ok(None);
            }
            host.contents(target, file.base_path(), base_sha).await
        }))
        .await?;

        let mut changes = Vec::new();
        let mut context_files = Vec::new();
        for (file, original) in filtered.kept.iter().zip(originals) {
            let Some(patch) = file.patch.as_deref() else {
                continue;
            };
            match build_annotated_context(&file.filename, original.as_deref(), patch) {
                Ok(annotated) => {
                    changes.extend(parse_changes(&file.filename, patch));
                    context_files.push(annotated);
                }
                Err(e) => warn!(file = %file.filename, error = %e, "excluding file from review"),
            }
        }

        let (issue, review) =
            tokio::try_join!(host.issue_comments(target), host.review_comments(target))?;
        let existing: Vec<_> = issue.into_iter().chain(review).collect();

        info!(
            pr = %target,
            files = context_files.len(),
            changes = changes.len(),
            existing = existing.len(),
            "fetched pull request"
        );
        Ok(StateUpdate {
            pull_request: Some(pr),
            changes: Some(changes),
            context_files: Some(context_files),
            existing_comments: Some(existing),
            ..StateUpdate::default()
        })
    }
}

/// Runs the static analyzer over the changed files.
pub struct StaticAnalyzerNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for StaticAnalyzerNode {
    fn id(&self) -> NodeId {
        NodeId::StaticAnalyzer
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let pr = pull_request(state)?;
        let report = self.0.analyzer.analyze(pr, &state.changes).await?;
        Ok(StateUpdate {
            static_analysis: report,
            ..StateUpdate::default()
        })
    }
}

/// Line-level review of the changed code.
pub struct CodeReviewerNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for CodeReviewerNode {
    fn id(&self) -> NodeId {
        NodeId::CodeReviewer
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let comments = if state.changes.is_empty() {
            Vec::new()
        } else {
            self.0
                .chains
                .code_review(
                    &state.changes,
                    &state.context_files,
                    state.static_analysis.as_deref(),
                )
                .await?
        };
        debug!(comments = comments.len(), "code review done");
        Ok(StateUpdate {
            code_review_comments: Some(comments),
            ..StateUpdate::default()
        })
    }
}

/// Feedback on the pull request title and description.
pub struct TitleDescriptionReviewerNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for TitleDescriptionReviewerNode {
    fn id(&self) -> NodeId {
        NodeId::TitleDescriptionReviewer
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let pr = pull_request(state)?;
        let review = self.0.chains.title_description(pr, &state.changes).await?;
        Ok(StateUpdate {
            title_description_review: Some(review),
            ..StateUpdate::default()
        })
    }
}

/// Opens the cross-reference conversation.
pub struct CrossReferenceInitializerNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for CrossReferenceInitializerNode {
    fn id(&self) -> NodeId {
        NodeId::CrossReferenceInitializer
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let seed = self.0.chains.cross_reference_seed(
            &state.changes,
            &state.context_files,
            state.static_analysis.as_deref(),
        );
        Ok(StateUpdate {
            cross_reference_messages: vec![seed],
            ..StateUpdate::default()
        })
    }
}

/// Writes or revises the cross-reference analysis.
pub struct CrossReferenceGeneratorNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for CrossReferenceGeneratorNode {
    fn id(&self) -> NodeId {
        NodeId::CrossReferenceGenerator
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let reply = self
            .0
            .chains
            .cross_reference_generate(&state.cross_reference_messages)
            .await?;
        Ok(StateUpdate {
            cross_reference_messages: vec![reply],
            ..StateUpdate::default()
        })
    }
}

/// Critiques the latest cross-reference analysis.
pub struct CrossReferenceReflectorNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for CrossReferenceReflectorNode {
    fn id(&self) -> NodeId {
        NodeId::CrossReferenceReflector
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let critique = self
            .0
            .chains
            .cross_reference_reflect(&state.cross_reference_messages)
            .await?;
        Ok(StateUpdate {
            cross_reference_messages: vec![critique],
            ..StateUpdate::default()
        })
    }
}

/// Turns the final cross-reference analysis into comments.
pub struct CrossReferenceCommenterNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for CrossReferenceCommenterNode {
    fn id(&self) -> NodeId {
        NodeId::CrossReferenceCommenter
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let comments = self
            .0
            .chains
            .cross_reference_comments(&state.cross_reference_messages)
            .await?;
        debug!(
            comments = comments.len(),
            transcript = state.cross_reference_messages.len(),
            "cross-reference done"
        );
        Ok(StateUpdate {
            cross_reference_comments: Some(comments),
            ..StateUpdate::default()
        })
    }
}

/// Drops new comments that repeat each other or earlier comments.
pub struct CommentFiltererNode(pub Arc<NodeContext>);

#[async_trait]
impl Node for CommentFiltererNode {
    fn id(&self) -> NodeId {
        NodeId::CommentFilterer
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let new = state.new_comments();
        let filtered = self.0.dedup.filter(&state.existing_comments, &new).await;
        info!(new = new.len(), kept = filtered.len(), "filtered comments");
        Ok(StateUpdate {
            filtered_comments: Some(filtered),
            ..StateUpdate::default()
        })
    }
}

/// Posts the filtered comments and the title/description review.
///
/// A comment the host rejects is logged and counted; the rest are still
/// posted.
pub struct CommenterNode(pub Arc<NodeContext>);

impl CommenterNode {
    async fn post(
        &self,
        target: &PullRequestRef,
        pr: &PullRequestInfo,
        comment: &ReviewComment,
    ) -> Result<(), WardenError> {
        let host = &self.0.host;
        if comment.is_pr_level() {
            host.create_issue_comment(target, &comment.comment).await
        } else {
            host.create_review_comment(
                target,
                &pr.head_sha,
                &comment.filename,
                comment.line_number,
                Side::from(comment.status),
                &comment.comment,
            )
            .await
        }
    }
}

#[async_trait]
impl Node for CommenterNode {
    fn id(&self) -> NodeId {
        NodeId::Commenter
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError> {
        let pr = pull_request(state)?;
        let target = pr.reference();

        let mut outgoing = state.filtered_comments.clone();
        if let Some(review) = state
            .title_description_review
            .as_deref()
            .filter(|r| !r.trim().is_empty())
        {
            outgoing.push(ReviewComment::pr_level(format!(
                "{TITLE_DESCRIPTION_HEADING}\n\n{review}"
            )));
        }

        if self.0.dry_run {
            info!(comments = outgoing.len(), "dry run, not posting");
            return Ok(StateUpdate {
                post_summary: Some(PostSummary {
                    dry_run: true,
                    ..PostSummary::default()
                }),
                ..StateUpdate::default()
            });
        }

        let mut summary = PostSummary::default();
        for comment in &outgoing {
            match self.post(&target, pr, comment).await {
                Ok(()) => summary.posted += 1,
                Err(e) => {
                    warn!(comment = %comment, error = %e, "failed to post comment");
                    summary.failed += 1;
                }
            }
        }
        info!(posted = summary.posted, failed = summary.failed, pr = %target, "posted review");
        Ok(StateUpdate {
            post_summary: Some(summary),
            ..StateUpdate::default()
        })
    }
}

/// Wire the review workflow.
///
/// `fetch_pr` fans out to static analysis and the title/description review.
/// Static analysis feeds the code review and the cross-reference loop, where
/// generation and critique alternate until the transcript is longer than
/// `review.reflection_message_limit`. The comment filter waits for both
/// comment producers, and the commenter waits for the filter and the
/// title/description review.
///
/// # Errors
///
/// Returns [`WardenError::Graph`] if the wiring is invalid.
pub fn build_review_graph(ctx: Arc<NodeContext>) -> Result<ReviewGraph, WardenError> {
    let review = &ctx.config.review;
    GraphBuilder::new()
        .node(FetchPrNode(Arc::clone(&ctx)))
        .node(StaticAnalyzerNode(Arc::clone(&ctx)))
        .node(CodeReviewerNode(Arc::clone(&ctx)))
        .node(TitleDescriptionReviewerNode(Arc::clone(&ctx)))
        .node(CrossReferenceInitializerNode(Arc::clone(&ctx)))
        .node(CrossReferenceGeneratorNode(Arc::clone(&ctx)))
        .node(CrossReferenceReflectorNode(Arc::clone(&ctx)))
        .node(CrossReferenceCommenterNode(Arc::clone(&ctx)))
        .node(CommentFiltererNode(Arc::clone(&ctx)))
        .node(CommenterNode(Arc::clone(&ctx)))
        .entry(NodeId::FetchPr)
        .edge(NodeId::FetchPr, NodeId::StaticAnalyzer)
        .edge(NodeId::FetchPr, NodeId::TitleDescriptionReviewer)
        .edge(NodeId::StaticAnalyzer, NodeId::CrossReferenceInitializer)
        .edge(NodeId::StaticAnalyzer, NodeId::CodeReviewer)
        .edge(NodeId::CrossReferenceInitializer, NodeId::CrossReferenceGenerator)
        .conditional(
            NodeId::CrossReferenceGenerator,
            ReflectionRouter::new(review.reflection_message_limit),
        )
        .edge(NodeId::CrossReferenceReflector, NodeId::CrossReferenceGenerator)
        .join(
            &[NodeId::CrossReferenceCommenter, NodeId::CodeReviewer],
            NodeId::CommentFilterer,
        )
        .join(
            &[NodeId::CommentFilterer, NodeId::TitleDescriptionReviewer],
            NodeId::Commenter,
        )
        .recursion_limit(review.recursion_limit)
        .build()
}

/// Review one pull request end to end.
///
/// # Errors
///
/// Returns the first error raised by any node; nothing is posted when a
/// stage fails before the commenter runs.
pub async fn review_pull_request(
    ctx: Arc<NodeContext>,
    target: PullRequestRef,
) -> Result<WorkflowState, WardenError> {
    let graph = build_review_graph(ctx)?;
    info!(pr = %target, "starting review");
    graph.run(WorkflowState::for_pull_request(target)).await
}
