mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{FakeHost, Posted, ScriptedModel};
use warden_core::{ChangeStatus, WardenError};
use warden_review::github::{PullRequestRef, Side};
use warden_review::graph::{EdgeKind, NodeId, PostSummary};
use warden_review::nodes::{build_review_graph, review_pull_request};

fn target() -> PullRequestRef {
    "acme/infra#7".parse().unwrap()
}

#[tokio::test]
async fn reviews_and_posts_deduplicated_comments() {
    let host = Arc::new(FakeHost::terraform_pr());
    let model = Arc::new(ScriptedModel::default());
    let ctx = common::context(Arc::clone(&host), Arc::clone(&model), false);

    let state = review_pull_request(ctx, target()).await.unwrap();

    // lock file skipped, both Terraform files reviewed
    let files: Vec<_> = state.context_files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(files, vec!["main.tf", "variables.tf"]);
    assert!(state.context_files[1].is_new_file);
    assert!(state.changes.iter().all(|c| c.filename != "package-lock.json"));
    assert!(state.changes.iter().any(|c| {
        c.filename == "main.tf" && c.status == ChangeStatus::Removed && c.start_line == 2
    }));

    // one repeat of an existing comment and one cross-branch repeat dropped
    assert_eq!(state.new_comments().len(), 3);
    assert_eq!(state.filtered_comments.len(), 1);
    assert_eq!(state.filtered_comments[0].filename, "main.tf");
    assert_eq!(state.filtered_comments[0].line_number, 2);

    let posted = host.posted();
    assert_eq!(posted.len(), 2);
    assert_eq!(
        posted[0],
        Posted::Review {
            commit: "head".into(),
            path: "main.tf".into(),
            line: 2,
            side: Side::Right,
            body: "Pin the aws provider version in required_providers.".into(),
        }
    );
    assert!(matches!(
        &posted[1],
        Posted::Issue { body } if body.contains("The title matches the change.")
    ));
    assert_eq!(
        state.post_summary,
        Some(PostSummary {
            posted: 2,
            failed: 0,
            dry_run: false
        })
    );
}

#[tokio::test]
async fn reflection_loop_runs_until_transcript_exceeds_limit() {
    let host = Arc::new(FakeHost::terraform_pr());
    let model = Arc::new(ScriptedModel::default());
    let ctx = common::context(host, Arc::clone(&model), true);

    let state = review_pull_request(ctx, target()).await.unwrap();

    assert_eq!(model.calls("cross_reference_generator"), vec![1, 3, 5]);
    assert_eq!(model.calls("cross_reference_reflector"), vec![2, 4]);
    assert_eq!(model.calls("cross_reference_commenter"), vec![6]);
    assert_eq!(state.cross_reference_messages.len(), 6);
}

#[tokio::test]
async fn every_node_runs_once_except_the_loop() {
    let host = Arc::new(FakeHost::terraform_pr());
    let model = Arc::new(ScriptedModel::default());
    let ctx = common::context(host, model, true);

    let state = review_pull_request(ctx, target()).await.unwrap();

    let count = |id| state.executed.iter().filter(|n| **n == id).count();
    for id in NodeId::ALL {
        let expected = match id {
            NodeId::CrossReferenceGenerator => 3,
            NodeId::CrossReferenceReflector => 2,
            _ => 1,
        };
        assert_eq!(count(id), expected, "{id}");
    }
    assert_eq!(state.executed.first(), Some(&NodeId::FetchPr));
    assert_eq!(state.executed.last(), Some(&NodeId::Commenter));
}

#[tokio::test]
async fn dry_run_posts_nothing() {
    let host = Arc::new(FakeHost::terraform_pr());
    let model = Arc::new(ScriptedModel::default());
    let ctx = common::context(Arc::clone(&host), model, true);

    let state = review_pull_request(ctx, target()).await.unwrap();

    assert!(host.posted().is_empty());
    assert_eq!(state.filtered_comments.len(), 1);
    assert!(state.post_summary.unwrap().dry_run);
}

#[tokio::test]
async fn rejected_comment_is_counted_and_rest_still_posted() {
    let mut host = FakeHost::terraform_pr();
    host.reject_paths = HashSet::from(["main.tf".to_string()]);
    let host = Arc::new(host);
    let model = Arc::new(ScriptedModel::default());
    let ctx = common::context(Arc::clone(&host), model, false);

    let state = review_pull_request(ctx, target()).await.unwrap();

    let summary = state.post_summary.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.posted, 1);
    assert!(matches!(host.posted().as_slice(), [Posted::Issue { .. }]));
}

#[tokio::test]
async fn malformed_stage_output_fails_run_without_posting() {
    let host = Arc::new(FakeHost::terraform_pr());
    let model = Arc::new(ScriptedModel {
        code_review_reply: Some("I think this looks fine!".into()),
        ..ScriptedModel::default()
    });
    let ctx = common::context(Arc::clone(&host), model, false);

    let err = review_pull_request(ctx, target()).await.unwrap_err();

    assert!(
        matches!(&err, WardenError::Stage { stage, .. } if stage == "code_reviewer"),
        "got {err}"
    );
    assert!(host.posted().is_empty());
}

#[tokio::test]
async fn file_with_malformed_patch_is_excluded() {
    let mut host = FakeHost::terraform_pr();
    host.files[0].patch = Some("@@ -one +two @@\n-gone\n+new".into());
    let host = Arc::new(host);
    let model = Arc::new(ScriptedModel::default());
    let ctx = common::context(host, model, true);

    let state = review_pull_request(ctx, target()).await.unwrap();

    let files: Vec<_> = state.context_files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(files, vec!["variables.tf"]);
    assert!(state.changes.iter().all(|c| c.filename == "variables.tf"));
}

#[test]
fn review_graph_wiring() {
    let host = Arc::new(FakeHost::default());
    let model = Arc::new(ScriptedModel::default());
    let graph = build_review_graph(common::context(host, model, true)).unwrap();

    assert_eq!(
        graph.edge_kind(NodeId::FetchPr, NodeId::TitleDescriptionReviewer),
        Some(EdgeKind::Direct)
    );
    assert_eq!(
        graph.edge_kind(NodeId::CrossReferenceGenerator, NodeId::CrossReferenceReflector),
        Some(EdgeKind::Conditional)
    );
    assert_eq!(
        graph.edge_kind(NodeId::CodeReviewer, NodeId::CommentFilterer),
        Some(EdgeKind::Join)
    );
    assert_eq!(
        graph.edge_kind(NodeId::TitleDescriptionReviewer, NodeId::Commenter),
        Some(EdgeKind::Join)
    );
    assert_eq!(graph.edge_kind(NodeId::FetchPr, NodeId::Commenter), None);
}
