use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use warden_core::WardenError;

use super::state::{StateUpdate, WorkflowState};

/// Identifier of every node in the review workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    FetchPr,
    StaticAnalyzer,
    CodeReviewer,
    TitleDescriptionReviewer,
    CrossReferenceInitializer,
    CrossReferenceGenerator,
    CrossReferenceReflector,
    CrossReferenceCommenter,
    CommentFilterer,
    Commenter,
}

impl NodeId {
    /// Every node, in declaration order.
    pub const ALL: [NodeId; 10] = [
        NodeId::FetchPr,
        NodeId::StaticAnalyzer,
        NodeId::CodeReviewer,
        NodeId::TitleDescriptionReviewer,
        NodeId::CrossReferenceInitializer,
        NodeId::CrossReferenceGenerator,
        NodeId::CrossReferenceReflector,
        NodeId::CrossReferenceCommenter,
        NodeId::CommentFilterer,
        NodeId::Commenter,
    ];

    /// Snake-case name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::FetchPr => "fetch_pr",
            NodeId::StaticAnalyzer => "static_analyzer",
            NodeId::CodeReviewer => "code_reviewer",
            NodeId::TitleDescriptionReviewer => "title_description_reviewer",
            NodeId::CrossReferenceInitializer => "cross_reference_initializer",
            NodeId::CrossReferenceGenerator => "cross_reference_generator",
            NodeId::CrossReferenceReflector => "cross_reference_reflector",
            NodeId::CrossReferenceCommenter => "cross_reference_commenter",
            NodeId::CommentFilterer => "comment_filterer",
            NodeId::Commenter => "commenter",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the workflow.
///
/// A node reads a snapshot of the state and returns the keys it wants to
/// change. It never sees other nodes' in-flight updates.
#[async_trait]
pub trait Node: Send + Sync {
    /// Which node this is.
    fn id(&self) -> NodeId;

    /// Run the step.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole run.
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, WardenError>;
}

/// Picks the successor of a node from a fixed set of candidates.
///
/// `Target` is an enum naming only the allowed successors, so a router
/// cannot send the run anywhere else. `CANDIDATES` lists every variant and
/// becomes the conditional edges of the graph.
pub trait Router: Send + Sync + 'static {
    /// The allowed successors.
    type Target: Into<NodeId> + Copy + Send;

    /// Every value `route` may return.
    const CANDIDATES: &'static [Self::Target];

    /// Choose the successor for this state.
    fn route(&self, state: &WorkflowState) -> Self::Target;
}

/// Where the cross-reference loop goes after each generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossReferenceRoute {
    /// Ask for another critique.
    Reflect,
    /// Stop iterating and turn the analysis into comments.
    Comment,
}

impl From<CrossReferenceRoute> for NodeId {
    fn from(route: CrossReferenceRoute) -> Self {
        match route {
            CrossReferenceRoute::Reflect => NodeId::CrossReferenceReflector,
            CrossReferenceRoute::Comment => NodeId::CrossReferenceCommenter,
        }
    }
}

/// Ends the reflection loop once the transcript is longer than `limit`.
///
/// # Examples
///
/// ```
/// use warden_review::graph::{CrossReferenceRoute, ReflectionRouter, Router, WorkflowState};
/// use warden_review::llm::ChatMessage;
///
/// let router = ReflectionRouter::new(4);
/// let mut state = WorkflowState::default();
/// state.cross_reference_messages = vec![ChatMessage::user("seed"); 4];
/// assert_eq!(router.route(&state), CrossReferenceRoute::Reflect);
/// state.cross_reference_messages.push(ChatMessage::assistant("final"));
/// assert_eq!(router.route(&state), CrossReferenceRoute::Comment);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ReflectionRouter {
    limit: usize,
}

impl ReflectionRouter {
    /// Create a router that stops once more than `limit` messages exist.
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Router for ReflectionRouter {
    type Target = CrossReferenceRoute;

    const CANDIDATES: &'static [CrossReferenceRoute] =
        &[CrossReferenceRoute::Reflect, CrossReferenceRoute::Comment];

    fn route(&self, state: &WorkflowState) -> CrossReferenceRoute {
        if state.cross_reference_messages.len() > self.limit {
            CrossReferenceRoute::Comment
        } else {
            CrossReferenceRoute::Reflect
        }
    }
}
