use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::Direction;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use warden_core::WardenError;

use super::node::{Node, NodeId, Router};
use super::state::{StateUpdate, WorkflowState};

/// How a node hands control to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The successor runs as soon as the source finishes.
    Direct,
    /// The successor runs once every `Join` predecessor has finished.
    Join,
    /// The source's router picks one of its `Conditional` successors.
    Conditional,
}

type RouteFn = Box<dyn Fn(&WorkflowState) -> NodeId + Send + Sync>;

const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Builds a [`ReviewGraph`] and checks its wiring.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use warden_core::WardenError;
/// use warden_review::graph::{GraphBuilder, Node, NodeId, StateUpdate, WorkflowState};
///
/// struct Done;
///
/// #[async_trait]
/// impl Node for Done {
///     fn id(&self) -> NodeId {
///         NodeId::FetchPr
///     }
///     async fn run(&self, _state: &WorkflowState) -> Result<StateUpdate, WardenError> {
///         Ok(StateUpdate::default())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let graph = GraphBuilder::new().node(Done).entry(NodeId::FetchPr).build().unwrap();
/// let state = graph.run(WorkflowState::default()).await.unwrap();
/// assert_eq!(state.executed, vec![NodeId::FetchPr]);
/// # }
/// ```
pub struct GraphBuilder {
    graph: DiGraph<NodeId, EdgeKind>,
    indices: HashMap<NodeId, NodeIndex>,
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    routers: HashMap<NodeId, RouteFn>,
    entry: Option<NodeId>,
    recursion_limit: usize,
    duplicates: Vec<NodeId>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Start an empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            nodes: HashMap::new(),
            routers: HashMap::new(),
            entry: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            duplicates: Vec::new(),
        }
    }

    fn index(&mut self, id: NodeId) -> NodeIndex {
        let graph = &mut self.graph;
        *self.indices.entry(id).or_insert_with(|| graph.add_node(id))
    }

    /// Register a node under its own [`Node::id`].
    pub fn node(mut self, node: impl Node + 'static) -> Self {
        let id = node.id();
        self.index(id);
        if self.nodes.insert(id, Arc::new(node)).is_some() {
            self.duplicates.push(id);
        }
        self
    }

    /// Set the node every run starts at.
    pub fn entry(mut self, id: NodeId) -> Self {
        self.entry = Some(id);
        self
    }

    /// `to` runs whenever `from` finishes.
    pub fn edge(mut self, from: NodeId, to: NodeId) -> Self {
        let (a, b) = (self.index(from), self.index(to));
        self.graph.add_edge(a, b, EdgeKind::Direct);
        self
    }

    /// `to` runs once after all of `from` have finished.
    pub fn join(mut self, from: &[NodeId], to: NodeId) -> Self {
        let b = self.index(to);
        for source in from {
            let a = self.index(*source);
            self.graph.add_edge(a, b, EdgeKind::Join);
        }
        self
    }

    /// After `from` finishes, `router` picks the successor among its
    /// declared candidates.
    pub fn conditional<R: Router>(mut self, from: NodeId, router: R) -> Self {
        let a = self.index(from);
        for target in R::CANDIDATES {
            let b = self.index((*target).into());
            self.graph.add_edge(a, b, EdgeKind::Conditional);
        }
        self.routers
            .insert(from, Box::new(move |state: &WorkflowState| router.route(state).into()));
        self
    }

    /// Maximum number of node executions per run.
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Validate the wiring and produce a runnable graph.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Graph`] if a node is registered twice, the
    /// entry is missing, an edge names an unregistered node, a node mixes
    /// routed and unconditional successors, a node is both a join target
    /// and a direct target, or a node is unreachable from the entry.
    pub fn build(self) -> Result<ReviewGraph, WardenError> {
        if let Some(id) = self.duplicates.first() {
            return Err(WardenError::Graph(format!("node {id} registered twice")));
        }
        let entry = self
            .entry
            .ok_or_else(|| WardenError::Graph("no entry node set".into()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(WardenError::Graph(format!("entry node {entry} is not registered")));
        }

        for idx in self.graph.node_indices() {
            let id = self.graph[idx];
            if !self.nodes.contains_key(&id) {
                return Err(WardenError::Graph(format!("edge references unregistered node {id}")));
            }
            let outgoing: Vec<EdgeKind> = self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| *e.weight())
                .collect();
            let unconditional = outgoing.iter().any(|k| *k != EdgeKind::Conditional);
            if self.routers.contains_key(&id) && unconditional {
                return Err(WardenError::Graph(format!(
                    "{id} has a router and unconditional successors"
                )));
            }
            let incoming: BTreeSet<bool> = self
                .graph
                .edges_directed(idx, Direction::Incoming)
                .map(|e| *e.weight() == EdgeKind::Join)
                .collect();
            if incoming.len() > 1 {
                return Err(WardenError::Graph(format!(
                    "{id} is both a join target and a direct target"
                )));
            }
        }

        let mut reached = BTreeSet::new();
        let start = self
            .indices
            .get(&entry)
            .copied()
            .ok_or_else(|| WardenError::Graph(format!("entry node {entry} has no index")))?;
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(idx) = bfs.next(&self.graph) {
            reached.insert(self.graph[idx]);
        }
        if let Some(id) = self.nodes.keys().find(|id| !reached.contains(*id)) {
            return Err(WardenError::Graph(format!("{id} is unreachable from {entry}")));
        }

        let mut join_inputs: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        for edge in self.graph.edge_references() {
            if *edge.weight() == EdgeKind::Join {
                join_inputs
                    .entry(self.graph[edge.target()])
                    .or_default()
                    .insert(self.graph[edge.source()]);
            }
        }

        Ok(ReviewGraph {
            graph: self.graph,
            indices: self.indices,
            nodes: self.nodes,
            routers: self.routers,
            join_inputs,
            entry,
            recursion_limit: self.recursion_limit,
        })
    }
}

/// A validated workflow, runnable any number of times.
pub struct ReviewGraph {
    graph: DiGraph<NodeId, EdgeKind>,
    indices: HashMap<NodeId, NodeIndex>,
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    routers: HashMap<NodeId, RouteFn>,
    join_inputs: HashMap<NodeId, BTreeSet<NodeId>>,
    entry: NodeId,
    recursion_limit: usize,
}

type NodeOutcome = (NodeId, Result<StateUpdate, WardenError>);

impl ReviewGraph {
    /// Start building a graph.
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Kind of the edge `from -> to`, if it exists.
    pub fn edge_kind(&self, from: NodeId, to: NodeId) -> Option<EdgeKind> {
        let (a, b) = (*self.indices.get(&from)?, *self.indices.get(&to)?);
        self.graph
            .edges_connecting(a, b)
            .next()
            .map(|e| *e.weight())
    }

    /// Execute the workflow from the entry node until no node is left to
    /// run.
    ///
    /// Nodes whose inputs are ready run concurrently; their updates are
    /// merged one at a time in completion order.
    ///
    /// # Errors
    ///
    /// The first node error is returned unchanged and every in-flight node
    /// is aborted. Wiring violations found while running (a key written by
    /// two nodes, the recursion limit, a join that can never fire) are
    /// [`WardenError::Graph`].
    pub async fn run(&self, initial: WorkflowState) -> Result<WorkflowState, WardenError> {
        let mut state = Arc::new(initial);
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let mut arrived: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        let mut steps = 0usize;

        self.spawn(&mut tasks, self.entry, &state, &mut steps)?;

        while let Some(joined) = tasks.join_next().await {
            let (id, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tasks.abort_all();
                    return Err(WardenError::Graph(format!("node task failed: {e}")));
                }
            };
            let update = match result {
                Ok(update) => update,
                Err(e) => {
                    warn!(node = %id, error = %e, "node failed, aborting run");
                    tasks.abort_all();
                    return Err(e);
                }
            };
            if let Err(e) = Arc::make_mut(&mut state).apply(id, update) {
                tasks.abort_all();
                return Err(e);
            }
            info!(node = %id, "node finished");

            let next = match self.successors(id, &state, &mut arrived) {
                Ok(next) => next,
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            };
            for target in next {
                if let Err(e) = self.spawn(&mut tasks, target, &state, &mut steps) {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        if let Some((target, seen)) = arrived.iter().find(|(_, seen)| !seen.is_empty()) {
            return Err(WardenError::Graph(format!(
                "{target} never ran: only {} of its inputs finished",
                seen.len()
            )));
        }

        Ok(Arc::try_unwrap(state).unwrap_or_else(|shared| (*shared).clone()))
    }

    fn spawn(
        &self,
        tasks: &mut JoinSet<NodeOutcome>,
        id: NodeId,
        state: &Arc<WorkflowState>,
        steps: &mut usize,
    ) -> Result<(), WardenError> {
        *steps += 1;
        if *steps > self.recursion_limit {
            return Err(WardenError::Graph(format!(
                "recursion limit of {} reached before running {id}",
                self.recursion_limit
            )));
        }
        let node = self
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| WardenError::Graph(format!("node {id} is not registered")))?;
        let snapshot = Arc::clone(state);
        debug!(node = %id, step = *steps, "scheduling node");
        tasks.spawn(async move {
            let result = node.run(&snapshot).await;
            (id, result)
        });
        Ok(())
    }

    fn successors(
        &self,
        from: NodeId,
        state: &WorkflowState,
        arrived: &mut HashMap<NodeId, BTreeSet<NodeId>>,
    ) -> Result<Vec<NodeId>, WardenError> {
        if let Some(route) = self.routers.get(&from) {
            let target = route(state);
            if self.edge_kind(from, target) != Some(EdgeKind::Conditional) {
                return Err(WardenError::Graph(format!(
                    "router of {from} chose undeclared successor {target}"
                )));
            }
            debug!(from = %from, to = %target, "routed");
            return Ok(vec![target]);
        }

        let Some(&idx) = self.indices.get(&from) else {
            return Ok(Vec::new());
        };
        let mut ready = Vec::new();
        for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
            let target = self.graph[edge.target()];
            match edge.weight() {
                EdgeKind::Direct => ready.push(target),
                EdgeKind::Join => {
                    let seen = arrived.entry(target).or_default();
                    seen.insert(from);
                    if self.join_inputs.get(&target) == Some(&*seen) {
                        arrived.remove(&target);
                        ready.push(target);
                    }
                }
                EdgeKind::Conditional => {}
            }
        }
        ready.sort_unstable();
        Ok(ready)
    }
}
