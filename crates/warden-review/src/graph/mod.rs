//! A small workflow engine for review runs.
//!
//! A [`ReviewGraph`] is a static set of [`Node`]s wired with direct,
//! fan-in ([`EdgeKind::Join`]) and routed ([`EdgeKind::Conditional`])
//! edges. Nodes run as tokio tasks against a read-only snapshot of the
//! [`WorkflowState`] and return a [`StateUpdate`], which the engine merges
//! in completion order.

mod engine;
mod node;
mod state;

pub use engine::{EdgeKind, GraphBuilder, ReviewGraph};
pub use node::{CrossReferenceRoute, Node, NodeId, ReflectionRouter, Router};
pub use state::{PostSummary, StateUpdate, WorkflowState};
