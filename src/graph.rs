//! Graph construction and traversal
//!
//! Successor lists live here rather than inside nodes, so one node instance
//! can sit in many pipelines with different successors. Linkability is
//! checked once, when the graph is built.

use crate::context::Context;
use crate::error::{DispatchFailure, EventError, Result};
use crate::node::Node;
use crate::types::{Event, Outcome};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;

/// A node's position in a graph, together with its successors
#[derive(Clone)]
pub struct GraphNode {
    node: Arc<dyn Node>,
    next: Vec<GraphNode>,
}

impl GraphNode {
    pub fn new(node: Arc<dyn Node>) -> Self {
        Self {
            node,
            next: Vec::new(),
        }
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    /// Replace the successor list
    ///
    /// Fails with `NotLinkable` if the node is a leaf.
    pub fn set_next(&mut self, next: Vec<GraphNode>) -> Result<()> {
        if !next.is_empty() && !self.node.linkable() {
            return Err(EventError::NotLinkable(self.node.name().to_string()));
        }
        self.next = next;
        Ok(())
    }

    pub fn next(&self) -> &[GraphNode] {
        &self.next
    }

    /// Run the event through this node and everything downstream of it
    pub fn process<'a>(&'a self, ctx: &'a Context, event: Event) -> BoxFuture<'a, Result<Outcome>> {
        async move {
            ctx.check()?;

            let processed = self
                .node
                .process(ctx, event)
                .await
                .map_err(|e| EventError::Node {
                    node: self.node.name().to_string(),
                    source: Box::new(e),
                })?;

            let Some(event) = processed else {
                if self.next.is_empty() {
                    return Ok(Outcome::Completed);
                }
                tracing::debug!(node = %self.node.name(), "Event dropped");
                return Ok(Outcome::Dropped);
            };

            match self.next.as_slice() {
                [] => Ok(Outcome::Completed),
                [only] => only.process(ctx, event).await,
                many => fan_out(ctx, many, event).await,
            }
        }
        .boxed()
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        names.push(self.node.name());
        for child in &self.next {
            child.collect_names(names);
        }
    }
}

/// Deliver the event to every sibling, each with its own copy
///
/// A failing sibling does not stop the others.
async fn fan_out(ctx: &Context, children: &[GraphNode], event: Event) -> Result<Outcome> {
    let results = join_all(children.iter().map(|child| child.process(ctx, event.clone()))).await;

    let mut failures = Vec::new();
    let mut succeeded = Vec::new();
    let mut completed = false;

    for (child, result) in children.iter().zip(results) {
        let target = child.node.name().to_string();
        match result {
            Ok(outcome) => {
                completed |= outcome == Outcome::Completed;
                succeeded.push(target);
            }
            Err(error) => {
                tracing::warn!(node = %target, error = %error, "Fan-out branch failed");
                failures.push(DispatchFailure { target, error });
            }
        }
    }

    if !failures.is_empty() {
        return Err(EventError::AggregateDispatch {
            failures,
            succeeded,
        });
    }

    Ok(if completed {
        Outcome::Completed
    } else {
        Outcome::Dropped
    })
}

/// A rooted chain (or tree) of nodes
#[derive(Clone)]
pub struct Graph {
    root: GraphNode,
}

impl Graph {
    pub fn new(root: GraphNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &GraphNode {
        &self.root
    }

    /// Traverse the graph from the root
    pub async fn process(&self, ctx: &Context, event: Event) -> Result<Outcome> {
        self.root.process(ctx, event).await
    }

    /// Node names in depth-first order
    pub fn node_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.root.collect_names(&mut names);
        names
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.node_names())
            .finish()
    }
}

/// Link nodes into a chain, each feeding its immediate successor
///
/// Every node except the last must be linkable.
pub fn link_nodes(nodes: Vec<Arc<dyn Node>>) -> Result<Graph> {
    let mut nodes = nodes.into_iter().rev();
    let Some(last) = nodes.next() else {
        return Err(EventError::Config(
            "Cannot link an empty node list".to_string(),
        ));
    };
    prepend(GraphNode::new(last), nodes)
}

/// Link `inner` into a chain whose last node fans out to every sink
pub fn link_nodes_and_sinks(inner: Vec<Arc<dyn Node>>, sinks: Vec<Arc<dyn Node>>) -> Result<Graph> {
    if sinks.is_empty() {
        return Err(EventError::Config("Sink list cannot be empty".to_string()));
    }

    let mut inner = inner.into_iter().rev();
    let Some(last) = inner.next() else {
        return Err(EventError::Config(
            "Cannot link sinks without inner nodes".to_string(),
        ));
    };

    let mut tail = GraphNode::new(last);
    tail.set_next(sinks.into_iter().map(GraphNode::new).collect())?;
    prepend(tail, inner)
}

/// Put `reversed` (last first) in front of `tail`, one link at a time
fn prepend(mut tail: GraphNode, reversed: impl Iterator<Item = Arc<dyn Node>>) -> Result<Graph> {
    for node in reversed {
        let mut head = GraphNode::new(node);
        head.set_next(vec![tail])?;
        tail = head;
    }
    Ok(Graph::new(tail))
}
