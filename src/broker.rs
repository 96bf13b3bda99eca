//! Event broker
//!
//! `Broker` maps event types to ordered pipelines of registered nodes and
//! dispatches each sent payload through every matching pipeline.

use crate::clock::{Clock, FixedClock, SystemClock};
use crate::context::Context;
use crate::error::{DispatchFailure, EventError, Result};
use crate::graph::{link_nodes, link_nodes_and_sinks, Graph};
use crate::node::Node;
use crate::types::{Event, EventType, NodeId, Payload, Pipeline, PipelineId, PipelineStatus, Status};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A pipeline definition together with its linked graph
struct RegisteredPipeline {
    pipeline: Pipeline,
    graph: Arc<Graph>,
}

/// Registry of nodes and pipelines, and the entry point for sending events
///
/// Thread-safe via internal locks. Registration may happen while other
/// tasks are sending; each `send` works on a snapshot of the pipelines
/// registered when it started.
pub struct Broker {
    clock: RwLock<Arc<dyn Clock>>,

    /// Registered nodes (node_id → node)
    nodes: RwLock<HashMap<NodeId, Arc<dyn Node>>>,

    /// Pipelines per event type, in registration order
    pipelines: RwLock<HashMap<EventType, Vec<RegisteredPipeline>>>,
}

impl Broker {
    /// Create a broker stamping events with wall-clock time
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a broker with a custom time source
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock: RwLock::new(clock),
            nodes: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Freeze `created_at` of every subsequent event at `at`
    pub async fn stop_time_at(&self, at: DateTime<Utc>) {
        *self.clock.write().await = Arc::new(FixedClock::new(at));
    }

    /// Current time according to the broker clock
    pub async fn now(&self) -> DateTime<Utc> {
        self.clock.read().await.now()
    }

    /// Bind a node to an id
    ///
    /// Registering the same instance twice is a no-op; binding the id to a
    /// different instance fails with `DuplicateNode`.
    pub async fn register_node(&self, id: impl Into<NodeId>, node: Arc<dyn Node>) -> Result<()> {
        let id = id.into();
        let mut nodes = self.nodes.write().await;

        if let Some(existing) = nodes.get(&id) {
            if same_instance(existing, &node) {
                return Ok(());
            }
            return Err(EventError::DuplicateNode(id.to_string()));
        }

        tracing::info!(
            node_id = %id,
            name = %node.name(),
            node_type = %node.node_type(),
            "Node registered"
        );
        nodes.insert(id, node);
        Ok(())
    }

    /// Unbind a node id
    ///
    /// Refused with `NodeInUse` while any pipeline still references it.
    pub async fn remove_node(&self, id: &NodeId) -> Result<Arc<dyn Node>> {
        let pipelines = self.pipelines.read().await;
        if let Some(user) = pipelines
            .values()
            .flatten()
            .find(|p| p.pipeline.referenced_ids().any(|n| n == id))
        {
            return Err(EventError::NodeInUse {
                node: id.to_string(),
                pipeline: user.pipeline.pipeline_id.to_string(),
            });
        }

        let removed = self
            .nodes
            .write()
            .await
            .remove(id)
            .ok_or_else(|| EventError::NodeNotFound(id.to_string()))?;
        tracing::info!(node_id = %id, "Node removed");
        Ok(removed)
    }

    /// Link a pipeline's nodes and register it under its event type
    ///
    /// Every node id must already be registered and every node but the
    /// last must be linkable. Re-registering a pipeline id replaces the
    /// old definition in place, keeping its dispatch position.
    pub async fn register_pipeline(&self, pipeline: Pipeline) -> Result<()> {
        let mut pipelines = self.pipelines.write().await;

        let graph = {
            let nodes = self.nodes.read().await;
            let resolve = |ids: &[NodeId]| -> Result<Vec<Arc<dyn Node>>> {
                ids.iter()
                    .map(|id| {
                        nodes
                            .get(id)
                            .cloned()
                            .ok_or_else(|| EventError::NodeNotFound(id.to_string()))
                    })
                    .collect()
            };

            let inner = resolve(&pipeline.node_ids)?;
            if pipeline.sink_ids.is_empty() {
                link_nodes(inner)?
            } else {
                link_nodes_and_sinks(inner, resolve(&pipeline.sink_ids)?)?
            }
        };

        tracing::info!(
            event_type = %pipeline.event_type,
            pipeline_id = %pipeline.pipeline_id,
            nodes = ?graph.node_names(),
            "Pipeline registered"
        );

        let registered = RegisteredPipeline {
            graph: Arc::new(graph),
            pipeline,
        };
        let entries = pipelines
            .entry(registered.pipeline.event_type.clone())
            .or_default();
        match entries
            .iter_mut()
            .find(|p| p.pipeline.pipeline_id == registered.pipeline.pipeline_id)
        {
            Some(slot) => *slot = registered,
            None => entries.push(registered),
        }
        Ok(())
    }

    /// Unregister a pipeline, returning its definition if it existed
    pub async fn remove_pipeline(
        &self,
        event_type: &EventType,
        pipeline_id: &PipelineId,
    ) -> Option<Pipeline> {
        let mut pipelines = self.pipelines.write().await;
        let entries = pipelines.get_mut(event_type)?;
        let index = entries
            .iter()
            .position(|p| &p.pipeline.pipeline_id == pipeline_id)?;
        let removed = entries.remove(index);
        if entries.is_empty() {
            pipelines.remove(event_type);
        }

        tracing::info!(event_type = %event_type, pipeline_id = %pipeline_id, "Pipeline removed");
        Some(removed.pipeline)
    }

    /// Dispatch a payload to every pipeline registered for `event_type`
    ///
    /// Pipelines run in registration order on the calling task. A pipeline
    /// whose filter drops the event counts as a success. If any pipeline
    /// fails, the others still run and the result is an
    /// `AggregateDispatch` error naming failed and successful pipelines.
    pub async fn send(
        &self,
        ctx: &Context,
        event_type: impl Into<EventType>,
        payload: impl Into<Payload>,
    ) -> Result<Status> {
        let event_type = event_type.into();
        ctx.check()?;

        let graphs: Vec<(PipelineId, Arc<Graph>)> = {
            let pipelines = self.pipelines.read().await;
            pipelines
                .get(&event_type)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|p| (p.pipeline.pipeline_id.clone(), Arc::clone(&p.graph)))
                        .collect()
                })
                .unwrap_or_default()
        };
        if graphs.is_empty() {
            return Err(EventError::NoMatchingPipeline(event_type.to_string()));
        }

        let event = Event::new(event_type, self.now().await, payload.into());
        let mut status = Status {
            event_id: event.id.clone(),
            pipelines: Vec::with_capacity(graphs.len()),
        };
        let mut failures = Vec::new();

        for (pipeline_id, graph) in graphs {
            match graph.process(ctx, event.clone()).await {
                Ok(outcome) => {
                    tracing::debug!(
                        event_id = %event.id,
                        pipeline_id = %pipeline_id,
                        outcome = ?outcome,
                        "Pipeline finished"
                    );
                    status.pipelines.push(PipelineStatus {
                        pipeline_id,
                        outcome,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        event_id = %event.id,
                        pipeline_id = %pipeline_id,
                        error = %error,
                        "Pipeline failed"
                    );
                    failures.push(DispatchFailure {
                        target: pipeline_id.to_string(),
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(EventError::AggregateDispatch {
                failures,
                succeeded: status
                    .pipelines
                    .iter()
                    .map(|p| p.pipeline_id.to_string())
                    .collect(),
            });
        }
        Ok(status)
    }

    /// Ask every registered node to release and reacquire its resources
    ///
    /// Used after external log rotation. All nodes are attempted; failures
    /// are reported together.
    pub async fn reopen(&self, ctx: &Context) -> Result<()> {
        let mut nodes: Vec<(NodeId, Arc<dyn Node>)> = self
            .nodes
            .read()
            .await
            .iter()
            .map(|(id, node)| (id.clone(), Arc::clone(node)))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failures = Vec::new();
        let mut succeeded = Vec::new();
        for (id, node) in nodes {
            ctx.check()?;
            match node.reopen().await {
                Ok(()) => succeeded.push(id.to_string()),
                Err(error) => {
                    tracing::warn!(node_id = %id, error = %error, "Node reopen failed");
                    failures.push(DispatchFailure {
                        target: id.to_string(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EventError::AggregateDispatch {
                failures,
                succeeded,
            })
        }
    }

    /// Registered node ids, sorted
    pub async fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Pipeline ids for an event type, in dispatch order
    pub async fn pipeline_ids(&self, event_type: &EventType) -> Vec<PipelineId> {
        self.pipelines
            .read()
            .await
            .get(event_type)
            .map(|entries| {
                entries
                    .iter()
                    .map(|p| p.pipeline.pipeline_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

fn same_instance(a: &Arc<dyn Node>, b: &Arc<dyn Node>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
