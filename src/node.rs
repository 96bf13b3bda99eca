//! Node trait: the unit of event processing
//!
//! Filters, formatters, the encrypt filter, and sinks all implement
//! `Node`. The graph layer wires nodes together and never looks inside.

use crate::context::Context;
use crate::error::Result;
use crate::types::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a node in a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Filter,
    Formatter,
    Sink,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter => write!(f, "filter"),
            Self::Formatter => write!(f, "formatter"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// A processing step in a pipeline
///
/// `process` returns `Ok(Some(event))` to continue, `Ok(None)` to halt
/// propagation without error, or `Err` to fail the pipeline.
#[async_trait]
pub trait Node: Send + Sync {
    /// Filter, transform, format, or persist the event
    async fn process(&self, ctx: &Context, event: Event) -> Result<Option<Event>>;

    /// Re-read external state and recycle handles (e.g., after log rotation)
    async fn reopen(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable node name used in logs and errors
    fn name(&self) -> &str;

    fn node_type(&self) -> NodeType;

    /// Whether the node can have successors
    ///
    /// Sinks are leaves unless they opt in.
    fn linkable(&self) -> bool {
        self.node_type() != NodeType::Sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;

    #[async_trait]
    impl Node for Leaf {
        async fn process(&self, _ctx: &Context, _event: Event) -> Result<Option<Event>> {
            Ok(None)
        }

        fn name(&self) -> &str {
            "leaf"
        }

        fn node_type(&self) -> NodeType {
            NodeType::Sink
        }
    }

    #[test]
    fn test_sinks_are_not_linkable_by_default() {
        assert!(!Leaf.linkable());
    }

    #[test]
    fn test_default_reopen_is_noop() {
        tokio_test::block_on(async {
            assert!(Leaf.reopen().await.is_ok());
        });
    }

    #[test]
    fn test_node_type_display() {
        assert_eq!(NodeType::Filter.to_string(), "filter");
        assert_eq!(NodeType::Formatter.to_string(), "formatter");
        assert_eq!(NodeType::Sink.to_string(), "sink");
    }
}
