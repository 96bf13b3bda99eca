//! Predicate filter node

use crate::context::Context;
use crate::error::Result;
use crate::node::{Node, NodeType};
use crate::types::Event;
use async_trait::async_trait;
use std::sync::Arc;

/// Decides whether an event continues down the pipeline
pub type Predicate = Arc<dyn Fn(&Event) -> Result<bool> + Send + Sync>;

/// Drops events for which the predicate returns `false`
///
/// A predicate error fails the pipeline rather than dropping the event.
pub struct Filter {
    name: String,
    predicate: Predicate,
}

impl Filter {
    pub fn new(predicate: impl Fn(&Event) -> Result<bool> + Send + Sync + 'static) -> Self {
        Self {
            name: "filter".to_string(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Node for Filter {
    async fn process(&self, _ctx: &Context, event: Event) -> Result<Option<Event>> {
        if (self.predicate)(&event)? {
            Ok(Some(event))
        } else {
            tracing::debug!(filter = %self.name, event_id = %event.id, "Predicate rejected event");
            Ok(None)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> NodeType {
        NodeType::Filter
    }
}
