//! Formatter nodes
//!
//! Formatters serialize an event and store the bytes under a format name
//! in `event.formatted`. The payload itself is left untouched, so later
//! sinks can pick whichever rendering they need.

use crate::context::Context;
use crate::error::Result;
use crate::node::{Node, NodeType};
use crate::types::{Event, EventType, JSON_FORMAT};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Turns an event into bytes
pub type Marshaller = Arc<dyn Fn(&Event) -> Result<Vec<u8>> + Send + Sync>;

/// Marshaller writing the payload alone as compact JSON
pub fn json_payload_marshaller() -> Marshaller {
    Arc::new(|event: &Event| Ok(serde_json::to_vec(event.payload.value())?))
}

fn with_newline(mut data: Vec<u8>) -> Bytes {
    data.push(b'\n');
    Bytes::from(data)
}

#[derive(Serialize)]
struct Envelope<'a> {
    created_at: &'a DateTime<Utc>,
    event_type: &'a EventType,
    payload: &'a serde_json::Value,
}

/// Writes `{"created_at", "event_type", "payload"}` as one JSON line
pub struct JsonFormatter {
    name: String,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {
            name: "json-formatter".to_string(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for JsonFormatter {
    async fn process(&self, _ctx: &Context, mut event: Event) -> Result<Option<Event>> {
        let envelope = Envelope {
            created_at: &event.created_at,
            event_type: &event.event_type,
            payload: event.payload.value(),
        };
        let data = with_newline(serde_json::to_vec(&envelope)?);
        event.formatted.insert(JSON_FORMAT.to_string(), data);
        Ok(Some(event))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> NodeType {
        NodeType::Formatter
    }
}

/// Writes whatever a [`Marshaller`] produces, newline-terminated
pub struct ByteWriter {
    name: String,
    format: String,
    marshaller: Marshaller,
}

impl ByteWriter {
    pub fn new(marshaller: Marshaller) -> Self {
        Self {
            name: "byte-writer".to_string(),
            format: JSON_FORMAT.to_string(),
            marshaller,
        }
    }

    /// Payload-only JSON lines under the "json" format
    pub fn json() -> Self {
        Self::new(json_payload_marshaller())
    }

    /// Store output under a different format name
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Node for ByteWriter {
    async fn process(&self, _ctx: &Context, mut event: Event) -> Result<Option<Event>> {
        let data = with_newline((self.marshaller)(&event)?);
        event.formatted.insert(self.format.clone(), data);
        Ok(Some(event))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> NodeType {
        NodeType::Formatter
    }
}
