//! Core event types for the a3s-eventlogger pipeline
//!
//! Identifiers are thin string newtypes; payloads are a generic JSON value
//! tree plus an optional source of classification tags.

use crate::encrypt::{Classified, FieldTag, Taggable};
use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Format name used by the JSON formatters
pub const JSON_FORMAT: &str = "json";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a registered node
    NodeId
);
string_id!(
    /// Event type used to select pipelines (e.g., "auth.login")
    EventType
);
string_id!(
    /// Identifier of a pipeline within an event type
    PipelineId
);

/// Where the classification tags of a payload come from
#[derive(Clone, Default)]
pub(crate) enum TagSource {
    /// No tags; every leaf falls back to `{secret, redact}`
    #[default]
    Untagged,
    /// Structural `"<level>[,<operation>]"` tags, parsed at filter time
    Declared(Vec<FieldTag>),
    /// The payload describes its own tags
    Taggable(Arc<dyn Taggable>),
}

/// Structured event payload
///
/// The value tree is what nodes read and transform. The tag source is only
/// consulted by the encrypt filter.
#[derive(Clone, Default)]
pub struct Payload {
    value: serde_json::Value,
    pub(crate) tags: TagSource,
}

impl Payload {
    /// Untagged payload from a raw JSON value
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            tags: TagSource::Untagged,
        }
    }

    /// Untagged payload from any serializable value
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Payload whose fields carry structural classification tags
    pub fn declared(value: serde_json::Value, tags: Vec<FieldTag>) -> Self {
        Self {
            value,
            tags: TagSource::Declared(tags),
        }
    }

    /// Payload from a type whose fields are classified via [`Classified`]
    pub fn classified<T: Serialize + Classified>(value: &T) -> Result<Self> {
        Ok(Self::declared(serde_json::to_value(value)?, T::classification()))
    }

    /// Payload built from a value that declares its own tags via [`Taggable`]
    pub fn tagged<T>(value: T) -> Result<Self>
    where
        T: Serialize + Taggable + 'static,
    {
        Ok(Self {
            value: serde_json::to_value(&value)?,
            tags: TagSource::Taggable(Arc::new(value)),
        })
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut serde_json::Value {
        &mut self.value
    }

    /// Get a top-level field of an object payload
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.value.get(key)
    }

    /// Replace the value tree, keeping the tag source
    pub(crate) fn replace_value(&mut self, value: serde_json::Value) {
        self.value = value;
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags = match &self.tags {
            TagSource::Untagged => "untagged",
            TagSource::Declared(_) => "declared",
            TagSource::Taggable(_) => "taggable",
        };
        f.debug_struct("Payload")
            .field("value", &self.value)
            .field("tags", &tags)
            .finish()
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::new(value)
    }
}

/// A single event flowing through a pipeline
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Event type the event was sent with
    pub event_type: EventType,

    /// Creation time, taken from the broker clock
    pub created_at: DateTime<Utc>,

    /// Structured payload
    pub payload: Payload,

    /// Serialized renderings keyed by format name (e.g., "json")
    pub formatted: HashMap<String, Bytes>,
}

impl Event {
    /// Create an event with an auto-generated id
    pub fn new(event_type: EventType, created_at: DateTime<Utc>, payload: Payload) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            event_type,
            created_at,
            payload,
            formatted: HashMap::new(),
        }
    }

    /// Get the serialized bytes for a format, if a formatter produced them
    pub fn format(&self, name: &str) -> Option<&Bytes> {
        self.formatted.get(name)
    }

    /// Add a formatted rendering
    pub fn with_format(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.formatted.insert(name.into(), data.into());
        self
    }
}

/// A named, ordered chain of nodes bound to an event type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub event_type: EventType,
    pub pipeline_id: PipelineId,

    /// Nodes in traversal order
    pub node_ids: Vec<NodeId>,

    /// Sinks the last node fans out to (empty: `node_ids` is the full chain)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sink_ids: Vec<NodeId>,
}

impl Pipeline {
    pub fn new(
        event_type: impl Into<EventType>,
        pipeline_id: impl Into<PipelineId>,
        node_ids: Vec<NodeId>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            pipeline_id: pipeline_id.into(),
            node_ids,
            sink_ids: Vec::new(),
        }
    }

    /// Fan the last node out to several sinks
    pub fn with_sinks(mut self, sink_ids: Vec<NodeId>) -> Self {
        self.sink_ids = sink_ids;
        self
    }

    /// All node ids referenced by this pipeline
    pub fn referenced_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.node_ids.iter().chain(self.sink_ids.iter())
    }
}

/// How a traversal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// At least one terminal node processed the event
    Completed,
    /// A node halted propagation
    Dropped,
}

/// Result of one pipeline within a `send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub pipeline_id: PipelineId,
    pub outcome: Outcome,
}

/// Result of a successful `send`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Id of the event that was dispatched
    pub event_id: String,

    /// Per-pipeline outcomes, in registration order
    pub pipelines: Vec<PipelineStatus>,
}

impl Status {
    /// Pipelines whose sinks received the event
    pub fn completed(&self) -> impl Iterator<Item = &PipelineId> {
        self.pipelines
            .iter()
            .filter(|p| p.outcome == Outcome::Completed)
            .map(|p| &p.pipeline_id)
    }

    /// Pipelines where a filter dropped the event
    pub fn dropped(&self) -> impl Iterator<Item = &PipelineId> {
        self.pipelines
            .iter()
            .filter(|p| p.outcome == Outcome::Dropped)
            .map(|p| &p.pipeline_id)
    }
}
