//! # a3s-eventlogger
//!
//! Pipeline-based event logging for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-eventlogger` routes structured events through ordered pipelines of
//! nodes. Filters decide whether an event continues, formatters render it,
//! the encrypt filter protects classified fields, and sinks persist it.
//! A `Broker` maps each event type to one or more pipelines.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_eventlogger::{Broker, ByteWriter, Context, FileSink, FileSinkConfig, Filter, Pipeline};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_eventlogger::Result<()> {
//! let broker = Broker::new();
//!
//! broker
//!     .register_node("no-purple", Arc::new(Filter::new(|e| {
//!         Ok(e.payload.get("color").and_then(|c| c.as_str()) != Some("purple"))
//!     })))
//!     .await?;
//! broker.register_node("json", Arc::new(ByteWriter::json())).await?;
//! broker
//!     .register_node(
//!         "file",
//!         Arc::new(FileSink::new(FileSinkConfig::new("/var/log/app", "paint.log"))?),
//!     )
//!     .await?;
//!
//! broker
//!     .register_pipeline(Pipeline::new(
//!         "paint",
//!         "paint-log",
//!         vec!["no-purple".into(), "json".into(), "file".into()],
//!     ))
//!     .await?;
//!
//! let status = broker
//!     .send(&Context::new(), "paint", serde_json::json!({"color": "red"}))
//!     .await?;
//! println!("Dispatched: {}", status.event_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Nodes
//!
//! - **Filter** — drops events failing a predicate
//! - **JsonFormatter / ByteWriter** — add a rendering to `event.formatted`
//! - **EncryptFilter** — redacts, encrypts, or hashes classified fields
//! - **FileSink** — appends to a file with time/size rotation and retention
//!
//! ## Architecture
//!
//! - **Node** trait — the unit of processing every step implements
//! - **Graph** — successor lists, built and checked at registration
//! - **Broker** — node and pipeline registry, the `send` entry point
//! - **Wrapper** trait — encryption capability behind the encrypt filter

pub mod broker;
pub mod clock;
pub mod context;
pub mod encrypt;
pub mod error;
pub mod filter;
pub mod formatter;
pub mod graph;
pub mod node;
pub mod sink;
pub mod types;

// Re-export core types
pub use broker::Broker;
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::Context;
pub use error::{DispatchFailure, EventError, Result};
pub use graph::{link_nodes, link_nodes_and_sinks, Graph, GraphNode};
pub use node::{Node, NodeType};
pub use types::{
    Event, EventType, NodeId, Outcome, Payload, Pipeline, PipelineId, PipelineStatus, Status,
    JSON_FORMAT,
};

// Re-export nodes for convenience
pub use encrypt::{
    AeadWrapper, Classification, Classified, EncryptFilter, EncryptFilterConfig, EncryptedBlob,
    FieldTag, Operation, PointerTag, Taggable, Wrapper,
};
pub use filter::Filter;
pub use formatter::{ByteWriter, JsonFormatter, Marshaller};
pub use sink::{FileSink, FileSinkConfig};
