//! Error types for a3s-eventlogger

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or running event pipelines
#[derive(Debug, Error)]
pub enum EventError {
    /// An interior node of a chain cannot accept successors
    #[error("Node '{0}' is not linkable")]
    NotLinkable(String),

    /// `send` was called for an event type without pipelines
    #[error("No pipeline registered for event type '{0}'")]
    NoMatchingPipeline(String),

    /// One or more pipelines or fan-out branches failed
    #[error("Dispatch failed: {}", describe_failures(.failures, .succeeded))]
    AggregateDispatch {
        failures: Vec<DispatchFailure>,
        succeeded: Vec<String>,
    },

    /// Malformed classification tag or pointer
    #[error("Invalid classification tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    /// Failure reported by the encryption wrapper
    #[error("Wrapper error: {0}")]
    Wrapper(String),

    /// File open/write/rename/prune failure
    #[error("Failed to {action} '{}': {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A node failed while processing an event
    #[error("Node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: Box<EventError>,
    },

    /// Node id already bound to another node instance
    #[error("Node id '{0}' is already registered to a different node")]
    DuplicateNode(String),

    /// Pipeline references an unknown node id
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Node cannot be removed while pipelines reference it
    #[error("Node '{node}' is still referenced by pipeline '{pipeline}'")]
    NodeInUse { node: String, pipeline: String },

    /// Sink could not find its format in the event
    #[error("Format '{format}' not found on event for node '{node}'")]
    MissingFormat { node: String, format: String },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl EventError {
    /// Walk through `Node` wrappers and single-failure aggregates to the
    /// error that originally occurred.
    pub fn root_cause(&self) -> &EventError {
        match self {
            EventError::Node { source, .. } => source.root_cause(),
            EventError::AggregateDispatch { failures, .. } if failures.len() == 1 => {
                failures[0].error.root_cause()
            }
            other => other,
        }
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EventError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// A single failed target inside an [`EventError::AggregateDispatch`]
///
/// `target` is a pipeline id at the broker level, or a node name for
/// fan-out branches inside a graph.
#[derive(Debug)]
pub struct DispatchFailure {
    pub target: String,
    pub error: EventError,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

fn describe_failures(failures: &[DispatchFailure], succeeded: &[String]) -> String {
    let failed: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    if succeeded.is_empty() {
        format!("[{}]", failed.join("; "))
    } else {
        format!(
            "[{}] (succeeded: {})",
            failed.join("; "),
            succeeded.join(", ")
        )
    }
}

/// Result type alias for event pipeline operations
pub type Result<T> = std::result::Result<T, EventError>;
