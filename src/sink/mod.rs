//! Sink nodes
//!
//! Sinks terminate a pipeline branch. They write one rendering from
//! `event.formatted` somewhere durable and never pass the event on.

pub mod file;

pub use file::{FileSink, FileSinkConfig};
