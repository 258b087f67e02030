//! CloudEvent Core - log record filtering, envelope building and queueing
//!
//! This crate provides the foundational types and stages of the bridge:
//!
//! - **Logs**: inbound batches of structured log records
//! - **Filter**: reason-based record pruning
//! - **Events**: attribute extraction and CloudEvent envelope construction
//! - **Queue**: the bounded buffer between extraction and delivery
//! - **Pipeline**: filter → extract → build → enqueue orchestration
//! - **Plugins**: trait definitions for the hosting runtime

pub mod config;
pub mod events;
pub mod filter;
pub mod logs;
pub mod pipeline;
pub mod plugins;
pub mod queue;
pub mod transform;

// Re-export commonly used types
pub use events::{
    CeIdentity, Envelope, EnvelopeBuilder, EnvelopeMode, EventRecord, ValidationError,
};
pub use filter::ReasonFilter;
pub use logs::{AttributeValue, Attributes, Body, LogBatch, LogRecord, ResourceLogs, ScopeLogs};
pub use pipeline::{EnvelopeSink, Pipeline, PipelineError};
pub use plugins::{LogsExporter, LogsProcessor, PluginError, PluginInfo, PluginResult};
pub use queue::{DeliveryQueue, QueueError, QueueReceiver};
pub use transform::CloudEventTransform;

/// Bridge version
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default capacity of the delivery queue
pub const DEFAULT_QUEUE_SIZE: usize = 4;
