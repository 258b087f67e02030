//! Plugin traits for the hosting runtime
//!
//! The bridge does not form batches itself. A host hands batches to either
//! role through these traits: an exporter delivers envelopes to an HTTP
//! sink, a processor rewrites record bodies into envelopes and hands the
//! batch back.

use crate::config::ConfigError;
use crate::logs::LogBatch;
use crate::pipeline::PipelineError;
use async_trait::async_trait;
use thiserror::Error;

/// Plugin error type
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Plugin operation failed: {0}")]
    OperationFailed(String),

    #[error("Plugin configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),

    #[error("Plugin is not started")]
    NotStarted,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Basic plugin information
pub trait PluginInfo {
    /// Plugin name
    fn name(&self) -> &str;

    /// Plugin version
    fn version(&self) -> &str;

    /// Plugin description
    fn description(&self) -> &str {
        ""
    }
}

/// Delivers the records of each batch to an external sink
#[async_trait]
pub trait LogsExporter: PluginInfo + Send + Sync {
    /// Acquire resources and start background delivery
    async fn start(&mut self) -> PluginResult<()>;

    /// Push one batch. Returns once every surviving record is enqueued;
    /// delivery itself happens in the background.
    async fn push_logs(&self, batch: LogBatch) -> PluginResult<()>;

    /// Stop accepting batches and release resources
    async fn shutdown(&mut self) -> PluginResult<()>;
}

/// Rewrites a batch and hands it back to the host
#[async_trait]
pub trait LogsProcessor: PluginInfo + Send + Sync {
    async fn process_logs(&self, batch: LogBatch) -> PluginResult<LogBatch>;
}
