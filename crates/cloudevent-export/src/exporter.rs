//! Header-bearing CloudEvent exporter
//!
//! Implements [`LogsExporter`]: each batch goes through the pipeline into
//! the delivery queue, and a background dispatcher POSTs every envelope to
//! the configured endpoint in binary mode.

use crate::delivery::DeliveryWorker;
use crate::dispatcher::Dispatcher;
use crate::stats::{DeliveryStats, DeliveryStatsSnapshot};
use crate::transport::{HttpTransport, Transport};
use async_trait::async_trait;
use cloudevent_core::config::BridgeConfig;
use cloudevent_core::events::{EnvelopeBuilder, EnvelopeMode};
use cloudevent_core::logs::LogBatch;
use cloudevent_core::pipeline::{Pipeline, PipelineError};
use cloudevent_core::plugins::{LogsExporter, PluginError, PluginInfo, PluginResult};
use cloudevent_core::queue::DeliveryQueue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct CloudEventExporter {
    config: BridgeConfig,
    transport: Option<Arc<dyn Transport>>,
    stats: Arc<DeliveryStats>,

    // Set between start() and shutdown()
    pipeline: Option<Pipeline>,
    queue: Option<DeliveryQueue>,
    dispatcher: Option<Dispatcher>,
}

impl CloudEventExporter {
    /// Create an exporter from a configuration.
    ///
    /// The configuration is validated here so a bad endpoint or filter fails
    /// before any batch is accepted.
    pub fn new(config: BridgeConfig) -> PluginResult<Self> {
        config.validate()?;
        config.export.validate()?;

        Ok(Self {
            config,
            transport: None,
            stats: Arc::new(DeliveryStats::new()),
            pipeline: None,
            queue: None,
            dispatcher: None,
        })
    }

    /// Send through `transport` instead of a reqwest client
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_started(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Stop accepting envelopes without waiting for delivery.
    ///
    /// Producers blocked on a full queue are released with an error.
    /// Envelopes already queued are still delivered.
    pub fn close(&self) {
        if let Some(queue) = &self.queue {
            queue.close();
        }
    }
}

impl PluginInfo for CloudEventExporter {
    fn name(&self) -> &str {
        "cloudevent-exporter"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Delivers log records as binary-mode CloudEvents over HTTP"
    }
}

#[async_trait]
impl LogsExporter for CloudEventExporter {
    async fn start(&mut self) -> PluginResult<()> {
        if self.is_started() {
            return Ok(());
        }

        let export = &self.config.export;
        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(
                HttpTransport::new(export)
                    .map_err(|e| PluginError::InitializationFailed(e.to_string()))?,
            ),
        };

        let worker = DeliveryWorker::new(transport, export, self.stats.clone())
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        let (queue, receiver) = DeliveryQueue::bounded(export.queue_size);
        let dispatcher = Dispatcher::spawn(
            receiver,
            Arc::new(worker),
            export.max_concurrent_deliveries,
        );

        let builder = EnvelopeBuilder::new(self.config.identity(), EnvelopeMode::Binary);
        let pipeline = Pipeline::new(
            self.config.reason_filter()?,
            builder,
            Arc::new(queue.clone()),
        );

        info!(
            endpoint = %export.endpoint,
            queue_size = export.queue_size,
            retry = export.retry_on_failure.enabled,
            "CloudEvent exporter started"
        );

        self.pipeline = Some(pipeline);
        self.queue = Some(queue);
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    async fn push_logs(&self, mut batch: LogBatch) -> PluginResult<()> {
        let pipeline = self.pipeline.as_ref().ok_or(PluginError::NotStarted)?;

        match pipeline.process(&mut batch).await {
            Ok(enqueued) => {
                debug!("Enqueued {} envelopes", enqueued);
                Ok(())
            }
            Err(e) => {
                if let PipelineError::Validation(_) = &e {
                    self.stats.record_validation_error();
                }
                error!("Failed to process log batch: {}", e);
                Err(e.into())
            }
        }
    }

    async fn shutdown(&mut self) -> PluginResult<()> {
        self.close();
        self.pipeline = None;
        self.queue = None;

        if let Some(dispatcher) = self.dispatcher.take() {
            let timeout = self.config.export.shutdown_timeout();
            if !dispatcher.shutdown(timeout).await {
                warn!("Exporter shut down before all deliveries completed");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            throttled = stats.throttled,
            "CloudEvent exporter stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.ce.append_type = "com.example.job".to_string();
        config.ce.source = "/catalog/job".to_string();
        config
    }

    fn rejection(config: BridgeConfig) -> String {
        match CloudEventExporter::new(config) {
            Err(PluginError::ConfigurationError(e)) => e.to_string(),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("config was accepted"),
        }
    }

    #[test]
    fn test_new_accepts_valid_config() {
        assert!(CloudEventExporter::new(valid_config()).is_ok());
    }

    #[test]
    fn test_new_rejects_empty_filter() {
        let mut config = valid_config();
        config.filter = String::new();
        assert!(rejection(config).contains("filter"));
    }

    #[test]
    fn test_new_rejects_bad_endpoint() {
        let mut config = valid_config();
        config.export.endpoint = "not a url".to_string();
        assert!(rejection(config).contains("endpoint must be a valid URL"));

        let mut config = valid_config();
        config.export.endpoint = "ftp://sink.local/events".to_string();
        assert!(rejection(config).contains("endpoint must use http or https"));
    }

    #[test]
    fn test_new_rejects_zero_queue_size() {
        let mut config = valid_config();
        config.export.queue_size = 0;
        assert!(rejection(config).contains("queue_size"));
    }

    #[test]
    fn test_new_rejects_bad_retry_policy() {
        let mut config = valid_config();
        config.export.retry_on_failure.enabled = true;
        config.export.retry_on_failure.max_attempts = 0;
        assert!(rejection(config).contains("max_attempts"));
    }

    #[tokio::test]
    async fn test_push_before_start() {
        let exporter = CloudEventExporter::new(valid_config()).unwrap();
        assert!(matches!(
            exporter.push_logs(LogBatch::default()).await,
            Err(PluginError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_start_and_shutdown_idle() {
        let mut exporter = CloudEventExporter::new(valid_config()).unwrap();
        exporter.start().await.unwrap();
        assert!(exporter.is_started());

        exporter.push_logs(LogBatch::default()).await.unwrap();
        exporter.shutdown().await.unwrap();
        assert!(!exporter.is_started());
        assert_eq!(exporter.stats(), DeliveryStatsSnapshot::default());
    }
}
