//! Body-embedded transform processor
//!
//! Replaces the body of every surviving record with a structured CloudEvent
//! envelope and returns the batch to the host. Nothing is delivered here.

use crate::config::BridgeConfig;
use crate::events::{CeIdentity, EnvelopeBuilder, EnvelopeMode, EventRecord};
use crate::filter::ReasonFilter;
use crate::logs::{Body, LogBatch};
use crate::pipeline::PipelineError;
use crate::plugins::{LogsProcessor, PluginInfo, PluginResult};
use async_trait::async_trait;
use tracing::debug;

pub struct CloudEventTransform {
    filter: ReasonFilter,
    builder: EnvelopeBuilder,
}

impl CloudEventTransform {
    pub fn new(filter: ReasonFilter, identity: CeIdentity) -> Self {
        Self {
            filter,
            builder: EnvelopeBuilder::new(identity, EnvelopeMode::Structured),
        }
    }

    /// Build from a validated configuration
    pub fn from_config(config: &BridgeConfig) -> PluginResult<Self> {
        config.validate()?;
        Ok(Self::new(config.reason_filter()?, config.identity()))
    }

    /// Filter the batch and rewrite each surviving record body in place.
    ///
    /// Stops at the first invalid record; records before it are already
    /// rewritten.
    pub fn transform(&self, batch: &mut LogBatch) -> Result<usize, PipelineError> {
        let dropped = self.filter.apply(batch);
        if dropped > 0 {
            debug!("Filtered out {} log records by reason", dropped);
        }

        let mut rewritten = 0;
        for record in batch.records_mut() {
            let event = EventRecord::extract(record)?;
            let envelope = self.builder.build(&event);
            record.body = Body::Bytes(envelope.body);
            rewritten += 1;
        }

        Ok(rewritten)
    }
}

impl PluginInfo for CloudEventTransform {
    fn name(&self) -> &str {
        "cloudevent-transform"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Rewrites log record bodies into structured CloudEvents"
    }
}

#[async_trait]
impl LogsProcessor for CloudEventTransform {
    async fn process_logs(&self, mut batch: LogBatch) -> PluginResult<LogBatch> {
        self.transform(&mut batch)?;
        Ok(batch)
    }
}
