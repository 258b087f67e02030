//! Batch pipeline - orchestrates filter → extract → build → enqueue

use crate::events::{Envelope, EnvelopeBuilder, EventRecord, ValidationError};
use crate::filter::ReasonFilter;
use crate::logs::LogBatch;
use crate::queue::QueueError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Batch processing failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Destination for built envelopes
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    /// Hand over one envelope, waiting if the sink is full
    async fn submit(&self, envelope: Envelope) -> Result<(), QueueError>;
}

/// The per-batch pipeline.
///
/// Holds only immutable state, so one instance can serve concurrent batch
/// calls and several instances can coexist without interfering.
#[derive(Clone)]
pub struct Pipeline {
    filter: Arc<ReasonFilter>,
    builder: Arc<EnvelopeBuilder>,
    sink: Arc<dyn EnvelopeSink>,
}

impl Pipeline {
    pub fn new(filter: ReasonFilter, builder: EnvelopeBuilder, sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            filter: Arc::new(filter),
            builder: Arc::new(builder),
            sink,
        }
    }

    pub fn filter(&self) -> &ReasonFilter {
        &self.filter
    }

    pub fn builder(&self) -> &EnvelopeBuilder {
        &self.builder
    }

    /// Filter the batch in place, then build and enqueue one envelope per
    /// surviving record in batch order.
    ///
    /// Fails fast on the first record that does not validate. Envelopes
    /// enqueued before that record stay enqueued. Returns the number of
    /// envelopes enqueued.
    pub async fn process(&self, batch: &mut LogBatch) -> Result<usize, PipelineError> {
        let dropped = self.filter.apply(batch);
        if dropped > 0 {
            debug!("Filtered out {} log records by reason", dropped);
        }

        let mut enqueued = 0;
        for record in batch.records() {
            let event = EventRecord::extract(record)?;
            let envelope = self.builder.build(&event);

            trace!(id = %envelope.id, ce_type = %envelope.ce_type, "Enqueueing envelope");
            self.sink.submit(envelope).await?;
            enqueued += 1;
        }

        Ok(enqueued)
    }
}
