//! CloudEvent Export - HTTP delivery of envelopes
//!
//! - **Transport**: the send-a-request seam and its reqwest implementation
//! - **Delivery**: response classification and throttling retries
//! - **Dispatcher**: the queue consumer running one task per envelope
//! - **Exporter**: the [`LogsExporter`](cloudevent_core::LogsExporter) plugin

pub mod delivery;
pub mod dispatcher;
pub mod exporter;
pub mod stats;
pub mod transport;

pub use delivery::{classify, DeliveryWorker, RetryDecision};
pub use dispatcher::Dispatcher;
pub use exporter::CloudEventExporter;
pub use stats::{DeliveryStats, DeliveryStatsSnapshot};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Transport, TransportError};
