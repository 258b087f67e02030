//! Delivery of single envelopes
//!
//! A [`DeliveryWorker`] turns an envelope into a POST request, sends it via
//! the injected [`Transport`] and classifies the outcome:
//!
//! - transport error → permanent failure, no retry
//! - 2xx → success
//! - 429/503 with `Retry-After`, retry enabled → throttled
//! - anything else → permanent failure
//!
//! Outcomes are reported through logs and [`DeliveryStats`] only; nothing
//! flows back to the batch caller.

use crate::stats::DeliveryStats;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use cloudevent_core::config::{ExportSettings, RetrySettings};
use cloudevent_core::events::Envelope;
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::{Method, StatusCode, Uri};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Success,
    PermanentFailure(String),
    /// Sink asked us to back off for at least this long
    Throttled(Duration),
}

/// Classify the result of one send.
///
/// Throttling is only reported when `retry_enabled`; otherwise 429/503 are
/// permanent failures like any other non-2xx status.
pub fn classify(
    result: &Result<HttpResponse, TransportError>,
    endpoint: &str,
    retry_enabled: bool,
) -> RetryDecision {
    let response = match result {
        Ok(response) => response,
        Err(e) => return RetryDecision::PermanentFailure(e.to_string()),
    };

    let status = response.status();
    if status.is_success() {
        return RetryDecision::Success;
    }

    let is_throttle =
        status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE;
    if retry_enabled && is_throttle {
        if let Some(value) = response.headers().get(RETRY_AFTER) {
            return RetryDecision::Throttled(parse_retry_after(value));
        }
    }

    RetryDecision::PermanentFailure(format!(
        "error exporting items, request to {} responded with HTTP Status Code {}",
        endpoint,
        status.as_u16()
    ))
}

/// Integer seconds; anything else counts as zero
fn parse_retry_after(value: &HeaderValue) -> Duration {
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO)
}

/// Sends envelopes to one endpoint
pub struct DeliveryWorker {
    transport: Arc<dyn Transport>,
    endpoint: String,
    uri: Uri,
    static_headers: Vec<(HeaderName, HeaderValue)>,
    retry: RetrySettings,
    stats: Arc<DeliveryStats>,
}

impl DeliveryWorker {
    /// Build a worker for `settings.endpoint`.
    ///
    /// Fails if the endpoint or a static header cannot be used in a request.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: &ExportSettings,
        stats: Arc<DeliveryStats>,
    ) -> Result<Self, TransportError> {
        let uri: Uri = settings
            .endpoint
            .parse()
            .map_err(|e| TransportError::InvalidRequest(format!("endpoint: {}", e)))?;

        let mut static_headers = Vec::with_capacity(settings.headers.len());
        for (name, value) in &settings.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            static_headers.push((name, value));
        }

        Ok(Self {
            transport,
            endpoint: settings.endpoint.clone(),
            uri,
            static_headers,
            retry: settings.retry_on_failure.clone(),
            stats,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST request carrying the envelope body and its headers
    pub fn build_request(&self, envelope: &Envelope) -> Result<HttpRequest, TransportError> {
        let mut builder = http::Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone());

        for (name, value) in &self.static_headers {
            builder = builder.header(name, value);
        }
        for (name, value) in envelope.headers() {
            builder = builder.header(name, value);
        }

        Ok(builder.body(envelope.body.clone())?)
    }

    /// One send, classified
    pub async fn attempt(&self, envelope: &Envelope) -> RetryDecision {
        let request = match self.build_request(envelope) {
            Ok(request) => request,
            Err(e) => return RetryDecision::PermanentFailure(e.to_string()),
        };

        let result = self.transport.send(request).await;
        classify(&result, &self.endpoint, self.retry.enabled)
    }

    /// Deliver one envelope, re-attempting throttled sends while the retry
    /// policy allows. Returns the final decision.
    pub async fn deliver(&self, envelope: Envelope) -> RetryDecision {
        let mut attempt: u32 = 1;
        let mut backoff = self.retry.initial_interval();

        loop {
            let decision = self.attempt(&envelope).await;

            match &decision {
                RetryDecision::Success => {
                    self.stats.record_delivered();
                    debug!(id = %envelope.id, "Delivered event to {}", self.endpoint);
                    return decision;
                }
                RetryDecision::PermanentFailure(reason) => {
                    self.stats.record_failed();
                    error!(id = %envelope.id, "{}", reason);
                    return decision;
                }
                RetryDecision::Throttled(after) => {
                    self.stats.record_throttled();

                    if attempt >= self.retry.max_attempts {
                        self.stats.record_failed();
                        error!(
                            id = %envelope.id,
                            "Giving up on event after {} throttled attempts to {}",
                            attempt, self.endpoint
                        );
                        return decision;
                    }

                    let wait = (*after).max(backoff).min(self.retry.max_interval());
                    warn!(
                        id = %envelope.id,
                        "Sink {} throttled delivery (attempt {}), retrying in {:?}",
                        self.endpoint, attempt, wait
                    );

                    tokio::time::sleep(wait).await;
                    backoff = (backoff * 2).min(self.retry.max_interval());
                    attempt += 1;
                    self.stats.record_retried();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cloudevent_core::events::{CeIdentity, EnvelopeBuilder, EnvelopeMode, EventRecord};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a script, recording every request
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(response(200, None)))
        }
    }

    fn response(status: u16, retry_after: Option<&str>) -> HttpResponse {
        let mut builder = http::Response::builder().status(status);
        if let Some(value) = retry_after {
            builder = builder.header(RETRY_AFTER, value);
        }
        builder.body(Vec::new()).unwrap()
    }

    fn envelope() -> Envelope {
        let builder = EnvelopeBuilder::new(
            CeIdentity::new("/catalog/job", "1.0", "com.example.job"),
            EnvelopeMode::Binary,
        );
        builder.build(&EventRecord {
            reason: "Created".to_string(),
            name: "job-1".to_string(),
            namespace: "batch".to_string(),
            count: 1,
            start_time: "2024-03-01T10:00:00Z".to_string(),
            correlation_id: "abcdefgh".to_string(),
            message: "hello".to_string(),
        })
    }

    fn settings(retry_enabled: bool) -> ExportSettings {
        ExportSettings {
            endpoint: "http://sink.local/events".to_string(),
            retry_on_failure: RetrySettings {
                enabled: retry_enabled,
                initial_interval_ms: 100,
                max_interval_ms: 1_000,
                max_attempts: 3,
            },
            ..Default::default()
        }
    }

    fn worker(transport: Arc<ScriptedTransport>, retry_enabled: bool) -> (DeliveryWorker, Arc<DeliveryStats>) {
        let stats = Arc::new(DeliveryStats::new());
        let worker = DeliveryWorker::new(transport, &settings(retry_enabled), stats.clone()).unwrap();
        (worker, stats)
    }

    #[test]
    fn test_classify_success() {
        for status in [200, 201, 202, 299] {
            assert_eq!(
                classify(&Ok(response(status, None)), "http://x", false),
                RetryDecision::Success
            );
        }
    }

    #[test]
    fn test_classify_transport_error() {
        let result = Err(TransportError::Other("connection reset".to_string()));
        assert!(matches!(
            classify(&result, "http://x", true),
            RetryDecision::PermanentFailure(reason) if reason.contains("connection reset")
        ));
    }

    #[test]
    fn test_classify_throttling() {
        assert_eq!(
            classify(&Ok(response(429, Some("30"))), "http://x", true),
            RetryDecision::Throttled(Duration::from_secs(30))
        );
        assert_eq!(
            classify(&Ok(response(503, Some("2"))), "http://x", true),
            RetryDecision::Throttled(Duration::from_secs(2))
        );
        // HTTP-date and garbage values count as zero
        assert_eq!(
            classify(
                &Ok(response(429, Some("Wed, 21 Oct 2015 07:28:00 GMT"))),
                "http://x",
                true
            ),
            RetryDecision::Throttled(Duration::ZERO)
        );
    }

    #[test]
    fn test_classify_throttling_needs_retry_and_header() {
        assert!(matches!(
            classify(&Ok(response(429, Some("30"))), "http://x", false),
            RetryDecision::PermanentFailure(_)
        ));
        assert!(matches!(
            classify(&Ok(response(503, None)), "http://x", true),
            RetryDecision::PermanentFailure(_)
        ));
    }

    #[test]
    fn test_classify_other_status() {
        let decision = classify(&Ok(response(400, Some("5"))), "http://sink/events", true);
        assert_eq!(
            decision,
            RetryDecision::PermanentFailure(
                "error exporting items, request to http://sink/events responded with HTTP Status Code 400"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_build_request_headers() {
        let (worker, _) = worker(ScriptedTransport::new(vec![]), false);
        let request = worker.build_request(&envelope()).unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://sink.local/events");
        let headers = request.headers();
        assert_eq!(headers["Ce-Id"], "abcdefgh");
        assert_eq!(headers["Ce-Type"], "com.example.job.v1.Created");
        assert_eq!(headers["Ce-Source"], "/catalog/job");
        assert_eq!(headers["Ce-Specversion"], "1.0");
        assert_eq!(headers["Content-Type"], "application/json");
        assert_eq!(request.body(), &envelope().body);
    }

    #[test]
    fn test_static_headers() {
        let mut settings = settings(false);
        settings.headers.insert("X-Tenant".to_string(), "blue".to_string());
        let worker = DeliveryWorker::new(
            ScriptedTransport::new(vec![]),
            &settings,
            Arc::new(DeliveryStats::new()),
        )
        .unwrap();

        let request = worker.build_request(&envelope()).unwrap();
        assert_eq!(request.headers()["X-Tenant"], "blue");

        settings.headers.insert("bad header".to_string(), "x".to_string());
        assert!(DeliveryWorker::new(
            ScriptedTransport::new(vec![]),
            &settings,
            Arc::new(DeliveryStats::new())
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_deliver_success() {
        let transport = ScriptedTransport::new(vec![Ok(response(204, None))]);
        let (worker, stats) = worker(transport.clone(), false);

        assert_eq!(worker.deliver(envelope()).await, RetryDecision::Success);
        assert_eq!(transport.sent(), 1);
        assert_eq!(stats.snapshot().delivered, 1);
        assert_eq!(stats.snapshot().failed, 0);
    }

    #[tokio::test]
    async fn test_deliver_without_retry_does_not_resend() {
        let transport = ScriptedTransport::new(vec![Ok(response(429, Some("1")))]);
        let (worker, stats) = worker(transport.clone(), false);

        assert!(matches!(
            worker.deliver(envelope()).await,
            RetryDecision::PermanentFailure(_)
        ));
        assert_eq!(transport.sent(), 1);
        assert_eq!(stats.snapshot().failed, 1);
        assert_eq!(stats.snapshot().throttled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_retries_throttled() {
        let transport = ScriptedTransport::new(vec![
            Ok(response(429, Some("0"))),
            Ok(response(503, Some("2"))),
            Ok(response(200, None)),
        ]);
        let (worker, stats) = worker(transport.clone(), true);

        let started = tokio::time::Instant::now();
        assert_eq!(worker.deliver(envelope()).await, RetryDecision::Success);

        // 100ms backoff, then max(2s, 200ms) capped at 1s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1_100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1_200), "{:?}", elapsed);
        assert_eq!(transport.sent(), 3);

        let snap = stats.snapshot();
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.throttled, 2);
        assert_eq!(snap.retried, 2);
        assert_eq!(snap.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_gives_up_after_max_attempts() {
        let transport = ScriptedTransport::new(vec![
            Ok(response(429, Some("0"))),
            Ok(response(429, Some("0"))),
            Ok(response(429, Some("0"))),
            Ok(response(200, None)),
        ]);
        let (worker, stats) = worker(transport.clone(), true);

        assert_eq!(
            worker.deliver(envelope()).await,
            RetryDecision::Throttled(Duration::ZERO)
        );
        assert_eq!(transport.sent(), 3);
        assert_eq!(stats.snapshot().failed, 1);
        assert_eq!(stats.snapshot().delivered, 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Other(
            "connection refused".to_string(),
        ))]);
        let (worker, stats) = worker(transport.clone(), true);

        assert!(matches!(
            worker.deliver(envelope()).await,
            RetryDecision::PermanentFailure(_)
        ));
        assert_eq!(transport.sent(), 1);
        assert_eq!(stats.snapshot().failed, 1);
    }
}
