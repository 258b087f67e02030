//! Bounded delivery queue
//!
//! The queue is the only place the producing side may suspend: `enqueue`
//! waits for capacity. Closing the queue releases any waiting producer with
//! [`QueueError::Closed`]; envelopes already buffered are still handed to
//! the receiver.

use crate::events::Envelope;
use crate::pipeline::EnvelopeSink;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("delivery queue is closed")]
    Closed,
}

/// Producer handle; cheap to clone
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<Envelope>,
    closed: Arc<watch::Sender<bool>>,
}

/// Consumer half, owned by the dispatcher
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Envelope>,
    closed: watch::Receiver<bool>,
    draining: bool,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` envelopes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn bounded(capacity: usize) -> (DeliveryQueue, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = watch::channel(false);

        (
            DeliveryQueue {
                tx,
                closed: Arc::new(closed_tx),
            },
            QueueReceiver {
                rx,
                closed: closed_rx,
                draining: false,
            },
        )
    }

    /// Wait for room and push an envelope
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), QueueError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(QueueError::Closed);
        }

        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(QueueError::Closed),
            sent = self.tx.send(envelope) => sent.map_err(|_| QueueError::Closed),
        }
    }

    /// Stop accepting envelopes. Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!("Delivery queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Envelopes currently buffered
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueReceiver {
    /// Next envelope in FIFO order.
    ///
    /// Returns `None` once the queue is closed and the buffer is drained,
    /// or once every producer handle is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if !self.draining {
            tokio::select! {
                biased;
                envelope = self.rx.recv() => return envelope,
                _ = self.closed.wait_for(|closed| *closed) => {}
            }

            self.rx.close();
            self.draining = true;
        }

        self.rx.recv().await
    }
}

#[async_trait]
impl EnvelopeSink for DeliveryQueue {
    async fn submit(&self, envelope: Envelope) -> Result<(), QueueError> {
        self.enqueue(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CeIdentity, EnvelopeMode};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready_ok};

    fn envelope(id: &str) -> Envelope {
        Envelope {
            id: id.to_string(),
            ce_type: "com.example.job.v1.Created".to_string(),
            mode: EnvelopeMode::Binary,
            identity: Arc::new(CeIdentity::new("/src", "1.0", "com.example.job")),
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut rx) = DeliveryQueue::bounded(4);
        for id in ["a", "b", "c"] {
            queue.enqueue(envelope(id)).await.unwrap();
        }
        assert_eq!(queue.len(), 3);

        for id in ["a", "b", "c"] {
            assert_eq!(rx.recv().await.unwrap().id, id);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_waits_for_dequeue() {
        let (queue, mut rx) = DeliveryQueue::bounded(1);
        queue.enqueue(envelope("first")).await.unwrap();

        let mut second = tokio_test::task::spawn(queue.enqueue(envelope("second")));
        assert_pending!(second.poll());

        assert_eq!(rx.recv().await.unwrap().id, "first");
        assert!(second.is_woken());
        assert_ready_ok!(second.poll());

        assert_eq!(rx.recv().await.unwrap().id, "second");
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let (queue, _rx) = DeliveryQueue::bounded(1);
        queue.enqueue(envelope("first")).await.unwrap();

        let blocked = timeout(Duration::from_millis(50), queue.enqueue(envelope("x"))).await;
        assert!(blocked.is_err(), "enqueue on a full queue should wait");

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(envelope("second")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        queue.close();

        let result = timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should be released by close")
            .unwrap();
        assert_eq!(result, Err(QueueError::Closed));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let (queue, _rx) = DeliveryQueue::bounded(2);
        queue.close();
        queue.close();
        assert_eq!(
            queue.enqueue(envelope("late")).await,
            Err(QueueError::Closed)
        );
    }

    #[tokio::test]
    async fn test_buffered_envelopes_drain_after_close() {
        let (queue, mut rx) = DeliveryQueue::bounded(4);
        queue.enqueue(envelope("a")).await.unwrap();
        queue.enqueue(envelope("b")).await.unwrap();
        queue.close();

        assert_eq!(rx.recv().await.unwrap().id, "a");
        assert_eq!(rx.recv().await.unwrap().id, "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_receiver_dropped() {
        let (queue, rx) = DeliveryQueue::bounded(1);
        drop(rx);
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(envelope("x")).await, Err(QueueError::Closed));
    }
}
