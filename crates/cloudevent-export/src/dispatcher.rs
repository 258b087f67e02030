//! Queue consumer
//!
//! The dispatcher pulls envelopes in FIFO order and runs each delivery as
//! its own task. With a concurrency cap it waits for a free slot before
//! pulling the next envelope, which is what lets the queue fill up and push
//! back on producers.

use crate::delivery::DeliveryWorker;
use cloudevent_core::queue::QueueReceiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub struct Dispatcher {
    handle: JoinHandle<u64>,
}

impl Dispatcher {
    /// Start consuming `receiver`.
    ///
    /// `max_concurrent` of 0 means no cap on in-flight deliveries.
    pub fn spawn(receiver: QueueReceiver, worker: Arc<DeliveryWorker>, max_concurrent: usize) -> Self {
        let handle = tokio::spawn(run(receiver, worker, max_concurrent));
        Self { handle }
    }

    /// Wait for the dispatcher to drain the closed queue and finish every
    /// in-flight delivery. Outstanding work is aborted after `timeout`.
    ///
    /// Returns true if everything finished in time.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let mut handle = self.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(dispatched)) => {
                info!("Dispatcher stopped after {} deliveries", dispatched);
                true
            }
            Ok(Err(e)) => {
                warn!("Dispatcher task failed: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "Deliveries still in flight after {:?}, abandoning them",
                    timeout
                );
                handle.abort();
                false
            }
        }
    }
}

async fn run(mut receiver: QueueReceiver, worker: Arc<DeliveryWorker>, max_concurrent: usize) -> u64 {
    let slots = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
    let mut tasks = JoinSet::new();
    let mut dispatched = 0u64;

    debug!(max_concurrent, "Dispatcher started for {}", worker.endpoint());

    while let Some(envelope) = receiver.recv().await {
        let permit = match &slots {
            Some(slots) => match slots.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        let worker = worker.clone();
        tasks.spawn(async move {
            let _permit = permit;
            worker.deliver(envelope).await;
        });
        dispatched += 1;

        while let Some(result) = tasks.try_join_next() {
            reap(result);
        }
    }

    while let Some(result) = tasks.join_next().await {
        reap(result);
    }

    dispatched
}

fn reap(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            warn!("Delivery task panicked: {}", e);
        }
    }
}
