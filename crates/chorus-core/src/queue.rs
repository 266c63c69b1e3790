//! In-process at-least-once topics.
//!
//! A topic pairs a cloneable publisher with a single subscription. A handler
//! that returns an error gets the same payload again after a backoff, until
//! `max_attempts` is reached, so handlers must tolerate duplicates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::QueueConfig;
use crate::error::ChorusError;

struct Delivery<T> {
    payload: T,
    attempt: u32,
}

/// Publishing side of a topic.
pub struct Topic<T> {
    name: Arc<str>,
    tx: mpsc::Sender<Delivery<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> Topic<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a payload. Waits for capacity; fails once the subscriber is gone.
    pub async fn publish(&self, payload: T) -> Result<(), ChorusError> {
        self.tx
            .send(Delivery {
                payload,
                attempt: 1,
            })
            .await
            .map_err(|_| ChorusError::Queue(format!("{} is closed", self.name)))
    }
}

/// Consuming side of a topic.
pub struct Subscription<T> {
    name: Arc<str>,
    rx: mpsc::Receiver<Delivery<T>>,
    retry: mpsc::WeakSender<Delivery<T>>,
    max_attempts: u32,
    backoff: Duration,
    workers: usize,
}

/// Create a named topic.
pub fn topic<T: Send + 'static>(name: &str, config: &QueueConfig) -> (Topic<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let name: Arc<str> = Arc::from(name);
    let subscription = Subscription {
        name: name.clone(),
        rx,
        retry: tx.downgrade(),
        max_attempts: config.max_attempts.max(1),
        backoff: Duration::from_millis(config.retry_backoff_ms),
        workers: config.workers.max(1),
    };
    (Topic { name, tx }, subscription)
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Consume deliveries until `shutdown` fires or every publisher is dropped.
    ///
    /// Up to `workers` handler invocations run concurrently. In-flight
    /// handlers are awaited before returning.
    pub async fn run<F, Fut>(mut self, handler: F, shutdown: CancellationToken)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ChorusError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let permits = Arc::new(Semaphore::new(self.workers));

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(d) => d,
                    None => break,
                },
            };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };

            let handler = handler.clone();
            let retry = self.retry.clone();
            let name = self.name.clone();
            let max_attempts = self.max_attempts;
            let backoff = self.backoff;

            tokio::spawn(async move {
                let _permit = permit;
                let Delivery { payload, attempt } = delivery;
                let Err(e) = handler(payload.clone()).await else {
                    return;
                };

                if attempt >= max_attempts {
                    error!("{name}: dropping delivery after {attempt} attempts: {e}");
                    return;
                }
                warn!("{name}: attempt {attempt}/{max_attempts} failed, redelivering: {e}");

                tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    let Some(tx) = retry.upgrade() else {
                        debug!("{name}: topic closed, redelivery dropped");
                        return;
                    };
                    let next = Delivery {
                        payload,
                        attempt: attempt + 1,
                    };
                    if tx.send(next).await.is_err() {
                        debug!("{name}: subscription gone, redelivery dropped");
                    }
                });
            });
        }

        let _ = permits.acquire_many(self.workers as u32).await;
        debug!("{}: subscription stopped", self.name);
    }
}
