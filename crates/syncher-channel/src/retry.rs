//! Retry with exponential backoff for transient transport failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
use backoff::SystemClock;

use syncher_core::RecordId;

use crate::error::Result;
use crate::messages::{Reply, Request};
use crate::topics::{Subscription, SubscriptionId};
use crate::transport::Transport;

/// Backoff schedule for [`RetryTransport`].
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Exponential delays without jitter. The attempt count, not elapsed
    /// time, ends the retries.
    pub fn schedule(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Wraps a transport and retries [`crate::ChannelError::Unavailable`] failures.
///
/// Other errors, and the last transient error once attempts run out, are
/// returned unchanged.
pub struct RetryTransport<T> {
    inner: T,
    config: BackoffConfig,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, config: BackoffConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn with_retry<'a, F, Fut, R>(&'a self, what: &str, mut attempt: F) -> Result<R>
    where
        F: FnMut(&'a T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut schedule = self.config.schedule();
        let mut retry = 0;
        loop {
            match attempt(&self.inner).await {
                Err(err) if err.is_transient() && retry + 1 < attempts => {
                    let delay = schedule.next_backoff().unwrap_or(self.config.max_delay);
                    tracing::warn!(%err, what, retry, ?delay, "transient transport failure, retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::warn!(%err, what, attempts, "giving up after retries");
                    }
                    return Err(err);
                }
                ok => return ok,
            }
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn request(&self, request: Request) -> Result<Reply> {
        self.with_retry(request.name(), |inner| inner.request(request.clone()))
            .await
    }

    async fn subscribe(&self, record_id: &RecordId) -> Result<Subscription> {
        self.with_retry("subscribe", |inner| inner.subscribe(record_id))
            .await
    }

    async fn unsubscribe(&self, record_id: &RecordId, subscription: SubscriptionId) -> Result<()> {
        self.with_retry("unsubscribe", |inner| {
            inner.unsubscribe(record_id, subscription)
        })
        .await
    }
}
