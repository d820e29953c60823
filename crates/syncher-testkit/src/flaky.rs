//! Fault injection for transports.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use syncher_channel::{
    ChannelError, Reply, Request, Result, Subscription, SubscriptionId, Transport,
};
use syncher_core::RecordId;

/// Wraps a transport and fails the next N requests with
/// [`ChannelError::Unavailable`] before they reach it.
pub struct FlakyTransport<T> {
    inner: T,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl<T: Transport> FlakyTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Make the next `n` requests fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Requests seen so far, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<T: Transport> Transport for FlakyTransport<T> {
    async fn request(&self, request: Request) -> Result<Reply> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(ChannelError::Unavailable("injected failure".into()));
        }
        self.inner.request(request).await
    }

    async fn subscribe(&self, record_id: &RecordId) -> Result<Subscription> {
        self.inner.subscribe(record_id).await
    }

    async fn unsubscribe(&self, record_id: &RecordId, subscription: SubscriptionId) -> Result<()> {
        self.inner.unsubscribe(record_id, subscription).await
    }
}
