//! Transport abstraction between instances and the sequencer.
//!
//! The sequencer itself implements [`Transport`] for in-process use;
//! [`crate::wire::WireClient`] implements it over a byte connection.

use std::sync::Arc;

use async_trait::async_trait;

use syncher_core::RecordId;

use crate::error::Result;
use crate::messages::{Reply, Request};
use crate::topics::{Subscription, SubscriptionId};

/// Request/reply plus topic membership for record ids.
///
/// Implementations must be thread-safe (Send + Sync). They report
/// [`crate::ChannelError::Unavailable`] only when the request was not
/// delivered, so that callers may retry it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request to the record's sequencer and await its reply.
    async fn request(&self, request: Request) -> Result<Reply>;

    /// Join the broadcast topic of `record_id`.
    async fn subscribe(&self, record_id: &RecordId) -> Result<Subscription>;

    /// Leave a topic joined with [`Transport::subscribe`].
    async fn unsubscribe(&self, record_id: &RecordId, subscription: SubscriptionId) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(&self, request: Request) -> Result<Reply> {
        (**self).request(request).await
    }

    async fn subscribe(&self, record_id: &RecordId) -> Result<Subscription> {
        (**self).subscribe(record_id).await
    }

    async fn unsubscribe(&self, record_id: &RecordId, subscription: SubscriptionId) -> Result<()> {
        (**self).unsubscribe(record_id, subscription).await
    }
}
