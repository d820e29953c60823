//! Topic fan-out: record id -> subscriber queues.
//!
//! Each subscription owns an unbounded queue so that publishing never waits
//! on a slow consumer. Closed queues are pruned on publish.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use syncher_core::RecordId;

use crate::messages::Broadcast;

/// Identifier of one subscription, unique within a [`Topics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// The receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    pub record_id: RecordId,
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<Broadcast>,
}

impl Subscription {
    /// Wait for the next broadcast; `None` once the topic side is gone.
    pub async fn recv(&mut self) -> Option<Broadcast> {
        self.receiver.recv().await
    }
}

/// Explicit map from record id to its subscriber set.
#[derive(Default)]
pub struct Topics {
    next_id: AtomicU64,
    topics: RwLock<HashMap<RecordId, HashMap<SubscriptionId, mpsc::UnboundedSender<Broadcast>>>>,
}

impl Topics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the topic of `record_id`.
    pub async fn subscribe(&self, record_id: &RecordId) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();

        self.topics
            .write()
            .await
            .entry(record_id.clone())
            .or_default()
            .insert(id, tx);

        tracing::debug!(record_id = %record_id, subscription = %id, "subscribed");
        Subscription {
            record_id: record_id.clone(),
            id,
            receiver: rx,
        }
    }

    /// Leave a topic. Returns whether the subscription existed.
    pub async fn unsubscribe(&self, record_id: &RecordId, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write().await;
        let Some(subscribers) = topics.get_mut(record_id) else {
            return false;
        };
        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            topics.remove(record_id);
        }
        if removed {
            tracing::debug!(record_id = %record_id, subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Deliver `broadcast` to every subscriber of its record id.
    ///
    /// Returns the number of queues it reached.
    pub async fn publish(&self, broadcast: &Broadcast) -> usize {
        let mut topics = self.topics.write().await;
        let Some(subscribers) = topics.get_mut(&broadcast.record_id) else {
            return 0;
        };

        subscribers.retain(|_, tx| tx.send(broadcast.clone()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            topics.remove(&broadcast.record_id);
        }

        tracing::trace!(
            record_id = %broadcast.record_id,
            seq = broadcast.seq,
            delivered,
            "published broadcast"
        );
        delivered
    }

    /// Drop every subscriber of `record_id`; their streams end.
    pub async fn close(&self, record_id: &RecordId) {
        self.topics.write().await.remove(record_id);
    }

    pub async fn subscriber_count(&self, record_id: &RecordId) -> usize {
        self.topics
            .read()
            .await
            .get(record_id)
            .map_or(0, HashMap::len)
    }
}
