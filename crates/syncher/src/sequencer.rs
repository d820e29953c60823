//! The broadcast sequencer: the single serialization point per record id.
//!
//! Every mutation is authorized, applied to the authoritative copy with a
//! compare-and-set on `version`, and broadcast to all subscribers of the id
//! (the originating instance included). A per-id FIFO lock keeps requests
//! for one id in arrival order, and broadcasts are published while that lock
//! is held, so subscribers observe them in sequence order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use syncher_auth::{Credential, Gate, Origin};
use syncher_channel::{
    Broadcast, BroadcastEvent, RejectCode, Reply, Request, Subscription, SubscriptionId, Topics,
    Transport,
};
use syncher_core::{LiveId, Operation, Record, RecordId, RESERVED_KEYS};
use syncher_store::{PutCondition, PutResult, Store};

use crate::config::SequencerConfig;
use crate::error::Result;

type IdLock = Arc<tokio::sync::Mutex<()>>;

/// Authoritative front of a [`Store`].
///
/// Implements [`Transport`] for in-process instances; put it behind
/// [`syncher_channel::serve`] for remote ones.
pub struct Sequencer<S: Store> {
    store: S,
    gate: Gate,
    topics: Topics,
    locks: Mutex<HashMap<RecordId, IdLock>>,
    config: SequencerConfig,
}

impl<S: Store> Sequencer<S> {
    pub fn new(store: S, config: SequencerConfig) -> Self {
        Self {
            store,
            gate: Gate::new(),
            topics: Topics::new(),
            locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Handle one request arriving from `origin`.
    ///
    /// Failures are reported as [`Reply::Rejected`]; this never errors.
    pub async fn handle(&self, request: Request, origin: Origin) -> Reply {
        let name = request.name();
        let record_id = request.record_id().clone();

        let reply = match request {
            Request::Create { record } => self.create(record).await,
            Request::Load { record_id } => self.load(&record_id).await,
            Request::Mutate {
                record_id,
                live_id,
                op_id,
                credential,
                op,
            } => {
                let _slot = self.acquire(&record_id).await;
                self.mutate(&record_id, live_id, op_id, &credential, &op, origin)
                    .await
            }
            Request::Destroy {
                record_id,
                live_id,
                credential,
            } => {
                let _slot = self.acquire(&record_id).await;
                self.destroy(&record_id, live_id, &credential, origin).await
            }
        };

        if let Reply::Rejected { code, message } = &reply {
            tracing::warn!(%record_id, request = name, ?code, %message, "request rejected");
        }
        reply
    }

    /// Hard-delete a record or tombstone, bypassing the gate.
    ///
    /// Subscribers of the id are dropped. Returns whether anything was stored.
    pub async fn purge(&self, record_id: &RecordId) -> Result<bool> {
        let removed = {
            let _slot = self.acquire(record_id).await;
            let removed = self.store.delete(record_id).await?;
            self.topics.close(record_id).await;
            removed
        };

        tracing::debug!(%record_id, removed, "record purged");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request handlers
    // ─────────────────────────────────────────────────────────────────────────

    async fn create(&self, mut record: Record) -> Reply {
        if let Some(key) = RESERVED_KEYS.iter().find(|k| record.data.contains_key(**k)) {
            return Reply::rejected(
                RejectCode::InvalidOperation,
                format!("field `{}` is reserved", key),
            );
        }
        record.version = 0;
        record.destroyed = false;

        match self.store.put(&record, PutCondition::IfAbsent).await {
            Ok(PutResult::Written) => {
                tracing::debug!(record_id = %record.id, "record created");
                Reply::Created { version: 0 }
            }
            Ok(PutResult::AlreadyExists) => Reply::rejected(
                RejectCode::AlreadyExists,
                format!("record {} already exists", record.id),
            ),
            Ok(other) => internal(format!("unexpected create result {:?}", other)),
            Err(err) => internal(err),
        }
    }

    async fn load(&self, record_id: &RecordId) -> Reply {
        match self.store.get(record_id).await {
            Ok(Some(record)) if !record.destroyed => {
                tracing::debug!(%record_id, version = record.version, "record loaded");
                Reply::Loaded {
                    snapshot: record.snapshot(),
                }
            }
            Ok(_) => not_found(record_id),
            Err(err) => internal(err),
        }
    }

    async fn mutate(
        &self,
        record_id: &RecordId,
        live_id: LiveId,
        op_id: u64,
        credential: &Credential,
        op: &Operation,
        origin: Origin,
    ) -> Reply {
        for attempt in 0..=self.config.cas_retries {
            let current = match self.authorized(record_id, credential, origin).await {
                Ok(record) => record,
                Err(reply) => return reply,
            };

            let mut next = current.clone();
            let diff = match op.apply(&mut next.data) {
                Ok(diff) => diff,
                Err(err) => return Reply::rejected(RejectCode::InvalidOperation, err.to_string()),
            };
            if diff.is_empty() {
                tracing::trace!(%record_id, op = %op.kind(), "mutation changed nothing");
                return Reply::Applied { broadcast: None };
            }
            next.version = current.version + 1;

            match self
                .store
                .put(&next, PutCondition::IfVersion(current.version))
                .await
            {
                Ok(PutResult::Written) => {
                    let broadcast = Broadcast {
                        record_id: record_id.clone(),
                        live_id,
                        seq: next.version,
                        event: BroadcastEvent::Update {
                            op: op.kind(),
                            op_id,
                            diff,
                        },
                    };
                    self.topics.publish(&broadcast).await;
                    tracing::trace!(%record_id, seq = next.version, op = %op.kind(), "mutation applied");
                    return Reply::Applied {
                        broadcast: Some(broadcast),
                    };
                }
                Ok(PutResult::VersionMismatch { current: stored }) => {
                    tracing::warn!(%record_id, attempt, expected = current.version, ?stored, "version conflict, retrying");
                }
                Ok(PutResult::AlreadyExists) => {
                    return internal("unexpected AlreadyExists on versioned write")
                }
                Err(err) => return internal(err),
            }
        }

        internal(format!(
            "record {} still contended after {} attempts",
            record_id,
            self.config.cas_retries + 1
        ))
    }

    async fn destroy(
        &self,
        record_id: &RecordId,
        live_id: LiveId,
        credential: &Credential,
        origin: Origin,
    ) -> Reply {
        for attempt in 0..=self.config.cas_retries {
            let current = match self.authorized(record_id, credential, origin).await {
                Ok(record) => record,
                Err(reply) => return reply,
            };

            let mut tombstone = current.clone();
            tombstone.tombstone();

            match self
                .store
                .put(&tombstone, PutCondition::IfVersion(current.version))
                .await
            {
                Ok(PutResult::Written) => {
                    let broadcast = Broadcast {
                        record_id: record_id.clone(),
                        live_id,
                        seq: tombstone.version,
                        event: BroadcastEvent::Destroy,
                    };
                    self.topics.publish(&broadcast).await;
                    self.topics.close(record_id).await;
                    tracing::debug!(%record_id, seq = tombstone.version, "record destroyed");
                    return Reply::Destroyed { broadcast };
                }
                Ok(PutResult::VersionMismatch { current: stored }) => {
                    tracing::warn!(%record_id, attempt, ?stored, "version conflict on destroy, retrying");
                }
                Ok(PutResult::AlreadyExists) => {
                    return internal("unexpected AlreadyExists on versioned write")
                }
                Err(err) => return internal(err),
            }
        }

        internal(format!("record {} still contended", record_id))
    }

    /// Fetch a live record and check the credential against it.
    async fn authorized(
        &self,
        record_id: &RecordId,
        credential: &Credential,
        origin: Origin,
    ) -> std::result::Result<Record, Reply> {
        let record = match self.store.get(record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(not_found(record_id)),
            Err(err) => return Err(internal(err)),
        };
        if record.destroyed {
            return Err(Reply::rejected(
                RejectCode::AlreadyDestroyed,
                format!("record {} was destroyed", record_id),
            ));
        }
        self.gate
            .authorize(&record, credential, origin)
            .map_err(|err| Reply::rejected(RejectCode::Unauthorized, err.to_string()))?;
        Ok(record)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Per-id locking
    // ─────────────────────────────────────────────────────────────────────────

    /// Wait for the id's lock. The returned slot releases it on drop, so a
    /// cancelled request never leaves a stale map entry behind.
    async fn acquire(&self, record_id: &RecordId) -> IdSlot<'_, S> {
        let mut slot = IdSlot {
            sequencer: self,
            record_id: record_id.clone(),
            lock: Some(self.lock_for(record_id)),
            held: None,
        };
        if let Some(lock) = slot.lock.as_ref().map(Arc::clone) {
            slot.held = Some(lock.lock_owned().await);
        }
        slot
    }

    fn lock_for(&self, record_id: &RecordId) -> IdLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(record_id.clone()).or_default())
    }

    /// Forget the lock of an id once nobody else holds or awaits it.
    fn release(&self, record_id: &RecordId, lock: IdLock) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks
            .get(record_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(record_id);
        }
    }
}

/// Membership in an id's lock queue, and the lock itself once acquired.
struct IdSlot<'a, S: Store> {
    sequencer: &'a Sequencer<S>,
    record_id: RecordId,
    lock: Option<IdLock>,
    held: Option<OwnedMutexGuard<()>>,
}

impl<S: Store> Drop for IdSlot<'_, S> {
    fn drop(&mut self) {
        drop(self.held.take());
        if let Some(lock) = self.lock.take() {
            self.sequencer.release(&self.record_id, lock);
        }
    }
}

fn not_found(record_id: &RecordId) -> Reply {
    Reply::rejected(RejectCode::NotFound, format!("record {} not found", record_id))
}

fn internal(err: impl ToString) -> Reply {
    Reply::rejected(RejectCode::Internal, err.to_string())
}

#[async_trait]
impl<S: Store> Transport for Sequencer<S> {
    async fn request(&self, request: Request) -> syncher_channel::Result<Reply> {
        Ok(self.handle(request, Origin::Local).await)
    }

    async fn subscribe(&self, record_id: &RecordId) -> syncher_channel::Result<Subscription> {
        Ok(self.topics.subscribe(record_id).await)
    }

    async fn unsubscribe(
        &self,
        record_id: &RecordId,
        subscription: SubscriptionId,
    ) -> syncher_channel::Result<()> {
        self.topics.unsubscribe(record_id, subscription).await;
        Ok(())
    }
}
