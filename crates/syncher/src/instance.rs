//! The Syncher instance: an optimistic local cache of one record.
//!
//! Mutations apply to the cache synchronously and emit `update` before any
//! I/O, so callers always read their own writes. A filled instance then
//! forwards the operation to the sequencer, tagged with a per-instance op id,
//! and keeps it queued until its echo arrives.
//!
//! Broadcasts land on a canonical copy of the data; the visible data is that
//! copy with the queued operations replayed on top. Remote diffs emit
//! `remoteupdate` then `update`. An echo of the instance's own op emits
//! `update` only when the canonical outcome changes what callers see.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::task::JoinHandle;

use syncher_auth::Credential;
use syncher_channel::{Broadcast, BroadcastEvent, Reply, Request, SubscriptionId, Transport};
use syncher_core::{
    project, split_reserved, CoreError, Data, Diff, LiveId, Operation, Record, RecordId, Secret,
};

use crate::config::SyncherConfig;
use crate::error::{Result, SyncherError};
use crate::events::{Event, EventKind, ListenerId, Listeners};

/// Lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unfilled,
    Filled,
    Destroyed,
}

struct Local {
    /// What callers see: `confirmed` with every pending operation replayed.
    data: Data,
    /// Canonical data assembled from the snapshot and applied broadcasts.
    confirmed: Data,
    /// Forwarded operations whose echo has not been applied yet, oldest first.
    pending: Vec<Pending>,
    next_op: u64,
    /// Sequence number each field of `confirmed` was last written at.
    versions: HashMap<String, u64>,
    /// Version of the snapshot `confirmed` started from.
    base: u64,
    secret: Secret,
    status: Status,
    private: bool,
    /// Highest broadcast sequence applied.
    last_seq: u64,
}

struct Pending {
    id: u64,
    op: Operation,
}

impl Local {
    fn new(data: Data, secret: Secret, private: bool) -> Self {
        Local {
            confirmed: data.clone(),
            data,
            pending: Vec::new(),
            next_op: 1,
            versions: HashMap::new(),
            base: 0,
            secret,
            status: Status::Unfilled,
            private,
            last_seq: 0,
        }
    }

    fn credential(&self) -> Credential {
        if self.private {
            Credential::Private
        } else {
            Credential::Secret(self.secret.clone())
        }
    }

    /// Start over from an authoritative snapshot.
    fn reset(&mut self, data: Data, version: u64) {
        self.confirmed = data.clone();
        self.data = data;
        self.pending.clear();
        self.versions.clear();
        self.base = version;
        self.last_seq = self.last_seq.max(version);
    }

    /// Write the fields of `diff` that are newer than what `confirmed`
    /// holds. Returns the fields written.
    fn absorb(&mut self, seq: u64, diff: Diff) -> Diff {
        let mut written = Diff::new();
        for (key, value) in diff {
            let at = self.versions.get(&key).copied().unwrap_or(self.base);
            if seq <= at {
                continue;
            }
            self.versions.insert(key.clone(), seq);
            if value.is_null() {
                self.confirmed.remove(&key);
            } else {
                self.confirmed.insert(key.clone(), value.clone());
            }
            written.insert(key, value);
        }
        self.last_seq = self.last_seq.max(seq);
        written
    }

    /// Rebuild `data` from `confirmed` and the pending operations. Returns
    /// the fields whose visible value changed, removed fields as `null`.
    fn rebase(&mut self) -> Diff {
        let mut next = self.confirmed.clone();
        for pending in &self.pending {
            // A remote change can invalidate a queued op; its echo settles it.
            let _ = pending.op.apply(&mut next);
        }
        let changed = changes(&self.data, &next);
        self.data = next;
        changed
    }
}

/// State shared with the pump task.
struct Shared {
    id: RecordId,
    live_id: LiveId,
    local: Mutex<Local>,
    listeners: Mutex<Listeners>,
}

impl Shared {
    fn local(&self) -> MutexGuard<'_, Local> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to matching listeners, outside every lock.
    fn emit(&self, event: Event) {
        let listeners = self.listeners().matching(&event);
        for listener in listeners {
            listener(&event);
        }
    }

    /// Apply one broadcast. Returns `true` once the record is destroyed.
    ///
    /// Broadcasts may arrive twice (pump and reply) and out of order; fields
    /// only move forward in sequence.
    fn apply_broadcast(&self, broadcast: Broadcast) -> bool {
        let own = broadcast.live_id == self.live_id;
        let (events, destroyed) = {
            let mut local = self.local();
            let events = match broadcast.event {
                BroadcastEvent::Destroy => {
                    local.last_seq = local.last_seq.max(broadcast.seq);
                    if local.status == Status::Destroyed {
                        Vec::new()
                    } else {
                        local.status = Status::Destroyed;
                        vec![Event::Destroy]
                    }
                }
                BroadcastEvent::Update { .. } if local.status == Status::Destroyed => Vec::new(),
                BroadcastEvent::Update { op_id, diff, .. } if own => {
                    local.absorb(broadcast.seq, diff);
                    local.pending.retain(|pending| pending.id != op_id);
                    let changed = local.rebase();
                    if changed.is_empty() {
                        Vec::new()
                    } else {
                        vec![Event::Update(changed)]
                    }
                }
                BroadcastEvent::Update { diff, .. } => {
                    let written = local.absorb(broadcast.seq, diff);
                    if written.is_empty() {
                        tracing::trace!(record_id = %self.id, seq = broadcast.seq, "dropping stale broadcast");
                        Vec::new()
                    } else {
                        let mut changed = local.rebase();
                        for key in written.keys() {
                            let value = local.data.get(key).cloned().unwrap_or(Value::Null);
                            changed.insert(key.clone(), value);
                        }
                        vec![Event::RemoteUpdate(written), Event::Update(changed)]
                    }
                }
            };
            (events, local.status == Status::Destroyed)
        };

        tracing::trace!(
            record_id = %self.id,
            seq = broadcast.seq,
            echo = own,
            events = events.len(),
            "applied broadcast"
        );
        for event in events {
            self.emit(event);
        }
        destroyed
    }

    /// Stop replaying a forwarded op that will never echo.
    fn forget(&self, op_id: u64) {
        self.local().pending.retain(|pending| pending.id != op_id);
    }
}

/// Fields of `after` that differ from `before`, removed fields as `null`.
fn changes(before: &Data, after: &Data) -> Diff {
    let mut diff: Diff = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for key in before.keys() {
        if !after.contains_key(key) {
            diff.insert(key.clone(), Value::Null);
        }
    }
    diff
}

struct Pump {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

/// A live, locally cached view of one record.
pub struct Syncher<T: Transport + 'static> {
    shared: Arc<Shared>,
    transport: Arc<T>,
    config: SyncherConfig,
    pump: Mutex<Option<Pump>>,
}

/// Builder for [`Syncher`].
pub struct SyncherBuilder<T: Transport + 'static> {
    transport: Arc<T>,
    id: Option<RecordId>,
    secret: Option<Secret>,
    data: Value,
    private: bool,
    config: SyncherConfig,
}

impl<T: Transport + 'static> SyncherBuilder<T> {
    pub fn id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn secret(mut self, secret: impl Into<Secret>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Initial data as a JSON object. `id` and `secret` fields are lifted
    /// out unless set explicitly on the builder.
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn config(mut self, config: SyncherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Syncher<T>> {
        let data = match self.data {
            Value::Object(map) => map,
            Value::Null => Data::new(),
            _ => return Err(CoreError::NotAnObject.into()),
        };
        let (lifted_id, lifted_secret, data) = split_reserved(data)?;

        let id = self.id.or(lifted_id).unwrap_or_else(RecordId::random);
        let secret = self.secret.or(lifted_secret).unwrap_or_else(Secret::random);
        let live_id = LiveId::random();
        tracing::debug!(record_id = %id, %live_id, "instance constructed");

        Ok(Syncher {
            shared: Arc::new(Shared {
                id,
                live_id,
                local: Mutex::new(Local::new(data, secret, self.private)),
                listeners: Mutex::new(Listeners::default()),
            }),
            transport: self.transport,
            config: self.config,
            pump: Mutex::new(None),
        })
    }
}

impl<T: Transport + 'static> Syncher<T> {
    pub fn builder(transport: Arc<T>) -> SyncherBuilder<T> {
        SyncherBuilder {
            transport,
            id: None,
            secret: None,
            data: Value::Object(Data::new()),
            private: false,
            config: SyncherConfig::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &RecordId {
        &self.shared.id
    }

    pub fn live_id(&self) -> LiveId {
        self.shared.live_id
    }

    pub fn status(&self) -> Status {
        self.shared.local().status
    }

    pub fn is_filled(&self) -> bool {
        self.status() == Status::Filled
    }

    pub fn is_destroyed(&self) -> bool {
        self.status() == Status::Destroyed
    }

    pub fn is_private(&self) -> bool {
        self.shared.local().private
    }

    pub fn set_private(&self, private: bool) {
        self.shared.local().private = private;
    }

    pub fn set_secret(&self, secret: impl Into<Secret>) {
        self.shared.local().secret = secret.into();
    }

    /// Whether a pump task is applying broadcasts.
    pub fn is_synched(&self) -> bool {
        self.pump_slot()
            .as_ref()
            .is_some_and(|pump| !pump.task.is_finished())
    }

    /// Copy of the local data. Never contains the secret.
    pub fn get(&self) -> Data {
        self.shared.local().data.clone()
    }

    pub fn get_key(&self, key: &str) -> Option<Value> {
        self.shared.local().data.get(key).cloned()
    }

    /// Local data plus `id`, without `secret`.
    pub fn json(&self) -> Value {
        project(&self.shared.id, &self.shared.local().data)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Call `listener` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.listeners().add(Some(kind), Arc::new(listener))
    }

    /// Call `listener` for every event.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.listeners().add(None, Arc::new(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.listeners().remove(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist the local data as a new record.
    pub async fn create(&self) -> Result<()> {
        let record = {
            let local = self.shared.local();
            match local.status {
                Status::Unfilled => {}
                Status::Filled => {
                    return Err(SyncherError::InvalidState(format!(
                        "record {} is already filled",
                        self.shared.id
                    )))
                }
                Status::Destroyed => return Err(self.destroyed_error()),
            }
            Record::new(self.shared.id.clone(), local.secret.clone(), local.data.clone())
        };

        match self.transport.request(Request::Create { record }).await? {
            Reply::Created { version } => {
                {
                    let mut local = self.shared.local();
                    let data = local.data.clone();
                    local.reset(data, version);
                    local.status = Status::Filled;
                }
                tracing::debug!(record_id = %self.shared.id, "instance created record");
                self.shared.emit(Event::Create);
                Ok(())
            }
            other => Err(self.unexpected(other)),
        }
    }

    /// Replace the local data with the authoritative copy.
    pub async fn load(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(self.destroyed_error());
        }
        let attempts = self.config.load_attempts.max(1);

        for attempt in 1..=attempts {
            let request = Request::Load {
                record_id: self.shared.id.clone(),
            };
            let snapshot = match self.transport.request(request).await? {
                Reply::Loaded { snapshot } => snapshot,
                other => return Err(self.unexpected(other)),
            };

            {
                let mut local = self.shared.local();
                if local.status == Status::Destroyed {
                    return Err(self.destroyed_error());
                }
                if snapshot.version < local.last_seq {
                    tracing::debug!(
                        record_id = %self.shared.id,
                        version = snapshot.version,
                        last_seq = local.last_seq,
                        attempt,
                        "stale snapshot"
                    );
                    if attempt < attempts {
                        continue;
                    }
                    break;
                }
                local.reset(snapshot.data, snapshot.version);
                local.status = Status::Filled;
            }

            tracing::debug!(record_id = %self.shared.id, version = snapshot.version, "instance loaded");
            self.shared.emit(Event::Load);
            return Ok(());
        }

        Err(SyncherError::InvalidState(format!(
            "record {} kept changing during load",
            self.shared.id
        )))
    }

    /// Destroy the record. Terminal for every instance of it.
    pub async fn destroy(&self) -> Result<()> {
        let credential = {
            let local = self.shared.local();
            match local.status {
                Status::Filled => local.credential(),
                Status::Unfilled => {
                    return Err(SyncherError::InvalidState(format!(
                        "record {} is not filled",
                        self.shared.id
                    )))
                }
                Status::Destroyed => return Err(self.destroyed_error()),
            }
        };

        let request = Request::Destroy {
            record_id: self.shared.id.clone(),
            live_id: self.shared.live_id,
            credential,
        };
        match self.transport.request(request).await? {
            Reply::Destroyed { broadcast } => {
                let first = {
                    let mut local = self.shared.local();
                    let first = local.status != Status::Destroyed;
                    local.status = Status::Destroyed;
                    local.last_seq = local.last_seq.max(broadcast.seq);
                    first
                };
                if let Err(err) = self.synch(false).await {
                    tracing::warn!(record_id = %self.shared.id, %err, "unsubscribe after destroy failed");
                }
                tracing::debug!(record_id = %self.shared.id, "instance destroyed record");
                if first {
                    self.shared.emit(Event::Destroy);
                }
                Ok(())
            }
            other => Err(self.unexpected(other)),
        }
    }

    /// Join (`true`) or leave (`false`) the record's broadcast topic.
    pub async fn synch(&self, enable: bool) -> Result<()> {
        if !enable {
            let pump = self.pump_slot().take();
            if let Some(pump) = pump {
                pump.task.abort();
                self.transport
                    .unsubscribe(&self.shared.id, pump.subscription)
                    .await?;
                tracing::debug!(record_id = %self.shared.id, "instance unsynched");
            }
            return Ok(());
        }

        if self.is_synched() {
            return Ok(());
        }
        if self.is_destroyed() {
            return Err(self.destroyed_error());
        }

        let mut subscription = self.transport.subscribe(&self.shared.id).await?;
        let subscription_id = subscription.id;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(broadcast) = subscription.recv().await {
                if shared.apply_broadcast(broadcast) {
                    break;
                }
            }
        });

        let previous = self.pump_slot().replace(Pump {
            subscription: subscription_id,
            task,
        });
        if let Some(previous) = previous {
            previous.task.abort();
            self.transport
                .unsubscribe(&self.shared.id, previous.subscription)
                .await?;
        }
        tracing::debug!(record_id = %self.shared.id, subscription = %subscription_id, "instance synched");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Shallow update; `null` deletes a field.
    pub async fn update(&self, patch: Value) -> Result<Diff> {
        self.mutate(Operation::update(patch)?).await
    }

    pub async fn update_key(&self, key: impl Into<String>, value: Value) -> Result<Diff> {
        self.mutate(Operation::Update {
            patch: single(key, value),
        })
        .await
    }

    /// Recursive structural merge.
    pub async fn merge(&self, patch: Value) -> Result<Diff> {
        self.mutate(Operation::merge(patch)?).await
    }

    pub async fn merge_key(&self, key: impl Into<String>, value: Value) -> Result<Diff> {
        self.mutate(Operation::Merge {
            patch: single(key, value),
        })
        .await
    }

    /// Append `values` to the array at `key`, creating it if absent.
    pub async fn push(&self, key: impl Into<String>, values: Vec<Value>) -> Result<Diff> {
        self.mutate(Operation::Push {
            key: key.into(),
            values,
        })
        .await
    }

    /// Remove every element equal to one of `values`.
    pub async fn pull(&self, key: impl Into<String>, values: Vec<Value>) -> Result<Diff> {
        self.mutate(Operation::Pull {
            key: key.into(),
            values,
        })
        .await
    }

    /// Remove every element whose `id` is one of `ids`.
    pub async fn pull_by_id(&self, key: impl Into<String>, ids: Vec<Value>) -> Result<Diff> {
        self.mutate(Operation::PullById {
            key: key.into(),
            ids,
        })
        .await
    }

    /// Merge `patch` into the element whose `id` equals `patch.id`.
    pub async fn merge_by_id(&self, key: impl Into<String>, patch: Value) -> Result<Diff> {
        self.mutate(Operation::merge_by_id(key, patch)?).await
    }

    /// Append to several arrays at once: each field of `patch` names an
    /// array, its value the element (or array of elements) to push.
    pub async fn push_patch(&self, patch: Value) -> Result<Diff> {
        self.mutate_each(Operation::pushes(patch)?).await
    }

    /// Pull from several arrays at once, read like [`Syncher::push_patch`].
    pub async fn pull_patch(&self, patch: Value) -> Result<Diff> {
        self.mutate_each(Operation::pulls(patch)?).await
    }

    /// Pull by id from several arrays at once.
    pub async fn pull_by_id_patch(&self, patch: Value) -> Result<Diff> {
        self.mutate_each(Operation::pulls_by_id(patch)?).await
    }

    /// Run `ops` in order after checking all of them against the local
    /// data. Returns the combined diff.
    async fn mutate_each(&self, ops: Vec<Operation>) -> Result<Diff> {
        {
            let mut scratch = self.shared.local().data.clone();
            for op in &ops {
                op.apply(&mut scratch)?;
            }
        }

        let mut combined = Diff::new();
        for op in ops {
            combined.extend(self.mutate(op).await?);
        }
        Ok(combined)
    }

    /// Apply `op` locally, emit `update`, and forward it when filled.
    ///
    /// Returns the local diff. A rejection from the sequencer is returned as
    /// an error; the local change is not rolled back.
    async fn mutate(&self, op: Operation) -> Result<Diff> {
        let (diff, forward) = {
            let mut local = self.shared.local();
            if local.status == Status::Destroyed {
                return Err(self.destroyed_error());
            }
            let diff = op.apply(&mut local.data)?;
            let forward = if local.status == Status::Filled {
                let op_id = local.next_op;
                local.next_op += 1;
                local.pending.push(Pending {
                    id: op_id,
                    op: op.clone(),
                });
                Some((op_id, local.credential()))
            } else {
                // Nothing is in flight while unfilled.
                local.confirmed = local.data.clone();
                None
            };
            (diff, forward)
        };

        if !diff.is_empty() {
            self.shared.emit(Event::Update(diff.clone()));
        }

        let Some((op_id, credential)) = forward else {
            return Ok(diff);
        };

        let kind = op.kind();
        let request = Request::Mutate {
            record_id: self.shared.id.clone(),
            live_id: self.shared.live_id,
            op_id,
            credential,
            op,
        };
        let reply = match self.transport.request(request).await {
            Ok(reply) => reply,
            Err(err) => {
                self.shared.forget(op_id);
                return Err(err.into());
            }
        };
        match reply {
            Reply::Applied {
                broadcast: Some(broadcast),
            } => {
                self.shared.apply_broadcast(broadcast);
                tracing::trace!(record_id = %self.shared.id, op = %kind, op_id, "mutation acknowledged");
                Ok(diff)
            }
            Reply::Applied { broadcast: None } => {
                self.shared.forget(op_id);
                tracing::trace!(record_id = %self.shared.id, op = %kind, op_id, "mutation was a no-op");
                Ok(diff)
            }
            other => {
                self.shared.forget(op_id);
                Err(self.unexpected(other))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn pump_slot(&self) -> MutexGuard<'_, Option<Pump>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn destroyed_error(&self) -> SyncherError {
        SyncherError::AlreadyDestroyed(self.shared.id.clone())
    }

    /// Map a reply that is not the expected success onto an error.
    fn unexpected(&self, reply: Reply) -> SyncherError {
        match reply {
            Reply::Rejected { code, message } => {
                SyncherError::from_rejection(&self.shared.id, code, message)
            }
            other => SyncherError::UnexpectedReply(format!("{:?}", other)),
        }
    }
}

impl<T: Transport + 'static> Drop for Syncher<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump_slot().take() {
            pump.task.abort();
        }
    }
}

fn single(key: impl Into<String>, value: Value) -> Data {
    let mut patch = Data::new();
    patch.insert(key.into(), value);
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequencerConfig;
    use crate::Sequencer;
    use serde_json::json;
    use syncher_store::{MemoryStore, Store};

    type Server = Sequencer<MemoryStore>;

    fn server() -> Arc<Server> {
        Arc::new(Sequencer::new(MemoryStore::new(), SequencerConfig::default()))
    }

    fn instance(server: &Arc<Server>, data: Value) -> Syncher<Server> {
        Syncher::builder(Arc::clone(server)).data(data).build().unwrap()
    }

    #[test]
    fn test_builder_lifts_reserved_fields() {
        let server = server();
        let syncher = instance(&server, json!({ "id": "r1", "secret": "s", "foo": 1 }));
        assert_eq!(syncher.id(), &RecordId::new("r1"));
        assert_eq!(syncher.get_key("secret"), None);
        assert_eq!(syncher.json(), json!({ "id": "r1", "foo": 1 }));
        assert_eq!(syncher.status(), Status::Unfilled);
    }

    #[test]
    fn test_builder_rejects_non_object() {
        let server = server();
        let result = Syncher::builder(server).data(json!([1, 2])).build();
        assert!(matches!(result, Err(SyncherError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_unfilled_mutations_stay_local() {
        let server = server();
        let syncher = instance(&server, json!({ "foo": "foo" }));
        syncher.update(json!({ "foo": "bar" })).await.unwrap();
        assert_eq!(syncher.get_key("foo"), Some(json!("bar")));
        assert!(server.store().get(syncher.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_twice_is_invalid_state() {
        let server = server();
        let syncher = instance(&server, json!({}));
        syncher.create().await.unwrap();
        assert!(matches!(
            syncher.create().await,
            Err(SyncherError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_requires_filled() {
        let server = server();
        let syncher = instance(&server, json!({}));
        assert!(matches!(
            syncher.destroy().await,
            Err(SyncherError::InvalidState(_))
        ));
    }

    fn record_updates<T: Transport + 'static>(syncher: &Syncher<T>) -> Arc<Mutex<Vec<Diff>>> {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        syncher.on(EventKind::Update, move |event| {
            if let Event::Update(diff) = event {
                sink.lock().unwrap().push(diff.clone());
            }
        });
        updates
    }

    fn update_broadcast(syncher: &Syncher<Server>, live_id: LiveId, seq: u64, op_id: u64, diff: Diff) -> Broadcast {
        Broadcast {
            record_id: syncher.id().clone(),
            live_id,
            seq,
            event: BroadcastEvent::Update {
                op: syncher_core::OpKind::Update,
                op_id,
                diff,
            },
        }
    }

    #[tokio::test]
    async fn test_back_to_back_writes_emit_once_each() {
        let server = server();
        let syncher = instance(&server, json!({ "foo": 0 }));
        syncher.create().await.unwrap();
        syncher.synch(true).await.unwrap();
        let updates = record_updates(&syncher);

        syncher.update_key("foo", json!(1)).await.unwrap();
        syncher.update_key("foo", json!(2)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(
            *updates.lock().unwrap(),
            vec![single("foo", json!(1)), single("foo", json!(2))]
        );
        assert_eq!(syncher.get_key("foo"), Some(json!(2)));
        assert!(syncher.shared.local().pending.is_empty());
    }

    #[tokio::test]
    async fn test_echo_reconciles_only_changed_fields() {
        let server = server();
        let syncher = instance(&server, json!({ "a": 1 }));
        syncher.create().await.unwrap();
        let updates = record_updates(&syncher);

        syncher.update(json!({ "a": 2 })).await.unwrap();
        assert_eq!(updates.lock().unwrap().len(), 1);

        // A canonical echo that agrees with the cache except for `a`.
        let mut diff = Diff::new();
        diff.insert("a".into(), json!(3));
        diff.insert("b".into(), Value::Null);
        let done = syncher
            .shared
            .apply_broadcast(update_broadcast(&syncher, syncher.live_id(), 10, 99, diff));
        assert!(!done);

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1], single("a", json!(3)));
        assert_eq!(syncher.get_key("a"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_queued_op_replays_over_remote_change() {
        let server = server();
        let syncher = instance(&server, json!({ "list": [1] }));
        syncher.create().await.unwrap();
        {
            let mut local = syncher.shared.local();
            local.pending.push(Pending {
                id: 7,
                op: Operation::Push {
                    key: "list".into(),
                    values: vec![json!(2)],
                },
            });
            local.rebase();
        }
        assert_eq!(syncher.get_key("list"), Some(json!([1, 2])));
        let updates = record_updates(&syncher);

        let remote = LiveId(u64::MAX);
        let base = syncher.shared.local().last_seq;
        syncher.shared.apply_broadcast(update_broadcast(
            &syncher,
            remote,
            base + 1,
            1,
            single("list", json!([1, 9])),
        ));
        assert_eq!(syncher.get_key("list"), Some(json!([1, 9, 2])));

        syncher.shared.apply_broadcast(update_broadcast(
            &syncher,
            syncher.live_id(),
            base + 2,
            7,
            single("list", json!([1, 9, 2])),
        ));
        assert_eq!(
            *updates.lock().unwrap(),
            vec![single("list", json!([1, 9, 2]))]
        );
        assert!(syncher.shared.local().pending.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_broadcasts_keep_newest_fields() {
        let server = server();
        let syncher = instance(&server, json!({}));
        let remote = LiveId(u64::MAX);
        let mut later = Diff::new();
        later.insert("a".into(), json!(2));
        later.insert("b".into(), json!(2));
        let mut earlier = Diff::new();
        earlier.insert("a".into(), json!(1));
        earlier.insert("c".into(), json!(1));

        syncher.shared.apply_broadcast(update_broadcast(&syncher, remote, 2, 2, later));
        syncher.shared.apply_broadcast(update_broadcast(&syncher, remote, 1, 1, earlier));

        assert_eq!(
            Value::Object(syncher.get()),
            json!({ "a": 2, "b": 2, "c": 1 })
        );
    }

    #[tokio::test]
    async fn test_stale_load_fails_without_installing() {
        let server = server();
        let creator = instance(&server, json!({ "id": "r1", "foo": "stored" }));
        creator.create().await.unwrap();

        let syncher = instance(&server, json!({ "id": "r1" }));
        syncher.shared.apply_broadcast(update_broadcast(
            &syncher,
            LiveId(u64::MAX),
            50,
            1,
            single("foo", json!("newer")),
        ));

        let result = syncher.load().await;
        assert!(matches!(result, Err(SyncherError::InvalidState(_))));
        assert_eq!(syncher.get_key("foo"), Some(json!("newer")));
        assert_eq!(syncher.status(), Status::Unfilled);
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_is_ignored() {
        let server = server();
        let syncher = instance(&server, json!({}));
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        syncher.on(EventKind::RemoteUpdate, move |_| *sink.lock().unwrap() += 1);

        let broadcast = Broadcast {
            record_id: syncher.id().clone(),
            live_id: LiveId(u64::MAX),
            seq: 1,
            event: BroadcastEvent::Update {
                op: syncher_core::OpKind::Push,
                op_id: 1,
                diff: single("list", json!([1])),
            },
        };
        syncher.shared.apply_broadcast(broadcast.clone());
        syncher.shared.apply_broadcast(broadcast);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(syncher.get_key("list"), Some(json!([1])));
    }

    #[test]
    fn test_changes() {
        let before = single("a", json!(1));
        let mut after = single("b", json!(2));
        assert_eq!(changes(&before, &before), Diff::new());

        after.insert("a".into(), json!(1));
        assert_eq!(changes(&before, &after), single("b", json!(2)));

        let mut expected = single("a", Value::Null);
        expected.insert("b".into(), json!(2));
        assert_eq!(changes(&before, &single("b", json!(2))), expected);
    }
}
