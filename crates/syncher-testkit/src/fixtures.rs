//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a sequencer over a store,
//! in-process ("server") instances, and wire-connected ("client") instances.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use syncher::{Event, EventKind, Sequencer, SequencerConfig, Syncher};
use syncher_channel::{serve, Connection, Transport, WireClient, WireConfig};
use syncher_store::{MemoryStore, Store};

/// How long [`EventLog`] waits for the next event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Record data used throughout the suites.
pub fn sample_data() -> Value {
    json!({
        "secret": "secret",
        "foo": "foo",
        "bar": "bar",
        "baz": 321
    })
}

/// Install a fmt subscriber writing through the test harness. Safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A sequencer plus helpers to attach instances to it.
pub struct Harness<S: Store + 'static = MemoryStore> {
    pub server: Arc<Sequencer<S>>,
    pub wire: WireConfig,
}

impl Harness<MemoryStore> {
    /// Sequencer over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl Default for Harness<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store + 'static> Harness<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            server: Arc::new(Sequencer::new(store, SequencerConfig::default())),
            wire: WireConfig::default(),
        }
    }

    /// An instance talking to the sequencer in-process.
    pub fn server_instance(&self, data: Value) -> Syncher<Sequencer<S>> {
        instance(Arc::clone(&self.server), data)
    }

    /// A wire client served by a fresh session on the sequencer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn client(&self) -> Arc<WireClient> {
        let (client_end, server_end) = Connection::pair(self.wire.channel_capacity);
        tokio::spawn(serve(server_end, Arc::clone(&self.server)));
        Arc::new(WireClient::connect(client_end, self.wire.clone()))
    }

    /// An instance behind its own wire client.
    pub fn client_instance(&self, data: Value) -> Syncher<WireClient> {
        instance(self.client(), data)
    }
}

/// Build an instance over `transport` from JSON data.
///
/// Panics on non-object data; fixtures are expected to be well formed.
pub fn instance<T: Transport + 'static>(transport: Arc<T>, data: Value) -> Syncher<T> {
    match Syncher::builder(transport).data(data).build() {
        Ok(syncher) => syncher,
        Err(err) => panic!("fixture data rejected: {}", err),
    }
}

/// Poll `condition` until it holds or [`EVENT_TIMEOUT`] passes.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Events emitted by one instance, in delivery order.
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<Event>,
}

/// Record every event `syncher` emits from now on.
pub fn watch<T: Transport + 'static>(syncher: &Syncher<T>) -> EventLog {
    let (tx, rx) = mpsc::unbounded_channel();
    syncher.on_any(move |event| {
        let _ = tx.send(event.clone());
    });
    EventLog { rx }
}

impl EventLog {
    /// The next event, or `None` after [`EVENT_TIMEOUT`].
    pub async fn next(&mut self) -> Option<Event> {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip ahead to the next event of `kind`.
    pub async fn next_of(&mut self, kind: EventKind) -> Option<Event> {
        loop {
            let event = self.next().await?;
            if event.kind() == kind {
                return Some(event);
            }
        }
    }

    /// Everything already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_round_trip() {
        let harness = Harness::new();
        let server = harness.server_instance(sample_data());
        server.create().await.unwrap();

        let client = harness.client_instance(json!({ "id": server.id().as_str() }));
        let mut log = watch(&client);
        client.load().await.unwrap();

        assert_eq!(log.next().await, Some(Event::Load));
        assert_eq!(client.json(), server.json());
    }
}
