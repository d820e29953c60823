//! CBOR framing over a byte connection.
//!
//! [`WireClient`] implements [`Transport`] on one end of a [`Connection`];
//! [`serve`] drives the other end in front of any backend transport
//! (normally the sequencer). This is the process boundary: remote peers may
//! not present private credentials.
//!
//! Every client-initiated frame carries a correlation id echoed by the
//! server. `Subscribed` is always sent before the first `Broadcast` of that
//! subscription, so the client can route broadcasts as soon as it sees them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use syncher_auth::Credential;
use syncher_core::RecordId;

use crate::error::{ChannelError, Result};
use crate::messages::{Broadcast, RejectCode, Reply, Request};
use crate::topics::{Subscription, SubscriptionId};
use crate::transport::Transport;

/// Wire client/server tuning.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// How long a client waits for the matching reply.
    pub request_timeout: Duration,
    /// Bound of each direction's frame queue.
    pub channel_capacity: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            channel_capacity: 256,
        }
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Request {
        corr: u64,
        request: Request,
    },
    Subscribe {
        corr: u64,
        record_id: RecordId,
    },
    Unsubscribe {
        corr: u64,
        record_id: RecordId,
        subscription: SubscriptionId,
    },
    Reply {
        corr: u64,
        reply: Reply,
    },
    Subscribed {
        corr: u64,
        subscription: SubscriptionId,
    },
    Unsubscribed {
        corr: u64,
    },
    Broadcast {
        subscription: SubscriptionId,
        broadcast: Broadcast,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ChannelError::Codec(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| ChannelError::Codec(e.to_string()))
    }
}

/// One end of a bidirectional byte pipe.
pub struct Connection {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl Connection {
    /// Two connected ends, each direction bounded by `capacity` frames.
    pub fn pair(capacity: usize) -> (Connection, Connection) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        (
            Connection { tx: a_tx, rx: a_rx },
            Connection { tx: b_tx, rx: b_rx },
        )
    }

    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        self.tx
            .send(bytes)
            .await
            .map_err(|_| ChannelError::Unavailable("peer hung up".into()))
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    fn split(self) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        (self.tx, self.rx)
    }
}

async fn send_frame(tx: &mpsc::Sender<Bytes>, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    tx.send(bytes)
        .await
        .map_err(|_| ChannelError::Unavailable("peer hung up".into()))
}

// ============================================================================
// Client
// ============================================================================

enum Pending {
    Reply(oneshot::Sender<Reply>),
    Subscribe {
        queue: mpsc::UnboundedSender<Broadcast>,
        done: oneshot::Sender<Result<SubscriptionId>>,
    },
    Unsubscribe(oneshot::Sender<()>),
}

#[derive(Default)]
struct ClientState {
    pending: HashMap<u64, Pending>,
    routes: HashMap<SubscriptionId, mpsc::UnboundedSender<Broadcast>>,
    closed: bool,
}

/// Transport speaking [`Frame`]s over a [`Connection`].
pub struct WireClient {
    outbound: mpsc::Sender<Bytes>,
    state: Arc<Mutex<ClientState>>,
    next_corr: AtomicU64,
    config: WireConfig,
    reader: JoinHandle<()>,
}

impl WireClient {
    /// Attach to `conn` and start the reader task. Must run inside a tokio
    /// runtime.
    pub fn connect(conn: Connection, config: WireConfig) -> Self {
        let (outbound, inbound) = conn.split();
        let state = Arc::new(Mutex::new(ClientState::default()));
        let reader = tokio::spawn(read_loop(inbound, Arc::clone(&state)));

        Self {
            outbound,
            state,
            next_corr: AtomicU64::new(1),
            config,
            reader,
        }
    }

    /// Whether the server side has gone away.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    async fn roundtrip<R>(
        &self,
        corr: u64,
        frame: Frame,
        pending: Pending,
        rx: oneshot::Receiver<R>,
    ) -> Result<R> {
        let bytes = frame.encode()?;
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(ChannelError::Unavailable("connection closed".into()));
            }
            state.pending.insert(corr, pending);
        }

        if self.outbound.send(bytes).await.is_err() {
            self.state.lock().await.pending.remove(&corr);
            return Err(ChannelError::Unavailable("peer hung up".into()));
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.state.lock().await.pending.remove(&corr);
                tracing::warn!(corr, timeout = ?self.config.request_timeout, "wire request timed out");
                Err(ChannelError::Timeout)
            }
        }
    }

    fn corr(&self) -> u64 {
        self.next_corr.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for WireClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for WireClient {
    async fn request(&self, request: Request) -> Result<Reply> {
        let corr = self.corr();
        let (tx, rx) = oneshot::channel();
        self.roundtrip(corr, Frame::Request { corr, request }, Pending::Reply(tx), rx)
            .await
    }

    async fn subscribe(&self, record_id: &RecordId) -> Result<Subscription> {
        let corr = self.corr();
        let (queue, receiver) = mpsc::unbounded_channel();
        let (done, rx) = oneshot::channel();
        let frame = Frame::Subscribe {
            corr,
            record_id: record_id.clone(),
        };

        let id = self
            .roundtrip(corr, frame, Pending::Subscribe { queue, done }, rx)
            .await??;

        Ok(Subscription {
            record_id: record_id.clone(),
            id,
            receiver,
        })
    }

    async fn unsubscribe(&self, record_id: &RecordId, subscription: SubscriptionId) -> Result<()> {
        self.state.lock().await.routes.remove(&subscription);

        let corr = self.corr();
        let (done, rx) = oneshot::channel();
        let frame = Frame::Unsubscribe {
            corr,
            record_id: record_id.clone(),
            subscription,
        };
        self.roundtrip(corr, frame, Pending::Unsubscribe(done), rx)
            .await
    }
}

async fn read_loop(mut inbound: mpsc::Receiver<Bytes>, state: Arc<Mutex<ClientState>>) {
    while let Some(bytes) = inbound.recv().await {
        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed frame");
                continue;
            }
        };

        let mut state = state.lock().await;
        match frame {
            Frame::Reply { corr, reply } => match state.pending.remove(&corr) {
                Some(Pending::Reply(tx)) => {
                    let _ = tx.send(reply);
                }
                Some(Pending::Subscribe { done, .. }) => {
                    let _ = done.send(Err(ChannelError::Protocol(format!(
                        "subscribe refused: {:?}",
                        reply
                    ))));
                }
                Some(Pending::Unsubscribe(done)) => {
                    let _ = done.send(());
                }
                None => tracing::warn!(corr, "reply for unknown correlation id"),
            },
            Frame::Subscribed { corr, subscription } => match state.pending.remove(&corr) {
                Some(Pending::Subscribe { queue, done }) => {
                    state.routes.insert(subscription, queue);
                    let _ = done.send(Ok(subscription));
                }
                _ => tracing::warn!(corr, "unexpected subscribed frame"),
            },
            Frame::Unsubscribed { corr } => {
                if let Some(Pending::Unsubscribe(done)) = state.pending.remove(&corr) {
                    let _ = done.send(());
                }
            }
            Frame::Broadcast {
                subscription,
                broadcast,
            } => {
                let delivered = state
                    .routes
                    .get(&subscription)
                    .map(|queue| queue.send(broadcast).is_ok());
                match delivered {
                    Some(true) => {}
                    Some(false) => {
                        state.routes.remove(&subscription);
                    }
                    None => tracing::trace!(%subscription, "broadcast for unknown subscription"),
                }
            }
            Frame::Request { .. } | Frame::Subscribe { .. } | Frame::Unsubscribe { .. } => {
                tracing::warn!("server sent a client-bound frame");
            }
        }
    }

    let mut state = state.lock().await;
    state.closed = true;
    state.pending.clear();
    state.routes.clear();
    tracing::debug!("wire connection closed");
}

// ============================================================================
// Server
// ============================================================================

/// Serve one connection in front of `backend` until the peer hangs up.
///
/// Requests are handled one at a time in arrival order. Subscriptions made
/// over this connection are dropped when it closes.
pub async fn serve<B>(conn: Connection, backend: Arc<B>)
where
    B: Transport + ?Sized + 'static,
{
    let (outbound, mut inbound) = conn.split();
    let mut forwarders: HashMap<SubscriptionId, (RecordId, JoinHandle<()>)> = HashMap::new();

    while let Some(bytes) = inbound.recv().await {
        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed frame");
                continue;
            }
        };

        let response = match frame {
            Frame::Request { corr, request } => Frame::Reply {
                corr,
                reply: handle_request(backend.as_ref(), request).await,
            },
            Frame::Subscribe { corr, record_id } => match backend.subscribe(&record_id).await {
                Ok(subscription) => {
                    let id = subscription.id;
                    if send_frame(&outbound, &Frame::Subscribed { corr, subscription: id })
                        .await
                        .is_err()
                    {
                        let _ = backend.unsubscribe(&record_id, id).await;
                        break;
                    }
                    let forwarder = tokio::spawn(forward(subscription, outbound.clone()));
                    forwarders.insert(id, (record_id, forwarder));
                    continue;
                }
                Err(err) => Frame::Reply {
                    corr,
                    reply: Reply::rejected(RejectCode::Internal, err.to_string()),
                },
            },
            Frame::Unsubscribe {
                corr,
                record_id,
                subscription,
            } => {
                if let Some((_, forwarder)) = forwarders.remove(&subscription) {
                    forwarder.abort();
                }
                if let Err(err) = backend.unsubscribe(&record_id, subscription).await {
                    tracing::warn!(%err, %subscription, "unsubscribe failed");
                }
                Frame::Unsubscribed { corr }
            }
            Frame::Reply { .. }
            | Frame::Subscribed { .. }
            | Frame::Unsubscribed { .. }
            | Frame::Broadcast { .. } => {
                tracing::warn!("client sent a server-bound frame");
                continue;
            }
        };

        if let Err(err) = send_frame(&outbound, &response).await {
            tracing::debug!(%err, "client gone, stopping");
            break;
        }
    }

    for (id, (record_id, forwarder)) in forwarders {
        forwarder.abort();
        let _ = backend.unsubscribe(&record_id, id).await;
    }
    tracing::debug!("wire session ended");
}

async fn handle_request<B: Transport + ?Sized>(backend: &B, request: Request) -> Reply {
    if request.credential().is_some_and(Credential::is_private) {
        tracing::warn!(
            record_id = %request.record_id(),
            request = request.name(),
            "refusing private credential from remote peer"
        );
        return Reply::rejected(
            RejectCode::Unauthorized,
            "private credentials are not accepted from remote peers",
        );
    }

    match backend.request(request).await {
        Ok(reply) => reply,
        Err(err) => Reply::rejected(RejectCode::Internal, err.to_string()),
    }
}

async fn forward(mut subscription: Subscription, outbound: mpsc::Sender<Bytes>) {
    let id = subscription.id;
    while let Some(broadcast) = subscription.recv().await {
        let frame = Frame::Broadcast {
            subscription: id,
            broadcast,
        };
        if let Err(err) = send_frame(&outbound, &frame).await {
            tracing::debug!(%err, subscription = %id, "forwarder stopping");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::BroadcastEvent;
    use crate::topics::Topics;
    use serde_json::json;
    use syncher_core::{LiveId, Operation, Secret};

    /// Accepts every mutation and publishes an empty update.
    #[derive(Default)]
    struct Backend {
        topics: Topics,
        seq: AtomicU64,
    }

    #[async_trait]
    impl Transport for Backend {
        async fn request(&self, request: Request) -> Result<Reply> {
            match request {
                Request::Mutate {
                    record_id,
                    live_id,
                    op_id,
                    op,
                    ..
                } => {
                    let broadcast = Broadcast {
                        record_id,
                        live_id,
                        seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
                        event: BroadcastEvent::Update {
                            op: op.kind(),
                            op_id,
                            diff: Default::default(),
                        },
                    };
                    self.topics.publish(&broadcast).await;
                    Ok(Reply::Applied {
                        broadcast: Some(broadcast),
                    })
                }
                _ => Ok(Reply::rejected(RejectCode::NotFound, "nope")),
            }
        }

        async fn subscribe(&self, record_id: &RecordId) -> Result<Subscription> {
            Ok(self.topics.subscribe(record_id).await)
        }

        async fn unsubscribe(&self, record_id: &RecordId, id: SubscriptionId) -> Result<()> {
            self.topics.unsubscribe(record_id, id).await;
            Ok(())
        }
    }

    fn setup() -> (WireClient, Arc<Backend>) {
        let backend = Arc::new(Backend::default());
        let (client_end, server_end) = Connection::pair(16);
        tokio::spawn(serve(server_end, Arc::clone(&backend)));
        (WireClient::connect(client_end, WireConfig::default()), backend)
    }

    fn mutate(credential: Credential) -> Request {
        Request::Mutate {
            record_id: RecordId::new("r1"),
            live_id: LiveId(9),
            op_id: 1,
            credential,
            op: Operation::update(json!({ "a": 1 })).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_request_reply() {
        let (client, _backend) = setup();
        let reply = client
            .request(Request::Load {
                record_id: RecordId::new("r1"),
            })
            .await
            .unwrap();
        assert!(matches!(
            reply,
            Reply::Rejected {
                code: RejectCode::NotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_subscription_receives_broadcasts() {
        let (client, backend) = setup();
        let mut sub = client.subscribe(&RecordId::new("r1")).await.unwrap();
        assert_eq!(backend.topics.subscriber_count(&RecordId::new("r1")).await, 1);

        client
            .request(mutate(Credential::Secret(Secret::new("s"))))
            .await
            .unwrap();
        let broadcast = sub.recv().await.unwrap();
        assert_eq!(broadcast.seq, 1);
        assert_eq!(broadcast.live_id, LiveId(9));

        client.unsubscribe(&sub.record_id, sub.id).await.unwrap();
        assert_eq!(backend.topics.subscriber_count(&RecordId::new("r1")).await, 0);
    }

    #[tokio::test]
    async fn test_private_credentials_refused() {
        let (client, backend) = setup();
        let reply = client.request(mutate(Credential::Private)).await.unwrap();
        assert!(matches!(
            reply,
            Reply::Rejected {
                code: RejectCode::Unauthorized,
                ..
            }
        ));
        assert_eq!(backend.seq.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_is_unavailable() {
        let (client_end, server_end) = Connection::pair(4);
        let client = WireClient::connect(client_end, WireConfig::default());
        drop(server_end);

        let err = client
            .request(Request::Load {
                record_id: RecordId::new("r1"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Unavailable(_) | ChannelError::Closed));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client_end, _server_end) = Connection::pair(4);
        let client = WireClient::connect(
            client_end,
            WireConfig {
                request_timeout: Duration::from_millis(20),
                ..WireConfig::default()
            },
        );

        let err = client
            .request(Request::Load {
                record_id: RecordId::new("r1"),
            })
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::Timeout);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let backend = Arc::new(Backend::default());
        let (mut client_end, server_end) = Connection::pair(4);
        tokio::spawn(serve(server_end, backend));

        client_end.send(Bytes::from_static(b"\xff\x00garbage")).await.unwrap();
        let frame = Frame::Request {
            corr: 42,
            request: Request::Load {
                record_id: RecordId::new("r1"),
            },
        };
        client_end.send(frame.encode().unwrap()).await.unwrap();

        let reply = Frame::decode(&client_end.recv().await.unwrap()).unwrap();
        assert!(matches!(reply, Frame::Reply { corr: 42, .. }));
    }
}
