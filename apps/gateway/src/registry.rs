//! Edge registry and dispatcher
//!
//! Owns the set of connected edges, picks the least recently used edge for every
//! dispatched request, and correlates response envelopes back to the caller that issued
//! the request. Each pending request resolves exactly once, either with the edge's
//! response or with a synthetic timeout envelope.

use async_proxy_common::{
    EdgeInfo, RequestEnvelope, ResponseEnvelope, Result, TunnelError, decode, encode,
    generate_edge_id, generate_request_id, protocol::HeaderMultimap,
    validation::validate_edge_id,
};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::RwLock;
use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of one accepted tunnel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to a live tunnel connection
///
/// Frames queued on the handle are written to the socket by the connection's writer task.
#[derive(Debug, Clone)]
pub struct EdgeConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    outgoing: mpsc::Sender<WsMessage>,
    /// Set once the registry has unregistered this connection
    retired: Arc<AtomicBool>,
}

impl EdgeConnection {
    pub fn new(remote_addr: SocketAddr, outgoing: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr,
            outgoing,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queue a frame for the writer task without waiting
    ///
    /// A full queue means the edge stopped draining its socket and is reported as a
    /// failure instead of parking the caller.
    pub fn try_send(&self, message: WsMessage) -> std::result::Result<(), String> {
        self.outgoing.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => "tunnel writer queue full".to_string(),
            TrySendError::Closed(_) => "tunnel writer closed".to_string(),
        })
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

type CompletionFn = Box<dyn FnOnce(ResponseEnvelope) + Send + Sync + 'static>;

/// In-flight request state, removed from the table by whichever outcome wins
struct PendingCallback {
    edge_id: String,
    complete: CompletionFn,
    /// Only breaks the timeout race, carries no data
    done: oneshot::Sender<()>,
}

impl PendingCallback {
    fn fire(self, envelope: ResponseEnvelope) {
        (self.complete)(envelope);
        let _ = self.done.send(());
    }
}

struct Edge {
    edge_id: String,
    connection: EdgeConnection,
    connected_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    /// Dispatch order stamp, 0 for never used
    last_used_tick: u64,
}

impl Edge {
    fn info(&self) -> EdgeInfo {
        EdgeInfo {
            edge_id: self.edge_id.clone(),
            remote_addr: self.connection.remote_addr(),
            connected_at: self.connected_at,
            last_used_at: self.last_used_at,
        }
    }
}

#[derive(Default)]
struct EdgeList {
    edges: Vec<Edge>,
    tick: u64,
}

/// Registry of connected edges plus the table of in-flight request callbacks
#[derive(Default)]
pub struct EdgeRegistry {
    edges: RwLock<EdgeList>,
    sessions: DashMap<ConnectionId, String>,
    callbacks: Arc<DashMap<String, PendingCallback>>,
}

impl EdgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted tunnel connection and return its edge id
    ///
    /// Registering the same connection twice returns the id assigned the first time.
    pub fn register(&self, connection: EdgeConnection) -> String {
        let edge_id = match self.sessions.entry(connection.id()) {
            Entry::Occupied(existing) => return existing.get().clone(),
            Entry::Vacant(slot) => slot.insert(generate_edge_id()).value().clone(),
        };

        let remote_addr = connection.remote_addr();
        self.edges.write().edges.push(Edge {
            edge_id: edge_id.clone(),
            connection,
            connected_at: Utc::now(),
            last_used_at: DateTime::<Utc>::UNIX_EPOCH,
            last_used_tick: 0,
        });

        info!("Edge registered: {} ({})", edge_id, remote_addr);
        edge_id
    }

    /// Remove the edge bound to this connection
    ///
    /// Fails with `NoEdgeIdDefined` when the connection was never registered. Repeating
    /// the call after a successful unregister, or after the edge already left the list,
    /// is a no-op.
    pub fn unregister(&self, connection: &EdgeConnection) -> Result<()> {
        let edge_id = match self.edge_id_of(connection) {
            Ok(edge_id) => edge_id,
            Err(TunnelError::NoEdgeIdDefined) if connection.is_retired() => {
                debug!("Connection {} was already unregistered", connection.id());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let removed = {
            let mut list = self.edges.write();
            let before = list.edges.len();
            list.edges.retain(|edge| edge.edge_id != edge_id);
            before != list.edges.len()
        };
        connection.retired.store(true, Ordering::Release);
        self.sessions.remove(&connection.id());

        if removed {
            info!("Edge unregistered: {}", edge_id);
        } else {
            debug!("Edge {} was already removed", edge_id);
        }
        Ok(())
    }

    /// Resolve the edge id the registry assigned to this connection
    pub fn edge_id_of(&self, connection: &EdgeConnection) -> Result<String> {
        let edge_id = self
            .sessions
            .get(&connection.id())
            .map(|entry| entry.value().clone())
            .ok_or(TunnelError::NoEdgeIdDefined)?;
        validate_edge_id(&edge_id)?;
        Ok(edge_id)
    }

    pub fn count(&self) -> usize {
        self.edges.read().edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Connected edges in registration order
    pub fn snapshot(&self) -> Vec<EdgeInfo> {
        self.edges.read().edges.iter().map(Edge::info).collect()
    }

    /// Number of requests still waiting for a response or a timeout
    pub fn pending_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Pick the least recently used edge and stamp it, in one step under the write lock
    ///
    /// Ties among never-used edges go to the earliest registered one.
    fn select_edge(&self) -> Result<(String, EdgeConnection)> {
        let mut list = self.edges.write();
        let EdgeList { edges, tick } = &mut *list;

        let edge = edges
            .iter_mut()
            .min_by_key(|edge| edge.last_used_tick)
            .ok_or(TunnelError::NoEdge)?;

        *tick += 1;
        edge.last_used_tick = *tick;
        edge.last_used_at = Utc::now();

        Ok((edge.edge_id.clone(), edge.connection.clone()))
    }

    /// Ship one request to an edge and return its request id
    ///
    /// `on_complete` fires exactly once from another task, with the edge's response or
    /// with the timeout envelope after `timeout`. It never fires when this call fails.
    pub async fn dispatch<F>(
        &self,
        method: &str,
        url: &str,
        headers: HeaderMultimap,
        body: Vec<u8>,
        timeout: Duration,
        on_complete: F,
    ) -> Result<String>
    where
        F: FnOnce(ResponseEnvelope) + Send + Sync + 'static,
    {
        let (edge_id, connection) = self.select_edge()?;
        let request_id = generate_request_id();

        let envelope = RequestEnvelope {
            full_url: url.to_string(),
            method: method.to_string(),
            headers,
            body,
            request_id: request_id.clone(),
            timeout: timeout.as_secs_f64(),
            edge_id: edge_id.clone(),
        };
        let payload = encode(&envelope)?;

        // Registered before the send so a fast response always finds its callback. Nothing
        // below awaits, so the entry and its timeout watcher are never orphaned by a
        // cancelled caller.
        let (done_tx, done_rx) = oneshot::channel();
        self.callbacks.insert(
            request_id.clone(),
            PendingCallback {
                edge_id: edge_id.clone(),
                complete: Box::new(on_complete),
                done: done_tx,
            },
        );

        if let Err(reason) = connection.try_send(WsMessage::Binary(payload.into())) {
            self.callbacks.remove(&request_id);
            warn!("Failed to send request {} to edge {}: {}", request_id, edge_id, reason);
            return Err(TunnelError::EdgeSendFailed { edge_id, reason });
        }

        debug!("Dispatched {} {} to edge {} ({})", method, url, edge_id, request_id);

        tokio::spawn(watch_timeout(
            Arc::clone(&self.callbacks),
            request_id.clone(),
            timeout,
            done_rx,
        ));

        Ok(request_id)
    }

    /// Dispatch and wait for the callback to fire
    pub async fn dispatch_and_wait(
        &self,
        method: &str,
        url: &str,
        headers: HeaderMultimap,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(method, url, headers, body, timeout, move |envelope| {
            let _ = tx.send(envelope);
        })
        .await?;

        rx.await.map_err(|_| TunnelError::CallbackDropped)
    }

    /// Handle one frame received from an edge's tunnel
    ///
    /// Unknown, late or duplicate request ids are tolerated: the decoded envelope is
    /// returned and no callback fires.
    pub fn on_response(
        &self,
        connection: &EdgeConnection,
        message: &WsMessage,
    ) -> Result<ResponseEnvelope> {
        let payload = match message {
            WsMessage::Binary(payload) => payload,
            other => {
                return Err(TunnelError::InvalidResponseMessageType(
                    frame_kind(other).to_string(),
                ));
            }
        };

        let edge_id = self.edge_id_of(connection)?;
        let mut envelope: ResponseEnvelope = decode(payload.as_ref())?;
        // The edge's self-reported id is not trusted
        envelope.edge_id = edge_id;

        match self.callbacks.remove(&envelope.request_id) {
            Some((_, pending)) => pending.fire(envelope.clone()),
            None => debug!(
                "No pending callback for request {} from edge {}",
                envelope.request_id, envelope.edge_id
            ),
        }

        Ok(envelope)
    }
}

async fn watch_timeout(
    callbacks: Arc<DashMap<String, PendingCallback>>,
    request_id: String,
    timeout: Duration,
    done: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            if let Some((_, pending)) = callbacks.remove(&request_id) {
                debug!("Request {} timed out on edge {}", request_id, pending.edge_id);
                let envelope = ResponseEnvelope::timeout(&request_id, &pending.edge_id);
                pending.fire(envelope);
            }
        }
        _ = done => {}
    }
}

fn frame_kind(message: &WsMessage) -> &'static str {
    match message {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "binary",
        WsMessage::Ping(_) => "ping",
        WsMessage::Pong(_) => "pong",
        WsMessage::Close(_) => "close",
        WsMessage::Frame(_) => "frame",
    }
}
