//! WebSocket RPC syncer with request-id multiplexing and push subscriptions.
//!
//! Every request gets the next integer id and a oneshot completion parked in the
//! pending map. The socket pump removes the entry for each response id before
//! answering it, so a handler completes at most once; on disconnect every remaining
//! entry is drained and failed, so none is left hanging.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::error::RpcError;
use super::jsonrpc::{
    BlockNumber, IncomingMessage, JsonRpc, JsonRpcRequest, NewHead, RpcCall, SubscribeNewHeads,
};
use super::syncer::{RpcSyncer, RpcSyncerEvent, RpcSyncerState, SyncerSignals};
use crate::state::SyncError;

const SOCKET_EVENT_CAPACITY: usize = 256;

/// Lifecycle and traffic of a text WebSocket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    Connected,
    Message(String),
    Disconnected(String),
}

/// A text message socket to a node.
#[async_trait]
pub trait RpcSocket: Send + Sync {
    fn source(&self) -> String;

    /// Opens the connection. `Connected` or `Disconnected` arrives first on the receiver.
    async fn connect(&self) -> mpsc::Receiver<SocketEvent>;

    async fn send(&self, text: String) -> Result<(), RpcError>;

    async fn close(&self);
}

/// Callback for push notifications of one subscription.
pub type SubscriptionHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// `tokio-tungstenite` socket.
pub struct NodeWebSocket {
    url: String,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeWebSocket {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            outgoing: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RpcSocket for NodeWebSocket {
    fn source(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> mpsc::Receiver<SocketEvent> {
        self.close().await;

        let (events_tx, events_rx) = mpsc::channel(SOCKET_EVENT_CAPACITY);
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        *self.outgoing.lock().unwrap_or_else(PoisonError::into_inner) = Some(outgoing_tx);

        let url = self.url.clone();
        let handle = tokio::spawn(async move {
            let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    let _ = events_tx.send(SocketEvent::Disconnected(e.to_string())).await;
                    return;
                }
            };
            info!(url = %url, "websocket connected");
            if events_tx.send(SocketEvent::Connected).await.is_err() {
                return;
            }

            let (mut write, mut read) = ws_stream.split();
            let reason = loop {
                tokio::select! {
                    outgoing = outgoing_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                break e.to_string();
                            }
                        }
                        None => {
                            let _ = write.close().await;
                            break "closed by client".to_string();
                        }
                    },
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if events_tx.send(SocketEvent::Message(text)).await.is_err() {
                                break "event receiver dropped".to_string();
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                break e.to_string();
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "closed by server".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream ended".to_string(),
                    },
                }
            };

            warn!(url = %url, reason = %reason, "websocket disconnected");
            let _ = events_tx.send(SocketEvent::Disconnected(reason)).await;
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        events_rx
    }

    async fn send(&self, text: String) -> Result<(), RpcError> {
        let outgoing = self
            .outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match outgoing {
            Some(tx) => tx
                .send(text)
                .map_err(|_| RpcError::Disconnected("socket closed".into())),
            None => Err(RpcError::Disconnected("socket not connected".into())),
        }
    }

    async fn close(&self) {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// RPC syncer over an [`RpcSocket`].
pub struct WebSocketRpcSyncer {
    inner: Arc<WsInner>,
}

struct WsInner {
    socket: Arc<dyn RpcSocket>,
    request_timeout: Duration,
    signals: SyncerSignals,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Result<Value, RpcError>>>,
    subscriptions: DashMap<String, SubscriptionHandler>,
    running: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketRpcSyncer {
    pub fn new(socket: Arc<dyn RpcSocket>, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(WsInner {
                socket,
                request_timeout,
                signals: SyncerSignals::new(),
                next_id: AtomicU64::new(1),
                pending: DashMap::new(),
                subscriptions: DashMap::new(),
                running: AtomicBool::new(false),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Issues an `eth_subscribe` call and routes its notifications to `handler`.
    ///
    /// Returns the subscription id. Subscriptions do not survive a disconnect.
    pub async fn subscribe_with(
        &self,
        call: RpcCall,
        handler: SubscriptionHandler,
    ) -> Result<String, RpcError> {
        self.inner.subscribe_with(call, handler).await
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }
}

impl WsInner {
    async fn send(&self, call: RpcCall) -> Result<Value, RpcError> {
        self.signals.state().ensure_ready()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&JsonRpcRequest::new(id, &call))
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // A disconnect may have drained the map between the state check and the insert.
        if let Err(err) = self.signals.state().ensure_ready() {
            self.pending.remove(&id);
            return Err(err);
        }

        if let Err(err) = self.socket.send(text).await {
            self.pending.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Disconnected("request abandoned".into())),
            Err(_) => {
                self.pending.remove(&id);
                Err(RpcError::Timeout)
            }
        }
    }

    async fn subscribe_with(
        &self,
        call: RpcCall,
        handler: SubscriptionHandler,
    ) -> Result<String, RpcError> {
        let result = self.send(call).await?;
        let id: String = serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("subscription id: {e}")))?;
        self.subscriptions.insert(id.clone(), handler);
        Ok(id)
    }

    /// Fails every in-flight request with `error`.
    fn fail_pending(&self, error: &RpcError) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    fn handle_message(&self, text: &str) {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable websocket message");
                return;
            }
        };

        match message {
            IncomingMessage::Response(response) => {
                match self.pending.remove(&response.id) {
                    Some((_, tx)) => {
                        let _ = tx.send(response.into_result());
                    }
                    None => debug!(id = response.id, "response for unknown request"),
                }
            }
            IncomingMessage::Notification(notification) => {
                let handler = self
                    .subscriptions
                    .get(&notification.params.subscription)
                    .map(|entry| Arc::clone(entry.value()));
                match handler {
                    Some(handler) => handler(notification.params.result),
                    None => debug!(
                        subscription = %notification.params.subscription,
                        "notification for unknown subscription"
                    ),
                }
            }
        }
    }

    fn handle_disconnect(&self, reason: String) {
        warn!(reason = %reason, "rpc websocket disconnected");
        self.signals
            .set_state(RpcSyncerState::NotReady(SyncError::Disconnected(
                reason.clone(),
            )));
        self.fail_pending(&RpcError::Disconnected(reason));
        self.subscriptions.clear();
    }

    async fn on_connected(self: Arc<Self>) {
        self.signals.set_state(RpcSyncerState::Ready);

        let events = self.signals.sender();
        let handler: SubscriptionHandler = Arc::new(move |value| {
            match serde_json::from_value::<NewHead>(value) {
                Ok(head) => {
                    let _ = events.send(RpcSyncerEvent::LastBlockHeight(head.number.to::<u64>()));
                }
                Err(e) => warn!(error = %e, "malformed new head notification"),
            }
        });
        if let Err(err) = self.subscribe_with(SubscribeNewHeads.call(), handler).await {
            warn!(error = %err, "newHeads subscription failed");
        }

        self.fetch_block_height().await;
    }

    async fn fetch_block_height(&self) {
        match self
            .send(BlockNumber.call())
            .await
            .and_then(|value| BlockNumber.parse(value))
        {
            Ok(height) => self.signals.emit_block_height(height.to::<u64>()),
            Err(err) => warn!(error = %err, "block number request failed"),
        }
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::Receiver<SocketEvent>) {
        while let Some(event) = events.recv().await {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            match event {
                SocketEvent::Connected => {
                    tokio::spawn(Arc::clone(&self).on_connected());
                }
                SocketEvent::Message(text) => self.handle_message(&text),
                SocketEvent::Disconnected(reason) => self.handle_disconnect(reason),
            }
        }

        if self.running.load(Ordering::SeqCst) && !self.pending.is_empty() {
            self.handle_disconnect("socket event stream ended".into());
        }
    }

    fn abort_pump(&self) {
        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pump) = pump {
            pump.abort();
        }
    }
}

#[async_trait]
impl RpcSyncer for WebSocketRpcSyncer {
    fn source(&self) -> String {
        format!("websocket {}", self.inner.socket.source())
    }

    fn state(&self) -> RpcSyncerState {
        self.inner.signals.state()
    }

    fn subscribe(&self) -> broadcast::Receiver<RpcSyncerEvent> {
        self.inner.signals.subscribe()
    }

    #[tracing::instrument(skip(self), fields(source = %self.inner.socket.source()))]
    async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("already started");
            return;
        }

        self.inner.signals.set_state(RpcSyncerState::Preparing);
        let events = self.inner.socket.connect().await;
        let pump = tokio::spawn(Arc::clone(&self.inner).pump(events));
        *self.inner.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
    }

    async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.abort_pump();
        self.inner.socket.close().await;
        self.inner
            .signals
            .set_state(RpcSyncerState::NotReady(SyncError::NotStarted));
        self.inner
            .fail_pending(&RpcError::NotReady(SyncError::NotStarted));
        self.inner.subscriptions.clear();
    }

    async fn refresh(&self) {
        match self.inner.signals.state() {
            RpcSyncerState::Ready => self.inner.fetch_block_height().await,
            RpcSyncerState::Preparing => {}
            RpcSyncerState::NotReady(_) => {
                if self.inner.running.load(Ordering::SeqCst) {
                    self.stop().await;
                    self.start().await;
                }
            }
        }
    }

    async fn send(&self, call: RpcCall) -> Result<Value, RpcError> {
        self.inner.send(call).await
    }
}

impl Drop for WebSocketRpcSyncer {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.abort_pump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Records outgoing frames; the test drives incoming traffic by hand.
    struct ManualSocket {
        events: Mutex<Option<mpsc::Sender<SocketEvent>>>,
        sent: Mutex<Vec<Value>>,
    }

    impl ManualSocket {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
            })
        }

        async fn push(&self, event: SocketEvent) {
            let tx = self.events.lock().expect("lock").clone().expect("connected");
            tx.send(event).await.expect("pump alive");
        }

        fn sent_ids(&self, method: &str) -> Vec<u64> {
            self.sent
                .lock()
                .expect("lock")
                .iter()
                .filter(|v| v["method"] == method)
                .filter_map(|v| v["id"].as_u64())
                .collect()
        }
    }

    #[async_trait]
    impl RpcSocket for ManualSocket {
        fn source(&self) -> String {
            "manual".into()
        }

        async fn connect(&self) -> mpsc::Receiver<SocketEvent> {
            let (tx, rx) = mpsc::channel(16);
            *self.events.lock().expect("lock") = Some(tx);
            rx
        }

        async fn send(&self, text: String) -> Result<(), RpcError> {
            let value: Value = serde_json::from_str(&text).expect("request is json");
            self.sent.lock().expect("lock").push(value);
            Ok(())
        }

        async fn close(&self) {}
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn connected_syncer(socket: &Arc<ManualSocket>) -> Arc<WebSocketRpcSyncer> {
        let syncer = Arc::new(WebSocketRpcSyncer::new(
            Arc::clone(socket) as Arc<dyn RpcSocket>,
            Duration::from_secs(5),
        ));
        syncer.start().await;
        assert_eq!(syncer.state(), RpcSyncerState::Preparing);
        socket.push(SocketEvent::Connected).await;
        wait_until(|| syncer.state().is_ready()).await;
        syncer
    }

    #[tokio::test]
    async fn connect_subscribes_to_new_heads() {
        let socket = ManualSocket::new();
        let syncer = connected_syncer(&socket).await;
        let mut events = syncer.subscribe();

        wait_until(|| !socket.sent_ids("eth_subscribe").is_empty()).await;
        let id = socket.sent_ids("eth_subscribe")[0];
        socket
            .push(SocketEvent::Message(
                json!({"jsonrpc": "2.0", "id": id, "result": "0xsub"}).to_string(),
            ))
            .await;

        wait_until(|| !socket.sent_ids("eth_blockNumber").is_empty()).await;
        socket
            .push(SocketEvent::Message(
                json!({
                    "jsonrpc": "2.0",
                    "method": "eth_subscription",
                    "params": {"subscription": "0xsub", "result": {"number": "0x2a"}}
                })
                .to_string(),
            ))
            .await;

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event arrives")
            .expect("channel open");
        assert_eq!(event, RpcSyncerEvent::LastBlockHeight(42));
    }

    #[tokio::test]
    async fn responses_are_matched_by_id() {
        let socket = ManualSocket::new();
        let syncer = connected_syncer(&socket).await;

        let first = tokio::spawn({
            let syncer = Arc::clone(&syncer);
            async move { syncer.send(RpcCall::new("eth_chainId", vec![])).await }
        });
        let second = tokio::spawn({
            let syncer = Arc::clone(&syncer);
            async move { syncer.send(RpcCall::new("net_version", vec![])).await }
        });

        wait_until(|| {
            !socket.sent_ids("eth_chainId").is_empty() && !socket.sent_ids("net_version").is_empty()
        })
        .await;
        let chain_id = socket.sent_ids("eth_chainId")[0];
        let version = socket.sent_ids("net_version")[0];

        // Answer out of order.
        socket
            .push(SocketEvent::Message(
                json!({"jsonrpc": "2.0", "id": version, "result": "1"}).to_string(),
            ))
            .await;
        socket
            .push(SocketEvent::Message(
                json!({"jsonrpc": "2.0", "id": chain_id, "result": "0x1"}).to_string(),
            ))
            .await;

        assert_eq!(first.await.expect("join").expect("ok"), json!("0x1"));
        assert_eq!(second.await.expect("join").expect("ok"), json!("1"));
    }

    #[tokio::test]
    async fn disconnect_fails_every_pending_request() {
        let socket = ManualSocket::new();
        let syncer = connected_syncer(&socket).await;

        let requests: Vec<_> = (0..3)
            .map(|_| {
                let syncer = Arc::clone(&syncer);
                tokio::spawn(async move { syncer.send(RpcCall::new("eth_gasPrice", vec![])).await })
            })
            .collect();
        wait_until(|| socket.sent_ids("eth_gasPrice").len() == 3).await;

        socket
            .push(SocketEvent::Disconnected("connection reset".into()))
            .await;

        for request in requests {
            let result = request.await.expect("join");
            assert_eq!(
                result,
                Err(RpcError::Disconnected("connection reset".into()))
            );
        }
        assert_eq!(
            syncer.state(),
            RpcSyncerState::NotReady(SyncError::Disconnected("connection reset".into()))
        );
        assert_eq!(syncer.pending_requests(), 0);

        let err = syncer
            .send(RpcCall::new("eth_gasPrice", vec![]))
            .await
            .expect_err("fails fast");
        assert!(matches!(err, RpcError::NotReady(_)));
    }
}
