//! Transport-independent RPC syncer contract.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::error::RpcError;
use super::jsonrpc::{JsonRpc, RpcCall};
use crate::state::{StateChannel, SyncError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connectivity of an RPC syncer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcSyncerState {
    /// Handshake in progress; requests are refused.
    Preparing,
    /// Requests may be issued.
    Ready,
    /// Disconnected or stopped; requests fail fast with this error.
    NotReady(SyncError),
}

impl Default for RpcSyncerState {
    fn default() -> Self {
        Self::NotReady(SyncError::NotStarted)
    }
}

impl RpcSyncerState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// `Ok` when requests may be sent, otherwise the fail-fast error.
    pub fn ensure_ready(&self) -> Result<(), RpcError> {
        match self {
            RpcSyncerState::Ready => Ok(()),
            RpcSyncerState::Preparing => Err(RpcError::NotReady(SyncError::NoNetworkConnection)),
            RpcSyncerState::NotReady(error) => Err(RpcError::NotReady(error.clone())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcSyncerEvent {
    StateChanged(RpcSyncerState),
    /// Latest block number observed by a poll or a new-head push.
    LastBlockHeight(u64),
}

/// One live connection to a node, with an observable connectivity state.
#[async_trait]
pub trait RpcSyncer: Send + Sync {
    /// Human-readable endpoint description for logs.
    fn source(&self) -> String;

    fn state(&self) -> RpcSyncerState;

    fn subscribe(&self) -> broadcast::Receiver<RpcSyncerEvent>;

    async fn start(&self);

    async fn stop(&self);

    /// Re-polls the node, reconnecting first when the connection was lost.
    async fn refresh(&self);

    /// Sends one request and returns the raw `result` member.
    async fn send(&self, call: RpcCall) -> Result<Value, RpcError>;
}

/// Sends a typed request through any syncer.
pub async fn single<R: JsonRpc>(syncer: &dyn RpcSyncer, rpc: &R) -> Result<R::Output, RpcError> {
    let result = syncer.send(rpc.call()).await?;
    rpc.parse(result)
}

/// State plus event fan-out shared by the syncer implementations.
pub(crate) struct SyncerSignals {
    state: StateChannel<RpcSyncerState>,
    events: broadcast::Sender<RpcSyncerEvent>,
}

impl SyncerSignals {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: StateChannel::default(),
            events,
        }
    }

    pub(crate) fn state(&self) -> RpcSyncerState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: RpcSyncerState) {
        if self.state.set(state.clone()) {
            tracing::debug!(?state, "rpc syncer state changed");
            let _ = self.events.send(RpcSyncerEvent::StateChanged(state));
        }
    }

    pub(crate) fn emit_block_height(&self, height: u64) {
        let _ = self.events.send(RpcSyncerEvent::LastBlockHeight(height));
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<RpcSyncerEvent> {
        self.events.clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RpcSyncerEvent> {
        self.events.subscribe()
    }
}
