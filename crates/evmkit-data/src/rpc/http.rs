//! HTTP polling RPC syncer.
//!
//! HTTP has no push channel, so liveness is inferred from a periodic
//! `eth_blockNumber` poll: a connectivity failure flips the syncer to `NotReady`,
//! the next successful poll flips it back to `Ready`.

use async_trait::async_trait;
use eyre::{Context, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::RpcError;
use super::jsonrpc::{BlockNumber, JsonRpc, JsonRpcRequest, JsonRpcResponse, RpcCall};
use super::syncer::{RpcSyncer, RpcSyncerEvent, RpcSyncerState, SyncerSignals};
use crate::state::SyncError;

/// Attempts per request when the node keeps answering HTTP 429.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Request/response transport for one JSON-RPC endpoint.
#[async_trait]
pub trait RpcApiProvider: Send + Sync {
    fn source(&self) -> String;

    async fn fetch(&self, call: &RpcCall) -> Result<Value, RpcError>;
}

/// JSON-RPC over HTTP POST with `reqwest`.
pub struct NodeApiProvider {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl NodeApiProvider {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcApiProvider for NodeApiProvider {
    fn source(&self) -> String {
        self.url.clone()
    }

    #[tracing::instrument(skip_all, fields(method = %call.method))]
    async fn fetch(&self, call: &RpcCall) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, call);
        let mut attempt = 0u32;

        loop {
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        RpcError::Timeout
                    } else {
                        RpcError::Transport(e.to_string())
                    }
                })?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(1);
                attempt += 1;
                warn!(retry_after_s = retry_after, attempt, "node rate limit hit, waiting");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RpcError::Transport(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body
                )));
            }

            let envelope: JsonRpcResponse = response
                .json()
                .await
                .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
            return envelope.into_result();
        }
    }
}

/// RPC syncer backed by an [`RpcApiProvider`] and a block-number poll.
pub struct HttpRpcSyncer {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    provider: Arc<dyn RpcApiProvider>,
    sync_interval: Duration,
    signals: SyncerSignals,
    running: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HttpRpcSyncer {
    pub fn new(provider: Arc<dyn RpcApiProvider>, sync_interval: Duration) -> Self {
        Self {
            inner: Arc::new(HttpInner {
                provider,
                sync_interval,
                signals: SyncerSignals::new(),
                running: AtomicBool::new(false),
                poller: Mutex::new(None),
            }),
        }
    }
}

impl HttpInner {
    /// Fetches the block number and updates connectivity from the outcome.
    async fn poll(&self) {
        let result = self.provider.fetch(&BlockNumber.call()).await;
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        match result.and_then(|value| BlockNumber.parse(value)) {
            Ok(height) => {
                self.signals.set_state(RpcSyncerState::Ready);
                self.signals.emit_block_height(height.to::<u64>());
            }
            Err(err) if err.is_connectivity() => {
                warn!(error = %err, "block number poll failed");
                self.signals
                    .set_state(RpcSyncerState::NotReady(SyncError::from(err)));
            }
            Err(err) => {
                warn!(error = %err, "node rejected block number poll");
            }
        }
    }

    fn abort_poller(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl RpcSyncer for HttpRpcSyncer {
    fn source(&self) -> String {
        format!("http {}", self.inner.provider.source())
    }

    fn state(&self) -> RpcSyncerState {
        self.inner.signals.state()
    }

    fn subscribe(&self) -> broadcast::Receiver<RpcSyncerEvent> {
        self.inner.signals.subscribe()
    }

    #[tracing::instrument(skip(self), fields(source = %self.inner.provider.source()))]
    async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("already started");
            return;
        }

        self.inner.poll().await;
        if !self.inner.signals.state().is_ready() {
            self.inner
                .signals
                .set_state(RpcSyncerState::NotReady(SyncError::NoNetworkConnection));
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.sync_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                inner.poll().await;
            }
        });
        *self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(state = ?self.inner.signals.state(), "http rpc syncer started");
    }

    async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.abort_poller();
        self.inner
            .signals
            .set_state(RpcSyncerState::NotReady(SyncError::NotStarted));
    }

    async fn refresh(&self) {
        if self.inner.running.load(Ordering::SeqCst) {
            self.inner.poll().await;
        }
    }

    async fn send(&self, call: RpcCall) -> Result<Value, RpcError> {
        self.inner.signals.state().ensure_ready()?;

        let result = self.inner.provider.fetch(&call).await;
        if let Err(err) = &result {
            if err.is_connectivity() && self.inner.running.load(Ordering::SeqCst) {
                self.inner
                    .signals
                    .set_state(RpcSyncerState::NotReady(SyncError::from(err.clone())));
            }
        }
        result
    }
}

impl Drop for HttpRpcSyncer {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.abort_poller();
    }
}
