//! Shared RPC syncers, one per node endpoint.
//!
//! Several kits pointed at the same node share one connection; the registry hands
//! out the existing syncer for a source it has already seen.

use dashmap::DashMap;
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use evmkit_data::rpc::{
    HttpRpcSyncer, NodeApiProvider, NodeWebSocket, RpcSyncer, WebSocketRpcSyncer,
};

use crate::config::RpcSource;

#[derive(Default)]
pub struct RpcProviderRegistry {
    syncers: DashMap<RpcSource, Arc<dyn RpcSyncer>>,
}

impl RpcProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the syncer for `source`, creating it on first use. Creation does not
    /// connect; call [`RpcSyncer::start`].
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn syncer(&self, source: &RpcSource, request_timeout: Duration) -> Result<Arc<dyn RpcSyncer>> {
        if let Some(existing) = self.syncers.get(source) {
            return Ok(Arc::clone(existing.value()));
        }

        let created: Arc<dyn RpcSyncer> = match source {
            RpcSource::Http { url, sync_interval } => {
                let provider = NodeApiProvider::new(url, request_timeout)?;
                Arc::new(HttpRpcSyncer::new(Arc::new(provider), *sync_interval))
            }
            RpcSource::WebSocket { url } => Arc::new(WebSocketRpcSyncer::new(
                Arc::new(NodeWebSocket::new(url)),
                request_timeout,
            )),
        };

        // A concurrent caller may have won the race; keep whichever landed first.
        let entry = self
            .syncers
            .entry(source.clone())
            .or_insert_with(|| {
                info!(url = source.url(), "created rpc syncer");
                created
            });
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.syncers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syncers.is_empty()
    }

    /// Stops and forgets every syncer.
    pub async fn clear(&self) {
        let syncers: Vec<Arc<dyn RpcSyncer>> = self
            .syncers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.syncers.clear();
        for syncer in syncers {
            syncer.stop().await;
        }
    }
}
