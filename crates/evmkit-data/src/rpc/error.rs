use crate::state::SyncError;

/// Failure of a single JSON-RPC request.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The syncer is not in the `Ready` state; the request was not sent.
    #[error("rpc syncer not ready: {0}")]
    NotReady(SyncError),
    /// The transport could not deliver the request.
    #[error("transport error: {0}")]
    Transport(String),
    /// The connection closed while the request was in flight.
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("request timed out")]
    Timeout,
    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Response { code: i64, message: String },
    /// The node answered with something that does not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Connectivity failures degrade syncer state; application errors only reach the caller.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RpcError::NotReady(_)
                | RpcError::Transport(_)
                | RpcError::Disconnected(_)
                | RpcError::Timeout
        )
    }
}

impl From<RpcError> for SyncError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::NotReady(error) => error,
            RpcError::Disconnected(reason) => SyncError::Disconnected(reason),
            RpcError::Transport(_) | RpcError::Timeout => SyncError::NoNetworkConnection,
            other => SyncError::Rpc(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_errors_are_not_connectivity() {
        let revert = RpcError::Response {
            code: 3,
            message: "execution reverted".into(),
        };
        assert!(!revert.is_connectivity());
        assert!(!RpcError::InvalidResponse("null".into()).is_connectivity());
        assert!(RpcError::Timeout.is_connectivity());
        assert!(RpcError::Disconnected("closed".into()).is_connectivity());
    }

    #[test]
    fn maps_to_sync_error() {
        assert_eq!(
            SyncError::from(RpcError::Timeout),
            SyncError::NoNetworkConnection
        );
        assert_eq!(
            SyncError::from(RpcError::NotReady(SyncError::NotStarted)),
            SyncError::NotStarted
        );
        assert!(matches!(
            SyncError::from(RpcError::Response {
                code: -32000,
                message: "nonce too low".into()
            }),
            SyncError::Rpc(_)
        ));
    }
}
