use thiserror::Error;

/// Failure of a single call through the gateway.
///
/// Cloneable because one failed fetch is handed to every reader that was
/// coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("server unreachable: {0}")]
    TransportUnreachable(String),

    /// Reason reported by the remote side, verbatim.
    #[error("{0}")]
    RemoteRejected(String),

    #[error("session ended before the call completed")]
    StaleSession,

    #[error("unexpected reply to {op}: {reason}")]
    Malformed { op: &'static str, reason: String },
}

impl RpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::TransportUnreachable(_))
    }
}
