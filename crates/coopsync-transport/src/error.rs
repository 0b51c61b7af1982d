use std::net::SocketAddr;

/// Underlying socket or protocol error, kept opaque so the feature-gated
/// WebSocket stack does not leak into the public type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the relay listener and the participant socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listen address could not be bound.
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener failed to accept a TCP connection.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// A TCP peer connected but never completed the WebSocket upgrade.
    #[error("websocket handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: BoxError,
    },

    /// Opening an outbound connection failed.
    #[error("connect to {endpoint} failed: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("send failed: {0}")]
    SendFailed(#[source] BoxError),

    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] BoxError),

    /// The socket was already closed when it was used.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// `true` for errors caused by a single misbehaving peer rather than the
    /// listener itself.
    pub fn is_peer_error(&self) -> bool {
        matches!(self, Self::Handshake { .. } | Self::Closed)
    }
}
