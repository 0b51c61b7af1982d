//! Transport layer for coopsync.
//!
//! Two halves live here:
//!
//! - the relay side: [`Transport`] and [`Connection`] traits with a WebSocket
//!   listener implementation, one [`Connection`] per participant;
//! - the participant side: [`ReconnectingClient`], a persistent socket that
//!   reconnects with exponential [`Backoff`] after an unsolicited close.
//!
//! Neither half understands messages. Payloads are opaque bytes; decoding
//! belongs to `coopsync-protocol`.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod backoff;
#[cfg(feature = "websocket")]
mod client;
mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use backoff::Backoff;
#[cfg(feature = "websocket")]
pub use client::{ClientConfig, ClientHandle, ReconnectingClient, TransportEvent};
pub use error::{BoxError, TransportError};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Relay-assigned number for an accepted socket. Unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of an outbound connection.
///
/// ```text
/// Connecting ──(open)──→ Open ──(close)──→ Closed
///     ↑                                      │
///     └──────────(reconnect attempt)─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connect or reconnect attempt is in flight (or scheduled).
    Connecting,
    /// The socket is open and `send` will deliver.
    Open,
    /// The socket is closed. Terminal once the retry budget is spent.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Source of participant connections on the relay.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next participant. Errors from a single bad peer do not
    /// make the listener unusable; keep calling.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A participant's socket as seen by the relay: opaque payloads in, opaque
/// payloads out.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Next payload from the participant, or `Ok(None)` once it has hung up.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;
}
