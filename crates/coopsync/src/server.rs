//! `RelayServer` builder and accept loop.
//!
//! The relay ties the layers together: transport → protocol → rooms. Each
//! accepted socket gets its own task running
//! [`handle_connection`](crate::handler::handle_connection).

use std::sync::Arc;

use coopsync_protocol::JsonCodec;
use coopsync_room::{RoomConfig, RoomDirectory};
use coopsync_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::{CoopsyncError, RelayConfig};

/// Shared relay state passed to each connection task.
///
/// The directory sits behind a mutex because joins and leaves from many
/// connections race on it; per-room work happens in the room actors.
pub(crate) struct RelayState {
    pub(crate) rooms: Mutex<RoomDirectory>,
    pub(crate) codec: JsonCodec,
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// use coopsync::prelude::*;
///
/// # async fn start() -> Result<(), CoopsyncError> {
/// let server = RelayServer::builder()
///     .bind("0.0.0.0:8765")
///     .room_config(RoomConfig::default().with_snapshot_rate(20))
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RelayServerBuilder {
    bind_addr: String,
    room_config: RoomConfig,
}

impl RelayServerBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::from_config(RelayConfig::default())
    }

    /// Starts from a loaded [`RelayConfig`].
    pub fn from_config(config: RelayConfig) -> Self {
        Self {
            bind_addr: config.bind_addr,
            room_config: config.room,
        }
    }

    /// Sets the address to listen on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the settings every room is spawned with.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.room_config = config;
        self
    }

    /// Binds the listener.
    pub async fn build(self) -> Result<RelayServer, CoopsyncError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(RelayState {
            rooms: Mutex::new(RoomDirectory::new(self.room_config)),
            codec: JsonCodec,
        });

        Ok(RelayServer { transport, state })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay. Call [`run()`](Self::run) to start accepting participants.
pub struct RelayServer {
    transport: WebSocketTransport,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }

    /// Returns the local address the relay is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(mut self) -> Result<(), CoopsyncError> {
        match self.local_addr() {
            Ok(addr) => tracing::info!(%addr, "coopsync relay running"),
            Err(_) => tracing::info!("coopsync relay running"),
        }

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) if e.is_peer_error() => {
                    tracing::debug!(error = %e, "rejected connection");
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
