//! Relay-side WebSocket listener.
//!
//! Every accepted socket is split into a sink and a stream so a handler can
//! wait on inbound frames and push room traffic at the same time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::{Connection, ConnectionId, Transport, TransportError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Listens for participants on a TCP address and upgrades each socket.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds to `addr`. Port `0` picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        tracing::info!(addr, "relay listener bound");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        // Snapshots are small and latency-bound.
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not disable Nagle");
        }

        let ws = tokio_tungstenite::accept_async(tcp)
            .await
            .map_err(|e| TransportError::Handshake {
                peer,
                source: Box::new(e),
            })?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer, "participant socket upgraded");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// One participant's socket on the relay.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// Remote address of the participant.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(frame(data))
            .await
            .map_err(send_error)
    }

    /// Skips control frames. Only the stream half is locked, so this is safe
    /// to race against other futures in `select!`.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        while let Some(item) = stream.next().await {
            match item {
                Ok(Message::Text(text)) => return Ok(Some(text.as_bytes().to_vec())),
                Ok(Message::Binary(data)) => return Ok(Some(data.into())),
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed) => return Ok(None),
                Err(e) => return Err(TransportError::ReceiveFailed(Box::new(e))),
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self.sink.lock().await.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(send_error(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

fn send_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::SendFailed(Box::new(other)),
    }
}

/// JSON goes out as text frames so browser peers can read it without a Blob
/// round-trip. Anything that is not UTF-8 falls back to binary.
pub(crate) fn frame(data: &[u8]) -> Message {
    match std::str::from_utf8(data) {
        Ok(text) => Message::text(text.to_owned()),
        Err(_) => Message::binary(data.to_vec()),
    }
}
