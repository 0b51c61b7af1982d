//! Participant-side persistent socket with bounded reconnection.
//!
//! [`ReconnectingClient::connect`] opens the socket and hands back a cheap
//! [`ClientHandle`] plus an ordered stream of [`TransportEvent`]s. A background
//! task owns the socket for its whole life:
//!
//! ```text
//! connect() ──→ Open ──(unsolicited close)──→ Reconnecting{1} ─┐
//!                 ↑                                            │ sleep base×2^n
//!                 └──────────(reconnect ok, counter reset)─────┤
//!                                                              │ fail
//!                                        Reconnecting{n+1} ←───┘
//!                                              │ budget spent
//!                                              ▼
//!                                         Disconnected
//! ```
//!
//! The task never replays missed messages and does not know about rooms. A
//! caller that wants to rejoin after `Opened { reconnected: true }` must send
//! its join again.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::websocket::frame;
use crate::{Backoff, ConnectionState, TransportError};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for a [`ReconnectingClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay unit for reconnect backoff (`base × 2^attempt`).
    pub backoff_base: Duration,
    /// Reconnect attempts before giving up. 0 disables reconnection.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff_base: Backoff::DEFAULT_BASE,
            max_reconnect_attempts: Backoff::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Overrides the backoff base delay.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Overrides the reconnect budget.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}

/// Lifecycle and data events, delivered in socket order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket opened. `reconnected` is `false` only for the initial open.
    Opened { reconnected: bool },
    /// A data frame arrived.
    Message(Vec<u8>),
    /// The socket closed without being asked to.
    Closed,
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The retry budget is spent. No further events follow.
    Disconnected,
}

enum Command {
    Send(Vec<u8>),
    Close,
}

/// Handle to a running client socket. Cheap to clone.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ClientHandle {
    /// Queues a payload for delivery.
    ///
    /// Fire-and-forget: when the socket is not open the payload is dropped
    /// with a warning and `false` is returned.
    pub fn send(&self, data: Vec<u8>) -> bool {
        let state = *self.state.borrow();
        if state != ConnectionState::Open {
            tracing::warn!(%state, "cannot send: connection not open");
            return false;
        }
        self.commands.send(Command::Send(data)).is_ok()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Closes the socket and cancels any pending reconnect.
    ///
    /// Idempotent. No `Closed`/`Disconnected` event is emitted for a
    /// requested close; the event stream simply ends.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// Entry point for opening a reconnecting socket.
pub struct ReconnectingClient;

impl ReconnectingClient {
    /// Connects to `endpoint` (`ws://host:port/...`).
    ///
    /// Resolves once the socket is open. A failed initial connect is returned
    /// as [`TransportError::ConnectFailed`]; the caller may simply try again.
    pub async fn connect(
        endpoint: &str,
        config: ClientConfig,
    ) -> Result<(ClientHandle, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let ws = open(endpoint).await?;
        tracing::info!(endpoint, "connected to relay");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);

        let _ = event_tx.send(TransportEvent::Opened { reconnected: false });

        let task = ClientTask {
            endpoint: endpoint.to_owned(),
            backoff: Backoff::new(config.backoff_base, config.max_reconnect_attempts),
            commands: command_rx,
            events: event_tx,
            state: state_tx,
        };
        tokio::spawn(task.run(ws));

        Ok((
            ClientHandle {
                commands: command_tx,
                state: state_rx,
            },
            event_rx,
        ))
    }
}

async fn open(endpoint: &str) -> Result<ClientStream, TransportError> {
    let (ws, _response) = tokio_tungstenite::connect_async(endpoint)
        .await
        .map_err(|e| TransportError::ConnectFailed {
            endpoint: endpoint.to_owned(),
            source: Box::new(e),
        })?;
    Ok(ws)
}

/// Why a connected phase ended.
enum PumpExit {
    /// The peer went away or the socket errored.
    Dropped,
    /// Our side asked to close (or every handle was dropped).
    Requested,
}

struct ClientTask {
    endpoint: String,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
}

impl ClientTask {
    async fn run(mut self, mut ws: ClientStream) {
        loop {
            match self.pump(ws).await {
                PumpExit::Requested => {
                    self.state.send_replace(ConnectionState::Closed);
                    tracing::info!(endpoint = %self.endpoint, "connection closed by request");
                    return;
                }
                PumpExit::Dropped => {
                    self.state.send_replace(ConnectionState::Closed);
                    tracing::warn!(endpoint = %self.endpoint, "connection dropped");
                    self.emit(TransportEvent::Closed);
                }
            }

            match self.reconnect().await {
                Some(next) => ws = next,
                None => return,
            }
        }
    }

    /// Shuttles frames both ways until the socket goes away.
    async fn pump(&mut self, ws: ClientStream) -> PumpExit {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(TransportEvent::Message(text.as_bytes().to_vec()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.emit(TransportEvent::Message(data.into()));
                    }
                    Some(Ok(Message::Close(_))) | None => return PumpExit::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "socket read failed");
                        return PumpExit::Dropped;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(data)) => {
                        if let Err(e) = sink.send(frame(&data)).await {
                            tracing::debug!(error = %e, "socket write failed");
                            return PumpExit::Dropped;
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = sink.close().await;
                        return PumpExit::Requested;
                    }
                },
            }
        }
    }

    /// Walks the backoff schedule. Returns the new socket, or `None` when the
    /// budget is spent or a close was requested mid-wait.
    async fn reconnect(&mut self) -> Option<ClientStream> {
        loop {
            let Some(delay) = self.backoff.next_delay() else {
                tracing::error!(
                    endpoint = %self.endpoint,
                    attempts = self.backoff.attempt(),
                    "max reconnection attempts reached"
                );
                self.state.send_replace(ConnectionState::Closed);
                self.emit(TransportEvent::Disconnected);
                return None;
            };
            let attempt = self.backoff.attempt();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            self.state.send_replace(ConnectionState::Connecting);
            self.emit(TransportEvent::Reconnecting { attempt, delay });

            if !self.wait_or_cancel(delay).await {
                self.state.send_replace(ConnectionState::Closed);
                tracing::info!("pending reconnect cancelled");
                return None;
            }

            match open(&self.endpoint).await {
                Ok(ws) => {
                    self.backoff.reset();
                    self.state.send_replace(ConnectionState::Open);
                    tracing::info!(endpoint = %self.endpoint, attempt, "reconnected");
                    self.emit(TransportEvent::Opened { reconnected: true });
                    return Some(ws);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    /// Sleeps for `delay`, returning `false` if a close arrives first.
    /// Sends queued while not open are dropped.
    async fn wait_or_cancel(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => {
                        tracing::warn!("dropping send while reconnecting");
                    }
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("transport event dropped: receiver gone");
        }
    }
}
