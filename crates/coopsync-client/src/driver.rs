//! The participant event loop.
//!
//! [`ClientDriver`] owns a [`Session`] and the transport handle and runs one
//! `tokio::select!` loop over four sources:
//!
//! ```text
//! transport events ──┐
//! outbound ticker ───┤
//! re-broadcast timer ┼──→ Session ──→ Effects ──→ transport / timers
//! user commands ─────┘
//! ```
//!
//! Everything the session owns is touched only from this loop.

use coopsync_protocol::{Codec, JsonCodec};
use coopsync_transport::{ClientConfig, ClientHandle, ReconnectingClient, TransportEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{ClientError, Effect, Lobby, Session, Simulation};

type Reply = oneshot::Sender<Result<(), ClientError>>;

enum DriverCommand {
    StartGame { reply: Reply },
    ChangeLevel { level: String, reply: Reply },
    RestartLevel { reply: Reply },
    Leave { reply: Reply },
}

/// Handle for user actions on a running [`ClientDriver`]. Cheap to clone.
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<DriverCommand>,
}

impl DriverHandle {
    /// Host: start the game for everyone.
    pub async fn start_game(&self) -> Result<(), ClientError> {
        self.request(|reply| DriverCommand::StartGame { reply }).await
    }

    /// Host: switch every participant to `level`.
    pub async fn change_level(&self, level: impl Into<String>) -> Result<(), ClientError> {
        let level = level.into();
        self.request(|reply| DriverCommand::ChangeLevel { level, reply })
            .await
    }

    /// Host: restart the current level everywhere.
    pub async fn restart_level(&self) -> Result<(), ClientError> {
        self.request(|reply| DriverCommand::RestartLevel { reply })
            .await
    }

    /// Leave the room. The driver's `run` returns shortly after.
    pub async fn leave(&self) -> Result<(), ClientError> {
        self.request(|reply| DriverCommand::Leave { reply }).await
    }

    async fn request(&self, make: impl FnOnce(Reply) -> DriverCommand) -> Result<(), ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| ClientError::DriverStopped)?;
        reply_rx.await.map_err(|_| ClientError::DriverStopped)?
    }
}

/// Runs a session against a live relay connection.
pub struct ClientDriver<S: Simulation, L: Lobby> {
    session: Session<S, L>,
    transport: ClientHandle,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::Receiver<DriverCommand>,
    codec: JsonCodec,
    rebroadcast: Option<Interval>,
}

impl<S: Simulation, L: Lobby> ClientDriver<S, L> {
    const COMMAND_BUFFER: usize = 16;

    /// Opens the relay connection for `session`.
    ///
    /// The join goes out from [`run`](Self::run), on the transport's first
    /// `Opened` event.
    pub async fn connect(
        endpoint: &str,
        config: ClientConfig,
        session: Session<S, L>,
    ) -> Result<(Self, DriverHandle), ClientError> {
        let (transport, events) = ReconnectingClient::connect(endpoint, config).await?;
        Ok(Self::with_transport(session, transport, events))
    }

    /// Wraps an already-open transport.
    pub fn with_transport(
        session: Session<S, L>,
        transport: ClientHandle,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (Self, DriverHandle) {
        let (command_tx, command_rx) = mpsc::channel(Self::COMMAND_BUFFER);
        let driver = Self {
            session,
            transport,
            events,
            commands: command_rx,
            codec: JsonCodec,
            rebroadcast: None,
        };
        (driver, DriverHandle { commands: command_tx })
    }

    /// Runs until the transport's event stream ends, then hands the session
    /// back.
    ///
    /// The stream ends after a requested close (leave, session error) or when
    /// reconnection gives up.
    pub async fn run(mut self) -> Session<S, L> {
        let mut outbound = time::interval(self.session.config().tick_interval);
        outbound.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        info!(role = %self.session.role(), "client driver started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!("transport event stream ended");
                        break;
                    };
                    let effects = self.session.on_transport(event);
                    self.apply(effects);
                }
                _ = outbound.tick() => {
                    let effects = self.session.outbound_tick();
                    self.apply(effects);
                }
                _ = next_rebroadcast(&mut self.rebroadcast) => {
                    let effects = self.session.rebroadcast_tick();
                    self.apply(effects);
                }
                cmd = self.commands.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd),
                        None => commands_open = false,
                    }
                }
            }
        }

        info!(state = %self.session.state(), "client driver stopped");
        self.session
    }

    fn on_command(&mut self, cmd: DriverCommand) {
        let (result, reply) = match cmd {
            DriverCommand::StartGame { reply } => (self.session.start_game(), reply),
            DriverCommand::ChangeLevel { level, reply } => (self.session.change_level(&level), reply),
            DriverCommand::RestartLevel { reply } => (self.session.restart_level(), reply),
            DriverCommand::Leave { reply } => (Ok(self.session.leave()), reply),
        };
        let result = result.map(|effects| self.apply(effects));
        let _ = reply.send(result);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(msg) => match self.codec.encode(&msg) {
                    Ok(bytes) => {
                        self.transport.send(bytes);
                    }
                    Err(e) => warn!(kind = msg.kind(), error = %e, "failed to encode message"),
                },
                Effect::CloseTransport => self.transport.close(),
                Effect::StartRebroadcast => {
                    let period = self.session.rebroadcast_interval();
                    let mut timer = time::interval_at(Instant::now() + period, period);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.rebroadcast = Some(timer);
                    debug!(period_ms = period.as_millis() as u64, "start re-broadcast armed");
                }
                Effect::StopRebroadcast => {
                    if self.rebroadcast.take().is_some() {
                        debug!("start re-broadcast cancelled");
                    }
                }
            }
        }
    }
}

/// Waits for the next re-broadcast tick, or forever when none is armed.
async fn next_rebroadcast(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
