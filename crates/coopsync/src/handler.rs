//! Per-connection handler: identity, message routing, and cleanup.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Assign a participant id from the connection id
//!   2. Loop over two sources:
//!      - inbound frames → decode → join, or route to the member's room
//!      - the member channel → encode → send (confirmations, snapshots, ...)
//!   3. On exit the membership guard leaves the room

use std::sync::Arc;

use coopsync_protocol::{ClientMessage, Codec, ParticipantId, RoomCode, ServerMessage};
use coopsync_room::{MemberAction, RoomError};
use coopsync_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;

use crate::CoopsyncError;
use crate::server::RelayState;

/// Drop guard that removes the participant from its room when the handler
/// exits, panics included. `Drop` is synchronous, so the async leave runs in
/// a fire-and-forget task.
struct MembershipGuard {
    participant: ParticipantId,
    state: Arc<RelayState>,
}

impl Drop for MembershipGuard {
    fn drop(&mut self) {
        let participant = self.participant.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut rooms = state.rooms.lock().await;
            match rooms.leave(&participant).await {
                Ok(outcome) => tracing::debug!(
                    %participant,
                    room_closed = outcome.room_closed,
                    remaining = outcome.remaining,
                    "left room on disconnect"
                ),
                Err(RoomError::NotInRoom(_)) => {}
                Err(e) => tracing::debug!(%participant, error = %e, "leave on disconnect failed"),
            }
        });
    }
}

/// Participant ids are derived from connection ids, so they are unique for
/// the life of the process.
pub(crate) fn participant_id(conn_id: ConnectionId) -> ParticipantId {
    ParticipantId::new(format!("p-{}", conn_id.into_inner()))
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(conn: WebSocketConnection, state: Arc<RelayState>) -> Result<(), CoopsyncError> {
    let participant = participant_id(conn.id());
    tracing::info!(conn_id = %conn.id(), peer = %conn.peer_addr(), %participant, "participant connected");

    let (member_tx, mut member_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let _guard = MembershipGuard {
        participant: participant.clone(),
        state: Arc::clone(&state),
    };

    loop {
        tokio::select! {
            inbound = conn.recv() => {
                let data = match inbound {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%participant, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%participant, error = %e, "recv error");
                        break;
                    }
                };

                let msg: ClientMessage = match state.codec.decode(&data) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(%participant, error = %e, "dropping malformed message");
                        continue;
                    }
                };
                handle_message(&conn, &state, &participant, &member_tx, msg).await?;
            }
            outbound = member_rx.recv() => {
                // The handler holds a sender, so the channel never closes first.
                let Some(msg) = outbound else { break };
                send(&conn, &state, &msg).await?;
            }
        }
    }

    // _guard drops here → leave fires.
    Ok(())
}

/// Handles one decoded message from the participant.
async fn handle_message(
    conn: &WebSocketConnection,
    state: &Arc<RelayState>,
    participant: &ParticipantId,
    member_tx: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) -> Result<(), CoopsyncError> {
    let action = match msg {
        ClientMessage::Join {
            role,
            room_id,
            username,
        } => {
            let room_id = match normalize_code(room_id) {
                Ok(code) => code,
                Err(e) => return send(conn, state, &ServerMessage::error(e.to_string())).await,
            };
            let result = {
                let mut rooms = state.rooms.lock().await;
                rooms
                    .join(participant.clone(), role, room_id, username, member_tx.clone())
                    .await
            };
            if let Err(e) = result {
                tracing::info!(%participant, %role, error = %e, "join refused");
                send(conn, state, &ServerMessage::error(e.to_string())).await?;
            }
            return Ok(());
        }
        ClientMessage::Key { keycode, pressed } => MemberAction::Key { keycode, pressed },
        ClientMessage::Player { player } => MemberAction::UpdatePlayer(player),
        ClientMessage::StartGame => MemberAction::StartGame,
        ClientMessage::Broadcast { payload } => MemberAction::Broadcast(payload),
        ClientMessage::Sync { bundle } => MemberAction::Sync(bundle),
        ClientMessage::Unknown => {
            tracing::warn!(%participant, "ignoring message of unknown type");
            return Ok(());
        }
    };

    let kind = action.kind();
    let result = state.rooms.lock().await.route(participant, action).await;
    match result {
        Ok(()) => Ok(()),
        Err(e @ RoomError::NotHost(_)) => send(conn, state, &ServerMessage::error(e.to_string())).await,
        Err(e) => {
            tracing::debug!(%participant, kind, error = %e, "action not routed");
            Ok(())
        }
    }
}

/// Uppercases and validates a requested code. A blank code counts as none.
fn normalize_code(code: Option<RoomCode>) -> Result<Option<RoomCode>, CoopsyncError> {
    match code {
        Some(code) if code.as_str().trim().is_empty() => Ok(None),
        Some(code) => Ok(Some(RoomCode::parse(code.as_str())?)),
        None => Ok(None),
    }
}

async fn send(conn: &WebSocketConnection, state: &Arc<RelayState>, msg: &ServerMessage) -> Result<(), CoopsyncError> {
    let bytes = state.codec.encode(msg)?;
    conn.send(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_from_connection_id() {
        assert_eq!(participant_id(ConnectionId::new(7)).as_str(), "p-7");
    }

    #[test]
    fn test_normalize_code_uppercases() {
        let code = normalize_code(Some(RoomCode::new("ab12xy"))).unwrap();
        assert_eq!(code, Some(RoomCode::new("AB12XY")));
    }

    #[test]
    fn test_normalize_code_blank_is_none() {
        assert_eq!(normalize_code(Some(RoomCode::new("  "))).unwrap(), None);
        assert_eq!(normalize_code(None).unwrap(), None);
    }

    #[test]
    fn test_normalize_code_punctuation_is_error() {
        assert!(matches!(
            normalize_code(Some(RoomCode::new("AB-12"))),
            Err(CoopsyncError::Protocol(_))
        ));
    }
}
