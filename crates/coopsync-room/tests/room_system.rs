//! Integration tests for the room system: directory plus live room actors.

use std::time::Duration;

use coopsync_protocol::{
    HostCommand, ParticipantId, PlayerUpdate, Position, Role, RoomCode, ServerMessage, SyncBundle,
};
use coopsync_room::{
    HOST_LEFT_MESSAGE, MemberAction, RoomConfig, RoomDirectory, RoomError, RoomState,
};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

type Inbox = mpsc::UnboundedReceiver<ServerMessage>;

fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

/// Directory with periodic snapshots disabled, so inboxes only carry
/// event-driven messages.
fn quiet_directory() -> RoomDirectory {
    RoomDirectory::new(RoomConfig::default().with_snapshot_rate(0))
}

async fn host_room(dir: &mut RoomDirectory, host: &str) -> (RoomCode, Inbox) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let code = dir
        .join(pid(host), Role::Host, None, Some(host.into()), tx)
        .await
        .expect("host join");
    assert!(matches!(rx.recv().await, Some(ServerMessage::RoomCreated { .. })));
    (code, rx)
}

async fn client_join(
    dir: &mut RoomDirectory,
    who: &str,
    code: &RoomCode,
) -> Result<Inbox, RoomError> {
    let (tx, rx) = mpsc::unbounded_channel();
    dir.join(pid(who), Role::Client, Some(code.clone()), Some(who.into()), tx)
        .await?;
    Ok(rx)
}

async fn next(rx: &mut Inbox) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("message in time")
        .expect("channel open")
}

// =========================================================================
// Create / join
// =========================================================================

#[tokio::test]
async fn test_host_join_creates_room_with_generated_code() {
    let mut dir = quiet_directory();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let code = dir.join(pid("h"), Role::Host, None, None, tx).await.unwrap();

    assert_eq!(code.as_str().len(), 6);
    assert_eq!(dir.room_count(), 1);
    assert_eq!(dir.member_room(&pid("h")), Some(&code));
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::RoomCreated {
            room_id: code,
            player_id: pid("h"),
        }
    );
}

#[tokio::test]
async fn test_host_join_with_taken_code_returns_already_exists() {
    let mut dir = quiet_directory();
    let code = RoomCode::new("ABC123");
    let (tx, _rx) = mpsc::unbounded_channel();
    dir.join(pid("h1"), Role::Host, Some(code.clone()), None, tx)
        .await
        .unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = dir
        .join(pid("h2"), Role::Host, Some(code), None, tx)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Room already exists");
    assert_eq!(dir.room_count(), 1);
}

#[tokio::test]
async fn test_host_rejoin_reclaims_code_from_disconnected_host() {
    let mut dir = quiet_directory();
    let code = RoomCode::new("K3X9QZ");
    let (tx, rx) = mpsc::unbounded_channel();
    dir.join(pid("p-1"), Role::Host, Some(code.clone()), None, tx)
        .await
        .unwrap();
    let mut client_rx = client_join(&mut dir, "p-2", &code).await.unwrap();
    assert!(matches!(next(&mut client_rx).await, ServerMessage::JoinedRoom { .. }));
    // The old connection is gone; its leave has not been processed yet.
    drop(rx);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let rejoined = dir
        .join(pid("p-3"), Role::Host, Some(code.clone()), None, tx)
        .await
        .unwrap();

    assert_eq!(rejoined, code);
    assert_eq!(dir.room_count(), 1);
    assert_eq!(dir.member_room(&pid("p-3")), Some(&code));
    assert!(dir.member_room(&pid("p-1")).is_none());
    assert!(dir.member_room(&pid("p-2")).is_none());
    assert_eq!(next(&mut client_rx).await, ServerMessage::error(HOST_LEFT_MESSAGE));
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::RoomCreated {
            room_id: code,
            player_id: pid("p-3"),
        }
    );
    // The late leave from the old connection finds nothing to do.
    assert!(matches!(dir.leave(&pid("p-1")).await, Err(RoomError::NotInRoom(_))));
}

#[tokio::test]
async fn test_client_join_unknown_code_returns_not_found() {
    let mut dir = quiet_directory();
    let err = client_join(&mut dir, "c", &RoomCode::new("NOPE42"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Room 'NOPE42' not found");
}

#[tokio::test]
async fn test_client_join_without_code_returns_not_found() {
    let mut dir = quiet_directory();
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = dir
        .join(pid("c"), Role::Client, None, None, tx)
        .await
        .unwrap_err();
    assert!(matches!(err, RoomError::NotFound(_)));
}

#[tokio::test]
async fn test_client_join_confirms_and_notifies_host() {
    let mut dir = quiet_directory();
    let (code, mut host_rx) = host_room(&mut dir, "h").await;

    let mut client_rx = client_join(&mut dir, "c", &code).await.unwrap();

    assert_eq!(
        next(&mut client_rx).await,
        ServerMessage::JoinedRoom {
            room_id: code.clone(),
            player_id: pid("c"),
            player_count: 2,
        }
    );
    assert_eq!(
        next(&mut host_rx).await,
        ServerMessage::PlayerJoined {
            player_id: pid("c"),
            username: Some("c".into()),
            player_count: 2,
        }
    );
    assert_eq!(dir.member_room(&pid("c")), Some(&code));
}

#[tokio::test]
async fn test_seventh_member_gets_room_full() {
    let mut dir = quiet_directory();
    let (code, _host_rx) = host_room(&mut dir, "h").await;
    let mut inboxes = Vec::new();
    for i in 1..=5 {
        inboxes.push(client_join(&mut dir, &format!("c{i}"), &code).await.unwrap());
    }

    let err = client_join(&mut dir, "c6", &code).await.unwrap_err();

    assert_eq!(err.to_string(), "Room is full (max 6 players)");
    assert_eq!(dir.member_room(&pid("c6")), None);
    let info = dir.room_info(&code).await.unwrap();
    assert_eq!(info.player_count, 6);
}

#[tokio::test]
async fn test_join_second_room_is_rejected() {
    let mut dir = quiet_directory();
    let (a, _ha) = host_room(&mut dir, "ha").await;
    let (b, _hb) = host_room(&mut dir, "hb").await;
    let _c = client_join(&mut dir, "c", &a).await.unwrap();

    let err = client_join(&mut dir, "c", &b).await.unwrap_err();
    assert!(matches!(err, RoomError::AlreadyInRoom(..)));
}

// =========================================================================
// Leave
// =========================================================================

#[tokio::test]
async fn test_client_leave_keeps_room_and_notifies_others() {
    let mut dir = quiet_directory();
    let (code, mut host_rx) = host_room(&mut dir, "h").await;
    let _c = client_join(&mut dir, "c", &code).await.unwrap();
    next(&mut host_rx).await; // playerJoined

    let outcome = dir.leave(&pid("c")).await.unwrap();

    assert!(!outcome.room_closed);
    assert_eq!(outcome.remaining, 1);
    assert_eq!(dir.room_count(), 1);
    assert_eq!(
        next(&mut host_rx).await,
        ServerMessage::PlayerLeft { player_id: pid("c") }
    );
}

#[tokio::test]
async fn test_host_leave_closes_room_and_tells_members() {
    let mut dir = quiet_directory();
    let (code, _host_rx) = host_room(&mut dir, "h").await;
    let mut c1 = client_join(&mut dir, "c1", &code).await.unwrap();
    let mut c2 = client_join(&mut dir, "c2", &code).await.unwrap();
    next(&mut c1).await; // joinedRoom
    next(&mut c2).await;

    let outcome = dir.leave(&pid("h")).await.unwrap();

    assert!(outcome.room_closed);
    assert_eq!(dir.room_count(), 0);
    assert_eq!(dir.member_room(&pid("c1")), None);
    for rx in [&mut c1, &mut c2] {
        assert_eq!(next(rx).await, ServerMessage::error(HOST_LEFT_MESSAGE));
        // Actor is gone: the channel closes.
        assert!(rx.recv().await.is_none());
    }
}

#[tokio::test]
async fn test_leave_not_in_any_room() {
    let mut dir = quiet_directory();
    let result = dir.leave(&pid("ghost")).await;
    assert!(matches!(result, Err(RoomError::NotInRoom(_))));
}

#[tokio::test]
async fn test_code_reusable_after_room_closes() {
    let mut dir = quiet_directory();
    let code = RoomCode::new("AGAIN1");
    let (tx, _rx) = mpsc::unbounded_channel();
    dir.join(pid("h"), Role::Host, Some(code.clone()), None, tx)
        .await
        .unwrap();
    dir.leave(&pid("h")).await.unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(dir.join(pid("h"), Role::Host, Some(code), None, tx).await.is_ok());
}

// =========================================================================
// Actions
// =========================================================================

#[tokio::test]
async fn test_start_game_from_client_returns_error_to_sender() {
    let mut dir = quiet_directory();
    let (code, _host_rx) = host_room(&mut dir, "h").await;
    let mut c = client_join(&mut dir, "c", &code).await.unwrap();
    next(&mut c).await; // joinedRoom

    dir.route(&pid("c"), MemberAction::StartGame).await.unwrap();

    assert_eq!(next(&mut c).await, ServerMessage::error("Only host can start the game"));
    let info = dir.room_info(&code).await.unwrap();
    assert_eq!(info.state, RoomState::Pending);
}

#[tokio::test]
async fn test_start_game_outside_room_returns_not_host() {
    let dir = quiet_directory();
    let err = dir.route(&pid("c"), MemberAction::StartGame).await.unwrap_err();
    assert_eq!(err.to_string(), "Only host can start the game");
}

#[tokio::test]
async fn test_start_game_from_host_activates_and_announces() {
    let mut dir = quiet_directory();
    let (code, mut host_rx) = host_room(&mut dir, "h").await;
    let mut c = client_join(&mut dir, "c", &code).await.unwrap();
    next(&mut c).await;
    next(&mut host_rx).await;

    dir.route(&pid("h"), MemberAction::StartGame).await.unwrap();

    let started = ServerMessage::GameStarted { player_count: 2 };
    assert_eq!(next(&mut host_rx).await, started);
    assert_eq!(next(&mut c).await, started);
    let info = dir.room_info(&code).await.unwrap();
    assert_eq!(info.state, RoomState::Active);
    assert!(info.started);
}

#[tokio::test]
async fn test_broadcast_reaches_clients_only() {
    let mut dir = quiet_directory();
    let (code, mut host_rx) = host_room(&mut dir, "h").await;
    let mut c = client_join(&mut dir, "c", &code).await.unwrap();
    next(&mut c).await;
    next(&mut host_rx).await;

    dir.route(&pid("h"), MemberAction::Broadcast(HostCommand::set_level("two")))
        .await
        .unwrap();

    assert_eq!(
        next(&mut c).await,
        ServerMessage::HostBroadcast {
            payload: HostCommand::set_level("two"),
        }
    );
    // Round-trip through the actor, then confirm the host got nothing.
    dir.room_info(&code).await.unwrap();
    assert!(host_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_broadcast_from_client_is_ignored() {
    let mut dir = quiet_directory();
    let (code, _host_rx) = host_room(&mut dir, "h").await;
    let mut c1 = client_join(&mut dir, "c1", &code).await.unwrap();
    let mut c2 = client_join(&mut dir, "c2", &code).await.unwrap();
    next(&mut c1).await;
    next(&mut c2).await;

    dir.route(&pid("c1"), MemberAction::Broadcast(HostCommand::restart_level()))
        .await
        .unwrap();

    dir.room_info(&code).await.unwrap();
    assert!(c2.try_recv().is_err());
}

#[tokio::test]
async fn test_route_not_in_room() {
    let dir = quiet_directory();
    let result = dir
        .route(&pid("x"), MemberAction::UpdatePlayer(PlayerUpdate::default()))
        .await;
    assert!(matches!(result, Err(RoomError::NotInRoom(_))));
}

// =========================================================================
// Snapshots
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_snapshot_carries_merged_state_and_sync() {
    let mut dir = RoomDirectory::new(
        RoomConfig::default()
            .with_snapshot_rate(30)
            .with_initial_jitter(Duration::ZERO),
    );
    let (code, mut host_rx) = host_room(&mut dir, "h").await;
    let mut c = client_join(&mut dir, "c", &code).await.unwrap();

    dir.route(
        &pid("c"),
        MemberAction::UpdatePlayer(PlayerUpdate {
            position: Some(Position::new(8.0, 2.0)),
            color: Some("blue".into()),
            ..PlayerUpdate::default()
        }),
    )
    .await
    .unwrap();
    let mut bundle = SyncBundle::new();
    bundle.insert("doors".into(), vec![serde_json::json!({ "id": 1, "open": true })]);
    dir.route(&pid("h"), MemberAction::Sync(bundle.clone()))
        .await
        .unwrap();
    dir.route(&pid("h"), MemberAction::StartGame).await.unwrap();

    // Skip event messages until the first snapshot.
    let snapshot = loop {
        match next(&mut c).await {
            msg @ ServerMessage::GameState { .. } => break msg,
            _ => continue,
        }
    };
    let ServerMessage::GameState {
        players,
        sync,
        room_id,
        player_count,
        started,
    } = snapshot
    else {
        unreachable!()
    };

    assert_eq!(room_id, code);
    assert_eq!(player_count, 2);
    assert!(started);
    assert_eq!(sync, bundle);
    let c_state = &players[&pid("c")];
    assert_eq!(c_state.position, Some(Position::new(8.0, 2.0)));
    assert_eq!(c_state.color.as_deref(), Some("blue"));
    assert_eq!(c_state.username.as_deref(), Some("c"));

    // Host sees the same snapshot.
    let host_saw_snapshot = loop {
        match next(&mut host_rx).await {
            ServerMessage::GameState { .. } => break true,
            _ => continue,
        }
    };
    assert!(host_saw_snapshot);
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_arrive_at_configured_rate() {
    let mut dir = RoomDirectory::new(
        RoomConfig::default()
            .with_snapshot_rate(10)
            .with_initial_jitter(Duration::ZERO),
    );
    let (code, _host_rx) = host_room(&mut dir, "h").await;

    tokio::time::sleep(Duration::from_millis(1050)).await;

    let info = dir.room_info(&code).await.unwrap();
    assert_eq!(info.snapshots_sent, 10);
}

#[tokio::test]
async fn test_close_all_shuts_every_room() {
    let mut dir = quiet_directory();
    let (_a, mut ha) = host_room(&mut dir, "ha").await;
    let (_b, mut hb) = host_room(&mut dir, "hb").await;

    dir.close_all().await;

    assert_eq!(dir.room_count(), 0);
    assert!(ha.recv().await.is_none());
    assert!(hb.recv().await.is_none());
}
