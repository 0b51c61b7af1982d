//! Integration tests for the WebSocket transport.
//!
//! Each test binds a real listener on an OS-assigned port and talks to it
//! over loopback, either with a raw tungstenite client or with
//! [`ReconnectingClient`].

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use coopsync_transport::{
        ClientConfig, Connection, ConnectionState, ReconnectingClient, Transport,
        TransportError, TransportEvent, WebSocketTransport,
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");
        (transport, format!("ws://{addr}"))
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("event should arrive in time")
            .expect("event stream should be open")
    }

    fn fast_config(max_attempts: u32) -> ClientConfig {
        ClientConfig::default()
            .with_backoff_base(Duration::from_millis(1))
            .with_max_reconnect_attempts(max_attempts)
    }

    // ---------------------------------------------------------------
    // Relay side
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, url) = bind().await;
        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });

        let (mut client_ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        let server_conn = server.await.expect("task should complete");
        assert!(server_conn.id().into_inner() > 0);

        server_conn
            .send(br#"{"type":"error","message":"x"}"#)
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert!(msg.is_text(), "JSON payloads travel as text frames");
        assert_eq!(msg.into_data().as_ref(), br#"{"type":"error","message":"x"}"#);

        client_ws
            .send(Message::text(r#"{"type":"startGame"}"#))
            .await
            .unwrap();
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, br#"{"type":"startGame"}"#);

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (mut transport, url) = bind().await;
        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });

        let (mut client_ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let server_conn = server.await.unwrap();

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_connection_ids_are_unique() {
        let (mut transport, url) = bind().await;
        let server = tokio::spawn(async move {
            let a = transport.accept().await.expect("first");
            let b = transport.accept().await.expect("second");
            (a.id(), b.id())
        });

        let _c1 = tokio_tungstenite::connect_async(&url).await.unwrap();
        let _c2 = tokio_tungstenite::connect_async(&url).await.unwrap();

        let (a, b) = server.await.unwrap();
        assert_ne!(a, b);
    }

    // ---------------------------------------------------------------
    // Reconnecting client
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_client_connect_emits_opened_and_exchanges_messages() {
        let (mut transport, url) = bind().await;
        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });

        let (handle, mut events) = ReconnectingClient::connect(&url, ClientConfig::default())
            .await
            .expect("connect");
        let server_conn = server.await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Opened { reconnected: false }
        );
        assert_eq!(handle.state(), ConnectionState::Open);

        assert!(handle.send(br#"{"type":"startGame"}"#.to_vec()));
        let received = server_conn.recv().await.unwrap().unwrap();
        assert_eq!(received, br#"{"type":"startGame"}"#);

        server_conn.send(b"pong").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Message(b"pong".to_vec())
        );

        handle.close();
    }

    #[tokio::test]
    async fn test_client_connect_refused_returns_connect_failed() {
        let (transport, url) = bind().await;
        drop(transport);

        let result = ReconnectingClient::connect(&url, ClientConfig::default()).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_client_reconnects_after_server_close() {
        let (mut transport, url) = bind().await;
        let (first_tx, first_rx) = tokio::sync::oneshot::channel();
        let server = tokio::spawn(async move {
            let first = transport.accept().await.expect("first accept");
            let _ = first_rx.await;
            first.close().await.expect("close");
            drop(first);
            transport.accept().await.expect("second accept")
        });

        let (handle, mut events) = ReconnectingClient::connect(&url, fast_config(5))
            .await
            .expect("connect");
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Opened { reconnected: false }
        );

        first_tx.send(()).unwrap();

        assert_eq!(next_event(&mut events).await, TransportEvent::Closed);
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(2),
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Opened { reconnected: true }
        );
        assert_eq!(handle.state(), ConnectionState::Open);

        // The new socket carries traffic.
        let second = server.await.unwrap();
        assert!(handle.send(b"again".to_vec()));
        assert_eq!(second.recv().await.unwrap().unwrap(), b"again");

        handle.close();
    }

    #[tokio::test]
    async fn test_client_gives_up_after_retry_budget() {
        let (mut transport, url) = bind().await;
        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });

        let (handle, mut events) = ReconnectingClient::connect(&url, fast_config(2))
            .await
            .expect("connect");
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Opened { reconnected: false }
        );

        // The accept task has ended, so the listener is gone and every
        // reconnect attempt is refused.
        let server_conn = server.await.unwrap();
        server_conn.close().await.unwrap();
        drop(server_conn);

        assert_eq!(next_event(&mut events).await, TransportEvent::Closed);
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Reconnecting { attempt: 2, .. }
        ));
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);

        // Terminal: nothing else arrives and sends are refused.
        let tail = timeout(WAIT, events.recv()).await.expect("stream should end");
        assert!(tail.is_none());
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(!handle.send(b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_client_close_cancels_pending_reconnect() {
        let (mut transport, url) = bind().await;
        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });

        let config = ClientConfig::default().with_backoff_base(Duration::from_secs(60));
        let (handle, mut events) = ReconnectingClient::connect(&url, config)
            .await
            .expect("connect");
        next_event(&mut events).await;

        let server_conn = server.await.unwrap();
        server_conn.close().await.unwrap();

        assert_eq!(next_event(&mut events).await, TransportEvent::Closed);
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Reconnecting { attempt: 1, .. }
        ));

        handle.close();

        // The 120 s timer is cancelled: the task exits and the stream ends.
        let tail = timeout(WAIT, events.recv()).await.expect("stream should end");
        assert!(tail.is_none());
        assert_eq!(handle.state(), ConnectionState::Closed);
    }
}
