//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it
//! either through `WebSocketConnection::connect` or through a raw
//! `tokio-tungstenite` client when a test needs hand-built frames.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::SinkExt;
    use netsync_transport::{
        Connection, DeliveryMethod, Transport, WebSocketConnection,
        WebSocketTransport,
    };
    use tokio_tungstenite::tungstenite::Message;

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, addr) = bind().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let client = WebSocketConnection::connect(&addr)
            .await
            .expect("client should connect");
        let server_conn = server_handle.await.expect("task should complete");

        client
            .send(b"hello", DeliveryMethod::ReliableOrdered)
            .await
            .expect("client send");
        let received = server_conn.recv().await.expect("recv").expect("open");
        assert_eq!(&received[..], b"hello");

        server_conn
            .send(b"welcome", DeliveryMethod::ReliableOrdered)
            .await
            .expect("server send");
        let received = client.recv().await.expect("recv").expect("open");
        assert_eq!(&received[..], b"welcome");
    }

    #[tokio::test]
    async fn test_websocket_send_does_not_wait_on_pending_recv() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let client = WebSocketConnection::connect(&addr).await.unwrap();
        let server_conn =
            std::sync::Arc::new(server_handle.await.expect("accepted"));

        // Park a recv on the server connection, then send through it.
        let receiver = std::sync::Arc::clone(&server_conn);
        let pending = tokio::spawn(async move { receiver.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            server_conn.send(b"ping", DeliveryMethod::Unreliable),
        )
        .await
        .expect("send should not block behind recv")
        .expect("send ok");

        let got = client.recv().await.unwrap().unwrap();
        assert_eq!(&got[..], b"ping");

        client.send(b"pong", DeliveryMethod::Unreliable).await.unwrap();
        let got = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(&got[..], b"pong");
    }

    #[tokio::test]
    async fn test_websocket_sequenced_tier_drops_stale_frames() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let (mut raw, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}"))
                .await
                .expect("raw client should connect");
        let server_conn = server_handle.await.unwrap();

        // Sequences 1, 3, 2 on UnreliableSequenced, then a marker.
        for (seq, body) in [(1u16, b'a'), (3, b'c'), (2, b'b')] {
            let [lo, hi] = seq.to_le_bytes();
            let frame = vec![2, lo, hi, body];
            raw.send(Message::Binary(frame.into())).await.unwrap();
        }
        raw.send(Message::Binary(vec![34, 0, 0, b'z'].into()))
            .await
            .unwrap();

        let mut delivered = Vec::new();
        for _ in 0..3 {
            let msg = server_conn.recv().await.unwrap().unwrap();
            delivered.push(msg[0]);
        }
        assert_eq!(delivered, vec![b'a', b'c', b'z']);
    }

    #[tokio::test]
    async fn test_websocket_malformed_frames_are_skipped() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let (mut raw, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}"))
                .await
                .expect("raw client should connect");
        let server_conn = server_handle.await.unwrap();

        // Unknown tier, then a frame too short for a header, then a good one.
        raw.send(Message::Binary(vec![99, 0, 0, b'x'].into()))
            .await
            .unwrap();
        raw.send(Message::Binary(vec![67].into())).await.unwrap();
        raw.send(Message::Binary(vec![67, 0, 0, b'k'].into()))
            .await
            .unwrap();

        let msg = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            server_conn.recv(),
        )
        .await
        .expect("recv should not hang")
        .expect("recv should not error")
        .expect("connection open");
        assert_eq!(&msg[..], b"k");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_close() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let client = WebSocketConnection::connect(&addr).await.unwrap();
        let server_conn = server_handle.await.unwrap();

        client.close().await.expect("close");
        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_websocket_connection_ids_are_unique() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            let a = transport.accept().await.expect("first");
            let b = transport.accept().await.expect("second");
            (a, b)
        });
        let _c1 = WebSocketConnection::connect(&addr).await.unwrap();
        let _c2 = WebSocketConnection::connect(&addr).await.unwrap();
        let (a, b) = server_handle.await.unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_websocket_ping_counts_as_activity() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let client = WebSocketConnection::connect(&addr).await.unwrap();
        let server_conn = server_handle.await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(server_conn.idle_for() >= std::time::Duration::from_millis(200));

        client.ping().await.expect("ping");
        client
            .send(b"after", DeliveryMethod::ReliableOrdered)
            .await
            .unwrap();
        let msg = server_conn.recv().await.unwrap().unwrap();
        assert_eq!(&msg[..], b"after");
        assert!(server_conn.idle_for() < std::time::Duration::from_millis(200));
    }
}
