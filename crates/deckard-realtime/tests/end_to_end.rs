//! Runs the engine against a local WebSocket peer.

use deckard_realtime::{
    ConnectionState, Engine, EngineConfig, EngineEvent, MessageRole, Severity, StatusIndicator,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client went away")
            .unwrap();
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] != "audio" {
                return value;
            }
        }
    }
}

async fn wait_for<F>(events: &mut broadcast::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for engine event")
}

#[tokio::test]
async fn test_conversation_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (path_tx, path_rx) = oneshot::channel();
    let (history_seen_tx, history_seen_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
            let _ = path_tx.send(req.uri().path().to_string());
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();

        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "set_persona", "persona": "mayank"})
        );

        let history = json!({
            "type": "history_updated",
            "history": [
                {"type": "message", "item_id": "u1", "role": "user",
                 "content": [{"type": "input_audio", "transcript": "Hi there"}], "created_at": 1_700_000_000},
                {"type": "message", "item_id": "a1", "role": "assistant",
                 "content": [{"type": "audio", "transcript": "Hello! How can I help?"}], "created_at": 1_700_000_001}
            ]
        });
        ws.send(Message::Text(history.to_string().into())).await.unwrap();
        history_seen_rx.await.unwrap();

        assert_eq!(next_json(&mut ws).await["type"], "interrupt");
        let start = next_json(&mut ws).await;
        assert_eq!(start["type"], "image_start");
        assert_eq!(start["text"], "Please describe this image.");
        let mut lengths = Vec::new();
        loop {
            let frame = next_json(&mut ws).await;
            assert_eq!(frame["id"], start["id"]);
            match frame["type"].as_str() {
                Some("image_chunk") => lengths.push(frame["chunk"].as_str().unwrap().len()),
                Some("image_end") => break,
                other => panic!("unexpected frame {:?}", other),
            }
        }
        assert_eq!(lengths, vec![60_000, 60_000, 30_000]);

        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();
        // Drain until the close handshake completes.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = EngineConfig {
        server_url: format!("ws://{}", addr),
        session_id: Some("e2e-session".to_string()),
        ..EngineConfig::default()
    };
    let (engine, _runtime) = Engine::builder(config).spawn();
    let mut events = engine.subscribe();

    engine.connect().await.unwrap();
    assert_eq!(path_rx.await.unwrap(), "/ws/e2e-session");
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::ConnectionChanged { state: ConnectionState::Connected, .. })
    })
    .await;

    let changed = wait_for(&mut events, |e| matches!(e, EngineEvent::HistoryChanged(_))).await;
    let history = match changed {
        EngineEvent::HistoryChanged(messages) => messages,
        _ => unreachable!(),
    };
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[0].text, "Hi there");
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[1].text, "Hello! How can I help?");
    history_seen_tx.send(()).unwrap();

    let image = format!("data:image/jpeg;base64,{}", "Q".repeat(150_000 - 23));
    engine.send_image(image, "").await.unwrap();

    let status = match wait_for(&mut events, |e| {
        matches!(e, EngineEvent::ConnectionChanged { state: ConnectionState::Disconnected, .. })
    })
    .await
    {
        EngineEvent::ConnectionChanged { status, .. } => status,
        _ => unreachable!(),
    };
    assert_eq!(status, StatusIndicator::Disconnected);
    server.await.unwrap();

    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 3);
    // Without a capture device the session still runs; capture is reported as an error.
    assert!(!snapshot.capture_active);
    assert!(
        snapshot
            .log
            .iter()
            .any(|e| e.title == "Microphone unavailable" && e.severity == Severity::Error)
    );
    assert_eq!(snapshot.log[0].title, "Connection closed");

    engine.shutdown().await.unwrap();
}
