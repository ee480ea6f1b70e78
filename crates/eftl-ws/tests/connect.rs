//! End-to-end test against a real loopback WebSocket server speaking the
//! eFTL login handshake, grounding `eftl-ws::connect` against an actual
//! `tokio-tungstenite` socket rather than the in-memory fake used by
//! `eftl-core`'s unit tests.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use eftl_core::{ConnectionCallbacks, ConnectionOptions, Message};

async fn spawn_eftl_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        handle_connection(stream).await;
    });

    format!("ws://{addr}/channel")
}

async fn handle_connection(stream: TcpStream) {
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &tokio_tungstenite::tungstenite::handshake::server::Request, mut response: tokio_tungstenite::tungstenite::handshake::server::Response| {
        if let Some(proto) = req.headers().get("Sec-WebSocket-Protocol") {
            response.headers_mut().insert("Sec-WebSocket-Protocol", proto.clone());
        }
        Ok(response)
    })
    .await
    .unwrap();

    let login = ws.next().await.unwrap().unwrap();
    let login: Value = serde_json::from_str(login.to_text().unwrap()).unwrap();
    assert_eq!(login["op"], 1);

    ws.send(WsMessage::Text(
        json!({
            "op": 2,
            "client_id": "server-assigned-1",
            "id_token": "tok",
            "timeout": 60,
            "heartbeat": 30,
            "_resume": true,
            "_qos": true,
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    // Echo one publish back as an ACK.
    if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
        let frame: Value = serde_json::from_str(&text).unwrap();
        if frame["op"] == 8 {
            let seq = frame["seq"].clone();
            let _ = ws.send(WsMessage::Text(json!({"op": 9, "seq": seq}).to_string().into())).await;
        }
    }

    // Keep the socket open briefly so the client's disconnect() has
    // something to close against.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn connects_publishes_and_disconnects_over_a_real_socket() {
    let url = spawn_eftl_server().await;

    let conn = tokio::time::timeout(
        Duration::from_secs(5),
        eftl_ws::connect(&url, ConnectionOptions::default(), ConnectionCallbacks::default()),
    )
    .await
    .expect("connect timed out")
    .expect("connect failed");

    assert!(conn.is_connected());
    assert_eq!(conn.client_id().as_deref(), Some("server-assigned-1"));
    assert!(conn.qos_enabled());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut tx = Some(tx);
    let mut msg = Message::new();
    msg.set_string("greeting", "hello".to_owned());
    conn.publish(
        msg,
        eftl_core::CompletionCallbacks {
            on_complete: Some(Box::new(move |_| {
                let _ = tx.take().unwrap().send(());
            })),
            on_error: None,
        },
    )
    .unwrap();

    tokio::time::timeout(Duration::from_secs(2), rx).await.expect("publish ack timed out").unwrap();

    conn.disconnect().await;
}
