use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use attune_protocol::EnvelopeType;
use attune_session::{
    ApiClientConfig, BackendApiClient, SessionRecordStore, SessionSync, SyncConfig,
};
use attune_socket::{SocketConfig, SocketEvent, SocketStatus};
use futures_util::{SinkExt, StreamExt};
use httpmock::prelude::*;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

async fn accept_session_socket(
    listener: &TcpListener,
) -> (WebSocketStream<TcpStream>, String) {
    let (tcp, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("accept timeout")
        .expect("accept");
    let (uri_tx, uri_rx) = std_mpsc::channel();
    let stream = accept_hdr_async(tcp, move |request: &Request, response: Response| {
        let _ = uri_tx.send(request.uri().to_string());
        Ok(response)
    })
    .await
    .expect("handshake");
    let uri = uri_rx.recv().expect("request uri");
    (stream, uri)
}

async fn next_json(server: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, server.next())
            .await
            .expect("server read timeout")
            .expect("stream open")
            .expect("frame");
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

async fn wait_for_envelope(sync: &mut SessionSync, kind: EnvelopeType) {
    tokio::time::timeout(WAIT, async {
        loop {
            match sync.next_event().await {
                Some(SocketEvent::Envelope(envelope)) if envelope.kind == kind => return,
                Some(_) => continue,
                None => panic!("socket event stream ended"),
            }
        }
    })
    .await
    .expect("envelope timeout");
}

#[tokio::test]
async fn integration_session_sync_roundtrip_against_local_backend() {
    let rest = MockServer::start();
    let create = rest.mock(|when, then| {
        when.method(POST).path("/v1/sessions");
        then.status(201)
            .json_body(json!({"session_id": "sess-42", "session_token": "tok 42"}));
    });
    rest.mock(|when, then| {
        when.method(GET).path("/v1/sessions/sess-42/graph");
        then.status(200).json_body(json!({
            "nodes": [{"id": "n0", "label": "Person", "canonical": "User"}],
            "edges": []
        }));
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let ws_base = format!("http://{}", listener.local_addr().expect("addr"));
    let state_dir = tempfile::tempdir().expect("tempdir");

    let api = BackendApiClient::new(ApiClientConfig::new(rest.base_url())).expect("api client");
    let created = api.create_session(None).await.expect("create session");
    create.assert();
    let mut records = SessionRecordStore::load(state_dir.path()).expect("records");
    records
        .upsert_session(&created.session_id, created.session_token.as_deref())
        .expect("record session");
    let snapshot = api
        .fetch_graph_snapshot(&created.session_id)
        .await
        .expect("snapshot");

    let mut socket_config = SocketConfig::new(ws_base, created.session_id.clone());
    socket_config.session_token = created.session_token.clone();
    let mut sync = SessionSync::start(SyncConfig::new(socket_config), Some(records))
        .expect("session sync");
    sync.apply_snapshot(snapshot);
    assert_eq!(sync.projection().nodes.len(), 1);

    let (mut server, uri) = accept_session_socket(&listener).await;
    assert_eq!(uri, "/ws/session/sess-42?session_token=tok+42");
    let mut snapshots = sync.socket().subscribe();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.status == SocketStatus::Open))
        .await
        .expect("open timeout")
        .expect("snapshot channel");

    sync.handle_voice_event(&json!({
        "type": "user_message",
        "message_id": "m1",
        "content": "I keep worrying about the deadline",
        "interim": true
    }))
    .expect("interim outcome");
    let outcome = sync
        .handle_voice_event(&json!({
            "type": "user_message",
            "message_id": "m1",
            "content": "I keep worrying about the deadline"
        }))
        .expect("final outcome");
    assert!(outcome.forwarded);
    let forwarded = next_json(&mut server).await;
    assert_eq!(forwarded["type"], "evi.user_message.final");
    assert_eq!(forwarded["session_id"], "sess-42");
    assert_eq!(
        forwarded["payload"]["content"],
        "I keep worrying about the deadline"
    );

    let diff = json!({
        "type": "kg.diff",
        "session_id": "sess-42",
        "sent_at_ms": 1_700_000_000_000_u64,
        "payload": {
            "nodes_upsert": [{"id": "n1", "label": "Trigger", "canonical": "Deadline"}],
            "edges_upsert": [{"id": "e1", "type": "FEELS", "sourceId": "n0", "targetId": "n1"}],
            "receipts": [{"receipt_id": "r1", "node_ids": ["n1"], "edge_ids": ["e1"]}]
        }
    });
    server
        .send(WsMessage::Text(diff.to_string().into()))
        .await
        .expect("send diff");
    wait_for_envelope(&mut sync, EnvelopeType::KgDiff).await;

    let state = sync.state();
    assert_eq!(state.connection.status, SocketStatus::Open);
    assert_eq!(state.projection.nodes.len(), 2);
    assert_eq!(state.projection.edges.len(), 1);
    assert_eq!(state.projection.highlighted_node_ids, vec!["n1".to_string()]);
    assert_eq!(state.transcript.len(), 1);
    assert!(!state.transcript[0].interim);

    sync.handle_voice_event(&json!({"type": "chat_metadata", "chat_group_id": "group-1"}))
        .expect("metadata outcome");
    assert_eq!(next_json(&mut server).await["type"], "evi.chat_metadata");
    let reloaded = SessionRecordStore::load(state_dir.path()).expect("reload");
    assert_eq!(
        reloaded
            .get("sess-42")
            .and_then(|record| record.chat_group_id.clone()),
        Some("group-1".to_string())
    );

    sync.stop();
    let close = loop {
        let message = tokio::time::timeout(WAIT, server.next())
            .await
            .expect("close timeout")
            .expect("stream open")
            .expect("frame");
        if let WsMessage::Close(frame) = message {
            break frame;
        }
    };
    assert_eq!(close.map(|frame| u16::from(frame.code)), Some(1000));
}
