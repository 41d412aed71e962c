use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use modlane_contracts::endpoint::{CONVERSION, CURRENT_TASK};
use modlane_contracts::status::{MessageKind, StatusMessage, TaskStatus};
use modlane_core::StatusSink;
use modlane_server::{ChannelConfig, ChannelError, ChannelStatusSink, StatusChannelServer};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn authorized() -> ChannelConfig {
    ChannelConfig {
        launch_authorized: true,
        ..ChannelConfig::default()
    }
}

async fn started() -> (StatusChannelServer, SocketAddr) {
    let server = StatusChannelServer::new(authorized());
    let addr = server.start(0).await.unwrap();
    (server, addr)
}

async fn connect(server: &StatusChannelServer, addr: SocketAddr, endpoint: &str) -> Client {
    let before = server.connection_count(endpoint);
    let (ws, _) = connect_async(format!("ws://{addr}{endpoint}")).await.unwrap();
    wait_for_connections(server, endpoint, before + 1).await;
    ws
}

async fn wait_for_connections(server: &StatusChannelServer, endpoint: &str, expected: usize) {
    for _ in 0..100 {
        if server.connection_count(endpoint) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {expected} connections on {endpoint}, have {}",
        server.connection_count(endpoint)
    );
}

/// Next text frame as raw JSON.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn next_status(ws: &mut Client) -> StatusMessage {
    serde_json::from_value(next_json(ws).await).unwrap()
}

async fn assert_silent(ws: &mut Client) {
    let got = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(got.is_err(), "unexpected frame: {got:?}");
}

async fn send(ws: &mut Client, message: &StatusMessage) {
    ws.send(Message::Text(message.to_json().unwrap().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn start_requires_authorization() {
    let server = StatusChannelServer::new(ChannelConfig::default());
    assert!(matches!(server.start(0).await, Err(ChannelError::Unauthorized)));
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn second_start_reuses_the_listener() {
    let (server, addr) = started().await;
    assert_eq!(server.start(0).await.unwrap(), addr);
    assert_eq!(server.local_addr(), Some(addr));
    server.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_on_a_fixed_port_share_one_listener() {
    let port = {
        let free = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        free.local_addr().unwrap().port()
    };

    let server = StatusChannelServer::new(authorized());
    let (first, second) = tokio::join!(server.start(port), server.start(port));
    let first = first.unwrap();
    assert_eq!(first.port(), port);
    assert_eq!(second.unwrap(), first);
    assert_eq!(server.local_addr(), Some(first));
    server.dispose().await;
}

#[tokio::test]
async fn occupied_port_is_a_bind_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let server = StatusChannelServer::new(authorized());
    let err = server.start(port).await.unwrap_err();
    assert!(matches!(err, ChannelError::Bind { port: p, .. } if p == port));
}

#[tokio::test]
async fn broadcasting_without_peers_is_not_an_error() {
    let (server, _) = started().await;
    assert!(!server.has_connected_clients());
    assert_eq!(server.update_current_task_status("idle").unwrap(), 0);
    assert_eq!(server.broadcast_progress(10, "x").unwrap(), 0);
    server.dispose().await;
}

#[tokio::test]
async fn current_task_frames_match_the_wire_format() {
    let (server, addr) = started().await;
    let mut ui = connect(&server, addr, CURRENT_TASK).await;

    assert_eq!(
        server
            .update_current_task_status("Converting mod: test.pmp")
            .unwrap(),
        1
    );
    assert_eq!(
        next_json(&mut ui).await,
        json!({"type": "status", "status": "InProgress", "message": "Converting mod: test.pmp"})
    );
    server.dispose().await;
}

#[tokio::test]
async fn progress_frames_go_to_conversion_only() {
    let (server, addr) = started().await;
    let mut task_ui = connect(&server, addr, CURRENT_TASK).await;
    let mut progress_ui = connect(&server, addr, CONVERSION).await;

    assert_eq!(server.broadcast_progress(50, "Extracting files...").unwrap(), 1);
    assert_eq!(
        next_json(&mut progress_ui).await,
        json!({
            "type": "progress",
            "status": "InProgress",
            "progress": 50,
            "message": "Extracting files..."
        })
    );
    assert_silent(&mut task_ui).await;
    server.dispose().await;
}

#[tokio::test]
async fn late_joiner_catches_up_on_current_task_only() {
    let (server, addr) = started().await;
    let mut early = connect(&server, addr, CURRENT_TASK).await;

    server.update_current_task_status("first").unwrap();
    server
        .report_current_task(TaskStatus::Completed, "second")
        .unwrap();
    server.broadcast_progress(40, "halfway").unwrap();
    assert_eq!(next_status(&mut early).await.message, "first");
    assert_eq!(next_status(&mut early).await.message, "second");

    let mut late = connect(&server, addr, CURRENT_TASK).await;
    let caught_up = next_status(&mut late).await;
    assert_eq!(caught_up.message, "second");
    assert_eq!(caught_up.status, TaskStatus::Completed);
    assert_silent(&mut late).await;

    let mut late_progress = connect(&server, addr, CONVERSION).await;
    assert_silent(&mut late_progress).await;
    server.dispose().await;
}

#[tokio::test]
async fn status_reported_before_start_is_replayed() {
    let server = StatusChannelServer::new(authorized());
    let sink = ChannelStatusSink::new(server.clone());
    sink.current_task(TaskStatus::InProgress, "Queued: outfit.pmp");
    sink.progress(20, "dropped while nobody listens");

    let addr = server.start(0).await.unwrap();
    let mut ui = connect(&server, addr, CURRENT_TASK).await;
    assert_eq!(next_status(&mut ui).await.message, "Queued: outfit.pmp");

    let mut progress_ui = connect(&server, addr, CONVERSION).await;
    assert_silent(&mut progress_ui).await;
    server.dispose().await;
}

#[tokio::test]
async fn vanished_peer_does_not_block_the_rest() {
    let (server, addr) = started().await;
    let gone = connect(&server, addr, CURRENT_TASK).await;
    let mut alive = connect(&server, addr, CURRENT_TASK).await;

    drop(gone);
    server.update_current_task_status("still here").unwrap();
    assert_eq!(next_status(&mut alive).await.message, "still here");

    wait_for_connections(&server, CURRENT_TASK, 1).await;
    server.update_current_task_status("again").unwrap();
    assert_eq!(next_status(&mut alive).await.message, "again");
    server.dispose().await;
}

#[tokio::test]
async fn peers_relay_to_each_other() {
    let (server, addr) = started().await;
    let mut publisher = connect(&server, addr, CURRENT_TASK).await;
    let mut listener = connect(&server, addr, CURRENT_TASK).await;

    send(
        &mut publisher,
        &StatusMessage::status(TaskStatus::InProgress, "from the UI"),
    )
    .await;
    assert_eq!(next_status(&mut listener).await.message, "from the UI");
    assert_silent(&mut publisher).await;

    let mut late = connect(&server, addr, CURRENT_TASK).await;
    assert_eq!(next_status(&mut late).await.message, "from the UI");
    server.dispose().await;
}

#[tokio::test]
async fn unknown_endpoints_are_refused() {
    let (server, addr) = started().await;
    match connect_async(format!("ws://{addr}/admin")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("expected a 404, got {other:?}"),
    }

    let err = server
        .broadcast_to_endpoint("/admin", &StatusMessage::status(TaskStatus::Failed, "x"))
        .unwrap_err();
    assert!(matches!(err, ChannelError::UnknownEndpoint(endpoint) if endpoint == "/admin"));
    server.dispose().await;
}

#[tokio::test]
async fn file_selection_round_trip() {
    let (server, addr) = started().await;
    let mut ui = connect(&server, addr, CONVERSION).await;

    let answer = tokio::spawn(async move {
        let request = next_status(&mut ui).await;
        assert_eq!(request.kind, MessageKind::FileSelection);
        let payload = request.payload.unwrap();
        assert_eq!(payload.files, vec!["a.pmp", "b.pmp"]);
        let response =
            StatusMessage::file_selection_response(payload.task_id, vec!["b.pmp".to_string()]);
        send(&mut ui, &response).await;
        ui
    });

    let selected = server
        .request_file_selection(
            CONVERSION,
            "Pick the variants to install",
            vec!["a.pmp".into(), "b.pmp".into()],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(selected, Some(vec!["b.pmp".to_string()]));
    let _ui = answer.await.unwrap();
    server.dispose().await;
}

#[tokio::test]
async fn file_selection_gives_up_without_an_answer() {
    let (server, addr) = started().await;

    let nobody = server
        .request_file_selection(CONVERSION, "pick", vec!["a.pmp".into()], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(nobody, None);

    let mut silent_ui = connect(&server, addr, CONVERSION).await;
    let timed_out = server
        .request_file_selection(
            CONVERSION,
            "pick",
            vec!["a.pmp".into()],
            Duration::from_millis(150),
        )
        .await
        .unwrap();
    assert_eq!(timed_out, None);
    assert_eq!(
        next_status(&mut silent_ui).await.kind,
        MessageKind::FileSelection
    );
    server.dispose().await;
}

#[tokio::test]
async fn dispose_closes_peers_and_rejects_further_use() {
    let (server, addr) = started().await;
    let mut ui = connect(&server, addr, CURRENT_TASK).await;

    server.dispose().await;
    server.dispose().await;

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ui.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "peer was not closed");

    assert!(server.is_disposed());
    assert!(!server.has_connected_clients());
    assert!(matches!(
        server.update_current_task_status("late"),
        Err(ChannelError::Disposed)
    ));
    assert!(matches!(server.start(0).await, Err(ChannelError::Disposed)));
    assert!(matches!(
        server
            .request_file_selection(CONVERSION, "pick", vec![], Duration::from_millis(10))
            .await,
        Err(ChannelError::Disposed)
    ));
    assert!(server.local_addr().is_none());
}
