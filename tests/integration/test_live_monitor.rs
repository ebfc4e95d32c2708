//! Integration tests for the parent monitor over real sockets.
//!
//! A server is bound to an ephemeral port with the change forwarder running,
//! then driven with `reqwest` and a WebSocket client the way the parent
//! dashboard would use it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use scholafy_insight::SessionStatus;
use scholafy_player::{
    create_router, spawn_change_forwarder, Answer, AppState, Lesson, LiveEvent, Playback,
    ProfileHub, SessionExit, SessionOutcome, SessionRunner, TimingConfig,
};
use scholafy_store::{LiveSessionRow, MemoryStore, RemoteStore};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tungstenite::Message;
use uuid::Uuid;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Aborts the server and forwarder when a test ends.
struct Shutdown {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

struct TestServer {
    base_url: String,
    ws_url: String,
    store: MemoryStore,
    hub: Arc<ProfileHub>,
    profile_id: Uuid,
    _shutdown: Shutdown,
}

fn lesson() -> Lesson {
    Lesson::from_value(serde_json::json!({
        "id": "science_y3_plants",
        "title": "Parts of a Plant",
        "subject": "Science",
        "video": "plants.mp4",
        "estimatedMinutes": 10,
        "starters": [
            { "id": "s1", "type": "choice", "prompt": "Do plants need light?",
              "options": [ { "label": "Yes", "correct": true }, { "label": "No", "correct": false } ] }
        ]
    }))
    .expect("Invalid test lesson")
}

/// Spawns the monitor server and returns its addresses.
async fn spawn_test_server() -> TestServer {
    let store = MemoryStore::new();
    let profile_id = Uuid::new_v4();
    let hub = Arc::new(
        ProfileHub::load(Arc::new(store.clone()), profile_id, "Ada", vec![lesson()])
            .await
            .expect("Failed to load profile"),
    );

    let forwarder = spawn_change_forwarder(Arc::clone(&hub), CancellationToken::new()).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let router = create_router(AppState::new(Arc::clone(&hub)));
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    TestServer {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        store,
        hub,
        profile_id,
        _shutdown: Shutdown {
            handles: vec![server, forwarder],
        },
    }
}

async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next event, answering pings along the way.
async fn receive_event(client: &mut WsClient) -> LiveEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

fn live_row(profile_id: Uuid, mode: &str, t: u64) -> LiveSessionRow {
    LiveSessionRow {
        profile_id,
        lesson_id: "science_y3_plants".into(),
        mode: mode.into(),
        t,
        total: 600,
        q_text: None,
        stats: serde_json::json!({}),
        history: serde_json::json!([]),
        last_update: Utc::now(),
    }
}

struct SilentVideo;

#[async_trait]
impl Playback for SilentVideo {
    async fn play(&mut self, _from: f64) {}
    async fn pause(&mut self) {}
    async fn set_muted(&mut self, _muted: bool) {}
    async fn set_fullscreen(&mut self, _active: bool) {}
    async fn release(&mut self) {}
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_connected_event_without_live_session() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;

    match receive_event(&mut client).await {
        LiveEvent::Connected(payload) => assert!(payload.live.is_none()),
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_connected_event_carries_current_row() {
    let server = spawn_test_server().await;
    server
        .store
        .upsert_live_session(live_row(server.profile_id, "video", 42))
        .await
        .unwrap();

    let mut client = connect_client(&server.ws_url).await;
    match receive_event(&mut client).await {
        LiveEvent::Connected(payload) => {
            let live = payload.live.expect("Expected a live row");
            assert_eq!(live.mode, "video");
            assert_eq!(live.t, 42);
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

// ============================================================================
// Live Change Tests
// ============================================================================

#[tokio::test]
async fn test_row_changes_reach_every_monitor() {
    let server = spawn_test_server().await;
    let mut first = connect_client(&server.ws_url).await;
    let mut second = connect_client(&server.ws_url).await;
    receive_event(&mut first).await;
    receive_event(&mut second).await;

    server
        .store
        .upsert_live_session(live_row(server.profile_id, "starter", 3))
        .await
        .unwrap();

    for client in [&mut first, &mut second] {
        match receive_event(client).await {
            LiveEvent::LiveUpdate(payload) => assert_eq!(payload.live.mode, "starter"),
            other => panic!("Expected LiveUpdate event, got: {other:?}"),
        }
    }

    server
        .store
        .upsert_live_session(live_row(Uuid::new_v4(), "video", 9))
        .await
        .unwrap();
    server
        .store
        .delete_live_session(server.profile_id)
        .await
        .unwrap();

    match receive_event(&mut first).await {
        LiveEvent::LiveCleared(payload) => assert_eq!(payload.profile_id, server.profile_id),
        other => panic!("Expected LiveCleared event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_http_end_session_clears_row_and_notifies() {
    let server = spawn_test_server().await;
    let http = reqwest::Client::new();
    let live_url = format!("{}/api/live", server.base_url);

    let response = http.get(&live_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    server
        .store
        .upsert_live_session(live_row(server.profile_id, "question", 120))
        .await
        .unwrap();
    let response = http.get(&live_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["mode"], "question");

    let mut client = connect_client(&server.ws_url).await;
    receive_event(&mut client).await;

    let response = http.delete(&live_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    assert!(matches!(
        receive_event(&mut client).await,
        LiveEvent::LiveCleared(_)
    ));
    assert!(server
        .store
        .fetch_live_session(server.profile_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_saved_result_is_announced_and_reported() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;
    receive_event(&mut client).await;

    server
        .hub
        .save_lesson_result(&SessionOutcome {
            lesson_id: "science_y3_plants".into(),
            lesson_title: "Parts of a Plant".into(),
            estimated_minutes: 10,
            status: SessionStatus::Completed,
            score_percent: 80,
            duration_seconds: 540,
            records: Vec::new(),
            finished_at: Utc::now(),
        })
        .await
        .unwrap();

    match receive_event(&mut client).await {
        LiveEvent::SessionSaved(payload) => {
            assert_eq!(payload.lesson_id, "science_y3_plants");
            assert_eq!(payload.score_percent, 80);
            assert_eq!(payload.xp_earned, 120);
        }
        other => panic!("Expected SessionSaved event, got: {other:?}"),
    }

    let http = reqwest::Client::new();
    let report = http
        .get(format!("{}/api/history/0/report", server.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(report.contains("Parts of a Plant"));
    assert!(report.contains("Ada"));

    let stats: serde_json::Value = http
        .get(format!("{}/api/stats", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["completedLessons"], 1);
    assert_eq!(stats["averageScore"], 80);
}

// ============================================================================
// Running Session
// ============================================================================

#[tokio::test]
async fn test_monitor_follows_a_running_session_until_remote_end() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;
    receive_event(&mut client).await;

    let timing = TimingConfig {
        heartbeat_ms: 100,
        ..TimingConfig::default()
    };
    let (notices, _notice_rx) = mpsc::unbounded_channel();
    let runner = SessionRunner::open(
        Arc::clone(&server.hub),
        "science_y3_plants",
        timing,
        Box::new(SilentVideo),
        notices,
    )
    .await
    .unwrap();
    let (handle, task) = runner.spawn();

    match receive_event(&mut client).await {
        LiveEvent::LiveUpdate(payload) => {
            assert_eq!(payload.live.mode, "starter");
            assert_eq!(payload.live.q_text.as_deref(), Some("Do plants need light?"));
        }
        other => panic!("Expected LiveUpdate event, got: {other:?}"),
    }

    handle.submit("s1", Answer::Choice(0)).await.unwrap();

    let http = reqwest::Client::new();
    let response = http
        .delete(format!("{}/api/live", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let exit = timeout(Duration::from_secs(5), task)
        .await
        .expect("Runner did not stop")
        .unwrap();
    assert!(matches!(exit, SessionExit::RemoteKilled));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server
        .store
        .fetch_live_session(server.profile_id)
        .await
        .unwrap()
        .is_none());
    assert!(server.hub.history().await.is_empty());
}
