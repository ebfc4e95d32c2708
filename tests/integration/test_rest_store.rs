//! The player against the REST store.
//!
//! An in-process stand-in for the hosted PostgREST interface serves
//! `/rest/v1/{table}` with `eq.` filters, `on_conflict` upserts and
//! `return=representation`, so the real HTTP client and the polling
//! subscription are exercised end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use scholafy_player::{
    Answer, Lesson, Playback, PlayerNotice, ProfileHub, RunnerHandle, SessionExit,
    SessionRunner, TimingConfig,
};
use scholafy_store::{RemoteStore, RestConfig, RestStore};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

/// Longer than any wait below, so only the client's own writes can notice a delete.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

type Tables = Arc<StdMutex<HashMap<String, Vec<Value>>>>;

// ============================================================================
// Backend stand-in
// ============================================================================

fn cell(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn matches(row: &Value, filters: &[(String, String)]) -> bool {
    filters
        .iter()
        .all(|(column, value)| cell(row, column).as_deref() == Some(value.as_str()))
}

async fn handle_table(
    State(tables): State<Tables>,
    Path(name): Path<String>,
    method: Method,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let filters: Vec<(String, String)> = params
        .iter()
        .filter_map(|(k, v)| v.strip_prefix("eq.").map(|v| (k.clone(), v.to_string())))
        .collect();
    let conflict_keys: Option<Vec<String>> = params
        .iter()
        .find(|(k, _)| k == "on_conflict")
        .map(|(_, v)| v.split(',').map(str::to_string).collect());
    let wants_rows = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|p| p.contains("return=representation"));

    let mut tables = tables.lock().unwrap();
    let rows = tables.entry(name).or_default();

    match method {
        Method::GET => {
            let found: Vec<Value> = rows.iter().filter(|r| matches(r, &filters)).cloned().collect();
            Json(found).into_response()
        }
        Method::POST => {
            let row: Value = serde_json::from_slice(&body).unwrap();
            if let Some(keys) = conflict_keys {
                let key: Vec<(String, String)> = keys
                    .iter()
                    .filter_map(|k| cell(&row, k).map(|v| (k.clone(), v)))
                    .collect();
                rows.retain(|r| !matches(r, &key));
            }
            rows.push(row.clone());
            if wants_rows {
                (StatusCode::CREATED, Json(vec![row])).into_response()
            } else {
                StatusCode::CREATED.into_response()
            }
        }
        Method::PATCH => {
            let patch: Value = serde_json::from_slice(&body).unwrap();
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|r| matches(r, &filters)) {
                if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
                    for (k, v) in fields {
                        target.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
            Json(updated).into_response()
        }
        Method::DELETE => {
            rows.retain(|r| !matches(r, &filters));
            StatusCode::NO_CONTENT.into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

struct Backend {
    url: String,
    tables: Tables,
    server: JoinHandle<()>,
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl Backend {
    async fn spawn() -> Self {
        let tables: Tables = Arc::default();
        let router = Router::new()
            .route("/rest/v1/:table", any(handle_table))
            .with_state(Arc::clone(&tables));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });
        Self {
            url: format!("http://{addr}"),
            tables,
            server,
        }
    }

    fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// A client as another device would hold it.
    fn client(&self) -> RestStore {
        RestStore::new(&RestConfig {
            url: self.url.clone(),
            anon_key: "anon-key-for-integration-tests".to_string(),
            access_token: None,
            poll_interval: POLL_INTERVAL,
        })
        .expect("Failed to build REST client")
    }

    async fn wait_for_live_row(&self) -> Value {
        for _ in 0..100 {
            if let Some(row) = self.rows("live_sessions").into_iter().next() {
                return row;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("live row never appeared");
    }
}

// ============================================================================
// Child device
// ============================================================================

#[derive(Clone, Default)]
struct CountingVideo {
    calls: Arc<StdMutex<Vec<String>>>,
}

impl CountingVideo {
    fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl Playback for CountingVideo {
    async fn play(&mut self, from: f64) {
        self.calls.lock().unwrap().push(format!("play {from}"));
    }
    async fn pause(&mut self) {
        self.calls.lock().unwrap().push("pause".into());
    }
    async fn set_muted(&mut self, muted: bool) {
        self.calls.lock().unwrap().push(format!("muted {muted}"));
    }
    async fn set_fullscreen(&mut self, active: bool) {
        self.calls.lock().unwrap().push(format!("fullscreen {active}"));
    }
    async fn release(&mut self) {
        self.calls.lock().unwrap().push("release".into());
    }
}

fn lesson() -> Lesson {
    Lesson::from_value(serde_json::json!({
        "id": "science_y3_plants",
        "title": "Parts of a Plant",
        "subject": "Science",
        "video": "plants.mp4",
        "estimatedMinutes": 10,
        "questions": [
            { "id": "p1", "type": "choice", "time": 30, "prompt": "Which part takes in water?",
              "options": [ { "label": "Roots", "correct": true }, { "label": "Petals", "correct": false } ] }
        ]
    }))
    .expect("Invalid test lesson")
}

async fn start_session(
    backend: &Backend,
    profile_id: Uuid,
    video: &CountingVideo,
) -> (
    RunnerHandle,
    JoinHandle<SessionExit>,
    mpsc::UnboundedReceiver<PlayerNotice>,
) {
    let hub = ProfileHub::load(Arc::new(backend.client()), profile_id, "Ada", vec![lesson()])
        .await
        .expect("Failed to load profile");
    let timing = TimingConfig {
        heartbeat_ms: 100,
        ..TimingConfig::default()
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let runner = SessionRunner::open(
        Arc::new(hub),
        "science_y3_plants",
        timing,
        Box::new(video.clone()),
        tx,
    )
    .await
    .expect("Failed to open lesson");
    let (handle, task) = runner.spawn();
    (handle, task, rx)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_parent_delete_ends_session_before_next_poll() {
    let backend = Backend::spawn().await;
    let profile_id = Uuid::new_v4();
    let video = CountingVideo::default();
    let (handle, task, mut notices) = start_session(&backend, profile_id, &video).await;

    handle.time_update(4.0).await.unwrap();
    let row = backend.wait_for_live_row().await;
    assert_eq!(row["lesson_id"], "science_y3_plants");
    sleep(Duration::from_millis(300)).await;

    backend
        .client()
        .delete_live_session(profile_id)
        .await
        .unwrap();

    let exit = timeout(Duration::from_secs(3), task)
        .await
        .expect("Runner did not notice the delete")
        .unwrap();
    assert!(matches!(exit, SessionExit::RemoteKilled));

    sleep(Duration::from_millis(500)).await;
    assert!(backend.rows("live_sessions").is_empty());
    assert!(backend.rows("lesson_history").is_empty());

    let mut exits = 0;
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, PlayerNotice::ReturnToDashboard) {
            exits += 1;
        }
    }
    assert_eq!(exits, 1);
    assert_eq!(video.count("release"), 1);
    assert!(handle.video_ended().await.is_err());
}

#[tokio::test]
async fn test_heartbeat_updates_row_and_save_clears_it() {
    let backend = Backend::spawn().await;
    let profile_id = Uuid::new_v4();
    let video = CountingVideo::default();
    let (handle, task, _notices) = start_session(&backend, profile_id, &video).await;

    backend.wait_for_live_row().await;
    handle.time_update(30.2).await.unwrap();
    sleep(Duration::from_millis(400)).await;

    let rows = backend.rows("live_sessions");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["mode"], "question");
    assert_eq!(rows[0]["q_text"], "Which part takes in water?");

    handle.submit("p1", Answer::Choice(0)).await.unwrap();
    handle.end_session().await.unwrap();

    let SessionExit::Ended(saved) = timeout(Duration::from_secs(3), task)
        .await
        .expect("Runner did not stop")
        .unwrap()
    else {
        panic!("expected an incomplete save");
    };
    assert_eq!(saved.row.status, "incomplete");
    assert_eq!(saved.row.score_percent, 100);

    let history = backend.rows("lesson_history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["lesson_id"], "science_y3_plants");
    assert!(backend.rows("live_sessions").is_empty());
}
