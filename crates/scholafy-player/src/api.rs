//! HTTP API for the parent monitor.
//!
//! # Endpoints
//!
//! - `GET /api/profile` - Profile, quote of the day and background session
//! - `GET /api/live` - Current live row (204 when no lesson is running)
//! - `DELETE /api/live` - End the child's session remotely
//! - `GET /api/history` - Lesson results, newest first
//! - `GET /api/history/:index/report` - Parent report (Markdown, or JSON with `?format=json`)
//! - `GET /api/stats` - Curriculum statistics
//! - `GET /api/assignments` - Assigned lesson ids
//! - `POST /api/assignments` - Assign a lesson
//! - `DELETE /api/assignments/:lesson_id` - Unassign a lesson
//! - `DELETE /api/background` - Discard a minimized session
//! - `GET /ws` - Live event stream

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use scholafy_insight::{CurriculumStats, MarkdownGenerator};
use scholafy_store::{LessonResultRow, ProfileRow, QuoteRow, StoreError};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::error::PlayerError;
use crate::hub::ProfileHub;
use crate::session::BackgroundSession;
use crate::websocket::ws_handler;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for assigning a lesson.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    /// Lesson to assign.
    pub lesson_id: String,
}

/// Response body listing assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentsResponse {
    /// Assigned lesson ids.
    pub lesson_ids: Vec<String>,
}

/// Response body for the profile endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    /// The child's profile.
    pub profile: ProfileRow,
    /// Quote of the day.
    pub quote: Option<QuoteRow>,
    /// Minimized session waiting to be resumed.
    pub background: Option<BackgroundSession>,
}

/// Query for the report endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    /// `json` for a JSON report; Markdown otherwise.
    #[serde(default)]
    pub format: Option<String>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state for HTTP and WebSocket handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The child's application state.
    pub hub: Arc<ProfileHub>,
}

impl AppState {
    /// Wraps a hub.
    #[must_use]
    pub const fn new(hub: Arc<ProfileHub>) -> Self {
        Self { hub }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Player(PlayerError),
}

impl From<PlayerError> for ApiError {
    fn from(e: PlayerError) -> Self {
        Self::Player(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Player(PlayerError::Store(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Player(e) => {
                let status = match &e {
                    PlayerError::UnknownLesson { .. } | PlayerError::NoBackgroundSession { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    PlayerError::Store(StoreError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
                    PlayerError::Store(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                warn!(error = %e, status = status.as_u16(), "API request failed");
                (status, e.to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the router with all API routes, the WebSocket and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/profile", get(handle_profile))
        .route("/live", get(handle_get_live).delete(handle_end_live))
        .route("/history", get(handle_history))
        .route("/history/:index/report", get(handle_report))
        .route("/stats", get(handle_stats))
        .route(
            "/assignments",
            get(handle_assignments).post(handle_assign),
        )
        .route("/assignments/:lesson_id", delete(handle_unassign))
        .route("/background", delete(handle_clear_background));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_profile(State(state): State<Arc<AppState>>) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        profile: state.hub.profile().await,
        quote: state.hub.quote_of_the_day().await,
        background: state.hub.background().await,
    })
}

async fn handle_get_live(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let profile_id = state.hub.profile_id().await;
    let row = state.hub.store().fetch_live_session(profile_id).await?;
    Ok(match row {
        Some(row) => Json(row).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Parent "End Session": deleting the row makes the child's player exit.
async fn handle_end_live(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    let profile_id = state.hub.profile_id().await;
    info!(%profile_id, "Remote end session requested");
    state.hub.store().delete_live_session(profile_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_history(State(state): State<Arc<AppState>>) -> Json<Vec<LessonResultRow>> {
    Json(state.hub.history().await)
}

async fn handle_report(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let report = state
        .hub
        .report(index)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No history entry at index {index}")))?;

    if query.format.as_deref() == Some("json") {
        return Ok(Json(report).into_response());
    }
    let markdown = MarkdownGenerator::new(&report).generate();
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    )
        .into_response())
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<CurriculumStats> {
    Json(state.hub.curriculum_stats().await)
}

async fn handle_assignments(State(state): State<Arc<AppState>>) -> Json<AssignmentsResponse> {
    Json(AssignmentsResponse {
        lesson_ids: state.hub.assignments().await,
    })
}

async fn handle_assign(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AssignRequest>,
) -> Result<(StatusCode, Json<AssignmentsResponse>), ApiError> {
    state.hub.assign_lesson(&request.lesson_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(AssignmentsResponse {
            lesson_ids: state.hub.assignments().await,
        }),
    ))
}

async fn handle_unassign(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.hub.unassign_lesson(&lesson_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_clear_background(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    match state.hub.clear_background().await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotFound("No background session".to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use chrono::Utc;
    use scholafy_insight::SessionStatus;
    use scholafy_store::{LiveSessionRow, MemoryStore, RemoteStore};
    use tower::util::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::lesson::Lesson;
    use crate::session::SessionOutcome;

    fn lesson(id: &str) -> Lesson {
        Lesson::from_value(serde_json::json!({
            "id": id,
            "title": "Parts of a Plant",
            "subject": "Science",
            "video": "plants.mp4",
            "estimatedMinutes": 10
        }))
        .unwrap()
    }

    async fn test_state() -> (AppState, MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let profile_id = Uuid::new_v4();
        let hub = ProfileHub::load(
            Arc::new(store.clone()),
            profile_id,
            "Ada",
            vec![lesson("science_1"), lesson("science_2")],
        )
        .await
        .unwrap();
        (AppState::new(Arc::new(hub)), store, profile_id)
    }

    fn request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn live_row(profile_id: Uuid) -> LiveSessionRow {
        LiveSessionRow {
            profile_id,
            lesson_id: "science_1".into(),
            mode: "video".into(),
            t: 42,
            total: 600,
            q_text: None,
            stats: serde_json::json!({}),
            history: serde_json::json!([]),
            last_update: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_live_absent_returns_204() {
        let (state, _, _) = test_state().await;
        let response = create_router(state)
            .oneshot(request(Method::GET, "/api/live", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_live_present_and_remote_end() {
        let (state, store, profile_id) = test_state().await;
        store.upsert_live_session(live_row(profile_id)).await.unwrap();
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/api/live", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["mode"], "video");
        assert_eq!(json["t"], 42);

        let response = router
            .oneshot(request(Method::DELETE, "/api/live", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.fetch_live_session(profile_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assignment_round_trip() {
        let (state, _, _) = test_state().await;
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/assignments",
                Some(serde_json::json!({ "lessonId": "science_2" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["lessonIds"], serde_json::json!(["science_1", "science_2"]));

        let response = router
            .clone()
            .oneshot(request(Method::DELETE, "/api/assignments/science_1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(request(Method::GET, "/api/assignments", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["lessonIds"], serde_json::json!(["science_2"]));
    }

    #[tokio::test]
    async fn test_assign_unknown_lesson_returns_404() {
        let (state, _, _) = test_state().await;
        let response = create_router(state)
            .oneshot(request(
                Method::POST,
                "/api/assignments",
                Some(serde_json::json!({ "lessonId": "nope" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_report_markdown_and_json() {
        let (state, _, _) = test_state().await;
        state
            .hub
            .save_lesson_result(&SessionOutcome {
                lesson_id: "science_1".into(),
                lesson_title: "Parts of a Plant".into(),
                estimated_minutes: 10,
                status: SessionStatus::Completed,
                score_percent: 100,
                duration_seconds: 300,
                records: Vec::new(),
                finished_at: Utc::now(),
            })
            .await
            .unwrap();
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/api/history/0/report", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/markdown; charset=utf-8"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("Parts of a Plant"));

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/api/history/0/report?format=json", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["xpEarned"], 150);

        let response = router
            .oneshot(request(Method::GET, "/api/history/3/report", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_and_history() {
        let (state, _, _) = test_state().await;
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/api/stats", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["totalLessons"], 2);
        assert_eq!(json["completedLessons"], 0);

        let response = router
            .oneshot(request(Method::GET, "/api/history", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_clear_background_without_session_returns_404() {
        let (state, _, _) = test_state().await;
        let response = create_router(state)
            .oneshot(request(Method::DELETE, "/api/background", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_profile_summary() {
        let (state, _, profile_id) = test_state().await;
        let response = create_router(state)
            .oneshot(request(Method::GET, "/api/profile", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["profile"]["id"], profile_id.to_string());
        assert!(json["quote"].is_null());
        assert!(json["background"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let (state, _, _) = test_state().await;
        let response = create_router(state)
            .oneshot(request(Method::GET, "/api/nope", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
