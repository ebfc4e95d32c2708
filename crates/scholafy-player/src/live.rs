//! Live-status snapshots and parent monitor events.
//!
//! A [`LiveStatus`] is the full "what the child is doing right now" view,
//! upserted as one row per profile. [`LiveEvent`]s carry row changes to
//! WebSocket clients of the parent monitor.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes the current row
//! - `live_update` - The live row was inserted or replaced
//! - `live_cleared` - The live row was deleted
//! - `session_saved` - A lesson result was written
//! - `error` - Something failed on the serving side

use chrono::{DateTime, Utc};
use scholafy_insight::{Phase, SessionStatus};
use scholafy_store::{ChangeKind, LiveChange, LiveSessionRow};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::record::QuestionRecord;

// ============================================================================
// LiveStatus
// ============================================================================

/// What the parent monitor shows as the child's current activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveMode {
    /// No lesson running.
    Idle,
    /// Answering the starter quiz.
    Starter,
    /// Watching the video.
    Video,
    /// Answering an in-video cue.
    Question,
    /// Answering the exit quiz.
    Exit,
    /// Video force-paused after leaving fullscreen.
    Paused,
    /// Lesson minimized to the dashboard.
    Minimized,
}

impl LiveMode {
    /// Lowercase name stored in the live row.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starter => "starter",
            Self::Video => "video",
            Self::Question => "question",
            Self::Exit => "exit",
            Self::Paused => "paused",
            Self::Minimized => "minimized",
        }
    }
}

impl std::fmt::Display for LiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running counters shown next to the live view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStats {
    /// Correctness of each answered starter, in order.
    pub starters: Vec<bool>,
    /// Questions answered so far.
    pub questions_answered: usize,
    /// Questions in the lesson.
    pub questions_total: usize,
    /// Starter questions in the lesson.
    pub starter_count: usize,
    /// In-video cues in the lesson.
    pub video_question_count: usize,
    /// Exit questions in the lesson.
    pub exit_count: usize,
}

/// Full snapshot published on every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    /// Lesson being played.
    pub lesson_id: String,
    /// Current activity.
    pub mode: LiveMode,
    /// Video position in video mode, seconds since presentation otherwise.
    pub elapsed_seconds: u64,
    /// Nominal lesson length in seconds.
    pub total_seconds: u64,
    /// Prompt of the question on screen.
    pub prompt: Option<String>,
    /// Running counters.
    pub stats: LiveStats,
    /// Answers so far.
    pub history: Vec<QuestionRecord>,
    /// When the snapshot was taken.
    pub last_update: DateTime<Utc>,
}

impl LiveStatus {
    /// Converts the snapshot into the row stored for `profile_id`.
    #[must_use]
    pub fn to_row(&self, profile_id: Uuid) -> LiveSessionRow {
        LiveSessionRow {
            profile_id,
            lesson_id: self.lesson_id.clone(),
            mode: self.mode.as_str().to_string(),
            t: self.elapsed_seconds,
            total: self.total_seconds,
            q_text: self.prompt.clone(),
            stats: serde_json::to_value(&self.stats).unwrap_or_default(),
            history: serde_json::to_value(&self.history).unwrap_or_default(),
            last_update: self.last_update,
        }
    }

    /// Starter correctness derived from a record list.
    #[must_use]
    pub fn starter_results(records: &[QuestionRecord]) -> Vec<bool> {
        records
            .iter()
            .filter(|r| r.phase == Phase::Starter)
            .map(|r| r.is_correct)
            .collect()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Current live row, if a lesson is running.
    pub live: Option<LiveSessionRow>,
}

/// Payload for the `live_update` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveUpdatePayload {
    /// The new row.
    pub live: LiveSessionRow,
}

/// Payload for the `live_cleared` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveClearedPayload {
    /// Profile whose row was deleted.
    pub profile_id: Uuid,
}

/// Payload for the `session_saved` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSavedPayload {
    /// Lesson that was saved.
    pub lesson_id: String,
    /// How the session ended.
    pub status: SessionStatus,
    /// Final score.
    pub score_percent: u32,
    /// XP awarded.
    pub xp_earned: u64,
    /// Badge ids awarded.
    pub badges_earned: Vec<String>,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

/// Events streamed to parent monitor clients.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// The live row changed.
    LiveUpdate(LiveUpdatePayload),
    /// The live row was deleted.
    LiveCleared(LiveClearedPayload),
    /// A lesson result was stored.
    SessionSaved(SessionSavedPayload),
    /// Sent when an error occurs.
    Error(ErrorPayload),
}

impl LiveEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(live: Option<LiveSessionRow>) -> Self {
        Self::Connected(ConnectedPayload { live })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Maps a store change onto the event parents see.
    #[must_use]
    pub fn from_change(change: LiveChange) -> Self {
        match (change.kind, change.row) {
            (ChangeKind::Insert | ChangeKind::Update, Some(live)) => {
                Self::LiveUpdate(LiveUpdatePayload { live })
            }
            _ => Self::LiveCleared(LiveClearedPayload {
                profile_id: change.profile_id,
            }),
        }
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::LiveUpdate(_) => "live_update",
            Self::LiveCleared(_) => "live_cleared",
            Self::SessionSaved(_) => "session_saved",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

/// Fans live events out to every connected monitor client.
///
/// Events are not kept for clients that connect later.
#[derive(Debug, Clone)]
pub struct LiveBroadcaster {
    sender: broadcast::Sender<LiveEvent>,
}

impl LiveBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    /// Sends an event; returns how many subscribers will see it.
    pub fn send(&self, event: LiveEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LiveBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
