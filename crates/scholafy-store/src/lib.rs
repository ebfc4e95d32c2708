//! Scholafy Remote Store
//!
//! Row-oriented access to the hosted backend that owns all persistence and
//! realtime sync for Scholafy.
//!
//! This crate provides the row types for every relation the product touches,
//! the [`RemoteStore`] trait the rest of the workspace talks to, and two
//! implementations:
//!
//! - [`MemoryStore`] - in-process rows with push change events (tests, offline demo)
//! - [`RestStore`] - PostgREST-style HTTP client with a polling subscription

mod memory;
mod rest;

pub use memory::MemoryStore;
pub use rest::{RestConfig, RestStore};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// A specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by the remote data service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The service rejected the credentials or the session token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service answered with a non-success status.
    #[error("service error ({status}): {message}")]
    Service {
        /// HTTP status code returned by the service.
        status: u16,
        /// Body or reason returned by the service.
        message: String,
    },

    /// The request never reached the service, or the response was cut short.
    #[error("network error: {0}")]
    Network(String),

    /// A row could not be encoded or decoded.
    #[error("malformed row: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns `true` if retrying the same request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// The `live_sessions` row: what the child is doing right now.
///
/// One row per profile; writers upsert on `profile_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSessionRow {
    /// Owner of the row (unique key).
    pub profile_id: Uuid,
    /// Lesson being played.
    pub lesson_id: String,
    /// Player mode, e.g. `video` or `minimized`.
    pub mode: String,
    /// Elapsed seconds on the clock relevant to `mode`.
    pub t: u64,
    /// Nominal lesson length in seconds.
    pub total: u64,
    /// Prompt of the question on screen, if any.
    pub q_text: Option<String>,
    /// Running statistics blob.
    pub stats: serde_json::Value,
    /// Answer log blob.
    pub history: serde_json::Value,
    /// When the writer produced this snapshot.
    pub last_update: DateTime<Utc>,
}

/// The `lesson_history` row: the durable outcome of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonResultRow {
    /// Owner of the result.
    pub profile_id: Uuid,
    /// Lesson that was played.
    pub lesson_id: String,
    /// `completed` or `incomplete`.
    pub status: String,
    /// When the session ended.
    pub timestamp: DateTime<Utc>,
    /// Percentage of correct answers.
    pub score_percent: u32,
    /// XP awarded for the session.
    pub xp_earned: u64,
    /// Wall-clock length of the session.
    pub duration_seconds: u64,
    /// Answer log blob.
    pub records: serde_json::Value,
    /// Badges awarded for the session.
    #[serde(default)]
    pub badges_earned: serde_json::Value,
    /// Letter effort grade.
    #[serde(default)]
    pub effort_grade: Option<String>,
    /// Behavioural focus index (0-100).
    #[serde(default)]
    pub focus_index: Option<u32>,
    /// Academic mastery band.
    #[serde(default)]
    pub mastery_level: Option<String>,
    /// Narrative report text.
    #[serde(default)]
    pub insight_text: Option<String>,
}

/// The `profiles` row for a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    /// Profile id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// School year group.
    pub year_group: u32,
    /// Consecutive days with a completed lesson.
    pub streak_days: u32,
    /// Lifetime XP.
    pub xp: u64,
    /// Level derived from XP.
    pub level: u32,
    /// Ids of earned badges.
    #[serde(default)]
    pub badges: Vec<String>,
    /// Day of the most recent completed lesson.
    #[serde(default)]
    pub last_completed_on: Option<NaiveDate>,
}

/// The `assignments` row linking a profile to a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    /// Assigned profile.
    pub profile_id: Uuid,
    /// Assigned lesson.
    pub lesson_id: String,
}

/// The `badges` catalogue row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeRow {
    /// Badge id, e.g. `first_steps`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the badge is for.
    pub description: String,
    /// Emoji or icon name.
    pub icon: String,
    /// Display colour.
    pub color: String,
}

/// The `quotes` catalogue row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRow {
    /// Quote text.
    pub text: String,
    /// Attribution.
    pub source: String,
}

// ============================================================================
// Change events
// ============================================================================

/// Kind of change delivered by a live-session subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row appeared.
    Insert,
    /// An existing row was overwritten.
    Update,
    /// The row was deleted.
    Delete,
}

/// A change to one profile's live-session row.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveChange {
    /// What happened.
    pub kind: ChangeKind,
    /// Owner of the row.
    pub profile_id: Uuid,
    /// New row contents; `None` for deletes.
    pub row: Option<LiveSessionRow>,
}

/// A filtered stream of [`LiveChange`] events for one profile.
#[derive(Debug)]
pub struct LiveSubscription {
    profile_id: Uuid,
    receiver: broadcast::Receiver<LiveChange>,
}

impl LiveSubscription {
    /// Wraps a broadcast receiver, keeping only changes for `profile_id`.
    #[must_use]
    pub const fn new(profile_id: Uuid, receiver: broadcast::Receiver<LiveChange>) -> Self {
        Self {
            profile_id,
            receiver,
        }
    }

    /// Profile this subscription is filtered to.
    #[must_use]
    pub const fn profile_id(&self) -> Uuid {
        self.profile_id
    }

    /// Waits for the next change for this profile.
    ///
    /// Returns `None` once the publishing side has gone away.
    pub async fn recv(&mut self) -> Option<LiveChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.profile_id == self.profile_id => return Some(change),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Live subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// The remote data service as seen by the rest of Scholafy.
///
/// Every method maps to one row operation against a named relation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the lesson catalogue as raw JSON rows.
    async fn list_lessons(&self) -> Result<Vec<serde_json::Value>>;

    /// Returns the badge catalogue.
    async fn list_badges(&self) -> Result<Vec<BadgeRow>>;

    /// Returns the quote catalogue.
    async fn list_quotes(&self) -> Result<Vec<QuoteRow>>;

    /// Fetches a profile, `None` when it does not exist.
    async fn fetch_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRow>>;

    /// Inserts or replaces a profile and returns the stored row.
    async fn upsert_profile(&self, profile: ProfileRow) -> Result<ProfileRow>;

    /// Lists the lessons assigned to a profile.
    async fn list_assignments(&self, profile_id: Uuid) -> Result<Vec<AssignmentRow>>;

    /// Assigns a lesson.
    async fn insert_assignment(&self, assignment: AssignmentRow) -> Result<()>;

    /// Removes an assignment. Removing a missing assignment is not an error.
    async fn delete_assignment(&self, profile_id: Uuid, lesson_id: &str) -> Result<()>;

    /// Appends a lesson result.
    async fn insert_lesson_result(&self, result: LessonResultRow) -> Result<()>;

    /// Lists results for a profile, newest first.
    async fn list_lesson_results(&self, profile_id: Uuid) -> Result<Vec<LessonResultRow>>;

    /// Upserts the live-session row keyed by `profile_id`.
    async fn upsert_live_session(&self, row: LiveSessionRow) -> Result<()>;

    /// Overwrites the live-session row only if it still exists.
    ///
    /// Returns `false` when no row matched, i.e. it was deleted elsewhere. A
    /// missing row is never recreated. Stores without push delivery announce
    /// the disappearance to their own subscriptions as a [`ChangeKind::Delete`].
    async fn update_live_session(&self, row: LiveSessionRow) -> Result<bool>;

    /// Fetches the live-session row for a profile.
    async fn fetch_live_session(&self, profile_id: Uuid) -> Result<Option<LiveSessionRow>>;

    /// Deletes the live-session row for a profile. Deleting a missing row is not an error.
    async fn delete_live_session(&self, profile_id: Uuid) -> Result<()>;

    /// Subscribes to insert/update/delete events on one profile's live row.
    fn subscribe_live(&self, profile_id: Uuid) -> LiveSubscription;
}
