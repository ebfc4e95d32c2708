//! In-process implementation of [`RemoteStore`].
//!
//! Rows live behind a tokio mutex and every live-session write is pushed to
//! subscribers, mirroring the hosted service's realtime channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::{
    AssignmentRow, BadgeRow, ChangeKind, LessonResultRow, LiveChange, LiveSessionRow,
    LiveSubscription, ProfileRow, QuoteRow, RemoteStore, Result, StoreError,
};

/// Buffer size of the change channel.
const CHANGE_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Tables {
    lessons: Vec<serde_json::Value>,
    badges: Vec<BadgeRow>,
    quotes: Vec<QuoteRow>,
    profiles: HashMap<Uuid, ProfileRow>,
    assignments: Vec<AssignmentRow>,
    history: Vec<LessonResultRow>,
    live: HashMap<Uuid, LiveSessionRow>,
}

/// A [`RemoteStore`] that keeps every relation in memory.
///
/// Cloning is cheap and clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    changes: broadcast::Sender<LiveChange>,
    history_failures: Arc<AtomicU32>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            changes,
            history_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Creates a store seeded with catalogue rows.
    pub async fn with_catalogue(
        lessons: Vec<serde_json::Value>,
        badges: Vec<BadgeRow>,
        quotes: Vec<QuoteRow>,
    ) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.lock().await;
            tables.lessons = lessons;
            tables.badges = badges;
            tables.quotes = quotes;
        }
        store
    }

    /// Makes the next `count` history inserts fail with a 503.
    pub fn fail_next_history_inserts(&self, count: u32) {
        self.history_failures.store(count, Ordering::SeqCst);
    }

    fn publish(&self, kind: ChangeKind, profile_id: Uuid, row: Option<LiveSessionRow>) {
        let receivers = self.changes.send(LiveChange {
            kind,
            profile_id,
            row,
        });
        debug!(?kind, %profile_id, receivers = receivers.unwrap_or(0), "Live change");
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_lessons(&self) -> Result<Vec<serde_json::Value>> {
        Ok(self.tables.lock().await.lessons.clone())
    }

    async fn list_badges(&self) -> Result<Vec<BadgeRow>> {
        Ok(self.tables.lock().await.badges.clone())
    }

    async fn list_quotes(&self) -> Result<Vec<QuoteRow>> {
        Ok(self.tables.lock().await.quotes.clone())
    }

    async fn fetch_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRow>> {
        Ok(self.tables.lock().await.profiles.get(&profile_id).cloned())
    }

    async fn upsert_profile(&self, profile: ProfileRow) -> Result<ProfileRow> {
        let mut tables = self.tables.lock().await;
        tables.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn list_assignments(&self, profile_id: Uuid) -> Result<Vec<AssignmentRow>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.profile_id == profile_id)
            .cloned()
            .collect())
    }

    async fn insert_assignment(&self, assignment: AssignmentRow) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables.assignments.contains(&assignment) {
            tables.assignments.push(assignment);
        }
        Ok(())
    }

    async fn delete_assignment(&self, profile_id: Uuid, lesson_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .assignments
            .retain(|a| !(a.profile_id == profile_id && a.lesson_id == lesson_id));
        Ok(())
    }

    async fn insert_lesson_result(&self, result: LessonResultRow) -> Result<()> {
        let remaining = self.history_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.history_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Service {
                status: 503,
                message: "lesson_history temporarily unavailable".to_string(),
            });
        }
        self.tables.lock().await.history.push(result);
        Ok(())
    }

    async fn list_lesson_results(&self, profile_id: Uuid) -> Result<Vec<LessonResultRow>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .history
            .iter()
            .filter(|r| r.profile_id == profile_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(rows)
    }

    async fn upsert_live_session(&self, row: LiveSessionRow) -> Result<()> {
        let profile_id = row.profile_id;
        let previous = self
            .tables
            .lock()
            .await
            .live
            .insert(profile_id, row.clone());
        let kind = if previous.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.publish(kind, profile_id, Some(row));
        Ok(())
    }

    async fn update_live_session(&self, row: LiveSessionRow) -> Result<bool> {
        let profile_id = row.profile_id;
        {
            let mut tables = self.tables.lock().await;
            let Some(existing) = tables.live.get_mut(&profile_id) else {
                return Ok(false);
            };
            *existing = row.clone();
        }
        self.publish(ChangeKind::Update, profile_id, Some(row));
        Ok(true)
    }

    async fn fetch_live_session(&self, profile_id: Uuid) -> Result<Option<LiveSessionRow>> {
        Ok(self.tables.lock().await.live.get(&profile_id).cloned())
    }

    async fn delete_live_session(&self, profile_id: Uuid) -> Result<()> {
        let removed = self.tables.lock().await.live.remove(&profile_id);
        if removed.is_some() {
            self.publish(ChangeKind::Delete, profile_id, None);
        }
        Ok(())
    }

    fn subscribe_live(&self, profile_id: Uuid) -> LiveSubscription {
        LiveSubscription::new(profile_id, self.changes.subscribe())
    }
}
