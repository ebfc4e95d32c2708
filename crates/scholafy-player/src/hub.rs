//! Application state provider.
//!
//! [`ProfileHub`] holds the in-memory view of one child's profile, lesson
//! catalogue, history and assignments, and is the only writer to the remote
//! store outside the live-status heartbeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use scholafy_insight::{
    compute_curriculum_stats, compute_insights, AnswerInput, CatalogueEntry, CurriculumStats,
    Insight, SessionReport, SessionStatus,
};
use scholafy_store::{
    AssignmentRow, BadgeRow, LessonResultRow, ProfileRow, QuoteRow, RemoteStore,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PlayerError, Result};
use crate::lesson::Lesson;
use crate::live::{LiveBroadcaster, LiveEvent, LiveMode, SessionSavedPayload};
use crate::record::QuestionRecord;
use crate::rewards::{apply_completion, Rewards};
use crate::session::{BackgroundSession, SessionOutcome};

#[derive(Debug)]
struct HubState {
    profile: ProfileRow,
    lessons: Vec<Arc<Lesson>>,
    history: Vec<LessonResultRow>,
    assignments: Vec<String>,
    background: Option<BackgroundSession>,
    badges: Vec<BadgeRow>,
    quotes: Vec<QuoteRow>,
}

/// What a successful save produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedResult {
    /// The stored history row.
    pub row: LessonResultRow,
    /// XP and badges awarded.
    pub rewards: Rewards,
    /// Insight derived from the records.
    pub insight: Insight,
}

struct SaveGuard<'a>(&'a AtomicBool);

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One child's application state, shared by the player and the parent API.
pub struct ProfileHub {
    store: Arc<dyn RemoteStore>,
    student_name: String,
    state: Mutex<HubState>,
    saving: AtomicBool,
    broadcaster: LiveBroadcaster,
}

impl std::fmt::Debug for ProfileHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileHub")
            .field("student_name", &self.student_name)
            .field("saving", &self.saving)
            .finish_non_exhaustive()
    }
}

fn parse_status(status: &str) -> SessionStatus {
    if status == SessionStatus::Completed.as_str() {
        SessionStatus::Completed
    } else {
        SessionStatus::Incomplete
    }
}

fn parse_lessons(rows: Vec<serde_json::Value>) -> Vec<Arc<Lesson>> {
    rows.into_iter()
        .filter_map(|row| match Lesson::from_value(row) {
            Ok(lesson) => Some(Arc::new(lesson)),
            Err(e) => {
                warn!(error = %e, "Skipping invalid lesson row");
                None
            }
        })
        .collect()
}

impl ProfileHub {
    /// Loads everything the dashboards need for `profile_id`.
    ///
    /// Catalogue fetches are best effort; `fallback_lessons` is used when the
    /// store has no lessons. A missing profile is created with defaults.
    pub async fn load(
        store: Arc<dyn RemoteStore>,
        profile_id: Uuid,
        student_name: impl Into<String>,
        fallback_lessons: Vec<Lesson>,
    ) -> Result<Self> {
        let student_name = student_name.into();

        let (lessons, badges, quotes) = tokio::join!(
            store.list_lessons(),
            store.list_badges(),
            store.list_quotes()
        );
        let mut lessons = lessons.map(parse_lessons).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to fetch lessons");
            Vec::new()
        });
        if lessons.is_empty() {
            lessons = fallback_lessons.into_iter().map(Arc::new).collect();
        }
        let badges = badges.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to fetch badges");
            Vec::new()
        });
        let quotes = quotes.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to fetch quotes");
            Vec::new()
        });

        let profile = match store.fetch_profile(profile_id).await? {
            Some(profile) => profile,
            None => {
                info!(%profile_id, "Creating profile");
                store
                    .upsert_profile(ProfileRow {
                        id: profile_id,
                        name: student_name.clone(),
                        year_group: 3,
                        streak_days: 0,
                        xp: 0,
                        level: 1,
                        badges: Vec::new(),
                        last_completed_on: None,
                    })
                    .await?
            }
        };

        let mut assignments: Vec<String> = store
            .list_assignments(profile_id)
            .await?
            .into_iter()
            .map(|a| a.lesson_id)
            .collect();
        if assignments.is_empty() {
            if let Some(first) = lessons.first() {
                assignments.push(first.id.clone());
            }
        }

        let history = store.list_lesson_results(profile_id).await?;

        info!(
            %profile_id,
            lessons = lessons.len(),
            assignments = assignments.len(),
            history = history.len(),
            "Profile loaded"
        );

        Ok(Self {
            store,
            student_name,
            state: Mutex::new(HubState {
                profile,
                lessons,
                history,
                assignments,
                background: None,
                badges,
                quotes,
            }),
            saving: AtomicBool::new(false),
            broadcaster: LiveBroadcaster::default(),
        })
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// The remote store behind this hub.
    #[must_use]
    pub fn store(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.store)
    }

    /// Event fan-out for the parent monitor.
    #[must_use]
    pub const fn broadcaster(&self) -> &LiveBroadcaster {
        &self.broadcaster
    }

    /// Child's display name.
    #[must_use]
    pub fn student_name(&self) -> &str {
        &self.student_name
    }

    /// Current profile.
    pub async fn profile(&self) -> ProfileRow {
        self.state.lock().await.profile.clone()
    }

    /// Profile id.
    pub async fn profile_id(&self) -> Uuid {
        self.state.lock().await.profile.id
    }

    /// Lesson catalogue.
    pub async fn lessons(&self) -> Vec<Arc<Lesson>> {
        self.state.lock().await.lessons.clone()
    }

    /// Looks up a lesson by id.
    pub async fn lesson(&self, lesson_id: &str) -> Result<Arc<Lesson>> {
        self.state
            .lock()
            .await
            .lessons
            .iter()
            .find(|l| l.id == lesson_id)
            .cloned()
            .ok_or_else(|| PlayerError::unknown_lesson(lesson_id))
    }

    /// Lesson history, newest first.
    pub async fn history(&self) -> Vec<LessonResultRow> {
        self.state.lock().await.history.clone()
    }

    /// Assigned lesson ids.
    pub async fn assignments(&self) -> Vec<String> {
        self.state.lock().await.assignments.clone()
    }

    /// Minimized session, if any.
    pub async fn background(&self) -> Option<BackgroundSession> {
        self.state.lock().await.background.clone()
    }

    /// Badge catalogue.
    pub async fn badges(&self) -> Vec<BadgeRow> {
        self.state.lock().await.badges.clone()
    }

    /// Whether a result save is running.
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------------

    /// Assigns a catalogue lesson to the child.
    pub async fn assign_lesson(&self, lesson_id: &str) -> Result<()> {
        let profile_id = {
            let state = self.state.lock().await;
            if !state.lessons.iter().any(|l| l.id == lesson_id) {
                return Err(PlayerError::unknown_lesson(lesson_id));
            }
            if state.assignments.iter().any(|a| a == lesson_id) {
                return Ok(());
            }
            state.profile.id
        };

        self.store
            .insert_assignment(AssignmentRow {
                profile_id,
                lesson_id: lesson_id.to_string(),
            })
            .await?;
        self.state
            .lock()
            .await
            .assignments
            .push(lesson_id.to_string());
        info!(lesson_id, "Lesson assigned");
        Ok(())
    }

    /// Removes a lesson from the child's assignments.
    pub async fn unassign_lesson(&self, lesson_id: &str) -> Result<()> {
        let profile_id = self.profile_id().await;
        self.store.delete_assignment(profile_id, lesson_id).await?;
        self.state
            .lock()
            .await
            .assignments
            .retain(|a| a != lesson_id);
        info!(lesson_id, "Lesson unassigned");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------------

    /// Persists a finished session exactly once.
    ///
    /// Returns [`PlayerError::SaveInFlight`] while another save runs and
    /// [`PlayerError::SaveFailed`] when the history insert fails; nothing is
    /// changed locally in either case, so the caller can retry.
    pub async fn save_lesson_result(&self, outcome: &SessionOutcome) -> Result<SavedResult> {
        if self
            .saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PlayerError::SaveInFlight);
        }
        let _guard = SaveGuard(&self.saving);

        let inputs: Vec<AnswerInput> = outcome.records.iter().map(QuestionRecord::as_input).collect();
        let insight = compute_insights(&inputs, outcome.score_percent, &self.student_name);

        let (mut profile, first_completion) = {
            let state = self.state.lock().await;
            let first = !state
                .history
                .iter()
                .any(|h| parse_status(&h.status) == SessionStatus::Completed);
            (state.profile.clone(), first)
        };

        let completed = outcome.status == SessionStatus::Completed;
        let rewards = if completed {
            apply_completion(
                &mut profile,
                outcome.estimated_minutes,
                outcome.score_percent,
                &inputs,
                first_completion,
                outcome.finished_at.date_naive(),
            )
        } else {
            Rewards::default()
        };

        let row = LessonResultRow {
            profile_id: profile.id,
            lesson_id: outcome.lesson_id.clone(),
            status: outcome.status.as_str().to_string(),
            timestamp: outcome.finished_at,
            score_percent: outcome.score_percent,
            xp_earned: rewards.xp_earned,
            duration_seconds: outcome.duration_seconds,
            records: serde_json::to_value(&outcome.records)?,
            badges_earned: serde_json::to_value(&rewards.badges_earned)?,
            effort_grade: Some(insight.effort_grade.as_str().to_string()),
            focus_index: Some(insight.focus_index),
            mastery_level: Some(insight.mastery_level.code().to_string()),
            insight_text: Some(insight.narrative.clone()),
        };

        self.store
            .insert_lesson_result(row.clone())
            .await
            .map_err(|source| {
                warn!(lesson_id = %outcome.lesson_id, error = %source, "Lesson result save failed");
                PlayerError::SaveFailed { source }
            })?;

        if completed {
            if let Err(e) = self
                .store
                .delete_assignment(profile.id, &outcome.lesson_id)
                .await
            {
                warn!(error = %e, "Failed to unassign completed lesson");
            }
        }
        if let Err(e) = self.store.delete_live_session(profile.id).await {
            warn!(error = %e, "Failed to clear live status after save");
        }
        if completed {
            match self.store.upsert_profile(profile.clone()).await {
                Ok(stored) => profile = stored,
                Err(e) => warn!(error = %e, "Failed to update profile after save"),
            }
        }

        {
            let mut state = self.state.lock().await;
            state.history.insert(0, row.clone());
            if completed {
                state.assignments.retain(|a| *a != outcome.lesson_id);
                state.profile = profile;
            }
        }

        info!(
            lesson_id = %outcome.lesson_id,
            status = %outcome.status,
            score = outcome.score_percent,
            xp = rewards.xp_earned,
            badges = ?rewards.badges_earned,
            "Lesson result saved"
        );
        self.broadcaster.send(LiveEvent::SessionSaved(SessionSavedPayload {
            lesson_id: outcome.lesson_id.clone(),
            status: outcome.status,
            score_percent: outcome.score_percent,
            xp_earned: rewards.xp_earned,
            badges_earned: rewards.badges_earned.clone(),
        }));

        Ok(SavedResult {
            row,
            rewards,
            insight,
        })
    }

    /// Builds the parent report for the history entry at `index` (newest first).
    pub async fn report(&self, index: usize) -> Option<SessionReport> {
        let state = self.state.lock().await;
        let row = state.history.get(index)?;

        let records: Vec<QuestionRecord> = serde_json::from_value(row.records.clone())
            .unwrap_or_else(|e| {
                warn!(error = %e, "Unreadable records in history row");
                Vec::new()
            });
        let title = state
            .lessons
            .iter()
            .find(|l| l.id == row.lesson_id)
            .map_or_else(|| row.lesson_id.clone(), |l| l.title.clone());
        let badge_ids: Vec<String> =
            serde_json::from_value(row.badges_earned.clone()).unwrap_or_default();
        let badge_names = badge_ids
            .iter()
            .map(|id| {
                state
                    .badges
                    .iter()
                    .find(|b| b.id == *id)
                    .map_or_else(|| id.clone(), |b| b.name.clone())
            })
            .collect();

        Some(
            SessionReport::new(
                self.student_name.clone(),
                title,
                parse_status(&row.status),
                row.timestamp,
                row.score_percent,
                row.duration_seconds,
                records.iter().map(QuestionRecord::to_report).collect(),
            )
            .with_rewards(row.xp_earned, badge_names),
        )
    }

    // ------------------------------------------------------------------------
    // Background sessions
    // ------------------------------------------------------------------------

    /// Keeps a minimized session, replacing any earlier one.
    pub async fn minimize(&self, background: BackgroundSession) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.background.replace(background) {
            warn!(lesson_id = %previous.lesson_id, "Replacing earlier background session");
        }
    }

    /// Takes the minimized session for `lesson_id` so it can be resumed.
    pub async fn take_background(&self, lesson_id: &str) -> Result<BackgroundSession> {
        let mut state = self.state.lock().await;
        match state.background.take() {
            Some(background) if background.lesson_id == lesson_id => Ok(background),
            other => {
                state.background = other;
                Err(PlayerError::NoBackgroundSession {
                    lesson_id: lesson_id.to_string(),
                })
            }
        }
    }

    /// Parent discards the minimized session.
    ///
    /// The live row is deleted only while it still shows that lesson
    /// minimized; a row owned by a lesson opened since is left alone.
    pub async fn clear_background(&self) -> Option<BackgroundSession> {
        let (cleared, profile_id) = {
            let mut state = self.state.lock().await;
            (state.background.take(), state.profile.id)
        };
        let background = cleared.as_ref()?;

        match self.store.fetch_live_session(profile_id).await {
            Ok(Some(row))
                if row.lesson_id == background.lesson_id
                    && row.mode == LiveMode::Minimized.as_str() =>
            {
                if let Err(e) = self.store.delete_live_session(profile_id).await {
                    warn!(error = %e, "Failed to clear minimized live status");
                }
            }
            Ok(Some(row)) => {
                debug!(
                    lesson_id = %row.lesson_id,
                    mode = %row.mode,
                    "Live row belongs to another session, keeping it"
                );
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read live status before clearing"),
        }
        info!(lesson_id = %background.lesson_id, "Background session cleared");
        cleared
    }

    // ------------------------------------------------------------------------
    // Dashboard helpers
    // ------------------------------------------------------------------------

    /// Progress across the catalogue.
    pub async fn curriculum_stats(&self) -> CurriculumStats {
        let state = self.state.lock().await;
        let catalogue: Vec<CatalogueEntry<'_>> = state
            .lessons
            .iter()
            .map(|l| CatalogueEntry {
                id: &l.id,
                subject: &l.subject,
            })
            .collect();
        compute_curriculum_stats(
            &catalogue,
            state
                .history
                .iter()
                .map(|h| (h.lesson_id.as_str(), parse_status(&h.status), h.score_percent)),
        )
    }

    /// Quote of the day, stable for a given date.
    pub async fn daily_quote(&self, today: NaiveDate) -> Option<QuoteRow> {
        let state = self.state.lock().await;
        if state.quotes.is_empty() {
            return None;
        }
        let index = today.ordinal0() as usize % state.quotes.len();
        state.quotes.get(index).cloned()
    }

    /// Quote for the current UTC date.
    pub async fn quote_of_the_day(&self) -> Option<QuoteRow> {
        self.daily_quote(Utc::now().date_naive()).await
    }
}
