//! Player phase state machine.
//!
//! A [`PlayerSession`] owns one playthrough of a lesson. It never touches the
//! video, the network or a clock directly: every operation takes `now` and
//! returns the [`PlayerEffect`]s the host must carry out.
//!
//! The phases move as follows:
//! - `Starter` -> `Video` once every starter is answered
//! - `Video` -> `Question` when playback reaches a cue, and back after feedback
//! - `Video` -> `Exit` when the video ends
//! - `Exit` -> `Complete` once every exit question is answered
//! - any live phase -> `Incomplete` on a parent override or remote delete
//!
//! Minimizing consumes the session into a [`BackgroundSession`] that
//! [`PlayerSession::resume`] turns back into a session.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scholafy_insight::{Phase, SessionStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TimingConfig;
use crate::error::{PlayerError, Result};
use crate::lesson::{Answer, Lesson, Question};
use crate::live::{LiveMode, LiveStats, LiveStatus};
use crate::record::{AnswerLog, QuestionRecord};

// ============================================================================
// PlayerPhase
// ============================================================================

/// Where the player is in a lesson.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerPhase {
    /// Working through the starter quiz.
    #[default]
    Starter,
    /// Watching the video.
    Video,
    /// Answering an in-video cue.
    Question,
    /// Working through the exit quiz.
    Exit,
    /// Every phase finished.
    Complete,
    /// Ended early.
    Incomplete,
}

impl PlayerPhase {
    /// Returns `true` for `Complete` and `Incomplete`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Incomplete)
    }

    /// Returns `true` for the two linear quiz phases.
    #[must_use]
    pub const fn is_quiz(&self) -> bool {
        matches!(self, Self::Starter | Self::Exit)
    }

    const fn live_mode(self) -> LiveMode {
        match self {
            Self::Starter => LiveMode::Starter,
            Self::Video => LiveMode::Video,
            Self::Question => LiveMode::Question,
            Self::Exit => LiveMode::Exit,
            Self::Complete | Self::Incomplete => LiveMode::Idle,
        }
    }
}

// ============================================================================
// PlayerEffect
// ============================================================================

/// A side effect the host must perform after a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEffect {
    /// Show a question.
    Present {
        /// Question id.
        question_id: String,
        /// Phase the answer will be recorded under.
        phase: Phase,
    },
    /// Show feedback for the answer just given.
    ShowFeedback {
        /// Whether the answer was correct.
        correct: bool,
        /// Feedback line.
        message: String,
    },
    /// Call [`PlayerSession::advance`] after this delay.
    ScheduleAdvance(Duration),
    /// Start or continue playback at a position in seconds.
    Play {
        /// Playback position.
        from: f64,
    },
    /// Pause playback.
    Pause,
    /// Mute audio.
    Mute,
    /// Unmute audio.
    Unmute,
    /// Ask for fullscreen.
    RequestFullscreen,
    /// Leave fullscreen.
    ExitFullscreen,
    /// Publish a live snapshot now, outside the heartbeat.
    PublishLive,
    /// Publish this snapshot as the final row of a minimized session.
    PublishMinimized(LiveStatus),
    /// Delete the live row.
    DeleteLive,
    /// Persist the outcome with this status.
    SaveResult(SessionStatus),
    /// Stop playback, clear the source and release the video resource.
    ReleasePlayback,
    /// Navigate back to the dashboard.
    ExitToDashboard,
}

// ============================================================================
// BackgroundSession / SessionOutcome
// ============================================================================

/// A minimized session, kept until the child resumes or a parent clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundSession {
    /// Lesson being played.
    pub lesson_id: String,
    /// Video position in seconds.
    pub position: f64,
    /// Nominal lesson length in seconds.
    pub total_seconds: u64,
    /// Phase at the time of minimizing.
    pub phase: PlayerPhase,
    /// Question on screen and not yet answered, if any.
    pub pending_question: Option<String>,
    /// Index into the current quiz.
    pub quiz_index: usize,
    /// Completed question ids.
    pub completed: BTreeSet<String>,
    /// Answers so far.
    pub log: AnswerLog,
    /// Starter correctness in answer order.
    pub starter_results: Vec<bool>,
    /// When the session first started.
    pub started_at: DateTime<Utc>,
}

/// Everything needed to persist one finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    /// Lesson id.
    pub lesson_id: String,
    /// Lesson title.
    pub lesson_title: String,
    /// Lesson length used for XP.
    pub estimated_minutes: u32,
    /// How the session ended.
    pub status: SessionStatus,
    /// Rounded percentage of correct answers.
    pub score_percent: u32,
    /// Whole seconds since the session started.
    pub duration_seconds: u64,
    /// Answer log.
    pub records: Vec<QuestionRecord>,
    /// When the outcome was taken.
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// PlayerSession
// ============================================================================

#[derive(Debug, Clone)]
struct Presented {
    question_id: String,
    phase: Phase,
    at: DateTime<Utc>,
}

/// One playthrough of a lesson.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    lesson: Arc<Lesson>,
    timing: TimingConfig,
    phase: PlayerPhase,
    quiz_index: usize,
    position: f64,
    pending_cue: Option<String>,
    presented: Option<Presented>,
    awaiting_advance: bool,
    fullscreen: bool,
    fullscreen_exited: bool,
    ending: bool,
    log: AnswerLog,
    started_at: DateTime<Utc>,
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = (to - from).num_milliseconds().max(0) as f64;
    millis / 1000.0
}

impl PlayerSession {
    fn blank(lesson: Arc<Lesson>, timing: TimingConfig, now: DateTime<Utc>) -> Self {
        Self {
            lesson,
            timing,
            phase: PlayerPhase::Starter,
            quiz_index: 0,
            position: 0.0,
            pending_cue: None,
            presented: None,
            awaiting_advance: false,
            fullscreen: false,
            fullscreen_exited: false,
            ending: false,
            log: AnswerLog::new(),
            started_at: now,
        }
    }

    /// Starts a fresh playthrough.
    ///
    /// Opens on the first starter, or on the video when there are none.
    #[must_use]
    pub fn start(
        lesson: Arc<Lesson>,
        timing: TimingConfig,
        now: DateTime<Utc>,
    ) -> (Self, Vec<PlayerEffect>) {
        let mut session = Self::blank(lesson, timing, now);
        let mut effects = Vec::new();
        if session.lesson.starters.is_empty() {
            session.enter_video(&mut effects);
        } else {
            session.phase = PlayerPhase::Starter;
            session.present_quiz_question(now, &mut effects);
        }
        info!(lesson_id = %session.lesson.id, phase = ?session.phase, "Lesson started");
        (session, effects)
    }

    /// Rebuilds a session from a minimized snapshot.
    ///
    /// An unanswered question is presented again before any playback.
    pub fn resume(
        lesson: Arc<Lesson>,
        timing: TimingConfig,
        background: BackgroundSession,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<PlayerEffect>)> {
        if background.lesson_id != lesson.id {
            return Err(PlayerError::NoBackgroundSession {
                lesson_id: lesson.id.clone(),
            });
        }
        if background.phase.is_terminal() {
            return Err(PlayerError::SessionEnded);
        }

        let mut session = Self::blank(lesson, timing, background.started_at);
        session.log = background.log;
        session.position = background.position;
        session.quiz_index = background.quiz_index;
        session.phase = background.phase;

        let mut effects = Vec::new();
        match background.phase {
            PlayerPhase::Question => match background.pending_question {
                Some(id) if !session.log.is_completed(&id) => {
                    session.pending_cue = Some(id.clone());
                    session.present(id, Phase::Video, now, &mut effects);
                }
                _ => session.enter_video(&mut effects),
            },
            PlayerPhase::Starter | PlayerPhase::Exit => {
                session.present_quiz_question(now, &mut effects);
            }
            _ => session.enter_video(&mut effects),
        }

        info!(
            lesson_id = %session.lesson.id,
            phase = ?session.phase,
            position = session.position,
            answered = session.log.len(),
            "Lesson resumed"
        );
        Ok((session, effects))
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The lesson being played.
    #[must_use]
    pub fn lesson(&self) -> &Lesson {
        &self.lesson
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> PlayerPhase {
        self.phase
    }

    /// Answers so far.
    #[must_use]
    pub const fn log(&self) -> &AnswerLog {
        &self.log
    }

    /// Id of the question on screen.
    #[must_use]
    pub fn presented(&self) -> Option<&str> {
        self.presented.as_ref().map(|p| p.question_id.as_str())
    }

    /// Last known video position.
    #[must_use]
    pub const fn position(&self) -> f64 {
        self.position
    }

    /// Whether teardown has begun.
    #[must_use]
    pub const fn is_ending(&self) -> bool {
        self.ending
    }

    /// Whether playback is held after leaving fullscreen.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.fullscreen_exited
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn present(
        &mut self,
        question_id: String,
        phase: Phase,
        now: DateTime<Utc>,
        effects: &mut Vec<PlayerEffect>,
    ) {
        if self.presented.as_ref().is_some_and(|p| p.question_id == question_id) {
            return;
        }
        debug!(question_id = %question_id, phase = %phase, "Presenting question");
        self.presented = Some(Presented {
            question_id: question_id.clone(),
            phase,
            at: now,
        });
        effects.push(PlayerEffect::Present { question_id, phase });
    }

    fn quiz(&self) -> (&[Question], Phase) {
        if self.phase == PlayerPhase::Exit {
            (&self.lesson.exits, Phase::Exit)
        } else {
            (&self.lesson.starters, Phase::Starter)
        }
    }

    /// Presents the first unanswered quiz question at or after `quiz_index`,
    /// or finishes the quiz when none remain.
    fn present_quiz_question(&mut self, now: DateTime<Utc>, effects: &mut Vec<PlayerEffect>) {
        let (questions, phase) = self.quiz();
        let next = questions
            .iter()
            .enumerate()
            .skip(self.quiz_index)
            .find(|(_, q)| !self.log.is_completed(&q.id))
            .map(|(index, q)| (index, q.id.clone()));

        match next {
            Some((index, id)) => {
                self.quiz_index = index;
                self.present(id, phase, now, effects);
            }
            None if self.phase == PlayerPhase::Exit => self.complete_into(effects),
            None => self.enter_video(effects),
        }
    }

    fn enter_video(&mut self, effects: &mut Vec<PlayerEffect>) {
        self.phase = PlayerPhase::Video;
        self.quiz_index = 0;
        self.presented = None;
        self.pending_cue = None;
        effects.push(PlayerEffect::RequestFullscreen);
        effects.push(PlayerEffect::Play {
            from: self.position,
        });
    }

    fn release_into(effects: &mut Vec<PlayerEffect>) {
        effects.push(PlayerEffect::Pause);
        effects.push(PlayerEffect::Mute);
        effects.push(PlayerEffect::ReleasePlayback);
    }

    fn complete_into(&mut self, effects: &mut Vec<PlayerEffect>) {
        if self.ending {
            return;
        }
        self.ending = true;
        self.phase = PlayerPhase::Complete;
        self.presented = None;
        if self.fullscreen {
            effects.push(PlayerEffect::ExitFullscreen);
        }
        Self::release_into(effects);
        effects.push(PlayerEffect::SaveResult(SessionStatus::Completed));
        info!(lesson_id = %self.lesson.id, answered = self.log.len(), "Lesson complete");
    }

    /// Handles a playback clock tick; may interrupt the video with a cue.
    pub fn on_time_update(&mut self, position: f64, now: DateTime<Utc>) -> Vec<PlayerEffect> {
        let mut effects = Vec::new();
        if self.ending || self.phase != PlayerPhase::Video || self.fullscreen_exited {
            return effects;
        }
        self.position = position;

        let pending = self.pending_cue.as_deref();
        let log = &self.log;
        let Some(cue) = self
            .lesson
            .cue_at(position, self.timing.cue_tolerance_secs, |id| {
                log.is_completed(id) || pending == Some(id)
            })
            .map(|q| q.id.clone())
        else {
            return effects;
        };

        info!(cue = %cue, position, "Cue reached");
        self.pending_cue = Some(cue.clone());
        self.phase = PlayerPhase::Question;
        effects.push(PlayerEffect::Pause);
        if self.fullscreen {
            effects.push(PlayerEffect::ExitFullscreen);
        }
        self.present(cue, Phase::Video, now, &mut effects);
        effects
    }

    /// Grades and records an answer to the question on screen.
    pub fn submit_answer(
        &mut self,
        question_id: &str,
        answer: &Answer,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlayerEffect>> {
        if self.ending || self.phase.is_terminal() {
            return Err(PlayerError::SessionEnded);
        }
        let Some(presented) = self
            .presented
            .as_ref()
            .filter(|p| p.question_id == question_id)
            .cloned()
        else {
            return Err(PlayerError::unexpected_answer(
                question_id,
                self.presented(),
            ));
        };
        if self.log.is_completed(question_id) {
            debug!(question_id, "Ignoring repeat answer");
            return Ok(Vec::new());
        }

        let question = self
            .lesson
            .question(question_id)
            .ok_or_else(|| PlayerError::unexpected_answer(question_id, None))?;
        let graded = question.grade(answer)?;

        self.log.push(QuestionRecord {
            question_id: question_id.to_string(),
            phase: presented.phase,
            prompt: question.prompt.clone(),
            is_correct: graded.is_correct,
            answer: graded.answer,
            timestamp: now,
            duration_seconds: seconds_between(presented.at, now),
        });
        self.awaiting_advance = true;

        info!(
            question_id,
            phase = %presented.phase,
            correct = graded.is_correct,
            "Answer recorded"
        );

        let delay = self
            .timing
            .feedback_delay(graded.is_correct, self.phase.is_quiz());
        Ok(vec![
            PlayerEffect::ShowFeedback {
                correct: graded.is_correct,
                message: graded.feedback,
            },
            PlayerEffect::PublishLive,
            PlayerEffect::ScheduleAdvance(delay),
        ])
    }

    /// Leaves the answered question once its feedback delay has passed.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<PlayerEffect> {
        let mut effects = Vec::new();
        if self.ending || !self.awaiting_advance {
            return effects;
        }
        self.awaiting_advance = false;
        self.presented = None;

        match self.phase {
            PlayerPhase::Question => self.enter_video(&mut effects),
            PlayerPhase::Starter | PlayerPhase::Exit => {
                self.quiz_index += 1;
                self.present_quiz_question(now, &mut effects);
            }
            _ => {}
        }
        effects
    }

    /// Handles the natural end of the video.
    pub fn on_video_ended(&mut self, now: DateTime<Utc>) -> Vec<PlayerEffect> {
        let mut effects = Vec::new();
        if self.ending || self.phase != PlayerPhase::Video {
            return effects;
        }
        if self.lesson.exits.is_empty() {
            self.complete_into(&mut effects);
            return effects;
        }
        self.phase = PlayerPhase::Exit;
        self.quiz_index = 0;
        if self.fullscreen {
            effects.push(PlayerEffect::ExitFullscreen);
        }
        self.present_quiz_question(now, &mut effects);
        effects
    }

    /// Finishes the lesson and asks for a completed result to be saved.
    pub fn complete(&mut self) -> Vec<PlayerEffect> {
        let mut effects = Vec::new();
        self.complete_into(&mut effects);
        effects
    }

    /// Enforces fullscreen during video by pausing when it is left.
    pub fn on_fullscreen_change(&mut self, active: bool, _now: DateTime<Utc>) -> Vec<PlayerEffect> {
        self.fullscreen = active;
        let mut effects = Vec::new();
        if self.ending || self.phase != PlayerPhase::Video {
            return effects;
        }
        match (active, self.fullscreen_exited) {
            (false, false) => {
                info!(position = self.position, "Fullscreen left during video, pausing");
                self.fullscreen_exited = true;
                effects.extend([
                    PlayerEffect::Pause,
                    PlayerEffect::Mute,
                    PlayerEffect::PublishLive,
                ]);
            }
            (true, true) => {
                self.fullscreen_exited = false;
                effects.extend([
                    PlayerEffect::Unmute,
                    PlayerEffect::Play {
                        from: self.position,
                    },
                    PlayerEffect::PublishLive,
                ]);
            }
            _ => {}
        }
        effects
    }

    /// Snapshots the session and tears the player down.
    ///
    /// The live row is kept with mode `minimized` rather than deleted.
    #[must_use]
    pub fn minimize(mut self, now: DateTime<Utc>) -> (BackgroundSession, Vec<PlayerEffect>) {
        let mut effects = Vec::new();
        if let Some(mut status) = self.live_snapshot(now) {
            status.mode = LiveMode::Minimized;
            effects.push(PlayerEffect::PublishMinimized(status));
        }
        self.ending = true;
        Self::release_into(&mut effects);

        let pending_question = match &self.presented {
            Some(p) if !self.log.is_completed(&p.question_id) => Some(p.question_id.clone()),
            _ => self.pending_cue.clone().filter(|id| !self.log.is_completed(id)),
        };
        let background = BackgroundSession {
            lesson_id: self.lesson.id.clone(),
            position: self.position,
            total_seconds: self.lesson.total_seconds(),
            phase: self.phase,
            pending_question,
            quiz_index: self.quiz_index,
            completed: self.log.completed().clone(),
            starter_results: LiveStatus::starter_results(self.log.records()),
            log: self.log,
            started_at: self.started_at,
        };
        info!(
            lesson_id = %background.lesson_id,
            phase = ?background.phase,
            pending = ?background.pending_question,
            "Lesson minimized"
        );
        (background, effects)
    }

    /// Ends the session early on parent request from this device.
    pub fn end_session(&mut self, _now: DateTime<Utc>) -> Vec<PlayerEffect> {
        let mut effects = Vec::new();
        if self.ending {
            return effects;
        }
        self.ending = true;
        self.phase = PlayerPhase::Incomplete;
        self.presented = None;
        Self::release_into(&mut effects);
        effects.extend([
            PlayerEffect::SaveResult(SessionStatus::Incomplete),
            PlayerEffect::DeleteLive,
            PlayerEffect::ExitToDashboard,
        ]);
        info!(lesson_id = %self.lesson.id, "Session ended by parent override");
        effects
    }

    /// Reacts to the live row being deleted elsewhere.
    ///
    /// Ignored while the session is ending itself.
    pub fn on_remote_delete(&mut self) -> Vec<PlayerEffect> {
        let mut effects = Vec::new();
        if self.ending {
            debug!("Live row deleted during own teardown, ignoring");
            return effects;
        }
        self.ending = true;
        self.phase = PlayerPhase::Incomplete;
        self.presented = None;
        Self::release_into(&mut effects);
        effects.push(PlayerEffect::ExitToDashboard);
        info!(lesson_id = %self.lesson.id, "Session ended remotely");
        effects
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Score, duration and records for saving.
    #[must_use]
    pub fn outcome(&self, status: SessionStatus, now: DateTime<Utc>) -> SessionOutcome {
        #[allow(clippy::cast_sign_loss)]
        let duration_seconds = (now - self.started_at).num_seconds().max(0) as u64;
        SessionOutcome {
            lesson_id: self.lesson.id.clone(),
            lesson_title: self.lesson.title.clone(),
            estimated_minutes: self.lesson.estimated_minutes,
            status,
            score_percent: self.log.score_percent(),
            duration_seconds,
            records: self.log.records().to_vec(),
            finished_at: now,
        }
    }

    /// Live snapshot, or `None` once the session is ending.
    #[must_use]
    pub fn live_snapshot(&self, now: DateTime<Utc>) -> Option<LiveStatus> {
        if self.ending || self.phase.is_terminal() {
            return None;
        }

        let mode = if self.fullscreen_exited && self.phase == PlayerPhase::Video {
            LiveMode::Paused
        } else {
            self.phase.live_mode()
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let elapsed_seconds = match (&self.phase, &self.presented) {
            (PlayerPhase::Video, _) => self.position.max(0.0).floor() as u64,
            (_, Some(p)) => seconds_between(p.at, now).floor() as u64,
            _ => 0,
        };

        let prompt = self
            .presented
            .as_ref()
            .and_then(|p| self.lesson.question(&p.question_id))
            .map(|q| q.prompt.clone());

        let stats = LiveStats {
            starters: LiveStatus::starter_results(self.log.records()),
            questions_answered: self.log.len(),
            questions_total: self.lesson.question_count(),
            starter_count: self.lesson.starters.len(),
            video_question_count: self.lesson.cues.len(),
            exit_count: self.lesson.exits.len(),
        };

        Some(LiveStatus {
            lesson_id: self.lesson.id.clone(),
            mode,
            elapsed_seconds,
            total_seconds: self.lesson.total_seconds(),
            prompt,
            stats,
            history: self.log.records().to_vec(),
            last_update: now,
        })
    }
}
