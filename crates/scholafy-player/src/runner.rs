//! Session runner.
//!
//! A [`SessionRunner`] is the actor that owns one [`PlayerSession`], the
//! video resource behind the [`Playback`] seam, the live-status heartbeat
//! and the remote-kill subscription. Hosts drive it through a
//! [`RunnerHandle`] and receive [`PlayerNotice`]s back.
//!
//! The video resource is always released before [`SessionRunner::run`]
//! returns, whichever way the session ends.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scholafy_insight::SessionStatus;
use scholafy_store::{ChangeKind, LiveSubscription};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::error::{PlayerError, Result};
use crate::heartbeat::{Heartbeat, LivePublisher};
use crate::hub::{ProfileHub, SavedResult};
use crate::lesson::{Answer, Question};
use crate::session::{PlayerEffect, PlayerSession, SessionOutcome};

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 64;

// ============================================================================
// Playback seam
// ============================================================================

/// The exclusive video resource.
#[async_trait]
pub trait Playback: Send {
    /// Starts or continues playback at `from` seconds.
    async fn play(&mut self, from: f64);
    /// Pauses playback.
    async fn pause(&mut self);
    /// Mutes or unmutes audio.
    async fn set_muted(&mut self, muted: bool);
    /// Enters or leaves fullscreen.
    async fn set_fullscreen(&mut self, active: bool);
    /// Clears the source and releases the decoder.
    async fn release(&mut self);
}

// ============================================================================
// Commands and notices
// ============================================================================

/// Input from the host.
#[derive(Debug)]
pub enum PlayerCommand {
    /// Playback clock tick.
    TimeUpdate(f64),
    /// Video reached its end.
    VideoEnded,
    /// Fullscreen state changed.
    FullscreenChanged(bool),
    /// Child answered a question.
    Submit {
        /// Question id.
        question_id: String,
        /// The answer.
        answer: Answer,
        /// Receives the outcome of the submission.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Child minimized the lesson.
    Minimize,
    /// Parent ended the session on this device.
    EndSession,
    /// Retry a failed result save.
    RetrySave {
        /// Receives the outcome of the retry.
        reply: oneshot::Sender<Result<SavedResult>>,
    },
}

/// Output for the host UI.
#[derive(Debug, Clone)]
pub enum PlayerNotice {
    /// Render a question.
    Present(Question),
    /// Show answer feedback.
    Feedback {
        /// Whether the answer was correct.
        correct: bool,
        /// Feedback line.
        message: String,
    },
    /// The result was stored.
    Saved(SavedResult),
    /// Storing the result failed; a retry is possible.
    SaveFailed(String),
    /// Leave the player.
    ReturnToDashboard,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum SessionExit {
    /// All phases finished and the result was stored.
    Completed(SavedResult),
    /// Ended early on this device; the incomplete result was stored.
    Ended(SavedResult),
    /// The live row was deleted elsewhere.
    RemoteKilled,
    /// Minimized to a background session.
    Minimized,
    /// The host went away.
    Abandoned {
        /// Outcome that was never stored, if any.
        unsaved: Option<SessionOutcome>,
    },
}

impl SessionExit {
    /// Short name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Ended(_) => "ended",
            Self::RemoteKilled => "remote_killed",
            Self::Minimized => "minimized",
            Self::Abandoned { .. } => "abandoned",
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Host-side handle to a running session.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    commands: mpsc::Sender<PlayerCommand>,
}

impl RunnerHandle {
    async fn send(&self, command: PlayerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PlayerError::SessionEnded)
    }

    /// Reports the playback position.
    pub async fn time_update(&self, position: f64) -> Result<()> {
        self.send(PlayerCommand::TimeUpdate(position)).await
    }

    /// Reports the end of the video.
    pub async fn video_ended(&self) -> Result<()> {
        self.send(PlayerCommand::VideoEnded).await
    }

    /// Reports a fullscreen change.
    pub async fn fullscreen_changed(&self, active: bool) -> Result<()> {
        self.send(PlayerCommand::FullscreenChanged(active)).await
    }

    /// Submits an answer and waits until it is graded.
    pub async fn submit(&self, question_id: impl Into<String>, answer: Answer) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(PlayerCommand::Submit {
            question_id: question_id.into(),
            answer,
            reply,
        })
        .await?;
        rx.await.map_err(|_| PlayerError::SessionEnded)?
    }

    /// Minimizes the lesson.
    pub async fn minimize(&self) -> Result<()> {
        self.send(PlayerCommand::Minimize).await
    }

    /// Ends the session early.
    pub async fn end_session(&self) -> Result<()> {
        self.send(PlayerCommand::EndSession).await
    }

    /// Retries a failed save.
    pub async fn retry_save(&self) -> Result<SavedResult> {
        let (reply, rx) = oneshot::channel();
        self.send(PlayerCommand::RetrySave { reply }).await?;
        rx.await.map_err(|_| PlayerError::SessionEnded)?
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Owns one playthrough and everything it touches.
pub struct SessionRunner {
    hub: Arc<ProfileHub>,
    session: Arc<Mutex<PlayerSession>>,
    playback: Box<dyn Playback>,
    publisher: LivePublisher,
    heartbeat: Heartbeat,
    subscription: LiveSubscription,
    notices: mpsc::UnboundedSender<PlayerNotice>,
    advance_at: Option<Instant>,
    pending_save: Option<SessionOutcome>,
    saved: Option<SavedResult>,
    released: bool,
    minimized: bool,
}

impl std::fmt::Debug for SessionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRunner")
            .field("publisher", &self.publisher)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl SessionRunner {
    /// Opens a lesson, resuming its background session if one exists.
    pub async fn open(
        hub: Arc<ProfileHub>,
        lesson_id: &str,
        timing: TimingConfig,
        playback: Box<dyn Playback>,
        notices: mpsc::UnboundedSender<PlayerNotice>,
    ) -> Result<Self> {
        let lesson = hub.lesson(lesson_id).await?;
        let now = Utc::now();
        let (session, effects) = match hub.take_background(lesson_id).await {
            Ok(background) => PlayerSession::resume(lesson, timing, background, now)?,
            Err(_) => PlayerSession::start(lesson, timing, now),
        };

        let profile_id = hub.profile_id().await;
        let store = hub.store();
        let subscription = store.subscribe_live(profile_id);
        let publisher = LivePublisher::new(store, profile_id);
        let session = Arc::new(Mutex::new(session));
        let heartbeat = Heartbeat::spawn(publisher.clone(), session.clone(), timing.heartbeat());

        let mut runner = Self {
            hub,
            session,
            playback,
            publisher,
            heartbeat,
            subscription,
            notices,
            advance_at: None,
            pending_save: None,
            saved: None,
            released: false,
            minimized: false,
        };
        runner.apply(effects).await;
        Ok(runner)
    }

    /// Runs the actor on its own task.
    #[must_use]
    pub fn spawn(self) -> (RunnerHandle, JoinHandle<SessionExit>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (RunnerHandle { commands: tx }, task)
    }

    /// Processes commands, timers and live-row changes until the session ends.
    pub async fn run(mut self, mut commands: mpsc::Receiver<PlayerCommand>) -> SessionExit {
        let mut live_open = true;
        let exit = loop {
            if let Some(exit) = self.finished().await {
                break exit;
            }

            let advance_at = self.advance_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("Host dropped the runner handle");
                        break SessionExit::Abandoned {
                            unsaved: self.pending_save.take(),
                        };
                    }
                },
                change = self.subscription.recv(), if live_open => match change {
                    Some(change) if change.kind == ChangeKind::Delete => {
                        let effects = self.session.lock().await.on_remote_delete();
                        self.apply(effects).await;
                    }
                    Some(_) => {}
                    None => {
                        warn!("Live subscription closed, remote end is no longer observed");
                        live_open = false;
                    }
                },
                () = wait_until(advance_at) => {
                    self.advance_at = None;
                    let effects = self.session.lock().await.advance(Utc::now());
                    self.apply(effects).await;
                }
            }
        };

        self.teardown().await;
        info!(exit = exit.as_str(), "Session runner stopped");
        exit
    }

    async fn finished(&mut self) -> Option<SessionExit> {
        if self.minimized {
            return Some(SessionExit::Minimized);
        }
        let phase = self.session.lock().await.phase();
        if !phase.is_terminal() || self.pending_save.is_some() {
            return None;
        }
        Some(match self.saved.take() {
            Some(saved) if saved.row.status == SessionStatus::Completed.as_str() => {
                SessionExit::Completed(saved)
            }
            Some(saved) => SessionExit::Ended(saved),
            None => SessionExit::RemoteKilled,
        })
    }

    async fn handle(&mut self, command: PlayerCommand) {
        let now = Utc::now();
        match command {
            PlayerCommand::TimeUpdate(position) => {
                let effects = self.session.lock().await.on_time_update(position, now);
                self.apply(effects).await;
            }
            PlayerCommand::VideoEnded => {
                let effects = self.session.lock().await.on_video_ended(now);
                self.apply(effects).await;
            }
            PlayerCommand::FullscreenChanged(active) => {
                let effects = self.session.lock().await.on_fullscreen_change(active, now);
                self.apply(effects).await;
            }
            PlayerCommand::Submit {
                question_id,
                answer,
                reply,
            } => {
                let result = self
                    .session
                    .lock()
                    .await
                    .submit_answer(&question_id, &answer, now);
                match result {
                    Ok(effects) => {
                        self.apply(effects).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        debug!(question_id = %question_id, error = %e, "Answer rejected");
                        let _ = reply.send(Err(e));
                    }
                }
            }
            PlayerCommand::Minimize => {
                let session = self.session.lock().await.clone();
                if session.is_ending() {
                    return;
                }
                self.heartbeat.stop().await;
                let (background, effects) = session.minimize(now);
                self.apply(effects).await;
                self.hub.minimize(background).await;
                self.minimized = true;
            }
            PlayerCommand::EndSession => {
                let effects = self.session.lock().await.end_session(now);
                self.apply(effects).await;
            }
            PlayerCommand::RetrySave { reply } => {
                let _ = reply.send(self.retry_save().await);
            }
        }
    }

    /// Retries storing the kept outcome after a failed save.
    pub async fn retry_save(&mut self) -> Result<SavedResult> {
        let Some(outcome) = self.pending_save.take() else {
            return Err(PlayerError::SessionEnded);
        };
        self.save(outcome).await
    }

    async fn save(&mut self, outcome: SessionOutcome) -> Result<SavedResult> {
        match self.hub.save_lesson_result(&outcome).await {
            Ok(saved) => {
                self.notify(PlayerNotice::Saved(saved.clone()));
                self.saved = Some(saved.clone());
                Ok(saved)
            }
            Err(e) => {
                warn!(lesson_id = %outcome.lesson_id, error = %e, "Keeping outcome for retry");
                self.notify(PlayerNotice::SaveFailed(e.to_string()));
                self.pending_save = Some(outcome);
                Err(e)
            }
        }
    }

    fn notify(&self, notice: PlayerNotice) {
        if self.notices.send(notice).is_err() {
            debug!("Host stopped listening for notices");
        }
    }

    async fn apply(&mut self, effects: Vec<PlayerEffect>) {
        for effect in effects {
            match effect {
                PlayerEffect::Present { question_id, .. } => {
                    let question = self
                        .session
                        .lock()
                        .await
                        .lesson()
                        .question(&question_id)
                        .cloned();
                    if let Some(question) = question {
                        self.notify(PlayerNotice::Present(question));
                    }
                }
                PlayerEffect::ShowFeedback { correct, message } => {
                    self.notify(PlayerNotice::Feedback { correct, message });
                }
                PlayerEffect::ScheduleAdvance(delay) => {
                    self.advance_at = Some(Instant::now() + delay);
                }
                PlayerEffect::Play { from } => self.playback.play(from).await,
                PlayerEffect::Pause => self.playback.pause().await,
                PlayerEffect::Mute => self.playback.set_muted(true).await,
                PlayerEffect::Unmute => self.playback.set_muted(false).await,
                PlayerEffect::RequestFullscreen => self.playback.set_fullscreen(true).await,
                PlayerEffect::ExitFullscreen => self.playback.set_fullscreen(false).await,
                PlayerEffect::PublishLive => {
                    let snapshot = self.session.lock().await.live_snapshot(Utc::now());
                    if let Some(status) = snapshot {
                        self.heartbeat.publish_now(&status).await;
                    }
                }
                PlayerEffect::PublishMinimized(status) => {
                    self.heartbeat.stop().await;
                    self.publisher.publish(&status).await;
                }
                PlayerEffect::DeleteLive => {
                    self.heartbeat.stop().await;
                    self.publisher.clear().await;
                }
                PlayerEffect::SaveResult(status) => {
                    self.heartbeat.stop().await;
                    self.advance_at = None;
                    let outcome = self.session.lock().await.outcome(status, Utc::now());
                    let _ = self.save(outcome).await;
                }
                PlayerEffect::ReleasePlayback => self.release().await,
                PlayerEffect::ExitToDashboard => self.notify(PlayerNotice::ReturnToDashboard),
            }
        }
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.playback.pause().await;
        self.playback.set_muted(true).await;
        self.playback.release().await;
        self.released = true;
    }

    async fn teardown(&mut self) {
        self.heartbeat.stop().await;
        self.release().await;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
