//! End-to-end lesson sessions against the in-process store.
//!
//! These tests drive the player engine through whole lessons and check what
//! ends up in the store: one history row per finished session, the live row
//! lifecycle, and the rewards and insight computed on save.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use scholafy_insight::{EffortGrade, MasteryLevel, Phase, SessionStatus};
use scholafy_player::{
    load_catalogue, Answer, Config, Lesson, Playback, PlayerEffect, PlayerNotice, PlayerPhase,
    PlayerSession, ProfileHub, RunnerHandle, SessionExit, SessionRunner, TimingConfig,
};
use scholafy_store::{MemoryStore, RemoteStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const LESSON_ID: &str = "maths_y3_add_2digit";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

fn lessons() -> Vec<Lesson> {
    load_catalogue(fixture("lesson.json")).expect("Failed to load lesson fixture")
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn at(seconds: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(seconds)
}

fn presented(effects: &[PlayerEffect]) -> Option<&str> {
    effects.iter().find_map(|e| match e {
        PlayerEffect::Present { question_id, .. } => Some(question_id.as_str()),
        _ => None,
    })
}

async fn setup() -> (MemoryStore, Arc<ProfileHub>, Uuid) {
    let store = MemoryStore::new();
    let profile_id = Uuid::new_v4();
    let hub = ProfileHub::load(Arc::new(store.clone()), profile_id, "Ada", lessons())
        .await
        .expect("Failed to load profile");
    (store, Arc::new(hub), profile_id)
}

/// Records every call made on the video resource.
#[derive(Clone, Default)]
struct RecordingVideo {
    calls: Arc<StdMutex<Vec<String>>>,
}

impl RecordingVideo {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Playback for RecordingVideo {
    async fn play(&mut self, from: f64) {
        self.push(format!("play {from}"));
    }
    async fn pause(&mut self) {
        self.push("pause".into());
    }
    async fn set_muted(&mut self, muted: bool) {
        self.push(format!("muted {muted}"));
    }
    async fn set_fullscreen(&mut self, active: bool) {
        self.push(format!("fullscreen {active}"));
    }
    async fn release(&mut self) {
        self.push("release".into());
    }
}

async fn open(
    hub: &Arc<ProfileHub>,
    video: &RecordingVideo,
) -> (
    RunnerHandle,
    JoinHandle<SessionExit>,
    mpsc::UnboundedReceiver<PlayerNotice>,
) {
    open_lesson(hub, LESSON_ID, video).await
}

async fn open_lesson(
    hub: &Arc<ProfileHub>,
    lesson_id: &str,
    video: &RecordingVideo,
) -> (
    RunnerHandle,
    JoinHandle<SessionExit>,
    mpsc::UnboundedReceiver<PlayerNotice>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let runner = SessionRunner::open(
        Arc::clone(hub),
        lesson_id,
        TimingConfig::default(),
        Box::new(video.clone()),
        tx,
    )
    .await
    .expect("Failed to open lesson");
    let (handle, task) = runner.spawn();
    (handle, task, rx)
}

fn drain(notices: &mut mpsc::UnboundedReceiver<PlayerNotice>) -> Vec<PlayerNotice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

fn presented_ids(notices: &[PlayerNotice]) -> Vec<String> {
    notices
        .iter()
        .filter_map(|n| match n {
            PlayerNotice::Present(q) => Some(q.id.clone()),
            _ => None,
        })
        .collect()
}

/// Answers both starters, the way a child would.
async fn pass_starters(handle: &RunnerHandle) {
    handle.submit("s1", Answer::Choice(0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    handle
        .submit("s2", Answer::Cloze(vec!["20".into()]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
}

// ============================================================================
// Scoring Scenario
// ============================================================================

/// Two starters (one wrong), a video cue and an exit, all answered calmly.
#[tokio::test]
async fn test_three_of_four_correct_scores_expected_standard() {
    let (store, hub, profile_id) = setup().await;
    let lesson = hub.lesson(LESSON_ID).await.unwrap();
    let (mut session, effects) = PlayerSession::start(lesson, TimingConfig::default(), t0());
    assert_eq!(presented(&effects), Some("s1"));

    session.submit_answer("s1", &Answer::Choice(0), at(5)).unwrap();
    assert!(session
        .submit_answer("s1", &Answer::Choice(1), at(6))
        .unwrap()
        .is_empty());
    let effects = session.advance(at(7));
    assert_eq!(presented(&effects), Some("s2"));

    session
        .submit_answer("s2", &Answer::Cloze(vec!["19".into()]), at(12))
        .unwrap();
    let effects = session.advance(at(15));
    assert!(effects.contains(&PlayerEffect::RequestFullscreen));
    session.on_fullscreen_change(true, at(15));

    let effects = session.on_time_update(10.2, at(26));
    assert_eq!(presented(&effects), Some("v1"));
    assert_eq!(session.phase(), PlayerPhase::Question);
    session.submit_answer("v1", &Answer::Choice(0), at(31)).unwrap();
    session.advance(at(33));
    assert!(session.on_time_update(10.4, at(34)).is_empty());

    let effects = session.on_video_ended(at(60));
    assert_eq!(presented(&effects), Some("ex1"));
    session
        .submit_answer(
            "ex1",
            &Answer::Order(vec!["a".into(), "b".into(), "c".into()]),
            at(66),
        )
        .unwrap();
    let effects = session.advance(at(68));
    assert!(effects.contains(&PlayerEffect::SaveResult(SessionStatus::Completed)));
    assert_eq!(session.phase(), PlayerPhase::Complete);

    let outcome = session.outcome(SessionStatus::Completed, at(68));
    assert_eq!(outcome.score_percent, 75);
    let ids: Vec<&str> = outcome.records.iter().map(|r| r.question_id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2", "v1", "ex1"]);
    assert_eq!(outcome.records[2].phase, Phase::Video);

    let saved = hub.save_lesson_result(&outcome).await.unwrap();
    assert_eq!(saved.insight.mastery_level, MasteryLevel::Exs);
    assert_eq!(saved.insight.focus_index, 100);
    assert_eq!(saved.insight.effort_grade, EffortGrade::APlus);
    assert_eq!(saved.rewards.xp_earned, 150);

    let history = store.list_lesson_results(profile_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "completed");
    assert_eq!(history[0].mastery_level.as_deref(), Some("EXS"));
    assert!(!hub.assignments().await.contains(&LESSON_ID.to_string()));
}

// ============================================================================
// Runner Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_minimize_then_resume_presents_pending_cue_first() {
    let (store, hub, profile_id) = setup().await;

    let video = RecordingVideo::default();
    let (handle, task, mut notices) = open(&hub, &video).await;
    pass_starters(&handle).await;
    handle.fullscreen_changed(true).await.unwrap();
    handle.time_update(10.1).await.unwrap();
    handle.minimize().await.unwrap();
    assert!(matches!(task.await.unwrap(), SessionExit::Minimized));
    assert_eq!(presented_ids(&drain(&mut notices)), vec!["s1", "s2", "v1"]);
    assert_eq!(video.count("release"), 1);

    let row = store.fetch_live_session(profile_id).await.unwrap().unwrap();
    assert_eq!(row.mode, "minimized");
    assert_eq!(
        hub.background().await.unwrap().pending_question.as_deref(),
        Some("v1")
    );

    let resumed = RecordingVideo::default();
    let (handle, task, mut notices) = open(&hub, &resumed).await;
    assert!(hub.background().await.is_none());
    assert_eq!(presented_ids(&drain(&mut notices)), vec!["v1"]);
    assert!(!resumed.calls().iter().any(|c| c.starts_with("play")));

    handle.submit("v1", Answer::Choice(0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(resumed.calls().contains(&"play 10.1".to_string()));

    handle.video_ended().await.unwrap();
    handle
        .submit("ex1", Answer::Order(vec!["a".into(), "b".into(), "c".into()]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let SessionExit::Completed(saved) = task.await.unwrap() else {
        panic!("expected the resumed lesson to complete");
    };
    assert_eq!(saved.row.score_percent, 100);
    let records = saved.row.records.as_array().unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(store.list_lesson_results(profile_id).await.unwrap().len(), 1);
    assert!(store.fetch_live_session(profile_id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_clearing_background_spares_the_running_lesson() {
    let (store, hub, profile_id) = setup().await;

    let video = RecordingVideo::default();
    let (handle, task, _notices) = open(&hub, &video).await;
    handle.minimize().await.unwrap();
    assert!(matches!(task.await.unwrap(), SessionExit::Minimized));

    let science = RecordingVideo::default();
    let (handle, task, mut notices) = open_lesson(&hub, "science_y3_plants", &science).await;
    handle.time_update(30.2).await.unwrap();
    handle.submit("p1", Answer::Choice(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let row = store.fetch_live_session(profile_id).await.unwrap().unwrap();
    assert_eq!(row.lesson_id, "science_y3_plants");

    let cleared = hub.clear_background().await.unwrap();
    assert_eq!(cleared.lesson_id, LESSON_ID);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!task.is_finished());
    let row = store.fetch_live_session(profile_id).await.unwrap().unwrap();
    assert_eq!(row.lesson_id, "science_y3_plants");
    assert!(!drain(&mut notices)
        .iter()
        .any(|n| matches!(n, PlayerNotice::ReturnToDashboard)));

    handle.end_session().await.unwrap();
    let SessionExit::Ended(saved) = task.await.unwrap() else {
        panic!("expected the running lesson to end normally");
    };
    assert_eq!(saved.row.lesson_id, "science_y3_plants");
    assert_eq!(saved.row.records.as_array().unwrap().len(), 1);
    assert_eq!(store.list_lesson_results(profile_id).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_kill_exits_once_without_saving() {
    let (store, hub, profile_id) = setup().await;
    let video = RecordingVideo::default();
    let (handle, task, mut notices) = open(&hub, &video).await;

    handle.submit("s1", Answer::Choice(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(store.fetch_live_session(profile_id).await.unwrap().is_some());

    store.delete_live_session(profile_id).await.unwrap();
    assert!(matches!(task.await.unwrap(), SessionExit::RemoteKilled));

    let notices = drain(&mut notices);
    let exits = notices
        .iter()
        .filter(|n| matches!(n, PlayerNotice::ReturnToDashboard))
        .count();
    assert_eq!(exits, 1);
    assert!(!notices.iter().any(|n| matches!(n, PlayerNotice::Saved(_))));
    assert_eq!(video.count("release"), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(store.fetch_live_session(profile_id).await.unwrap().is_none());
    assert!(store.list_lesson_results(profile_id).await.unwrap().is_empty());
    assert!(handle.submit("s2", Answer::Cloze(vec!["20".into()])).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_is_kept_until_retry() {
    let (store, hub, profile_id) = setup().await;
    store.fail_next_history_inserts(1);

    let video = RecordingVideo::default();
    let (handle, task, mut notices) = open(&hub, &video).await;
    pass_starters(&handle).await;
    handle.time_update(10.0).await.unwrap();
    handle.submit("v1", Answer::Choice(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    handle.video_ended().await.unwrap();
    handle
        .submit("ex1", Answer::Order(vec!["c".into(), "b".into(), "a".into()]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(!task.is_finished());
    assert!(drain(&mut notices)
        .iter()
        .any(|n| matches!(n, PlayerNotice::SaveFailed(_))));
    assert!(store.list_lesson_results(profile_id).await.unwrap().is_empty());

    let saved = handle.retry_save().await.unwrap();
    assert_eq!(saved.row.score_percent, 50);
    assert!(matches!(task.await.unwrap(), SessionExit::Completed(_)));
    assert_eq!(store.list_lesson_results(profile_id).await.unwrap().len(), 1);
    assert!(handle.retry_save().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_parent_end_session_saves_incomplete_result() {
    let (store, hub, profile_id) = setup().await;
    let video = RecordingVideo::default();
    let (handle, task, _notices) = open(&hub, &video).await;

    handle.submit("s1", Answer::Choice(0)).await.unwrap();
    handle.end_session().await.unwrap();

    let SessionExit::Ended(saved) = task.await.unwrap() else {
        panic!("expected an ended session");
    };
    assert_eq!(saved.row.status, "incomplete");
    assert_eq!(saved.rewards.xp_earned, 0);

    let history = store.list_lesson_results(profile_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(store.fetch_live_session(profile_id).await.unwrap().is_none());
    assert!(hub.assignments().await.contains(&LESSON_ID.to_string()));
    assert_eq!(hub.profile().await.xp, 0);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_fixture_config_loads() {
    let config = Config::load_from_file(&fixture("scholafy.json")).unwrap();
    assert_eq!(config.student_name, "Ada");
    assert_eq!(config.port, 3100);
    assert_eq!(config.timing.heartbeat(), Duration::from_millis(200));
    assert_eq!(config.timing.cue_tolerance_secs, 0.5);
    assert!(!config.backend_configured());
}
