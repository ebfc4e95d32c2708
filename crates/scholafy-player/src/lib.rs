//! Scholafy Lesson Player
//!
//! Drives one child through a lesson (starter quiz, video with timed
//! questions, exit quiz), publishes live status for parents, persists the
//! result with rewards, and serves the parent monitor API.

pub mod api;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod lesson;
pub mod live;
pub mod record;
pub mod rewards;
pub mod runner;
pub mod session;
pub mod websocket;

pub use api::{create_router, AppState, ErrorResponse};
pub use config::{BackendConfig, Config, TimingConfig};
pub use error::{PlayerError, Result};
pub use heartbeat::{Heartbeat, LivePublisher};
pub use hub::{ProfileHub, SavedResult};
pub use lesson::{
    load_catalogue, parse_catalogue, Answer, Lesson, Question, QuestionKind, RecordedAnswer,
    MAX_LESSON_FILE_SIZE,
};
pub use live::{LiveBroadcaster, LiveEvent, LiveMode, LiveStatus};
pub use record::{AnswerLog, QuestionRecord};
pub use rewards::Rewards;
pub use runner::{Playback, PlayerNotice, RunnerHandle, SessionExit, SessionRunner};
pub use session::{BackgroundSession, PlayerEffect, PlayerPhase, PlayerSession, SessionOutcome};
pub use websocket::spawn_change_forwarder;
