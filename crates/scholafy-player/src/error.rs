//! Error types for the Scholafy player.
//!
//! Covers configuration loading, lesson loading and validation, the player
//! state machine, and saving results to the remote store.

use std::path::PathBuf;

use scholafy_store::StoreError;

/// A specialized `Result` type for player operations.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Errors that can occur while loading, playing or saving a lesson.
///
/// Variants carry an actionable suggestion where one exists.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your scholafy.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// Backend credentials are missing or still the placeholder values.
    #[error("Backend is not configured\n\nSuggestion: Set backend.url and backend.anonKey in scholafy.json, or export SCHOLAFY_BACKEND_URL and SCHOLAFY_BACKEND_KEY")]
    BackendNotConfigured,

    // ========================================================================
    // Lesson Loading Errors
    // ========================================================================
    /// Lesson file was not found.
    #[error("Lesson file not found: '{path}'\n\nSuggestion: Check the 'lessonsFile' field in scholafy.json")]
    LessonNotFound {
        /// Path where the lesson was expected.
        path: PathBuf,
    },

    /// Lesson file exceeds the size limit.
    #[error("Lesson file exceeds size limit (1MB): '{path}' is {size_kb}KB\n\nSuggestion: Split the catalogue into smaller files")]
    LessonTooLarge {
        /// Path to the oversized file.
        path: PathBuf,
        /// Actual size in kilobytes.
        size_kb: u64,
    },

    /// Lesson content is structurally invalid.
    #[error("Invalid lesson '{lesson_id}': {message}")]
    InvalidLesson {
        /// Id of the offending lesson.
        lesson_id: String,
        /// What is wrong with it.
        message: String,
    },

    /// No lesson with this id in the catalogue.
    #[error("Unknown lesson: '{lesson_id}'")]
    UnknownLesson {
        /// Requested lesson id.
        lesson_id: String,
    },

    // ========================================================================
    // Player Errors
    // ========================================================================
    /// An answer arrived for a question that is not on screen.
    #[error("Unexpected answer for '{question_id}' (presented: {presented})")]
    UnexpectedAnswer {
        /// Question the answer was submitted for.
        question_id: String,
        /// Question currently presented, or `none`.
        presented: String,
    },

    /// The answer shape does not fit the question type.
    #[error("Answer for '{question_id}' does not match a {expected} question")]
    AnswerMismatch {
        /// Question the answer was submitted for.
        question_id: String,
        /// Question type that was expected.
        expected: &'static str,
    },

    /// The session already ended; no further input is accepted.
    #[error("Session has already ended")]
    SessionEnded,

    /// No minimized session exists for this lesson.
    #[error("No background session for lesson '{lesson_id}'")]
    NoBackgroundSession {
        /// Lesson that was asked for.
        lesson_id: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// A result save is already running.
    #[error("A result save is already in progress\n\nSuggestion: Wait for it to finish before retrying")]
    SaveInFlight,

    /// The result could not be stored; the outcome is kept for retry.
    #[error("Failed to save lesson result: {source}\n\nSuggestion: Check your connection and retry")]
    SaveFailed {
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Any other store failure.
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlayerError {
    /// Creates a new `ConfigParseError`.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError`.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidLesson` error.
    #[must_use]
    pub fn invalid_lesson(lesson_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidLesson {
            lesson_id: lesson_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UnknownLesson` error.
    #[must_use]
    pub fn unknown_lesson(lesson_id: impl Into<String>) -> Self {
        Self::UnknownLesson {
            lesson_id: lesson_id.into(),
        }
    }

    /// Creates a new `UnexpectedAnswer` error.
    #[must_use]
    pub fn unexpected_answer(question_id: impl Into<String>, presented: Option<&str>) -> Self {
        Self::UnexpectedAnswer {
            question_id: question_id.into(),
            presented: presented.unwrap_or("none").to_string(),
        }
    }

    /// Returns `true` if repeating the operation could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::SaveFailed { .. } | Self::SaveInFlight => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if this error blocks the app from running at all.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::BackendNotConfigured
                | Self::Store(StoreError::Unauthorized(_))
        )
    }
}
