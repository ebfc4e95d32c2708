//! Configuration for the Scholafy player and parent monitor.
//!
//! Loaded from `scholafy.json` (camelCase). Every field has a default so a
//! missing file yields a usable offline configuration; backend credentials
//! can also come from the environment.

use std::path::Path;
use std::time::Duration;

use scholafy_store::RestConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlayerError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "scholafy.json";

/// Placeholder URL shipped in example configs.
pub const PLACEHOLDER_URL: &str = "https://your-project-id.supabase.co";

/// Placeholder key shipped in example configs.
pub const PLACEHOLDER_KEY: &str = "your-anon-key-here";

/// Keys this short are truncated or fake.
const MIN_KEY_LENGTH: usize = 20;

/// Environment variable overriding `backend.url`.
pub const ENV_BACKEND_URL: &str = "SCHOLAFY_BACKEND_URL";

/// Environment variable overriding `backend.anonKey`.
pub const ENV_BACKEND_KEY: &str = "SCHOLAFY_BACKEND_KEY";

/// Environment variable overriding `backend.accessToken`.
pub const ENV_ACCESS_TOKEN: &str = "SCHOLAFY_ACCESS_TOKEN";

fn default_student_name() -> String {
    "Student".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_heartbeat_ms() -> u64 {
    1000
}

const fn default_correct_feedback_ms() -> u64 {
    1500
}

const fn default_incorrect_feedback_ms() -> u64 {
    2500
}

const fn default_quiz_transition_ms() -> u64 {
    300
}

const fn default_cue_tolerance_secs() -> f64 {
    0.5
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Hosted backend connection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Child profile this device plays for.
    #[serde(default)]
    pub profile_id: Uuid,

    /// Display name used when a new profile is created.
    #[serde(default = "default_student_name")]
    pub student_name: String,

    /// Local lesson catalogue used when the backend has none.
    #[serde(default)]
    pub lessons_file: Option<String>,

    /// Player timings.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Port of the parent monitor server.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            profile_id: Uuid::nil(),
            student_name: default_student_name(),
            lessons_file: None,
            timing: TimingConfig::default(),
            port: default_port(),
        }
    }
}

/// Hosted backend credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the service.
    #[serde(default)]
    pub url: String,
    /// Public API key.
    #[serde(default)]
    pub anon_key: String,
    /// Session token of a signed-in parent, if any.
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Player timings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    /// Live-status heartbeat period.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Feedback display after a correct answer.
    #[serde(default = "default_correct_feedback_ms")]
    pub correct_feedback_ms: u64,
    /// Feedback display after an incorrect answer.
    #[serde(default = "default_incorrect_feedback_ms")]
    pub incorrect_feedback_ms: u64,
    /// Extra pause between quiz questions.
    #[serde(default = "default_quiz_transition_ms")]
    pub quiz_transition_ms: u64,
    /// How close playback must be to a cue to trigger it.
    #[serde(default = "default_cue_tolerance_secs")]
    pub cue_tolerance_secs: f64,
    /// Poll period of the REST live subscription.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            correct_feedback_ms: default_correct_feedback_ms(),
            incorrect_feedback_ms: default_incorrect_feedback_ms(),
            quiz_transition_ms: default_quiz_transition_ms(),
            cue_tolerance_secs: default_cue_tolerance_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimingConfig {
    /// Heartbeat period as a [`Duration`].
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    /// Delay before leaving a question, by correctness and question kind.
    #[must_use]
    pub const fn feedback_delay(&self, correct: bool, in_quiz: bool) -> Duration {
        let base = if correct {
            self.correct_feedback_ms
        } else {
            self.incorrect_feedback_ms
        };
        let extra = if in_quiz { self.quiz_transition_ms } else { 0 };
        Duration::from_millis(base + extra)
    }
}

impl Config {
    /// Loads `scholafy.json` from the current working directory.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            PlayerError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `scholafy.json` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads a config file.
    ///
    /// A missing file yields defaults; malformed JSON is a `ConfigParseError`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(PlayerError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| PlayerError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides backend credentials from the process environment.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overrides backend credentials from any key lookup.
    #[must_use]
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.is_empty()) {
            self.backend.url = url;
        }
        if let Some(key) = lookup(ENV_BACKEND_KEY).filter(|v| !v.is_empty()) {
            self.backend.anon_key = key;
        }
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).filter(|v| !v.is_empty()) {
            self.backend.access_token = Some(token);
        }
        self
    }

    /// Whether the backend credentials look real.
    #[must_use]
    pub fn backend_configured(&self) -> bool {
        let url = self.backend.url.trim();
        let key = self.backend.anon_key.trim();
        !url.is_empty()
            && url != PLACEHOLDER_URL
            && key != PLACEHOLDER_KEY
            && key.len() > MIN_KEY_LENGTH
    }

    /// REST store settings, or `BackendNotConfigured`.
    pub fn rest_config(&self) -> Result<RestConfig> {
        if !self.backend_configured() {
            return Err(PlayerError::BackendNotConfigured);
        }
        Ok(RestConfig {
            url: self.backend.url.trim().to_string(),
            anon_key: self.backend.anon_key.trim().to_string(),
            access_token: self.backend.access_token.clone(),
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
        })
    }

    /// Validates field values.
    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;

        if timing.heartbeat_ms == 0 {
            return Err(PlayerError::config_validation(
                "timing.heartbeatMs must be greater than 0",
                "Set timing.heartbeatMs to at least 1 in your scholafy.json",
            ));
        }

        if timing.poll_interval_ms == 0 {
            return Err(PlayerError::config_validation(
                "timing.pollIntervalMs must be greater than 0",
                "Set timing.pollIntervalMs to at least 1 in your scholafy.json",
            ));
        }

        if !(timing.cue_tolerance_secs > 0.0 && timing.cue_tolerance_secs.is_finite()) {
            return Err(PlayerError::config_validation(
                "timing.cueToleranceSecs must be a positive number",
                "Use the default of 0.5 unless cues are being missed",
            ));
        }

        if self.student_name.trim().is_empty() {
            return Err(PlayerError::config_validation(
                "studentName must not be empty",
                "Provide the child's display name in your scholafy.json",
            ));
        }

        if self.lessons_file.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(PlayerError::config_validation(
                "lessonsFile must not be empty when set",
                "Remove lessonsFile or point it at a lesson catalogue JSON file",
            ));
        }

        Ok(())
    }
}
