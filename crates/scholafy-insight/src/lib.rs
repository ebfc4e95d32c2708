//! Scholafy Insight Engine
//!
//! Turns the answer log of one lesson session into behavioural and academic
//! scores, a templated narrative for parents, and printable reports.
//!
//! Everything in this crate is pure: the same records always produce the same
//! insight, which keeps the thresholds testable at their edges.
//!
//! # Types
//!
//! - [`AnswerInput`] - The timing and correctness of one answered question
//! - [`Insight`] - Mastery level, focus index, effort grade and narrative
//! - [`SessionReport`] - A saved session plus its insight, ready for rendering
//! - [`CurriculumStats`] - Progress across the whole lesson catalogue
//!
//! # Generators
//!
//! - [`MarkdownGenerator`] - Human-readable parent report
//! - [`json::JsonGenerator`] - Compact or pretty JSON report
//!
//! # Example
//!
//! ```rust
//! use scholafy_insight::{compute_insights, AnswerInput, MasteryLevel, Phase};
//!
//! let records = vec![
//!     AnswerInput::new(Phase::Starter, true, 8.0),
//!     AnswerInput::new(Phase::Exit, true, 12.0),
//! ];
//! let insight = compute_insights(&records, 100, "Ada");
//! assert_eq!(insight.mastery_level, MasteryLevel::Gds);
//! assert_eq!(insight.focus_index, 100);
//! ```

mod curriculum;
pub mod json;
mod markdown;
mod narrative;

pub use curriculum::{
    compute_curriculum_stats, CatalogueEntry, CurriculumStats, Standard, SubjectStats,
};
pub use markdown::MarkdownGenerator;
pub use narrative::teacher_feedback;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while building or rendering reports.
#[derive(Debug, Error)]
pub enum InsightError {
    /// Failed to serialize or parse a report.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for insight operations.
pub type Result<T> = std::result::Result<T, InsightError>;

// ============================================================================
// Thresholds
// ============================================================================

/// Focus index before any penalty.
pub const FOCUS_CEILING: i64 = 100;

/// Answers faster than this many seconds count as guesses or rushes.
pub const FAST_ANSWER_SECS: f64 = 3.0;

/// Answers slower than this many seconds count as stalls.
pub const STALL_SECS: f64 = 120.0;

const GUESS_PENALTY: i64 = 15;
const RUSH_PENALTY: i64 = 5;
const STALL_PENALTY: i64 = 10;

// ============================================================================
// Inputs
// ============================================================================

/// Which part of the lesson a question belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Diagnostic quiz before the video.
    Starter,
    /// Cue that interrupted the video.
    Video,
    /// Quiz after the video.
    Exit,
}

impl Phase {
    /// Lowercase name used in rows and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Video => "video",
            Self::Exit => "exit",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The facts the engine needs about one answered question.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnswerInput {
    /// Lesson phase the question was asked in.
    pub phase: Phase,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Seconds between presentation and submission.
    pub duration_seconds: f64,
}

impl AnswerInput {
    /// Creates an input record.
    #[must_use]
    pub const fn new(phase: Phase, is_correct: bool, duration_seconds: f64) -> Self {
        Self {
            phase,
            is_correct,
            duration_seconds,
        }
    }

    /// Classifies the timing of this answer; video cues are never anomalous.
    #[must_use]
    pub fn anomaly(&self) -> Option<Anomaly> {
        if self.phase == Phase::Video {
            return None;
        }
        if self.duration_seconds < FAST_ANSWER_SECS {
            Some(if self.is_correct {
                Anomaly::Rushed
            } else {
                Anomaly::Guess
            })
        } else if self.duration_seconds > STALL_SECS {
            Some(Anomaly::Stall)
        } else {
            None
        }
    }
}

/// A timing pattern that costs focus points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    /// Fast and wrong.
    Guess,
    /// Fast but right.
    Rushed,
    /// Stuck or distracted for over two minutes.
    Stall,
}

impl Anomaly {
    const fn penalty(self) -> i64 {
        match self {
            Self::Guess => GUESS_PENALTY,
            Self::Rushed => RUSH_PENALTY,
            Self::Stall => STALL_PENALTY,
        }
    }
}

/// Number of each anomaly found in a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyCounts {
    /// Fast wrong answers.
    pub guesses: u32,
    /// Fast right answers.
    pub rushed: u32,
    /// Answers slower than two minutes.
    pub stalls: u32,
}

// ============================================================================
// Bands
// ============================================================================

/// Four-tier academic standard derived from the session score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MasteryLevel {
    /// Pre-key stage (below 35%).
    #[serde(rename = "PK")]
    Pk,
    /// Working towards the expected standard (35-64%).
    #[serde(rename = "WTS")]
    Wts,
    /// Working at the expected standard (65-89%).
    #[serde(rename = "EXS")]
    Exs,
    /// Greater depth (90% and above).
    #[serde(rename = "GDS")]
    Gds,
}

impl MasteryLevel {
    /// Bands a score percentage.
    #[must_use]
    pub const fn from_score(score_percent: u32) -> Self {
        if score_percent >= 90 {
            Self::Gds
        } else if score_percent >= 65 {
            Self::Exs
        } else if score_percent >= 35 {
            Self::Wts
        } else {
            Self::Pk
        }
    }

    /// Short code stored in result rows.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Pk => "PK",
            Self::Wts => "WTS",
            Self::Exs => "EXS",
            Self::Gds => "GDS",
        }
    }

    /// Long description for reports.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Pk => "Pre-Key Stage",
            Self::Wts => "Working Towards",
            Self::Exs => "Expected Standard",
            Self::Gds => "Greater Depth",
        }
    }
}

impl std::fmt::Display for MasteryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Letter grade banded off the focus index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffortGrade {
    /// 90 and above.
    #[serde(rename = "A+")]
    APlus,
    /// 80-89.
    A,
    /// 70-79.
    B,
    /// 50-69.
    C,
    /// 30-49.
    D,
    /// Below 30.
    F,
}

impl EffortGrade {
    /// Bands a focus index.
    #[must_use]
    pub const fn from_focus(focus_index: u32) -> Self {
        match focus_index {
            90.. => Self::APlus,
            80..=89 => Self::A,
            70..=79 => Self::B,
            50..=69 => Self::C,
            30..=49 => Self::D,
            _ => Self::F,
        }
    }

    /// Letter as stored in result rows.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

impl std::fmt::Display for EffortGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Insight
// ============================================================================

/// Derived scores and narrative for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    /// Academic band from the score.
    pub mastery_level: MasteryLevel,
    /// Behavioural attentiveness, 0-100.
    pub focus_index: u32,
    /// Letter grade from the focus index.
    pub effort_grade: EffortGrade,
    /// Starter accuracy percentage, when starters were answered.
    pub starter_accuracy: Option<f64>,
    /// Exit accuracy percentage, when exits were answered.
    pub exit_accuracy: Option<f64>,
    /// Exit accuracy minus starter accuracy, when both exist.
    pub knowledge_delta: Option<f64>,
    /// Timing anomalies found in non-video answers.
    pub anomalies: AnomalyCounts,
    /// Templated paragraph for parents.
    pub narrative: String,
}

/// Computes the focus index and the anomalies behind it.
#[must_use]
pub fn focus_index(records: &[AnswerInput]) -> (u32, AnomalyCounts) {
    let mut score = FOCUS_CEILING;
    let mut counts = AnomalyCounts::default();

    for anomaly in records.iter().filter_map(AnswerInput::anomaly) {
        score -= anomaly.penalty();
        match anomaly {
            Anomaly::Guess => counts.guesses += 1,
            Anomaly::Rushed => counts.rushed += 1,
            Anomaly::Stall => counts.stalls += 1,
        }
    }

    let clamped = u32::try_from(score.clamp(0, FOCUS_CEILING)).unwrap_or(0);
    (clamped, counts)
}

fn accuracy(records: &[AnswerInput], phase: Phase) -> Option<f64> {
    let (total, correct) = records
        .iter()
        .filter(|r| r.phase == phase)
        .fold((0_u32, 0_u32), |(t, c), r| (t + 1, c + u32::from(r.is_correct)));
    if total == 0 {
        None
    } else {
        Some(f64::from(correct) / f64::from(total) * 100.0)
    }
}

/// Derives mastery, focus, effort and narrative from a session's records.
#[must_use]
pub fn compute_insights(
    records: &[AnswerInput],
    score_percent: u32,
    student_name: &str,
) -> Insight {
    let mastery_level = MasteryLevel::from_score(score_percent);
    let (focus, anomalies) = focus_index(records);
    let effort_grade = EffortGrade::from_focus(focus);

    let starter_accuracy = accuracy(records, Phase::Starter);
    let exit_accuracy = accuracy(records, Phase::Exit);
    let knowledge_delta = starter_accuracy
        .zip(exit_accuracy)
        .map(|(starter, exit)| exit - starter);

    let narrative = narrative::compose(&narrative::NarrativeInput {
        student_name,
        mastery_level,
        focus_index: focus,
        anomalies,
        starter_accuracy,
        knowledge_delta,
        seed: records.len() + score_percent as usize,
    });

    Insight {
        mastery_level,
        focus_index: focus,
        effort_grade,
        starter_accuracy,
        exit_accuracy,
        knowledge_delta,
        anomalies,
        narrative,
    }
}

// ============================================================================
// Session Report
// ============================================================================

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Every phase finished.
    #[default]
    Completed,
    /// Ended early by a parent or the child.
    Incomplete,
}

impl SessionStatus {
    /// Lowercase name stored in result rows.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answered question as shown in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    /// Question prompt.
    pub prompt: String,
    /// Lesson phase.
    pub phase: Phase,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// The child's answer rendered as text.
    pub answer: String,
    /// Seconds spent on the question.
    pub duration_seconds: f64,
}

impl From<&ReportRecord> for AnswerInput {
    fn from(record: &ReportRecord) -> Self {
        Self::new(record.phase, record.is_correct, record.duration_seconds)
    }
}

/// A saved session with everything a parent report shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Child's display name.
    pub student_name: String,
    /// Lesson title.
    pub lesson_title: String,
    /// How the session ended.
    pub status: SessionStatus,
    /// When the session ended.
    pub timestamp: DateTime<Utc>,
    /// Percentage of correct answers.
    pub score_percent: u32,
    /// Wall-clock session length.
    pub duration_seconds: u64,
    /// XP awarded.
    pub xp_earned: u64,
    /// Names of badges awarded this session.
    #[serde(default)]
    pub badges_earned: Vec<String>,
    /// Answer log.
    pub records: Vec<ReportRecord>,
    /// Derived insight.
    pub insight: Insight,
}

impl SessionReport {
    /// Builds a report, computing the insight from the records.
    #[must_use]
    pub fn new(
        student_name: impl Into<String>,
        lesson_title: impl Into<String>,
        status: SessionStatus,
        timestamp: DateTime<Utc>,
        score_percent: u32,
        duration_seconds: u64,
        records: Vec<ReportRecord>,
    ) -> Self {
        let student_name = student_name.into();
        let lesson_title = lesson_title.into();
        let inputs: Vec<AnswerInput> = records.iter().map(AnswerInput::from).collect();
        let insight = compute_insights(&inputs, score_percent, &student_name);
        Self {
            student_name,
            lesson_title,
            status,
            timestamp,
            score_percent,
            duration_seconds,
            xp_earned: 0,
            badges_earned: Vec::new(),
            records,
            insight,
        }
    }

    /// Sets the rewards shown in the report.
    #[must_use]
    pub fn with_rewards(mut self, xp_earned: u64, badges_earned: Vec<String>) -> Self {
        self.xp_earned = xp_earned;
        self.badges_earned = badges_earned;
        self
    }

    /// Parses a report from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(InsightError::from)
    }

    /// One-line verdict for the parent dashboard.
    #[must_use]
    pub fn teacher_feedback(&self) -> String {
        teacher_feedback(self.status, self.score_percent, &self.lesson_title)
    }
}

// ============================================================================
// Tests
// ============================================================================
