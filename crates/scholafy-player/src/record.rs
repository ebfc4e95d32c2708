//! Answer records and the per-session answer log.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use scholafy_insight::{AnswerInput, Phase, ReportRecord};
use serde::{Deserialize, Serialize};

use crate::lesson::RecordedAnswer;

/// One answered question. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    /// Question id.
    pub question_id: String,
    /// Lesson phase the question belonged to.
    pub phase: Phase,
    /// Prompt text.
    pub prompt: String,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Submitted answer.
    pub answer: RecordedAnswer,
    /// When the answer was submitted.
    pub timestamp: DateTime<Utc>,
    /// Seconds between presentation and submission.
    pub duration_seconds: f64,
}

impl QuestionRecord {
    /// Facts the insight engine needs.
    #[must_use]
    pub const fn as_input(&self) -> AnswerInput {
        AnswerInput::new(self.phase, self.is_correct, self.duration_seconds)
    }

    /// Record as shown in a parent report.
    #[must_use]
    pub fn to_report(&self) -> ReportRecord {
        ReportRecord {
            prompt: self.prompt.clone(),
            phase: self.phase,
            is_correct: self.is_correct,
            answer: self.answer.to_string(),
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Ordered records plus the set of completed question ids.
///
/// At most one record exists per question id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerLog {
    records: Vec<QuestionRecord>,
    completed: BTreeSet<String>,
}

impl AnswerLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record unless its question is already completed.
    ///
    /// Returns `false` when the record was ignored.
    pub fn push(&mut self, record: QuestionRecord) -> bool {
        if !self.completed.insert(record.question_id.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Whether the question already has a record.
    #[must_use]
    pub fn is_completed(&self, question_id: &str) -> bool {
        self.completed.contains(question_id)
    }

    /// Records in answer order.
    #[must_use]
    pub fn records(&self) -> &[QuestionRecord] {
        &self.records
    }

    /// Completed question ids.
    #[must_use]
    pub const fn completed(&self) -> &BTreeSet<String> {
        &self.completed
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been answered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of correct records.
    #[must_use]
    pub fn correct_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_correct).count()
    }

    /// Records answered in one phase.
    pub fn in_phase(&self, phase: Phase) -> impl Iterator<Item = &QuestionRecord> {
        self.records.iter().filter(move |r| r.phase == phase)
    }

    /// Score as a whole percentage; 0 when empty.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn score_percent(&self) -> u32 {
        if self.records.is_empty() {
            return 0;
        }
        let ratio = self.correct_count() as f64 / self.records.len() as f64;
        (ratio * 100.0).round() as u32
    }
}
