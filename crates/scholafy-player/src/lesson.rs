//! Lesson model, question types and answer grading.
//!
//! A lesson holds three ordered question batches: starters (before the
//! video), cues (interrupting the video at a timestamp) and exits (after the
//! video). Lessons are immutable once loaded.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, Result};

/// Maximum allowed lesson file size in bytes (1MB).
pub const MAX_LESSON_FILE_SIZE: u64 = 1024 * 1024;

/// Feedback shown after a correct answer when the question has none.
pub const DEFAULT_CORRECT_FEEDBACK: &str = "Excellent! That is correct.";

/// Feedback shown after a wrong answer when the question has none.
pub const DEFAULT_WRONG_FEEDBACK: &str = "Not quite. Review the video and try again.";

static CLOZE_BLANK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[(.*?)\]").ok());

// ============================================================================
// Lesson
// ============================================================================

/// A curriculum unit: a video plus three question batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Stable lesson id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// School year.
    #[serde(default)]
    pub year: u32,
    /// Subject, e.g. `Mathematics`.
    pub subject: String,
    /// Curriculum strand within the subject.
    #[serde(default)]
    pub curriculum_strand: String,
    /// Learning goal.
    #[serde(default)]
    pub goal: String,
    /// Video reference.
    pub video: String,
    /// Nominal length in minutes.
    pub estimated_minutes: u32,
    /// Authored pass policy for the starter quiz. Carried with the lesson
    /// and shown by tooling; the player never blocks on it.
    #[serde(default)]
    pub starter_policy: Policy,
    /// Authored pass policy for the exit quiz, carried the same way.
    #[serde(default)]
    pub exit_policy: Policy,
    /// Questions before the video.
    #[serde(default)]
    pub starters: Vec<Question>,
    /// Questions cued at video timestamps.
    #[serde(default, rename = "questions")]
    pub cues: Vec<Question>,
    /// Questions after the video.
    #[serde(default)]
    pub exits: Vec<Question>,
}

/// Whether all or any questions must meet the minimum score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    /// Every question counts.
    #[default]
    All,
    /// Any one question is enough.
    Any,
}

/// Quiz pass policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Aggregation rule.
    #[serde(default)]
    pub require: Requirement,
    /// Fraction of correct answers needed (0-1).
    #[serde(default)]
    pub min_score: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            require: Requirement::All,
            min_score: 0.0,
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let require = match self.require {
            Requirement::All => "all",
            Requirement::Any => "any",
        };
        write!(f, "{require} >= {:.0}%", self.min_score * 100.0)
    }
}

impl Lesson {
    /// Nominal length in seconds, shown as `total` on the live row.
    #[must_use]
    pub const fn total_seconds(&self) -> u64 {
        self.estimated_minutes as u64 * 60
    }

    /// Every question across all batches.
    pub fn all_questions(&self) -> impl Iterator<Item = &Question> {
        self.starters
            .iter()
            .chain(self.cues.iter())
            .chain(self.exits.iter())
    }

    /// Looks up a question in any batch.
    #[must_use]
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.all_questions().find(|q| q.id == id)
    }

    /// Number of questions across all batches.
    #[must_use]
    pub fn question_count(&self) -> usize {
        self.starters.len() + self.cues.len() + self.exits.len()
    }

    /// Finds the first cue within `tolerance` of `position` for which `skip` is false.
    #[must_use]
    pub fn cue_at(
        &self,
        position: f64,
        tolerance: f64,
        skip: impl Fn(&str) -> bool,
    ) -> Option<&Question> {
        self.cues.iter().find(|q| {
            q.time
                .is_some_and(|t| (position - t).abs() < tolerance && !skip(&q.id))
        })
    }

    /// Checks structural rules: unique ids, timed cues, well-formed answer keys.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PlayerError::invalid_lesson("<unnamed>", "id must not be empty"));
        }

        let mut seen = HashSet::new();
        for question in self.all_questions() {
            if !seen.insert(question.id.as_str()) {
                return Err(PlayerError::invalid_lesson(
                    &self.id,
                    format!("duplicate question id '{}'", question.id),
                ));
            }
            question
                .validate()
                .map_err(|message| PlayerError::invalid_lesson(&self.id, message))?;
        }

        for cue in &self.cues {
            match cue.time {
                Some(t) if t.is_finite() && t >= 0.0 => {}
                _ => {
                    return Err(PlayerError::invalid_lesson(
                        &self.id,
                        format!("cue '{}' needs a non-negative time", cue.id),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Parses and validates one lesson from a JSON value (e.g. a store row).
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let lesson: Self = serde_json::from_value(value)?;
        lesson.validate()?;
        Ok(lesson)
    }
}

/// Loads a lesson catalogue file: either one lesson object or an array.
pub fn load_catalogue(path: impl AsRef<Path>) -> Result<Vec<Lesson>> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PlayerError::LessonNotFound {
                path: path.to_path_buf(),
            }
        } else {
            PlayerError::Io(e)
        }
    })?;

    let size = metadata.len();
    if size > MAX_LESSON_FILE_SIZE {
        return Err(PlayerError::LessonTooLarge {
            path: path.to_path_buf(),
            size_kb: size / 1024,
        });
    }

    let contents = std::fs::read_to_string(path)?;
    parse_catalogue(&contents)
}

/// Parses a catalogue from JSON text.
pub fn parse_catalogue(json: &str) -> Result<Vec<Lesson>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let lessons = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(Lesson::from_value)
            .collect::<Result<Vec<_>>>()?,
        other => vec![Lesson::from_value(other)?],
    };

    let mut ids = HashSet::new();
    for lesson in &lessons {
        if !ids.insert(lesson.id.as_str()) {
            return Err(PlayerError::invalid_lesson(
                &lesson.id,
                "lesson id appears more than once in the catalogue",
            ));
        }
    }
    Ok(lessons)
}

// ============================================================================
// Questions
// ============================================================================

/// Custom feedback lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Shown after a correct answer.
    pub correct: String,
    /// Shown after a wrong answer.
    pub wrong: String,
}

/// One option of a choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOption {
    /// Option text.
    pub label: String,
    /// Whether selecting it is correct.
    pub correct: bool,
    /// Feedback when this option is picked and correct.
    #[serde(default)]
    pub feedback_correct: Option<String>,
    /// Feedback when this option is picked and wrong.
    #[serde(default)]
    pub feedback_wrong: Option<String>,
}

/// One left/right pair of a matching question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPair {
    /// Left-hand value.
    pub left: String,
    /// Right-hand value it belongs with.
    pub right: String,
}

/// One item of an ordering question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Item id used in `correctOrder`.
    pub id: String,
    /// Display text.
    pub content: String,
}

/// Question variant and its answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QuestionKind {
    /// Pick one option.
    Choice {
        /// Options, at least one correct.
        #[serde(alias = "buttons")]
        options: Vec<ChoiceOption>,
    },
    /// Pick every correct option.
    MultiChoice {
        /// Options, at least one correct.
        options: Vec<ChoiceOption>,
    },
    /// Fill the `[blank]` markers in a sentence.
    Cloze {
        /// Sentence with bracketed answers.
        #[serde(rename = "clozeText")]
        cloze_text: String,
    },
    /// Connect each left value to its right value.
    Match {
        /// Correct pairs.
        pairs: Vec<MatchPair>,
    },
    /// Arrange items into sequence.
    Order {
        /// Items to arrange.
        items: Vec<OrderItem>,
        /// Item ids in correct sequence.
        #[serde(rename = "correctOrder")]
        correct_order: Vec<String>,
    },
}

impl QuestionKind {
    /// Type name as it appears in lesson JSON.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Choice { .. } => "choice",
            Self::MultiChoice { .. } => "multi-choice",
            Self::Cloze { .. } => "cloze",
            Self::Match { .. } => "match",
            Self::Order { .. } => "order",
        }
    }
}

/// A question in any batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Id, unique within the lesson.
    pub id: String,
    /// Prompt text.
    pub prompt: String,
    /// Video timestamp in seconds (cues only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    /// Illustration reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Variant and answer key.
    #[serde(flatten)]
    pub kind: QuestionKind,
    /// Custom feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    /// Hint text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// The child's submission for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Answer {
    /// Index of the chosen option.
    Choice(usize),
    /// Indices of the chosen options.
    MultiChoice(Vec<usize>),
    /// Text typed into each blank, in order.
    Cloze(Vec<String>),
    /// Item ids in the submitted sequence.
    Order(Vec<String>),
    /// `(left, right)` connections.
    Match(Vec<(String, String)>),
}

/// An answer as stored in the record log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordedAnswer {
    /// A single value.
    Text(String),
    /// Several values.
    List(Vec<String>),
}

impl std::fmt::Display for RecordedAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Outcome of grading one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graded {
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Answer rendered for the record log.
    pub answer: RecordedAnswer,
    /// Feedback line for the child.
    pub feedback: String,
}

fn cloze_blanks(text: &str) -> Vec<String> {
    CLOZE_BLANK.as_ref().map_or_else(Vec::new, |re| {
        re.captures_iter(text)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_lowercase()))
            .collect()
    })
}

impl Question {
    /// Lowercased answers for each cloze blank; empty for other kinds.
    #[must_use]
    pub fn blanks(&self) -> Vec<String> {
        match &self.kind {
            QuestionKind::Cloze { cloze_text } => cloze_blanks(cloze_text),
            _ => Vec::new(),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("question id must not be empty".to_string());
        }
        let id = &self.id;
        match &self.kind {
            QuestionKind::Choice { options } | QuestionKind::MultiChoice { options } => {
                if !options.iter().any(|o| o.correct) {
                    return Err(format!("question '{id}' has no correct option"));
                }
            }
            QuestionKind::Cloze { .. } => {
                if self.blanks().is_empty() {
                    return Err(format!("cloze question '{id}' has no [blank]"));
                }
            }
            QuestionKind::Match { pairs } => {
                let mut lefts = HashSet::new();
                if pairs.is_empty() || !pairs.iter().all(|p| lefts.insert(p.left.as_str())) {
                    return Err(format!("match question '{id}' needs unique left values"));
                }
            }
            QuestionKind::Order {
                items,
                correct_order,
            } => {
                let item_ids: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
                let order_ids: HashSet<&str> = correct_order.iter().map(String::as_str).collect();
                if items.is_empty()
                    || item_ids.len() != items.len()
                    || correct_order.len() != items.len()
                    || item_ids != order_ids
                {
                    return Err(format!(
                        "order question '{id}' needs correctOrder to be a permutation of its items"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Grades an answer against this question's key.
    pub fn grade(&self, answer: &Answer) -> Result<Graded> {
        let mismatch = || PlayerError::AnswerMismatch {
            question_id: self.id.clone(),
            expected: self.kind.name(),
        };

        let (is_correct, recorded, option_feedback) = match (&self.kind, answer) {
            (QuestionKind::Choice { options }, Answer::Choice(index)) => {
                let option = options.get(*index).ok_or_else(mismatch)?;
                let feedback = if option.correct {
                    option.feedback_correct.clone()
                } else {
                    option.feedback_wrong.clone()
                };
                (
                    option.correct,
                    RecordedAnswer::Text(option.label.clone()),
                    feedback,
                )
            }
            (QuestionKind::MultiChoice { options }, Answer::MultiChoice(indices)) => {
                if indices.iter().any(|i| *i >= options.len()) {
                    return Err(mismatch());
                }
                let selected: HashSet<usize> = indices.iter().copied().collect();
                let all_correct_selected = options
                    .iter()
                    .enumerate()
                    .all(|(i, o)| !o.correct || selected.contains(&i));
                let no_wrong_selected = selected.iter().all(|i| options[*i].correct);
                let mut chosen: Vec<usize> = selected.into_iter().collect();
                chosen.sort_unstable();
                let labels = chosen.iter().map(|i| options[*i].label.clone()).collect();
                (
                    all_correct_selected && no_wrong_selected,
                    RecordedAnswer::List(labels),
                    None,
                )
            }
            (QuestionKind::Cloze { cloze_text }, Answer::Cloze(entries)) => {
                let blanks = cloze_blanks(cloze_text);
                let submitted: Vec<String> = entries.iter().map(|e| e.trim().to_string()).collect();
                let is_correct = submitted.len() == blanks.len()
                    && submitted
                        .iter()
                        .zip(&blanks)
                        .all(|(given, key)| given.to_lowercase() == *key);
                (is_correct, RecordedAnswer::List(submitted), None)
            }
            (
                QuestionKind::Order {
                    items,
                    correct_order,
                },
                Answer::Order(ids),
            ) => {
                let contents = ids
                    .iter()
                    .map(|id| {
                        items
                            .iter()
                            .find(|item| item.id == *id)
                            .map(|item| item.content.clone())
                    })
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(mismatch)?;
                (
                    ids == correct_order,
                    RecordedAnswer::List(contents),
                    None,
                )
            }
            (QuestionKind::Match { pairs }, Answer::Match(connections)) => {
                let correct_connections = connections
                    .iter()
                    .filter(|(left, right)| {
                        pairs.iter().any(|p| p.left == *left && p.right == *right)
                    })
                    .count();
                let is_correct =
                    connections.len() == pairs.len() && correct_connections == pairs.len();
                let rendered = connections
                    .iter()
                    .map(|(left, right)| format!("{left} -> {right}"))
                    .collect();
                (is_correct, RecordedAnswer::List(rendered), None)
            }
            _ => return Err(mismatch()),
        };

        let feedback = option_feedback.unwrap_or_else(|| match (&self.feedback, is_correct) {
            (Some(f), true) => f.correct.clone(),
            (Some(f), false) => f.wrong.clone(),
            (None, true) => DEFAULT_CORRECT_FEEDBACK.to_string(),
            (None, false) => DEFAULT_WRONG_FEEDBACK.to_string(),
        });

        Ok(Graded {
            is_correct,
            answer: recorded,
            feedback,
        })
    }
}
