//! Progress across the whole lesson catalogue.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::SessionStatus;

/// Average score at or above which the child is at greater depth.
const GREATER_DEPTH_AVERAGE: f64 = 80.0;

/// Average score at or above which the child is at the expected standard.
const EXPECTED_AVERAGE: f64 = 50.0;

/// Three-tier standard shown on the parent dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Standard {
    /// Working towards.
    #[default]
    #[serde(rename = "WTS")]
    Wts,
    /// Expected.
    #[serde(rename = "EXS")]
    Exs,
    /// Greater depth.
    #[serde(rename = "GDS")]
    Gds,
}

impl Standard {
    fn from_average(average: f64) -> Self {
        if average >= GREATER_DEPTH_AVERAGE {
            Self::Gds
        } else if average >= EXPECTED_AVERAGE {
            Self::Exs
        } else {
            Self::Wts
        }
    }

    /// Long description for the dashboard.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Wts => "Working Towards",
            Self::Exs => "Expected",
            Self::Gds => "Greater Depth",
        }
    }
}

/// A lesson in the catalogue, reduced to what the stats need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry<'a> {
    /// Lesson id.
    pub id: &'a str,
    /// Subject the lesson belongs to.
    pub subject: &'a str,
}

/// Completion within one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectStats {
    /// Lessons in the subject.
    pub total: u32,
    /// Distinct lessons completed.
    pub completed: u32,
    /// Rounded completion percentage.
    pub percent: u32,
}

/// Progress across the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumStats {
    /// Lessons in the catalogue.
    pub total_lessons: u32,
    /// Distinct lessons completed at least once.
    pub completed_lessons: u32,
    /// Rounded mean score over completed results.
    pub average_score: u32,
    /// Standard derived from the average score.
    pub current_standard: Standard,
    /// Rounded share of the catalogue completed.
    pub completion_percent: u32,
    /// Breakdown by subject.
    pub subjects: BTreeMap<String, SubjectStats>,
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = (part as f64 / whole as f64 * 100.0).round() as u32;
    rounded
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Computes catalogue progress from history.
///
/// `results` are `(lesson id, status, score percent)` triples. Incomplete
/// results never count towards completion or the average. An empty catalogue
/// yields default stats.
#[must_use]
pub fn compute_curriculum_stats<'a>(
    lessons: &[CatalogueEntry<'_>],
    results: impl IntoIterator<Item = (&'a str, SessionStatus, u32)>,
) -> CurriculumStats {
    if lessons.is_empty() {
        return CurriculumStats::default();
    }

    let completed: Vec<(&str, u32)> = results
        .into_iter()
        .filter(|(_, status, _)| *status == SessionStatus::Completed)
        .map(|(id, _, score)| (id, score))
        .collect();
    let completed_ids: HashSet<&str> = completed.iter().map(|(id, _)| *id).collect();

    let average = if completed.is_empty() {
        0.0
    } else {
        let sum: f64 = completed.iter().map(|(_, score)| f64::from(*score)).sum();
        #[allow(clippy::cast_precision_loss)]
        let n = completed.len() as f64;
        sum / n
    };

    let mut subjects: BTreeMap<String, SubjectStats> = BTreeMap::new();
    let mut subject_counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for lesson in lessons {
        let entry = subject_counts.entry(lesson.subject).or_default();
        entry.0 += 1;
        if completed_ids.contains(lesson.id) {
            entry.1 += 1;
        }
    }
    for (subject, (total, done)) in subject_counts {
        subjects.insert(
            subject.to_string(),
            SubjectStats {
                total: count(total),
                completed: count(done),
                percent: percent(done, total),
            },
        );
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let average_score = average.round() as u32;

    CurriculumStats {
        total_lessons: count(lessons.len()),
        completed_lessons: count(completed_ids.len()),
        average_score,
        current_standard: Standard::from_average(average),
        completion_percent: percent(completed_ids.len(), lessons.len()),
        subjects,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn catalogue() -> Vec<CatalogueEntry<'static>> {
        vec![
            CatalogueEntry {
                id: "m1",
                subject: "Maths",
            },
            CatalogueEntry {
                id: "m2",
                subject: "Maths",
            },
            CatalogueEntry {
                id: "m3",
                subject: "Maths",
            },
            CatalogueEntry {
                id: "e1",
                subject: "English",
            },
        ]
    }

    #[test]
    fn test_empty_catalogue_yields_defaults() {
        let stats = compute_curriculum_stats(&[], [("m1", SessionStatus::Completed, 100)]);
        assert_eq!(stats, CurriculumStats::default());
        assert_eq!(stats.current_standard, Standard::Wts);
    }

    #[test]
    fn test_repeat_completions_count_once() {
        let stats = compute_curriculum_stats(
            &catalogue(),
            [
                ("m1", SessionStatus::Completed, 90),
                ("m1", SessionStatus::Completed, 70),
                ("e1", SessionStatus::Incomplete, 10),
            ],
        );
        assert_eq!(stats.total_lessons, 4);
        assert_eq!(stats.completed_lessons, 1);
        assert_eq!(stats.average_score, 80);
        assert_eq!(stats.current_standard, Standard::Gds);
        assert_eq!(stats.completion_percent, 25);
        assert_eq!(
            stats.subjects["Maths"],
            SubjectStats {
                total: 3,
                completed: 1,
                percent: 33
            }
        );
        assert_eq!(stats.subjects["English"].completed, 0);
    }

    #[test]
    fn test_standard_thresholds() {
        let expected = compute_curriculum_stats(&catalogue(), [("m1", SessionStatus::Completed, 50)]);
        assert_eq!(expected.current_standard, Standard::Exs);

        let working = compute_curriculum_stats(&catalogue(), [("m1", SessionStatus::Completed, 49)]);
        assert_eq!(working.current_standard, Standard::Wts);
    }

    #[test]
    fn test_serialized_shape() {
        let stats = compute_curriculum_stats(&catalogue(), [("e1", SessionStatus::Completed, 100)]);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["currentStandard"], "GDS");
        assert_eq!(json["completionPercent"], 25);
        assert_eq!(json["subjects"]["English"]["percent"], 100);
    }
}
