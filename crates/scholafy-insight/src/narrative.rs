//! Templated narrative for parents.
//!
//! One sentence is picked from each pool (opener, focus, growth, anomaly,
//! recommendation). Pools that have nothing to say are skipped.

use crate::{AnomalyCounts, MasteryLevel, SessionStatus};

/// Focus index at or above which attention is called excellent.
const EXCELLENT_FOCUS: u32 = 85;

/// Focus index at or above which attention is called good.
const GOOD_FOCUS: u32 = 60;

/// Knowledge delta above which the session counts as a big win.
const BIG_WIN_DELTA: f64 = 30.0;

/// Starter accuracy above which the child already knew the topic.
const ALREADY_KNEW_ACCURACY: f64 = 80.0;

pub(crate) struct NarrativeInput<'a> {
    pub student_name: &'a str,
    pub mastery_level: MasteryLevel,
    pub focus_index: u32,
    pub anomalies: AnomalyCounts,
    pub starter_accuracy: Option<f64>,
    pub knowledge_delta: Option<f64>,
    pub seed: usize,
}

pub(crate) fn compose(input: &NarrativeInput<'_>) -> String {
    let mut sentences = vec![opener(input), focus(input)];
    sentences.extend(growth(input));
    sentences.extend(stalls(input));
    sentences.push(recommendation(input.mastery_level).to_string());
    sentences.join(" ")
}

fn opener(input: &NarrativeInput<'_>) -> String {
    let name = input.student_name;
    match input.seed % 4 {
        0 => format!("I've analyzed {name}'s performance on this lesson."),
        1 => format!("Here is the breakdown for {name}."),
        2 => format!("{name} has completed this session."),
        _ => format!("A detailed look at {name}'s work."),
    }
}

fn focus(input: &NarrativeInput<'_>) -> String {
    if input.focus_index >= EXCELLENT_FOCUS {
        "Attention was excellent throughout. No guessing detected.".to_string()
    } else if input.focus_index >= GOOD_FOCUS {
        "Focus was generally good, though there were minor lapses in concentration.".to_string()
    } else {
        format!(
            "Attention flagged significantly. I detected {} rapid guesses.",
            input.anomalies.guesses
        )
    }
}

/// Growth commentary. Only fires when both starters and exits were answered.
fn growth(input: &NarrativeInput<'_>) -> Option<String> {
    let name = input.student_name;
    let starter = input.starter_accuracy?;
    let delta = input.knowledge_delta?;

    if delta > BIG_WIN_DELTA {
        Some(format!(
            "This was a huge win. {name} started with low confidence ({}% on starters) but \
             mastered the material by the end. The video lesson was effective.",
            starter.round()
        ))
    } else if starter > ALREADY_KNEW_ACCURACY && input.mastery_level == MasteryLevel::Gds {
        Some(format!(
            "{name} already knew this topic well starting out, and simply proved their mastery."
        ))
    } else if delta < 0.0 {
        Some(
            "Strangely, performance dipped after the starters. This might indicate cognitive \
             fatigue or a tricky concept in the exit quiz."
                .to_string(),
        )
    } else {
        None
    }
}

fn stalls(input: &NarrativeInput<'_>) -> Option<String> {
    (input.anomalies.stalls > 0).then(|| {
        format!(
            "Note: There were {} instances where {} seemed stuck or distracted for over 2 minutes.",
            input.anomalies.stalls, input.student_name
        )
    })
}

const fn recommendation(level: MasteryLevel) -> &'static str {
    match level {
        MasteryLevel::Gds => "Recommendation: Ready for the next challenge.",
        MasteryLevel::Exs => "Recommendation: Good to proceed, but review mistakes.",
        MasteryLevel::Wts | MasteryLevel::Pk => {
            "Recommendation: I suggest re-sitting this lesson tomorrow."
        }
    }
}

/// The parent dashboard's one-line verdict on a saved result.
#[must_use]
pub fn teacher_feedback(status: SessionStatus, score_percent: u32, lesson_title: &str) -> String {
    if status == SessionStatus::Incomplete {
        return "Session ended early. Recommend re-assignment.".to_string();
    }
    match score_percent {
        90.. => format!("High proficiency in {lesson_title}. Mastery confirmed."),
        70..=89 => "Concepts secure. Minor application errors observed.".to_string(),
        50..=69 => "Partial understanding. Review formative cues.".to_string(),
        _ => "Foundational misconceptions identified. Intervention recommended.".to_string(),
    }
}
