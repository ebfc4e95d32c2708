//! XP, levels, streaks and badges awarded on completion.

use chrono::NaiveDate;
use scholafy_insight::{AnswerInput, MasteryLevel, Phase, FAST_ANSWER_SECS, STALL_SECS};
use scholafy_store::ProfileRow;
use serde::{Deserialize, Serialize};

/// XP every completed lesson is worth before scaling.
pub const BASE_XP: u64 = 50;

/// Extra XP per estimated lesson minute.
pub const XP_PER_MINUTE: u64 = 10;

/// XP needed per level.
pub const XP_PER_LEVEL: u64 = 1000;

/// First completed lesson.
pub const FIRST_STEPS: &str = "first_steps";
/// No quiz answer took longer than the stall threshold.
pub const STEADY_FOCUS: &str = "steady_focus";
/// No fast wrong quiz answer.
pub const NO_GUESSING: &str = "no_guessing";

/// XP for one completed session.
#[must_use]
pub fn xp_for(estimated_minutes: u32, score_percent: u32) -> u64 {
    (BASE_XP + XP_PER_MINUTE * u64::from(estimated_minutes)) * u64::from(score_percent.min(100)) / 100
}

/// Level reached with `total_xp`.
#[must_use]
pub fn level_for(total_xp: u64) -> u32 {
    u32::try_from(total_xp / XP_PER_LEVEL).unwrap_or(u32::MAX - 1) + 1
}

/// Streak after completing a lesson on `today`.
#[must_use]
pub fn next_streak(current: u32, last_completed: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_completed {
        Some(last) if last == today => current.max(1),
        Some(last) if today.pred_opt() == Some(last) => current + 1,
        _ => 1,
    }
}

/// Badge id for a mastery band.
#[must_use]
pub const fn mastery_badge(level: MasteryLevel) -> &'static str {
    match level {
        MasteryLevel::Pk => "mastery_pk",
        MasteryLevel::Wts => "mastery_wts",
        MasteryLevel::Exs => "mastery_exs",
        MasteryLevel::Gds => "mastery_gds",
    }
}

/// Every badge the session qualifies for, held or not.
#[must_use]
pub fn eligible_badges(
    first_completion: bool,
    score_percent: u32,
    records: &[AnswerInput],
) -> Vec<&'static str> {
    let timed = || records.iter().filter(|r| r.phase != Phase::Video);

    let mut badges = Vec::new();
    if first_completion {
        badges.push(FIRST_STEPS);
    }
    badges.push(mastery_badge(MasteryLevel::from_score(score_percent)));
    if timed().all(|r| r.duration_seconds <= STALL_SECS) {
        badges.push(STEADY_FOCUS);
    }
    if !timed().any(|r| !r.is_correct && r.duration_seconds < FAST_ANSWER_SECS) {
        badges.push(NO_GUESSING);
    }
    badges
}

/// What a completed session added to the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rewards {
    /// XP awarded.
    pub xp_earned: u64,
    /// Badge ids newly earned.
    pub badges_earned: Vec<String>,
    /// Whether the level went up.
    pub levelled_up: bool,
}

/// Applies a completed session to `profile` and returns what changed.
pub fn apply_completion(
    profile: &mut ProfileRow,
    estimated_minutes: u32,
    score_percent: u32,
    records: &[AnswerInput],
    first_completion: bool,
    today: NaiveDate,
) -> Rewards {
    let xp_earned = xp_for(estimated_minutes, score_percent);
    let previous_level = profile.level;

    profile.xp += xp_earned;
    profile.level = level_for(profile.xp);
    profile.streak_days = next_streak(profile.streak_days, profile.last_completed_on, today);
    profile.last_completed_on = Some(today);

    let mut badges_earned = Vec::new();
    for badge in eligible_badges(first_completion, score_percent, records) {
        if !profile.badges.iter().any(|held| held == badge) {
            profile.badges.push(badge.to_string());
            badges_earned.push(badge.to_string());
        }
    }

    Rewards {
        xp_earned,
        badges_earned,
        levelled_up: profile.level > previous_level,
    }
}
