//! Markdown rendering of a saved session.
//!
//! The generated report has:
//!
//! - A summary table (status, score, mastery, effort, focus, duration, XP)
//! - The parent verdict and the narrative paragraph
//! - Focus anomalies
//! - The full answer log grouped by phase
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use scholafy_insight::{MarkdownGenerator, SessionReport, SessionStatus};
//!
//! let report = SessionReport::new("Ada", "Fractions", SessionStatus::Completed, Utc::now(), 80, 420, vec![]);
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Session Report: Fractions"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{Phase, ReportRecord, SessionReport};

/// Maximum length of an answer in the log table.
const MAX_ANSWER_DISPLAY_LENGTH: usize = 60;

/// Renders a [`SessionReport`] as Markdown.
pub struct MarkdownGenerator<'a> {
    report: &'a SessionReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a generator for the given report.
    #[must_use]
    pub const fn new(report: &'a SessionReport) -> Self {
        Self { report }
    }

    /// Generates the complete report, footer included.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = self.generate_body();
        Self::write_footer(&mut output);
        output
    }

    /// Generates everything except the timestamped footer.
    #[must_use]
    pub fn generate_body(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_verdict(&mut output);
        self.write_focus(&mut output);
        self.write_answers(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Session Report: {}\n",
            escape_markdown(&self.report.lesson_title)
        );
        let _ = writeln!(
            output,
            "*{} on {}*\n",
            escape_markdown(&self.report.student_name),
            format_timestamp(&self.report.timestamp)
        );
    }

    fn write_summary(&self, output: &mut String) {
        let report = self.report;
        let insight = &report.insight;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Status | {} |", report.status);
        let _ = writeln!(output, "| Score | {}% |", report.score_percent);
        let _ = writeln!(
            output,
            "| Mastery | {} ({}) |",
            insight.mastery_level,
            insight.mastery_level.description()
        );
        let _ = writeln!(output, "| Effort | {} |", insight.effort_grade);
        let _ = writeln!(output, "| Focus Index | {}/100 |", insight.focus_index);
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(report.duration_seconds)
        );
        let _ = writeln!(output, "| XP Earned | {} |", report.xp_earned);
        if !report.badges_earned.is_empty() {
            let badges: Vec<String> = report
                .badges_earned
                .iter()
                .map(|b| escape_markdown(b))
                .collect();
            let _ = writeln!(output, "| Badges | {} |", badges.join(", "));
        }
        let _ = writeln!(output);
    }

    fn write_verdict(&self, output: &mut String) {
        let _ = writeln!(output, "## Teacher's Notes\n");
        let _ = writeln!(output, "> {}\n", self.report.teacher_feedback());
        let _ = writeln!(output, "{}\n", self.report.insight.narrative);
    }

    fn write_focus(&self, output: &mut String) {
        let counts = self.report.insight.anomalies;
        let _ = writeln!(output, "## Focus\n");
        if counts.guesses + counts.rushed + counts.stalls == 0 {
            let _ = writeln!(output, "*No timing anomalies detected.*\n");
            return;
        }
        let _ = writeln!(output, "- Rapid guesses: {}", counts.guesses);
        let _ = writeln!(output, "- Rushed answers: {}", counts.rushed);
        let _ = writeln!(output, "- Long stalls: {}", counts.stalls);
        let _ = writeln!(output);
    }

    fn write_answers(&self, output: &mut String) {
        let _ = writeln!(output, "## Answers\n");
        if self.report.records.is_empty() {
            let _ = writeln!(output, "*No questions answered.*\n");
            return;
        }
        for (title, phase) in [
            ("Starter Quiz", Phase::Starter),
            ("Video Checkpoints", Phase::Video),
            ("Exit Quiz", Phase::Exit),
        ] {
            let records: Vec<&ReportRecord> = self
                .report
                .records
                .iter()
                .filter(|r| r.phase == phase)
                .collect();
            if records.is_empty() {
                continue;
            }
            let _ = writeln!(output, "### {title}\n");
            let _ = writeln!(output, "| # | Question | Answer | Result | Time |");
            let _ = writeln!(output, "|---|----------|--------|--------|------|");
            for (i, record) in records.iter().enumerate() {
                Self::write_answer_row(output, i + 1, record);
            }
            let _ = writeln!(output);
        }
    }

    fn write_answer_row(output: &mut String, index: usize, record: &ReportRecord) {
        let result = if record.is_correct { "&#9989;" } else { "&#10060;" };
        let _ = writeln!(
            output,
            "| {index} | {} | {} | {result} | {:.1}s |",
            escape_markdown(&record.prompt),
            escape_markdown(&truncate(&record.answer, MAX_ANSWER_DISPLAY_LENGTH)),
            record.duration_seconds
        );
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by Scholafy at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats seconds as e.g. "1h 1m 1s", "1m 5s" or "45s".
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Escapes Markdown control characters so answers render literally.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }
    result
}

/// Truncates on a char boundary, adding an ellipsis.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}...")
}

// ============================================================================
// Tests
// ============================================================================
