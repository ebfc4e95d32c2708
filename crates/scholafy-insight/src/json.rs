//! JSON rendering of a saved session.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use scholafy_insight::{json::JsonGenerator, SessionReport, SessionStatus};
//!
//! let report = SessionReport::new("Ada", "Fractions", SessionStatus::Completed, Utc::now(), 80, 420, vec![]);
//! let json = JsonGenerator::new(&report).generate().unwrap();
//! assert!(json.contains(r#""lessonTitle":"Fractions""#));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{InsightError, Result, SessionReport};

/// Serializes a [`SessionReport`] to compact or pretty JSON.
pub struct JsonGenerator<'a> {
    report: &'a SessionReport,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a generator for the given report.
    #[must_use]
    pub const fn new(report: &'a SessionReport) -> Self {
        Self { report }
    }

    /// Single-line JSON.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(InsightError::from)
    }

    /// Indented JSON.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(InsightError::from)
    }

    /// Writes the report to `path`, replacing any existing file.
    ///
    /// Parent directories must exist.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}
