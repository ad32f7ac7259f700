//! Evaluation report for one pass.
//!
//! A [`SudokuReport`] holds the globally reduced counts and the derived
//! accuracy. It renders the console summary, the plain-text results file,
//! and an optional JSON copy.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Key under which the accuracy is returned to the harness.
pub const ACCURACY_KEY: &str = "test/sudoku_accuracy";

/// Default name of the plain-text results file.
pub const RESULTS_FILE: &str = "sudoku_results.txt";

/// Name of the JSON report written next to the results file.
pub const JSON_REPORT_FILE: &str = "sudoku_results.json";

/// Result of an evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SudokuReport {
    /// Exact-match accuracy in `[0, 1]`.
    pub accuracy: f64,

    /// Correct grids, summed over all workers.
    pub correct: f64,

    /// Grids checked, summed over all workers.
    pub total: f64,

    /// Batches this worker skipped for missing or malformed fields.
    pub unscored_batches: u64,

    /// Number of workers that contributed.
    pub world_size: usize,

    /// When this report was generated.
    #[serde(with = "chrono_serde")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SudokuReport {
    /// Build a report from reduced counts.
    #[must_use]
    pub fn new(correct: f64, total: f64, unscored_batches: u64, world_size: usize) -> Self {
        let accuracy = if total > 0.0 { correct / total } else { 0.0 };
        Self {
            accuracy,
            correct,
            total,
            unscored_batches,
            world_size,
            timestamp: chrono::Utc::now(),
        }
    }

    /// The mapping handed back to the harness.
    #[must_use]
    pub fn metrics(&self) -> HashMap<String, f64> {
        HashMap::from([(ACCURACY_KEY.to_string(), self.accuracy)])
    }

    /// Contents of the plain-text results file.
    ///
    /// Three lines, values in shortest round-trip form (`2.0`, `0.5`,
    /// `5e-05`).
    #[must_use]
    pub fn to_text(&self) -> String {
        format!(
            "Accuracy: {}\nCorrect: {}\nTotal: {}",
            repr_float(self.accuracy),
            repr_float(self.correct),
            repr_float(self.total)
        )
    }

    /// Write the plain-text results file into `dir`, creating it if needed.
    pub fn write_text(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, self.to_text())?;
        Ok(path)
    }

    /// Write the report as pretty JSON into `dir`, creating it if needed.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(JSON_REPORT_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Load a report previously written with [`write_json`](Self::write_json).
    pub fn read_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl fmt::Display for SudokuReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-<40}", "")?;
        writeln!(f, "SUDOKU EVAL RESULTS:")?;
        writeln!(f, "Total Puzzles Checked: {}", self.total as u64)?;
        writeln!(f, "Correct Puzzles: {}", self.correct as u64)?;
        writeln!(f, "EXACT MATCH ACCURACY: {:.2}%", self.accuracy * 100.0)?;
        write!(f, "{:-<40}", "")
    }
}

/// Shortest round-trip form with a decimal point, exponents written as
/// `e-05` / `e+16` (scientific below 1e-4 and from 1e16 up).
fn repr_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let debug = format!("{value:?}");
    match debug.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = exponent
                .strip_prefix('-')
                .map_or(('+', exponent), |digits| ('-', digits));
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => debug,
    }
}

mod chrono_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        dt.to_rfc3339().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
