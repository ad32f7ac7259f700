//! Evaluation session and report generation.
//!
//! - [`session::SudokuAccuracy`]: the exact-match aggregator
//! - [`session::EvalConfig`]: key resolution order and output options
//! - [`report::SudokuReport`]: reduced counts, accuracy and their file forms

pub mod report;
pub mod session;

pub use report::{ACCURACY_KEY, RESULTS_FILE, SudokuReport};
pub use session::{EvalConfig, EvalConfigBuilder, SkipReason, SudokuAccuracy};
