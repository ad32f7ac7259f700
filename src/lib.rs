//! # sudoku-eval
//!
//! Exact-match accuracy for Sudoku-solving models, aggregated across the
//! workers of a distributed evaluation.
//!
//! The harness owns the model, the data and the process group. This crate
//! receives per-batch tensors, counts grids that match the ground truth cell
//! for cell, sums the counts across workers at the end of a pass, and
//! reports the ratio.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sudoku_eval::{EvalConfig, SudokuAccuracy, WorkerContext};
//!
//! let mut metric = SudokuAccuracy::new(data_path, metadata, EvalConfig::default());
//! metric.begin_eval();
//! for (batch, preds) in loader {
//!     metric.update_batch(&batch, &preds);
//! }
//! let context = WorkerContext::new(rank, world_size);
//! let scores = metric.result(Some(save_dir), &context, Some(&group))?;
//! ```
//!
//! ## Modules
//!
//! - [`error`]: Error types for the library
//! - [`tensor`]: Named numeric arrays and their JSON form
//! - [`resolve`]: Prioritized field lookup
//! - [`metrics`]: Exact-match counting
//! - [`dist`]: Worker context and collective reduction
//! - [`eval`]: The accuracy aggregator and its report

pub mod dist;
pub mod error;
pub mod eval;
pub mod metrics;
pub mod resolve;
pub mod tensor;

// Re-export commonly used types
pub use dist::{Collective, LocalGroup, SingleProcess, WorkerContext};
pub use error::{Error, Result};
pub use eval::{
    report::{ACCURACY_KEY, SudokuReport},
    session::{EvalConfig, SudokuAccuracy},
};
pub use metrics::{MatchCount, count_exact_matches};
pub use resolve::{FieldRule, FieldTransform, KeyResolver};
pub use tensor::{Tensor, TensorMap};
