//! Error types for sudoku-eval operations.

use thiserror::Error;

/// Result type alias for sudoku-eval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scoring or aggregating.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Prediction and target tensors cannot be compared row by row.
    #[error("Shape mismatch: predictions {predictions:?}, targets {targets:?}")]
    ShapeMismatch {
        /// Shape of the prediction tensor after flattening.
        predictions: Vec<usize>,
        /// Shape of the target tensor after flattening.
        targets: Vec<usize>,
    },

    /// A tensor has no sample axis.
    #[error("Tensor has rank 0, expected a leading sample axis")]
    EmptyRank,

    /// Serialized tensor data does not fill its declared shape.
    #[error("Invalid tensor shape {shape:?}: {reason}")]
    InvalidShape {
        /// Declared shape.
        shape: Vec<usize>,
        /// Reason reported by the array backend.
        reason: String,
    },

    /// Rank and world size are inconsistent.
    #[error("Invalid worker context: {0}")]
    InvalidContext(String),

    /// World size is above one but no communication group was supplied.
    #[error("world_size is {world_size} but no communication group was provided")]
    MissingGroup {
        /// World size from the worker context.
        world_size: usize,
    },

    /// A collective operation failed.
    #[error("Collective error: {0}")]
    Collective(String),

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
