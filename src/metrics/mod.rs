//! Grid comparison metrics.
//!
//! - **Exact match**: a sample scores only when every cell of the predicted
//!   grid equals the ground-truth cell. No partial credit.

pub mod exact_match;

pub use exact_match::count_exact_matches;

use serde::{Deserialize, Serialize};

/// Correct and total sample counts from one or more batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCount {
    /// Samples whose whole row matched.
    pub correct: u64,
    /// Samples compared.
    pub total: u64,
}

impl MatchCount {
    /// Fraction of correct samples, `0.0` when nothing was compared.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

impl std::ops::AddAssign for MatchCount {
    fn add_assign(&mut self, other: Self) {
        self.correct += other.correct;
        self.total += other.total;
    }
}
