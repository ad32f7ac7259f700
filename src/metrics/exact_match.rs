//! Exact-match counting over flattened grids.

use std::borrow::Cow;

use crate::error::{Error, Result};
use crate::metrics::MatchCount;
use crate::tensor::Tensor;

/// Count samples whose predicted row equals the target row exactly.
///
/// When the two shapes differ, both sides are flattened to
/// `(sample_count, -1)` first, so `(B, 9, 9)` grids compare against
/// `(B, 81)` labels. Integer and float tensors compare numerically.
///
/// # Errors
///
/// - [`Error::EmptyRank`] if a tensor has no sample axis.
/// - [`Error::ShapeMismatch`] if the shapes still differ after flattening.
pub fn count_exact_matches(predictions: &Tensor, targets: &Tensor) -> Result<MatchCount> {
    let (predictions, targets) = if predictions.shape() != targets.shape() {
        (
            Cow::Owned(predictions.flatten_samples()?),
            Cow::Owned(targets.flatten_samples()?),
        )
    } else {
        (Cow::Borrowed(predictions), Cow::Borrowed(targets))
    };

    if predictions.shape() != targets.shape() {
        return Err(Error::ShapeMismatch {
            predictions: predictions.shape().to_vec(),
            targets: targets.shape().to_vec(),
        });
    }
    let total = predictions.sample_count().ok_or(Error::EmptyRank)?;

    let predicted = predictions.to_f64();
    let expected = targets.to_f64();
    let correct = predicted
        .outer_iter()
        .zip(expected.outer_iter())
        .filter(|(p, t)| p == t)
        .count();

    Ok(MatchCount {
        correct: correct as u64,
        total: total as u64,
    })
}
