//! Prioritized field lookup.
//!
//! Models disagree on where they put their output: some return `preds`,
//! some `output`, some raw `logits`. A [`KeyResolver`] holds an ordered list
//! of [`FieldRule`]s and returns the first field present, with an optional
//! transform applied. The order is plain data, so it can be loaded from
//! configuration and tested on its own.

use serde::{Deserialize, Serialize};

use crate::tensor::{Tensor, TensorMap};

/// Transform applied to a field once it is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    /// Use the tensor as is.
    #[default]
    Identity,
    /// Take the index of the largest value along the last axis.
    Argmax,
}

/// One entry in a resolution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Field name to look up.
    pub key: String,
    /// Transform to apply when the field is present.
    #[serde(default)]
    pub transform: FieldTransform,
}

impl FieldRule {
    /// Rule that uses the field unchanged.
    #[must_use]
    pub fn identity(key: &str) -> Self {
        Self {
            key: key.to_string(),
            transform: FieldTransform::Identity,
        }
    }

    /// Rule that reduces the field with argmax over the last axis.
    #[must_use]
    pub fn argmax(key: &str) -> Self {
        Self {
            key: key.to_string(),
            transform: FieldTransform::Argmax,
        }
    }

    fn apply(&self, map: &TensorMap) -> Option<Tensor> {
        let tensor = map.get(&self.key)?;
        match self.transform {
            FieldTransform::Identity => Some(tensor.clone()),
            FieldTransform::Argmax => tensor.argmax_last(),
        }
    }
}

/// Ordered list of field rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyResolver {
    /// Rules in priority order.
    pub rules: Vec<FieldRule>,
    /// Fall back to the first field of the map when no rule matches.
    #[serde(default)]
    pub fallback_to_first: bool,
}

impl KeyResolver {
    /// Create a resolver from rules, without fallback.
    #[must_use]
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self {
            rules,
            fallback_to_first: false,
        }
    }

    /// Enable or disable the first-value fallback.
    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_first = enabled;
        self
    }

    /// Default order for prediction sets:
    /// `preds`, `output`, `logits` (argmax), then the first available value.
    #[must_use]
    pub fn predictions() -> Self {
        Self::new(vec![
            FieldRule::identity("preds"),
            FieldRule::identity("output"),
            FieldRule::argmax("logits"),
        ])
        .with_fallback(true)
    }

    /// Default order for batches: `labels`, `output`, `target`.
    #[must_use]
    pub fn targets() -> Self {
        Self::new(vec![
            FieldRule::identity("labels"),
            FieldRule::identity("output"),
            FieldRule::identity("target"),
        ])
    }

    /// Resolve a tensor from `map`, or `None` when nothing applies.
    #[must_use]
    pub fn resolve(&self, map: &TensorMap) -> Option<Tensor> {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(map))
            .or_else(|| {
                if self.fallback_to_first {
                    map.first().cloned()
                } else {
                    None
                }
            })
    }
}
