//! Named numeric arrays exchanged with the training harness.
//!
//! A [`Tensor`] is a dynamic-rank array holding either integer class ids
//! (grids, argmax output) or float scores (logits). A [`TensorMap`] is the
//! field-name keyed container used for both batches and prediction sets; it
//! keeps insertion order so "first available value" lookups are stable.
//!
//! ## Wire format
//!
//! Tensors serialize as `{"shape": [..], "data": [..]}` with `data` in
//! row-major order. All-integer data yields [`Tensor::Int`], anything else
//! [`Tensor::Float`].

use std::fmt;

use ndarray::{ArrayD, Axis, IxDyn};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A rectangular numeric array of any rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorRecord", into = "TensorRecord")]
pub enum Tensor {
    /// Integer values (cell digits, class ids).
    Int(ArrayD<i64>),
    /// Floating point values (scores, probabilities).
    Float(ArrayD<f32>),
}

impl Tensor {
    /// Build an integer tensor from a shape and row-major data.
    pub fn int(shape: &[usize], data: Vec<i64>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Self::Int)
            .map_err(|e| invalid_shape(shape, &e))
    }

    /// Build a float tensor from a shape and row-major data.
    pub fn float(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Self::Float)
            .map_err(|e| invalid_shape(shape, &e))
    }

    /// Array dimensions.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Int(a) => a.shape(),
            Self::Float(a) => a.shape(),
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Size of the leading (sample) axis, `None` for rank-0 tensors.
    #[must_use]
    pub fn sample_count(&self) -> Option<usize> {
        self.shape().first().copied()
    }

    /// Index of the largest value along the last axis.
    ///
    /// Ties resolve to the lowest index and NaN counts as the largest value.
    /// Returns `None` for rank-0 tensors and for an empty last axis.
    #[must_use]
    pub fn argmax_last(&self) -> Option<Self> {
        let last = self.ndim().checked_sub(1)?;
        if self.shape()[last] == 0 {
            return None;
        }
        let indices = match self {
            Self::Int(a) => a.map_axis(Axis(last), |lane| first_max_index(lane.iter())),
            Self::Float(a) => a.map_axis(Axis(last), |lane| first_max_index(lane.iter())),
        };
        Some(Self::Int(indices))
    }

    /// Reshape to `(sample_count, -1)`.
    pub fn flatten_samples(&self) -> Result<Self> {
        let samples = self.sample_count().ok_or(Error::EmptyRank)?;
        let per_sample = self.shape()[1..].iter().product::<usize>();
        let shape = [samples, per_sample];
        match self {
            Self::Int(a) => reshape(a, &shape).map(Self::Int),
            Self::Float(a) => reshape(a, &shape).map(Self::Float),
        }
    }

    /// Values widened to `f64`, so integer and float tensors compare numerically.
    #[must_use]
    pub fn to_f64(&self) -> ArrayD<f64> {
        match self {
            Self::Int(a) => a.mapv(|v| v as f64),
            Self::Float(a) => a.mapv(f64::from),
        }
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(array: ArrayD<i64>) -> Self {
        Self::Int(array)
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(array: ArrayD<f32>) -> Self {
        Self::Float(array)
    }
}

fn first_max_index<'a, T>(values: impl Iterator<Item = &'a T>) -> i64
where
    T: PartialOrd + 'a,
{
    let mut best: Option<(usize, &T)> = None;
    for (idx, value) in values.enumerate() {
        let replace = match best {
            None => true,
            Some((_, current)) if is_nan(current) => false,
            Some((_, current)) => is_nan(value) || value > current,
        };
        if replace {
            best = Some((idx, value));
        }
    }
    best.map_or(0, |(idx, _)| idx as i64)
}

fn is_nan<T: PartialOrd>(value: &T) -> bool {
    value.partial_cmp(value).is_none()
}

fn reshape<T: Clone>(array: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
    array
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(shape))
        .map_err(|e| invalid_shape(shape, &e))
}

fn invalid_shape(shape: &[usize], err: &ndarray::ShapeError) -> Error {
    Error::InvalidShape {
        shape: shape.to_vec(),
        reason: err.to_string(),
    }
}

/// Serialized form of a [`Tensor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TensorRecord {
    shape: Vec<usize>,
    data: RecordData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RecordData {
    Int(Vec<i64>),
    Float(Vec<f32>),
}

impl TryFrom<TensorRecord> for Tensor {
    type Error = Error;

    fn try_from(record: TensorRecord) -> Result<Self> {
        match record.data {
            RecordData::Int(data) => Self::int(&record.shape, data),
            RecordData::Float(data) => Self::float(&record.shape, data),
        }
    }
}

impl From<Tensor> for TensorRecord {
    fn from(tensor: Tensor) -> Self {
        let shape = tensor.shape().to_vec();
        let data = match tensor {
            Tensor::Int(a) => RecordData::Int(a.iter().copied().collect()),
            Tensor::Float(a) => RecordData::Float(a.iter().copied().collect()),
        };
        Self { shape, data }
    }
}

/// Field-name keyed tensors, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorMap {
    entries: Vec<(String, Tensor)>,
}

impl TensorMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, replacing any existing value under `key` in place.
    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor) -> &mut Self {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = tensor;
        } else {
            self.entries.push((key, tensor));
        }
        self
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(key, tensor);
        self
    }

    /// Look up a tensor by field name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, t)| t)
    }

    /// The first inserted tensor.
    #[must_use]
    pub fn first(&self) -> Option<&Tensor> {
        self.entries.first().map(|(_, t)| t)
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for TensorMap {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, tensor) in &self.entries {
            map.serialize_entry(key, tensor)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TensorMap {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TensorMapVisitor;

        impl<'de> Visitor<'de> for TensorMapVisitor {
            type Value = TensorMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to tensors")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<TensorMap, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = TensorMap::new();
                while let Some((key, tensor)) = access.next_entry::<String, Tensor>()? {
                    map.insert(key, tensor);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(TensorMapVisitor)
    }
}
