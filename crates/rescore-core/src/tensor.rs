//! Minimal tensor value model for per-hit and per-query ranking features.
//!
//! The expression compiler owns the full tensor calculus; this pipeline only
//! needs to *carry* values between the query, the hit's match-feature bundle,
//! and evaluator inputs, and to materialize type-appropriate zero values for
//! query features with no declared default.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of a ranking feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TensorType {
    /// A single number.
    Scalar,
    /// Sparse tensor addressed by string labels.
    Mapped,
    /// Dense tensor with a fixed dimension size.
    Indexed {
        /// Number of cells.
        size: usize,
    },
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Mapped => write!(f, "mapped"),
            Self::Indexed { size } => write!(f, "indexed[{size}]"),
        }
    }
}

/// A materialized ranking-feature value.
///
/// `Mapped` uses a `BTreeMap` so equality and serialization are deterministic
/// regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TensorValue {
    /// A single number.
    Scalar(f64),
    /// Sparse cells addressed by string labels.
    Mapped(BTreeMap<String, f64>),
    /// Dense cells in dimension order.
    Indexed(Vec<f64>),
}

impl TensorValue {
    /// The type-appropriate zero value: scalar `0.0`, empty mapped tensor, or
    /// zero-filled indexed tensor.
    #[must_use]
    pub fn zero_of(ty: &TensorType) -> Self {
        match ty {
            TensorType::Scalar => Self::Scalar(0.0),
            TensorType::Mapped => Self::Mapped(BTreeMap::new()),
            TensorType::Indexed { size } => Self::Indexed(vec![0.0; *size]),
        }
    }

    /// The type this value conforms to.
    #[must_use]
    pub fn tensor_type(&self) -> TensorType {
        match self {
            Self::Scalar(_) => TensorType::Scalar,
            Self::Mapped(_) => TensorType::Mapped,
            Self::Indexed(values) => TensorType::Indexed {
                size: values.len(),
            },
        }
    }

    /// Whether this value conforms to `ty`.
    #[must_use]
    pub fn matches(&self, ty: &TensorType) -> bool {
        self.tensor_type() == *ty
    }

    /// The scalar payload, if this is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Mapped(_) | Self::Indexed(_) => None,
        }
    }
}

impl From<f64> for TensorValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}
