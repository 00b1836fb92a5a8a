//! Rank-normalizing transforms applied to the rerank batch.
//!
//! A normalizer turns a raw per-hit scalar (one value per hit in the rerank
//! window) into a rank- or range-normalized scalar usable as an input to
//! later normalizers and to the main global-phase expression. Normalizers are
//! batch transforms: all inputs are added first, `normalize()` runs exactly
//! once, then per-slot outputs are read back.
//!
//! Two methods exist, as a closed variant set:
//!
//! ```text
//! linear:               output[i] = (input[i] - min) / (max - min)
//! reciprocal-rank{k}:   output[i] = 1 / (rank(i) + k),  rank 1 = largest
//! ```

use serde::{Deserialize, Serialize};

use crate::eval::EvalSpec;

/// Default `k` for reciprocal-rank normalization, matching the constant used
/// for reciprocal-rank fusion across the industry (Cormack et al., 2009).
pub const DEFAULT_RECIPROCAL_RANK_K: f64 = 60.0;

const NON_FINITE_FALLBACK: f64 = 0.0;
const DEGENERATE_VALUE: f64 = 0.0;

// ─── Method Selection ───────────────────────────────────────────────────────

/// The closed set of normalization methods a rank profile may select.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum NormalizerKind {
    /// Min-max normalization into `[0, 1]`.
    Linear,
    /// Reciprocal rank: `1 / (rank + k)` with rank 1 for the largest input.
    ReciprocalRank {
        /// Rank dampening constant. Higher values flatten the distribution.
        #[serde(default = "default_reciprocal_rank_k")]
        k: f64,
    },
}

fn default_reciprocal_rank_k() -> f64 {
    DEFAULT_RECIPROCAL_RANK_K
}

impl NormalizerKind {
    /// Stable method identifier, e.g. `"linear"` or `"reciprocal-rank{k:60}"`.
    #[must_use]
    pub fn method_id(&self) -> String {
        match self {
            Self::Linear => "linear".to_string(),
            Self::ReciprocalRank { k } => format!("reciprocal-rank{{k:{k}}}"),
        }
    }

    /// Instantiates a fresh per-query normalizer of this kind.
    #[must_use]
    pub fn instantiate(
        &self,
        name: impl Into<String>,
        source: impl Into<String>,
        capacity: usize,
    ) -> Box<dyn Normalizer> {
        match self {
            Self::Linear => Box::new(LinearNormalizer::new(name, source, capacity)),
            Self::ReciprocalRank { k } => {
                Box::new(ReciprocalRankNormalizer::new(name, source, capacity, *k))
            }
        }
    }
}

// ─── Normalizer Trait ───────────────────────────────────────────────────────

/// A per-query, per-rerank-batch normalization transform.
///
/// # Contract
///
/// `add_input` returns the 0-based slot of the value in insertion order.
/// `normalize` is called exactly once, after all inputs for the batch have
/// been added and before any `output` read.
pub trait Normalizer: Send {
    /// Records a raw input, returning its slot.
    fn add_input(&mut self, raw: f64) -> usize;

    /// Transforms all recorded inputs in place.
    fn normalize(&mut self);

    /// The normalized value at `slot`.
    fn output(&self, slot: usize) -> f64;

    /// This normalizer instance's published name.
    fn name(&self) -> &str;

    /// Diagnostic name of the source feature being normalized.
    fn input(&self) -> &str;

    /// Method identifier string for diagnostics.
    fn normalizing(&self) -> String;
}

// ─── LinearNormalizer ───────────────────────────────────────────────────────

/// Min-max normalization over the rerank batch.
///
/// Finite values are scaled into `[0, 1]` by `(x - min) / (max - min)`.
/// Non-finite values are excluded from the min/max statistics and map to
/// `0.0`. A degenerate batch (all finite values equal, or a single value)
/// maps every finite value to `0.0`.
#[derive(Debug)]
pub struct LinearNormalizer {
    name: String,
    source: String,
    data: Vec<f64>,
    normalized: bool,
}

impl LinearNormalizer {
    /// Creates a normalizer sized for `capacity` inputs.
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            data: Vec::with_capacity(capacity),
            normalized: false,
        }
    }
}

impl Normalizer for LinearNormalizer {
    fn add_input(&mut self, raw: f64) -> usize {
        self.data.push(raw);
        self.data.len() - 1
    }

    fn normalize(&mut self) {
        self.normalized = true;

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut saw_finite = false;
        for &value in &self.data {
            if value.is_finite() {
                min = min.min(value);
                max = max.max(value);
                saw_finite = true;
            }
        }

        if !saw_finite {
            self.data.fill(NON_FINITE_FALLBACK);
            return;
        }

        let range = max - min;
        for value in &mut self.data {
            *value = if !value.is_finite() {
                NON_FINITE_FALLBACK
            } else if range > 0.0 {
                (*value - min) / range
            } else {
                DEGENERATE_VALUE
            };
        }
    }

    fn output(&self, slot: usize) -> f64 {
        assert!(self.normalized, "normalize() must run before output()");
        self.data[slot]
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input(&self) -> &str {
        &self.source
    }

    fn normalizing(&self) -> String {
        NormalizerKind::Linear.method_id()
    }
}

// ─── ReciprocalRankNormalizer ───────────────────────────────────────────────

/// Reciprocal-rank normalization over the rerank batch.
///
/// Inputs are ranked by descending raw value (rank 1 = largest); the output
/// for a slot is `1 / (rank + k)`. Ties rank by insertion slot ascending, so
/// the earlier-processed hit takes the better rank.
#[derive(Debug)]
pub struct ReciprocalRankNormalizer {
    name: String,
    source: String,
    k: f64,
    data: Vec<f64>,
    normalized: bool,
}

impl ReciprocalRankNormalizer {
    /// Creates a normalizer sized for `capacity` inputs.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        capacity: usize,
        k: f64,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            k,
            data: Vec::with_capacity(capacity),
            normalized: false,
        }
    }
}

impl Normalizer for ReciprocalRankNormalizer {
    fn add_input(&mut self, raw: f64) -> usize {
        self.data.push(raw);
        self.data.len() - 1
    }

    fn normalize(&mut self) {
        self.normalized = true;

        // Stable sort on descending value keeps insertion order for ties.
        let mut slots: Vec<usize> = (0..self.data.len()).collect();
        slots.sort_by(|&a, &b| {
            let va = sanitize(self.data[a]);
            let vb = sanitize(self.data[b]);
            vb.total_cmp(&va)
        });

        let mut outputs = vec![0.0; self.data.len()];
        for (position, &slot) in slots.iter().enumerate() {
            let rank = position + 1;
            #[allow(clippy::cast_precision_loss)]
            let rank_f = rank as f64;
            outputs[slot] = 1.0 / (rank_f + self.k);
        }
        self.data = outputs;
    }

    fn output(&self, slot: usize) -> f64 {
        assert!(self.normalized, "normalize() must run before output()");
        self.data[slot]
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input(&self) -> &str {
        &self.source
    }

    fn normalizing(&self) -> String {
        NormalizerKind::ReciprocalRank { k: self.k }.method_id()
    }
}

/// NaN/Inf sort below all real values when ranking.
#[inline]
fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::NEG_INFINITY
    }
}

// ─── NormalizerSetup ────────────────────────────────────────────────────────

/// Resolved per-profile configuration for one normalizer instance.
///
/// `name` is unique within the rank profile and stable across queries; later
/// normalizers and the main expression reference the normalizer's output by
/// this name.
#[derive(Debug, Clone)]
pub struct NormalizerSetup {
    /// Published output name.
    pub name: String,
    /// Selected normalization method.
    pub kind: NormalizerKind,
    /// Diagnostic name of the feature or expression being normalized.
    pub source: String,
    /// Binding plan producing the raw per-hit input.
    pub input: EvalSpec,
}

impl NormalizerSetup {
    /// Instantiates the per-query normalizer for a batch of `capacity` hits.
    #[must_use]
    pub fn instantiate(&self, capacity: usize) -> Box<dyn Normalizer> {
        self.kind.instantiate(&self.name, &self.source, capacity)
    }
}
