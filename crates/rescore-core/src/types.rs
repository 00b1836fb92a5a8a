//! Boundary types shared with the first-phase ranking engine.
//!
//! A [`RankedResult`] arrives from first-phase ranking sorted by descending
//! relevance; the global phase mutates hit relevances in place, re-sorts, and
//! scrubs hidden match features before the result leaves the subsystem.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tensor::TensorValue;

// ---------------------------------------------------------------------------
// Hit
// ---------------------------------------------------------------------------

/// A single matched document with its relevance score and optional per-hit
/// match-feature bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Caller-defined document identifier.
    pub id: String,
    /// Relevance score. First-phase on entry; global-phase (or range-adjusted)
    /// on exit for hits the pipeline touched.
    pub relevance: f64,
    /// Named match features computed during matching/first-phase ranking.
    /// `None` when the hit carries no bundle, or when scrubbing removed the
    /// last entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_features: Option<HashMap<String, TensorValue>>,
}

impl Hit {
    /// Creates a hit with no match-feature bundle.
    #[must_use]
    pub fn new(id: impl Into<String>, relevance: f64) -> Self {
        Self {
            id: id.into(),
            relevance,
            match_features: None,
        }
    }

    /// Adds a match feature, creating the bundle if absent.
    #[must_use]
    pub fn with_match_feature(mut self, name: impl Into<String>, value: impl Into<TensorValue>) -> Self {
        self.match_features
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Looks up a match feature by name.
    #[must_use]
    pub fn match_feature(&self, name: &str) -> Option<&TensorValue> {
        self.match_features.as_ref()?.get(name)
    }

    /// Ordering by relevance descending with NaN-safe semantics.
    /// NaN sorts below all real values (treated as worst possible score).
    #[must_use]
    pub fn cmp_by_relevance(&self, other: &Self) -> std::cmp::Ordering {
        let a = if self.relevance.is_nan() {
            f64::NEG_INFINITY
        } else {
            self.relevance
        };
        let b = if other.relevance.is_nan() {
            f64::NEG_INFINITY
        } else {
            other.relevance
        };
        // Descending: higher scores first.
        b.total_cmp(&a)
    }
}

// ---------------------------------------------------------------------------
// RankedResult
// ---------------------------------------------------------------------------

/// An ordered sequence of hits, sorted by descending relevance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// Hits in rank order.
    pub hits: Vec<Hit>,
}

impl RankedResult {
    /// Wraps an already-ordered hit sequence.
    #[must_use]
    pub fn new(hits: Vec<Hit>) -> Self {
        Self { hits }
    }

    /// Number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether the result holds no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Stable re-sort by descending relevance. Hits with equal relevance keep
    /// their current relative order.
    pub fn sort_by_relevance(&mut self) {
        self.hits.sort_by(Hit::cmp_by_relevance);
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Query-side ranking-feature bindings, constant across all hits of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Ranking features bound on the query, by name.
    #[serde(default)]
    pub ranking_features: HashMap<String, TensorValue>,
}

impl Query {
    /// Creates a query with no bound ranking features.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a ranking feature.
    #[must_use]
    pub fn with_feature(mut self, name: impl Into<String>, value: impl Into<TensorValue>) -> Self {
        self.ranking_features.insert(name.into(), value.into());
        self
    }

    /// Looks up a bound ranking feature by name.
    #[must_use]
    pub fn ranking_feature(&self, name: &str) -> Option<&TensorValue> {
        self.ranking_features.get(name)
    }
}
