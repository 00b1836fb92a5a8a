//! Declarative rank-profile configuration.
//!
//! [`RankProfile`] is the resolved form of what the configuration source
//! supplies for one rank profile. Most profiles declare no global phase;
//! for those that do, [`GlobalPhaseProfile`] names the main expression, the
//! rerank window, the normalizer chain, the externally visible match
//! features, and query-feature types/defaults. All fields have serde defaults
//! so profiles can be written sparsely.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use rescore_core::error::{RankError, RankResult};
use rescore_core::tensor::{TensorType, TensorValue};

use crate::normalize::NormalizerKind;

/// Default number of top hits subjected to global-phase rescoring.
pub const DEFAULT_RERANK_COUNT: usize = 100;

/// One rank profile as delivered by the configuration source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankProfile {
    /// Profile name.
    pub name: String,
    /// Global-phase declaration; `None` for the common untouched profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_phase: Option<GlobalPhaseProfile>,
}

impl RankProfile {
    /// A profile with no global phase.
    #[must_use]
    pub fn without_global_phase(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            global_phase: None,
        }
    }
}

/// Declarative global-phase section of a rank profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalPhaseProfile {
    /// Registry name of the main global-phase expression.
    pub expression: String,

    /// Number of top hits to rescore. Default: 100.
    #[serde(default = "default_rerank_count")]
    pub rerank_count: usize,

    /// Intermediate rank-normalizing transforms, in evaluation order.
    #[serde(default)]
    pub normalizers: Vec<NormalizerProfile>,

    /// Match features the profile exposes to callers. Features fetched only
    /// for the global phase and not listed here are scrubbed from the result.
    #[serde(default)]
    pub visible_match_features: BTreeSet<String>,

    /// Declared types of query features, by name.
    #[serde(default)]
    pub query_feature_types: HashMap<String, TensorType>,

    /// Declared default values of query features, by name.
    #[serde(default)]
    pub query_feature_defaults: HashMap<String, TensorValue>,
}

fn default_rerank_count() -> usize {
    DEFAULT_RERANK_COUNT
}

impl GlobalPhaseProfile {
    /// Checks profile-internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::InvalidProfile`] for an empty expression name, a
    /// duplicate normalizer name, or an invalid reciprocal-rank `k`.
    pub fn validate(&self) -> RankResult<()> {
        if self.expression.is_empty() {
            return Err(RankError::InvalidProfile {
                field: "expression".into(),
                value: String::new(),
                reason: "global phase requires an expression name".into(),
            });
        }

        let mut seen = HashSet::new();
        for normalizer in &self.normalizers {
            if !seen.insert(normalizer.name.as_str()) {
                return Err(RankError::InvalidProfile {
                    field: "normalizers".into(),
                    value: normalizer.name.clone(),
                    reason: "duplicate normalizer name".into(),
                });
            }
            if let NormalizerKind::ReciprocalRank { k } = normalizer.method {
                if !k.is_finite() || k < 0.0 {
                    return Err(RankError::InvalidProfile {
                        field: "normalizers".into(),
                        value: format!("{}: k = {k}", normalizer.name),
                        reason: "reciprocal-rank k must be finite and non-negative".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Declaration of one normalizer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerProfile {
    /// Unique output name within the profile.
    pub name: String,
    /// Feature or registered expression whose value is normalized.
    pub input: String,
    /// Normalization method and parameters.
    #[serde(flatten)]
    pub method: NormalizerKind,
}
