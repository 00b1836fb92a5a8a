//! Evaluation specs: the binding plan for one scoring expression.
//!
//! An [`EvalSpec`] pairs an evaluator factory with the ordered lists of
//! query-feature names and per-hit feature aliases to bind before evaluation.
//! It is built once per rank profile and reused read-only across queries;
//! [`EvalSpec::evaluate_hit`] is the per-hit bind-then-evaluate step shared by
//! normalizer inputs and the main global-phase expression.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rescore_core::error::{RankError, RankResult};
use rescore_core::tensor::TensorValue;
use rescore_core::traits::EvaluatorFactory;

/// A per-hit feature to bind: looked up under `source`, presented to the
/// evaluator as `bind_as`.
///
/// `source` keys into the hit's match-feature bundle or a normalizer's
/// published name; `bind_as` supports renaming so one expression can consume
/// the same source under a different input name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAlias {
    /// Lookup key into the hit's feature bundle or a normalizer name.
    pub source: String,
    /// Input name presented to the evaluator.
    pub bind_as: String,
}

impl FeatureAlias {
    /// An alias binding `name` under its own name.
    #[must_use]
    pub fn direct(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            bind_as: name,
        }
    }

    /// An alias binding `source` under `bind_as`.
    #[must_use]
    pub fn renamed(source: impl Into<String>, bind_as: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bind_as: bind_as.into(),
        }
    }
}

/// Immutable binding plan for one expression: a factory plus the query and
/// per-hit features to bind on every evaluation.
#[derive(Clone)]
pub struct EvalSpec {
    /// Produces a fresh evaluator per hit.
    pub factory: Arc<dyn EvaluatorFactory>,
    /// Query-feature names to bind, in declaration order.
    pub from_query: Vec<String>,
    /// Per-hit features to bind, in declaration order.
    pub from_hit: Vec<FeatureAlias>,
}

impl fmt::Debug for EvalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalSpec")
            .field("from_query", &self.from_query)
            .field("from_hit", &self.from_hit)
            .finish_non_exhaustive()
    }
}

impl EvalSpec {
    /// Evaluates this expression for one hit.
    ///
    /// Creates a fresh single-use evaluator, binds every `from_query` name
    /// from `query_values`, binds every `from_hit` alias through `feature`
    /// (skipping sources the lookup cannot resolve — the evaluator reports
    /// them as unbound if it actually requires them), and evaluates.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::MissingQueryFeature`] for a `from_query` name
    /// absent from `query_values`, or any error from the evaluator itself
    /// (typically [`RankError::UnboundInput`]).
    pub fn evaluate_hit(
        &self,
        query_values: &HashMap<String, TensorValue>,
        feature: impl Fn(&str) -> Option<TensorValue>,
    ) -> RankResult<f64> {
        let mut evaluator = self.factory.create();

        for name in &self.from_query {
            let value = query_values
                .get(name)
                .ok_or_else(|| RankError::MissingQueryFeature { name: name.clone() })?;
            evaluator.bind(name, value.clone());
        }

        for alias in &self.from_hit {
            if let Some(value) = feature(&alias.source) {
                evaluator.bind(&alias.bind_as, value);
            }
        }

        evaluator.evaluate()
    }
}
