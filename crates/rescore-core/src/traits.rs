//! The evaluator seam between this pipeline and the tensor expression compiler.
//!
//! The compiler turns ranking-expression source into [`EvaluatorFactory`]
//! objects; this pipeline only consumes factories. Each query creates fresh
//! [`Evaluator`] instances — one per hit per expression — binds the hit's
//! inputs, and reads back a score. Evaluators are single-use: stale state from
//! a previous hit can never leak because a new instance is created each time,
//! and `evaluate` refuses to run with any declared input unbound.
//!
//! [`FnEvaluator`] is the concrete two-phase implementation: a binding map
//! built up by the caller, then a pure function from that map to a score.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RankError, RankResult};
use crate::tensor::TensorValue;

// ─── Bindings ───────────────────────────────────────────────────────────────

/// Named input values accumulated before evaluation.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, TensorValue>,
}

impl Bindings {
    /// Creates an empty binding map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`. Re-binding a name overwrites (last value wins).
    pub fn insert(&mut self, name: impl Into<String>, value: TensorValue) {
        self.values.insert(name.into(), value);
    }

    /// Whether `name` has been bound.
    #[must_use]
    pub fn is_bound(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// The bound value for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TensorValue> {
        self.values.get(name)
    }

    /// The bound scalar for `name`, if `name` is bound to a scalar.
    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(TensorValue::as_scalar)
    }
}

// ─── Evaluator ──────────────────────────────────────────────────────────────

/// A per-hit, single-use scoring-function instance.
///
/// # Contract
///
/// - Each declared input is bound once before [`evaluate`](Self::evaluate),
///   in any order. Undeclared bindings are tolerated and ignored, so callers
///   may append extra inputs (normalizer outputs) unconditionally.
/// - `evaluate` fails with [`RankError::UnboundInput`] if any declared input
///   is missing; it never falls back to implicit defaults.
/// - The returned score is an unrestricted signed `f64`.
pub trait Evaluator: Send {
    /// Diagnostic name of the expression this evaluator computes.
    fn expression(&self) -> &str;

    /// The inputs this evaluator requires before evaluation.
    fn declared_inputs(&self) -> &[String];

    /// Binds `name` to `value`. Re-binding overwrites.
    fn bind(&mut self, name: &str, value: TensorValue);

    /// Computes the score. Pure given the bound state.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::UnboundInput`] naming the first declared input
    /// that was never bound.
    fn evaluate(&self) -> RankResult<f64>;
}

/// Produces a fresh [`Evaluator`] per hit.
///
/// Factories are built once per rank profile and shared read-only across
/// queries, so they must be `Send + Sync`.
pub trait EvaluatorFactory: Send + Sync {
    /// Creates a fresh, unbound evaluator.
    fn create(&self) -> Box<dyn Evaluator>;
}

// ─── FnEvaluator ────────────────────────────────────────────────────────────

type ScoreFn = dyn Fn(&Bindings) -> f64 + Send + Sync;

/// Concrete evaluator backed by a pure scoring closure.
pub struct FnEvaluator {
    expression: String,
    inputs: Arc<[String]>,
    bound: Bindings,
    score_fn: Arc<ScoreFn>,
}

impl std::fmt::Debug for FnEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnEvaluator")
            .field("expression", &self.expression)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl Evaluator for FnEvaluator {
    fn expression(&self) -> &str {
        &self.expression
    }

    fn declared_inputs(&self) -> &[String] {
        &self.inputs
    }

    fn bind(&mut self, name: &str, value: TensorValue) {
        self.bound.insert(name, value);
    }

    fn evaluate(&self) -> RankResult<f64> {
        for input in self.inputs.iter() {
            if !self.bound.is_bound(input) {
                return Err(RankError::UnboundInput {
                    expression: self.expression.clone(),
                    name: input.clone(),
                });
            }
        }
        Ok((self.score_fn)(&self.bound))
    }
}

/// Factory for [`FnEvaluator`] instances sharing one scoring closure.
///
/// This is what the in-repo expression registry (and tests) hand to the
/// pipeline; a real expression compiler supplies its own factory type.
pub struct FnEvaluatorFactory {
    expression: String,
    inputs: Arc<[String]>,
    score_fn: Arc<ScoreFn>,
}

impl std::fmt::Debug for FnEvaluatorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnEvaluatorFactory")
            .field("expression", &self.expression)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl FnEvaluatorFactory {
    /// Creates a factory for `expression` declaring `inputs`, scored by `f`.
    pub fn new<I, S>(
        expression: impl Into<String>,
        inputs: I,
        f: impl Fn(&Bindings) -> f64 + Send + Sync + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expression: expression.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            score_fn: Arc::new(f),
        }
    }
}

impl EvaluatorFactory for FnEvaluatorFactory {
    fn create(&self) -> Box<dyn Evaluator> {
        Box::new(FnEvaluator {
            expression: self.expression.clone(),
            inputs: Arc::clone(&self.inputs),
            bound: Bindings::new(),
            score_fn: Arc::clone(&self.score_fn),
        })
    }
}
