//! Per-profile global-phase setup, built once and shared across queries.
//!
//! [`GlobalPhaseSetup::build`] turns a declarative [`RankProfile`] plus the
//! compiler's [`ExpressionRegistry`] into the immutable object the per-query
//! ranker consumes: resolved binding plans, the match-feature hide set, and
//! fully materialized query-feature defaults. All configuration errors
//! surface here, at profile-load time — the per-query path never re-validates.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rescore_core::error::{RankError, RankResult};
use rescore_core::tensor::{TensorType, TensorValue};
use rescore_core::traits::FnEvaluatorFactory;

use crate::eval::{EvalSpec, FeatureAlias};
use crate::normalize::NormalizerSetup;
use crate::profile::{GlobalPhaseProfile, RankProfile};
use crate::registry::{ExpressionRegistry, ResolvedExpression};

/// Resolved, immutable per-rank-profile configuration of the global phase.
///
/// Built once per profile and shared by `Arc` across all concurrent queries;
/// per-query mutable state (evaluators, normalizers, the range adjuster) is
/// always freshly allocated by the ranker.
#[derive(Debug, Clone)]
pub struct GlobalPhaseSetup {
    /// Number of top hits to rescore.
    pub rerank_count: usize,
    /// Normalizer configurations, in evaluation order.
    pub normalizers: Vec<NormalizerSetup>,
    /// Match features fetched only for the global phase, scrubbed on exit.
    pub match_features_to_hide: BTreeSet<String>,
    /// Binding plan of the main global-phase expression, with every
    /// normalizer output appended in declaration order.
    pub eval_spec: EvalSpec,
    /// Materialized defaults for every query feature in the closure.
    pub default_values: HashMap<String, TensorValue>,
}

impl GlobalPhaseSetup {
    /// Builds the setup for `profile`, or `None` when the profile declares no
    /// global phase (the common case).
    ///
    /// # Errors
    ///
    /// Returns [`RankError::InvalidProfile`] for an inconsistent profile,
    /// [`RankError::UnknownFunction`] / [`RankError::CyclicFunction`] for
    /// malformed expression references, and [`RankError::TypeMismatch`] when
    /// a declared default conflicts with the feature's declared type.
    pub fn build(
        profile: &RankProfile,
        registry: &ExpressionRegistry,
    ) -> RankResult<Option<Arc<Self>>> {
        let Some(global) = &profile.global_phase else {
            return Ok(None);
        };
        global.validate()?;

        let main = registry.resolve(&global.expression)?;

        let normalizer_names: HashSet<&str> = global
            .normalizers
            .iter()
            .map(|n| n.name.as_str())
            .collect();

        // Resolve every normalizer input; plain match features pass through
        // an identity expression.
        let mut normalizers = Vec::with_capacity(global.normalizers.len());
        let mut resolved_inputs = Vec::with_capacity(global.normalizers.len());
        for declaration in &global.normalizers {
            let resolved = if registry.contains(&declaration.input) {
                registry.resolve(&declaration.input)?
            } else {
                identity_over(&declaration.input)
            };
            normalizers.push(NormalizerSetup {
                name: declaration.name.clone(),
                kind: declaration.method,
                source: declaration.input.clone(),
                input: EvalSpec {
                    factory: Arc::clone(&resolved.factory),
                    from_query: resolved.from_query.clone(),
                    from_hit: resolved.from_hit.clone(),
                },
            });
            resolved_inputs.push(resolved);
        }

        // Closure of match features actually fetched from hits: everything
        // the main expression and the normalizer inputs read, minus names
        // that are normalizer outputs (computed, not fetched).
        let mut fetched = BTreeSet::new();
        for alias in main
            .from_hit
            .iter()
            .chain(resolved_inputs.iter().flat_map(|r| r.from_hit.iter()))
        {
            if !normalizer_names.contains(alias.source.as_str()) {
                fetched.insert(alias.source.clone());
            }
        }

        let match_features_to_hide: BTreeSet<String> = fetched
            .difference(&global.visible_match_features)
            .cloned()
            .collect();

        // Query-feature closure and materialized defaults.
        let mut default_values = HashMap::new();
        for name in main
            .from_query
            .iter()
            .chain(resolved_inputs.iter().flat_map(|r| r.from_query.iter()))
        {
            if default_values.contains_key(name) {
                continue;
            }
            default_values.insert(name.clone(), resolve_default(global, name)?);
        }

        // Implicit wiring: every normalizer output is appended to the main
        // expression's binding plan, in declaration order.
        let mut from_hit = main.from_hit.clone();
        let explicit: HashSet<&str> = from_hit.iter().map(|a| a.source.as_str()).collect();
        let appended: Vec<FeatureAlias> = global
            .normalizers
            .iter()
            .filter(|n| !explicit.contains(n.name.as_str()))
            .map(|n| FeatureAlias::direct(&n.name))
            .collect();
        from_hit.extend(appended);

        Ok(Some(Arc::new(Self {
            rerank_count: global.rerank_count,
            normalizers,
            match_features_to_hide,
            eval_spec: EvalSpec {
                factory: main.factory,
                from_query: main.from_query,
                from_hit,
            },
            default_values,
        })))
    }
}

/// Identity pass-through over a single per-hit feature, used when a
/// normalizer input names no registered expression.
fn identity_over(feature: &str) -> ResolvedExpression {
    let bound_name = feature.to_string();
    ResolvedExpression {
        factory: Arc::new(FnEvaluatorFactory::new(
            feature,
            [feature],
            move |bindings| bindings.scalar(&bound_name).unwrap_or(0.0),
        )),
        from_query: Vec::new(),
        from_hit: vec![FeatureAlias::direct(feature)],
    }
}

/// Materializes the default for one query feature: the declared literal
/// checked against the declared type, or the type-appropriate zero.
fn resolve_default(global: &GlobalPhaseProfile, name: &str) -> RankResult<TensorValue> {
    let declared_type = global.query_feature_types.get(name);
    match global.query_feature_defaults.get(name) {
        Some(default) => {
            if let Some(ty) = declared_type {
                if !default.matches(ty) {
                    return Err(RankError::TypeMismatch {
                        feature: name.to_string(),
                        expected: ty.to_string(),
                        found: default.tensor_type().to_string(),
                    });
                }
            }
            Ok(default.clone())
        }
        None => Ok(TensorValue::zero_of(
            declared_type.unwrap_or(&TensorType::Scalar),
        )),
    }
}
