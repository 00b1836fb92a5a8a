//! Per-query global-phase orchestration.
//!
//! [`rerank_hits`] composes the pieces built once per profile
//! ([`GlobalPhaseSetup`]) with per-query state created fresh on every call:
//! evaluators, normalizers, and the range adjuster. The sequence per query:
//!
//! ```text
//! resolve query features → run normalizer chain over top-K
//!   → evaluate main expression per hit → commit new scores
//!   → reconcile untouched remainder → re-sort → scrub hidden features
//! ```
//!
//! New scores are computed into a buffer and committed only after every hit
//! in the rerank window evaluated successfully, so an evaluation failure
//! leaves the result exactly as it arrived and surfaces as an error — never
//! as a silently partial rerank.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rescore_core::error::RankResult;
use rescore_core::tensor::TensorValue;
use rescore_core::types::{Hit, Query, RankedResult};

use crate::range::RangeAdjuster;
use crate::setup::GlobalPhaseSetup;

/// Diagnostics from one global-phase invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPhaseMetrics {
    /// Number of hits rescored by the main expression.
    pub reranked: usize,
    /// Whether the untouched remainder was range-adjusted.
    pub rescaled: bool,
    /// Total match-feature entries removed by scrubbing.
    pub scrubbed_features: usize,
}

/// Applies the global phase to `result` in place.
///
/// No-op when `setup` is `None` (profile without a global phase) or the
/// result is empty. Otherwise rescores the top `rerank_count` hits,
/// reconciles the remainder, re-sorts descending, and scrubs hidden match
/// features.
///
/// # Errors
///
/// Returns [`rescore_core::RankError::MissingQueryFeature`] when a referenced
/// query feature has neither a bound value nor a default, or
/// [`rescore_core::RankError::UnboundInput`] when a hit lacks a match feature
/// the expression requires. On error the result is unchanged.
#[instrument(
    name = "rescore::global_phase",
    skip_all,
    fields(
        hits = result.len(),
        rerank_count = setup.map_or(0, |s| s.rerank_count),
        normalizers = setup.map_or(0, |s| s.normalizers.len()),
    )
)]
pub fn rerank_hits(
    setup: Option<&GlobalPhaseSetup>,
    query: &Query,
    result: &mut RankedResult,
) -> RankResult<GlobalPhaseMetrics> {
    let Some(setup) = setup else {
        return Ok(GlobalPhaseMetrics::default());
    };
    if result.is_empty() {
        return Ok(GlobalPhaseMetrics::default());
    }

    let query_values = resolve_query_features(setup, query)?;
    let window = setup.rerank_count.min(result.len());
    let rerank_slice = &result.hits[..window];

    // Normalizer chain, in declaration order. Each normalizer sees the
    // outputs of those declared before it.
    let mut normalizer_outputs: Vec<(String, Vec<f64>)> =
        Vec::with_capacity(setup.normalizers.len());
    for normalizer_setup in &setup.normalizers {
        let mut normalizer = normalizer_setup.instantiate(window);
        for (slot, hit) in rerank_slice.iter().enumerate() {
            let raw = normalizer_setup.input.evaluate_hit(&query_values, |name| {
                lookup_feature(hit, name, &normalizer_outputs, slot)
            })?;
            normalizer.add_input(raw);
        }
        normalizer.normalize();
        let outputs = (0..window).map(|slot| normalizer.output(slot)).collect();
        normalizer_outputs.push((normalizer_setup.name.clone(), outputs));
    }

    // Main expression over the rerank window, buffered before commit.
    let mut new_scores = Vec::with_capacity(window);
    for (slot, hit) in rerank_slice.iter().enumerate() {
        let score = setup.eval_spec.evaluate_hit(&query_values, |name| {
            lookup_feature(hit, name, &normalizer_outputs, slot)
        })?;
        new_scores.push(score);
    }

    let mut adjuster = RangeAdjuster::new();
    for (hit, &new_score) in result.hits[..window].iter_mut().zip(&new_scores) {
        adjuster.with_initial_score(hit.relevance);
        adjuster.with_final_score(new_score);
        hit.relevance = new_score;
    }

    let rescaled = window < result.len() && adjuster.rescale_needed();
    if rescaled {
        let scale = adjuster.scale();
        let bias = adjuster.bias();
        debug!(
            target: "rescore.global",
            scale,
            bias,
            untouched = result.len() - window,
            "reconciling untouched hits into the rescored range"
        );
        for hit in &mut result.hits[window..] {
            hit.relevance = adjuster.adjust(hit.relevance);
        }
    }

    result.sort_by_relevance();

    let scrubbed_features = scrub_hidden_features(result, &setup.match_features_to_hide);

    let metrics = GlobalPhaseMetrics {
        reranked: window,
        rescaled,
        scrubbed_features,
    };
    debug!(
        target: "rescore.global",
        reranked = metrics.reranked,
        rescaled = metrics.rescaled,
        scrubbed = metrics.scrubbed_features,
        "global phase complete"
    );
    Ok(metrics)
}

/// Resolves every query feature referenced by the setup, once per query:
/// the query's bound value wins, else the setup's materialized default.
fn resolve_query_features(
    setup: &GlobalPhaseSetup,
    query: &Query,
) -> RankResult<HashMap<String, TensorValue>> {
    let mut resolved = HashMap::new();
    let names = setup
        .eval_spec
        .from_query
        .iter()
        .chain(setup.normalizers.iter().flat_map(|n| n.input.from_query.iter()));
    for name in names {
        if resolved.contains_key(name) {
            continue;
        }
        let value = match query.ranking_feature(name) {
            Some(value) => value.clone(),
            None => setup
                .default_values
                .get(name)
                .cloned()
                .ok_or_else(|| rescore_core::RankError::MissingQueryFeature {
                    name: name.clone(),
                })?,
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// Per-hit feature lookup: the hit's bundle first, then the published output
/// of an already-computed normalizer at this hit's slot.
fn lookup_feature(
    hit: &Hit,
    name: &str,
    normalizer_outputs: &[(String, Vec<f64>)],
    slot: usize,
) -> Option<TensorValue> {
    if let Some(value) = hit.match_feature(name) {
        return Some(value.clone());
    }
    normalizer_outputs
        .iter()
        .find(|(published, _)| published == name)
        .map(|(_, outputs)| TensorValue::Scalar(outputs[slot]))
}

/// Removes every hidden match feature from every hit, dropping a bundle
/// entirely when scrubbing leaves it empty. Idempotent: reapplying to an
/// already-scrubbed result removes nothing.
pub fn scrub_hidden_features(result: &mut RankedResult, hidden: &BTreeSet<String>) -> usize {
    if hidden.is_empty() {
        return 0;
    }
    let mut scrubbed = 0;
    for hit in &mut result.hits {
        let Some(bundle) = hit.match_features.as_mut() else {
            continue;
        };
        for name in hidden {
            if bundle.remove(name).is_some() {
                scrubbed += 1;
            }
        }
        if bundle.is_empty() {
            hit.match_features = None;
        }
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use rescore_core::error::RankError;
    use rescore_core::traits::FnEvaluatorFactory;

    use crate::normalize::NormalizerKind;
    use crate::profile::{GlobalPhaseProfile, NormalizerProfile, RankProfile};
    use crate::registry::{ExpressionRegistry, RegisteredExpression};

    use super::*;

    // ─── Fixtures ───────────────────────────────────────────────────────

    fn constant_expr(name: &str, value: f64) -> RegisteredExpression {
        RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
            name,
            Vec::<String>::new(),
            move |_| value,
        )))
    }

    fn global_phase(expression: &str, rerank_count: usize) -> GlobalPhaseProfile {
        GlobalPhaseProfile {
            expression: expression.into(),
            rerank_count,
            normalizers: Vec::new(),
            visible_match_features: BTreeSet::new(),
            query_feature_types: std::collections::HashMap::new(),
            query_feature_defaults: std::collections::HashMap::new(),
        }
    }

    fn build_setup(
        global: GlobalPhaseProfile,
        registry: &ExpressionRegistry,
    ) -> Arc<GlobalPhaseSetup> {
        let profile = RankProfile {
            name: "test".into(),
            global_phase: Some(global),
        };
        GlobalPhaseSetup::build(&profile, registry).unwrap().unwrap()
    }

    fn descending_result(scores: &[(&str, f64)]) -> RankedResult {
        RankedResult::new(scores.iter().map(|(id, s)| Hit::new(*id, *s)).collect())
    }

    fn relevances(result: &RankedResult) -> Vec<(String, f64)> {
        result
            .hits
            .iter()
            .map(|h| (h.id.clone(), h.relevance))
            .collect()
    }

    // ─── No-op paths ────────────────────────────────────────────────────

    #[test]
    fn absent_setup_is_a_noop() {
        let mut result = descending_result(&[("a", 2.0), ("b", 1.0)]);
        let before = result.clone();

        let metrics = rerank_hits(None, &Query::new(), &mut result).unwrap();
        assert_eq!(metrics, GlobalPhaseMetrics::default());
        assert_eq!(result, before);
    }

    #[test]
    fn empty_result_is_a_noop() {
        let mut registry = ExpressionRegistry::new();
        registry.register("main", constant_expr("main", 1.0));
        let setup = build_setup(global_phase("main", 10), &registry);

        let mut result = RankedResult::default();
        let metrics = rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();
        assert_eq!(metrics, GlobalPhaseMetrics::default());
        assert!(result.is_empty());
    }

    #[test]
    fn zero_rerank_count_still_scrubs() {
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["secret"],
                |b| b.scalar("secret").unwrap_or(0.0),
            )))
            .with_match_feature("secret"),
        );
        let setup = build_setup(global_phase("main", 0), &registry);

        let mut result = RankedResult::new(vec![
            Hit::new("a", 2.0).with_match_feature("secret", 9.0),
            Hit::new("b", 1.0).with_match_feature("secret", 8.0),
        ]);
        let metrics = rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        assert_eq!(metrics.reranked, 0);
        assert!(!metrics.rescaled);
        assert_eq!(metrics.scrubbed_features, 2);
        // Scores untouched, hidden features still gone.
        assert_eq!(
            relevances(&result),
            [("a".to_string(), 2.0), ("b".to_string(), 1.0)]
        );
        assert!(result.hits.iter().all(|h| h.match_features.is_none()));
    }

    // ─── Rescoring and reconciliation ───────────────────────────────────

    #[test]
    fn partial_rerank_reconciles_the_tail() {
        let mut registry = ExpressionRegistry::new();
        registry.register("main", constant_expr("main", 3.0));
        let setup = build_setup(global_phase("main", 2), &registry);

        let mut result =
            descending_result(&[("d", 6.0), ("c", 5.0), ("b", 4.0), ("a", 3.0)]);
        let metrics = rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        assert_eq!(metrics.reranked, 2);
        assert!(metrics.rescaled);
        // Rescored hits keep their 3.0; the tail compacts below them.
        assert_eq!(
            relevances(&result),
            [
                ("d".to_string(), 3.0),
                ("c".to_string(), 3.0),
                ("b".to_string(), 2.0),
                ("a".to_string(), 1.0),
            ]
        );
    }

    #[test]
    fn tail_is_untouched_when_order_survives() {
        // Rescoring lifts the top hits; the tail is already below them.
        let mut registry = ExpressionRegistry::new();
        registry.register("main", constant_expr("main", 100.0));
        let setup = build_setup(global_phase("main", 2), &registry);

        let mut result = descending_result(&[("c", 5.0), ("b", 4.0), ("a", 3.0)]);
        let metrics = rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        assert!(!metrics.rescaled);
        let scores = relevances(&result);
        assert_eq!(scores[2], ("a".to_string(), 3.0));
    }

    #[test]
    fn full_rerank_resorts_by_new_scores() {
        // Score each hit by its "boost" match feature, inverting the order.
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["boost"],
                |b| b.scalar("boost").unwrap_or(0.0),
            )))
            .with_match_feature("boost"),
        );
        let mut global = global_phase("main", 10);
        global.visible_match_features.insert("boost".into());
        let setup = build_setup(global, &registry);

        let mut result = RankedResult::new(vec![
            Hit::new("first", 3.0).with_match_feature("boost", 1.0),
            Hit::new("second", 2.0).with_match_feature("boost", 2.0),
            Hit::new("third", 1.0).with_match_feature("boost", 3.0),
        ]);
        rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["third", "second", "first"]);
    }

    // ─── Query features ─────────────────────────────────────────────────

    #[test]
    fn bound_query_feature_wins_over_default() {
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["query(w)"],
                |b| b.scalar("query(w)").unwrap_or(0.0),
            )))
            .with_query_feature("query(w)"),
        );
        let mut global = global_phase("main", 10);
        global
            .query_feature_defaults
            .insert("query(w)".into(), TensorValue::Scalar(1.0));
        let setup = build_setup(global, &registry);

        let mut result = descending_result(&[("a", 0.5)]);
        let query = Query::new().with_feature("query(w)", 7.0);
        rerank_hits(Some(&setup), &query, &mut result).unwrap();
        assert!((result.hits[0].relevance - 7.0).abs() < 1e-12);

        // Without a binding the default applies.
        let mut result = descending_result(&[("a", 0.5)]);
        rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();
        assert!((result.hits[0].relevance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_query_feature_without_default_is_an_error() {
        // Hand-built setup bypassing the builder's closure guarantee.
        let setup = GlobalPhaseSetup {
            rerank_count: 10,
            normalizers: Vec::new(),
            match_features_to_hide: BTreeSet::new(),
            eval_spec: crate::eval::EvalSpec {
                factory: Arc::new(FnEvaluatorFactory::new("main", ["query(w)"], |b| {
                    b.scalar("query(w)").unwrap_or(0.0)
                })),
                from_query: vec!["query(w)".into()],
                from_hit: Vec::new(),
            },
            default_values: std::collections::HashMap::new(),
        };

        let mut result = descending_result(&[("a", 1.0)]);
        let err = rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap_err();
        assert!(matches!(err, RankError::MissingQueryFeature { name } if name == "query(w)"));
        assert!((result.hits[0].relevance - 1.0).abs() < 1e-12);
    }

    // ─── Normalizers ────────────────────────────────────────────────────

    #[test]
    fn normalizer_output_feeds_main_expression_implicitly() {
        // The main expression consumes "bm25_norm" without the registry
        // listing it as a match feature: implicit wiring supplies it.
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["bm25_norm"],
                |b| b.scalar("bm25_norm").unwrap_or(0.0),
            ))),
        );
        let mut global = global_phase("main", 10);
        global.normalizers.push(NormalizerProfile {
            name: "bm25_norm".into(),
            input: "bm25".into(),
            method: NormalizerKind::Linear,
        });
        let setup = build_setup(global, &registry);

        let mut result = RankedResult::new(vec![
            Hit::new("low", 3.0).with_match_feature("bm25", -5.0),
            Hit::new("mid", 2.0).with_match_feature("bm25", -3.0),
            Hit::new("high", 1.0).with_match_feature("bm25", -1.0),
        ]);
        rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        // Min-max over [-5, -3, -1]: low → 0.0, mid → 0.5, high → 1.0.
        let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["high", "mid", "low"]);
        assert!((result.hits[0].relevance - 1.0).abs() < 1e-12);
        assert!((result.hits[1].relevance - 0.5).abs() < 1e-12);
        assert!((result.hits[2].relevance - 0.0).abs() < 1e-12);
    }

    #[test]
    fn later_normalizer_consumes_earlier_output() {
        // Chain: linear over bm25, then reciprocal-rank over the linear output.
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["chained"],
                |b| b.scalar("chained").unwrap_or(0.0),
            ))),
        );
        let mut global = global_phase("main", 10);
        global.normalizers.push(NormalizerProfile {
            name: "linear_norm".into(),
            input: "bm25".into(),
            method: NormalizerKind::Linear,
        });
        global.normalizers.push(NormalizerProfile {
            name: "chained".into(),
            input: "linear_norm".into(),
            method: NormalizerKind::ReciprocalRank { k: 0.0 },
        });
        let setup = build_setup(global, &registry);

        let mut result = RankedResult::new(vec![
            Hit::new("best", 2.0).with_match_feature("bm25", 10.0),
            Hit::new("worst", 1.0).with_match_feature("bm25", 0.0),
        ]);
        rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        // linear_norm: best → 1.0, worst → 0.0; reciprocal-rank over that:
        // best → 1/1, worst → 1/2.
        assert!((result.hits[0].relevance - 1.0).abs() < 1e-12);
        assert!((result.hits[1].relevance - 0.5).abs() < 1e-12);
    }

    // ─── Match-feature scrubbing ────────────────────────────────────────

    #[test]
    fn hidden_feature_removes_bundle_entirely() {
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["private"],
                |b| b.scalar("private").unwrap_or(0.0),
            )))
            .with_match_feature("private"),
        );
        let setup = build_setup(global_phase("main", 10), &registry);

        let mut result =
            RankedResult::new(vec![Hit::new("a", 1.0).with_match_feature("private", 5.0)]);
        rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        // The only feature was private: the whole bundle is gone.
        assert!(result.hits[0].match_features.is_none());
    }

    #[test]
    fn public_feature_survives_scrubbing() {
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["public", "private"],
                |b| b.scalar("public").unwrap_or(0.0) + b.scalar("private").unwrap_or(0.0),
            )))
            .with_match_feature("public")
            .with_match_feature("private"),
        );
        let mut global = global_phase("main", 10);
        global.visible_match_features.insert("public".into());
        let setup = build_setup(global, &registry);

        let mut result = RankedResult::new(vec![Hit::new("a", 1.0)
            .with_match_feature("public", 2.0)
            .with_match_feature("private", 3.0)]);
        rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap();

        let hit = &result.hits[0];
        assert_eq!(hit.match_feature("public"), Some(&TensorValue::Scalar(2.0)));
        assert_eq!(hit.match_feature("private"), None);
    }

    #[test]
    fn scrubbing_is_idempotent() {
        let hidden = BTreeSet::from(["secret".to_string()]);
        let mut result = RankedResult::new(vec![
            Hit::new("a", 1.0).with_match_feature("secret", 5.0),
            Hit::new("b", 0.5)
                .with_match_feature("secret", 4.0)
                .with_match_feature("public", 1.0),
        ]);

        assert_eq!(scrub_hidden_features(&mut result, &hidden), 2);
        let after_first = result.clone();

        assert_eq!(scrub_hidden_features(&mut result, &hidden), 0);
        assert_eq!(result, after_first);
    }

    // ─── Failure isolation ──────────────────────────────────────────────

    #[test]
    fn evaluation_failure_leaves_all_scores_untouched() {
        let mut registry = ExpressionRegistry::new();
        registry.register(
            "main",
            RegisteredExpression::new(Arc::new(FnEvaluatorFactory::new(
                "main",
                ["bm25"],
                |b| b.scalar("bm25").unwrap_or(0.0),
            )))
            .with_match_feature("bm25"),
        );
        let setup = build_setup(global_phase("main", 10), &registry);

        // The second hit lacks the required feature.
        let mut result = RankedResult::new(vec![
            Hit::new("ok", 2.0).with_match_feature("bm25", 1.0),
            Hit::new("broken", 1.0),
        ]);
        let err = rerank_hits(Some(&setup), &Query::new(), &mut result).unwrap_err();

        assert!(matches!(err, RankError::UnboundInput { ref name, .. } if name == "bm25"));
        assert_eq!(
            relevances(&result),
            [("ok".to_string(), 2.0), ("broken".to_string(), 1.0)]
        );
    }
}
