//! Global-phase rescoring for the rescore search pipeline.
//!
//! After an inexpensive first-phase ranking has ordered all matched
//! documents, this crate evaluates a second, more expensive scoring function
//! over the top-K candidates only, and merges the outcome back with the
//! untouched remainder without breaking relevance order. It provides:
//!
//! - **Evaluation specs**: binding plans pairing compiler-produced evaluator
//!   factories with query-feature and per-hit feature inputs.
//! - **Normalizers**: batch rank-normalizing transforms (`linear`,
//!   `reciprocal-rank{k}`) whose outputs feed later normalizers and the main
//!   expression.
//! - **Range adjustment**: an order-preserving affine map reconciling the
//!   untouched tail into the rescored score space.
//! - **Setup construction**: per-profile resolution of expressions, feature
//!   closures, hidden match features, and typed query-feature defaults.
//! - **Orchestration**: the per-query [`rerank_hits`] entry point.
//!
//! Setup objects are built once per rank profile and shared immutably across
//! concurrent queries; all per-query state is freshly allocated per call.

pub mod eval;
pub mod normalize;
pub mod profile;
pub mod range;
pub mod ranker;
pub mod registry;
pub mod setup;
pub mod tracing_targets;

pub use eval::{EvalSpec, FeatureAlias};
pub use normalize::{
    DEFAULT_RECIPROCAL_RANK_K, LinearNormalizer, Normalizer, NormalizerKind, NormalizerSetup,
    ReciprocalRankNormalizer,
};
pub use profile::{DEFAULT_RERANK_COUNT, GlobalPhaseProfile, NormalizerProfile, RankProfile};
pub use range::RangeAdjuster;
pub use ranker::{GlobalPhaseMetrics, rerank_hits, scrub_hidden_features};
pub use registry::{ExpressionRegistry, RegisteredExpression, ResolvedExpression};
pub use setup::GlobalPhaseSetup;
