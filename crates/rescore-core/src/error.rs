/// Unified error type covering all failure modes of the global-phase pipeline.
///
/// Every variant includes an actionable message guiding the consumer toward
/// resolution. Configuration errors (`InvalidProfile`, `UnknownFunction`,
/// `CyclicFunction`, `TypeMismatch`) surface at setup-build time and belong to
/// the profile owner; evaluation errors (`UnboundInput`,
/// `MissingQueryFeature`) are fatal for the current query's rerank invocation
/// and propagate rather than degrading to a silently-wrong partial rerank.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    // === Configuration errors (setup-build time) ===
    /// A rank-profile field holds an invalid value.
    #[error("Invalid rank profile: {field} = \"{value}\" — {reason}")]
    InvalidProfile {
        /// Which profile field.
        field: String,
        /// The invalid value.
        value: String,
        /// Why it is invalid.
        reason: String,
    },

    /// An expression references a function that is not registered.
    #[error(
        "Unknown function \"{name}\" referenced by \"{referrer}\". Register it before building the setup."
    )]
    UnknownFunction {
        /// The missing function name.
        name: String,
        /// The expression that referenced it.
        referrer: String,
    },

    /// User-defined functions form a reference cycle.
    #[error("Cyclic function reference: {path}. Break the cycle in the rank profile.")]
    CyclicFunction {
        /// The cycle, rendered as `a -> b -> a`.
        path: String,
    },

    /// A declared default value does not match the feature's declared type.
    #[error(
        "Type mismatch for query feature \"{feature}\": declared {expected}, default value is {found}"
    )]
    TypeMismatch {
        /// The query feature name.
        feature: String,
        /// The declared tensor type.
        expected: String,
        /// The type of the offending value.
        found: String,
    },

    // === Evaluation errors (per-query, fatal for the rerank invocation) ===
    /// A query feature has neither a runtime value nor a declared default.
    #[error(
        "Query feature \"{name}\" has no value and no default. Declare a default in the rank profile or bind it on the query."
    )]
    MissingQueryFeature {
        /// The query feature name.
        name: String,
    },

    /// `evaluate()` was called before every declared input was bound.
    #[error("Input \"{name}\" of expression \"{expression}\" was never bound")]
    UnboundInput {
        /// The expression being evaluated.
        expression: String,
        /// The first declared input found unbound.
        name: String,
    },
}

/// Convenience alias used throughout the rescore crate hierarchy.
pub type RankResult<T> = Result<T, RankError>;
