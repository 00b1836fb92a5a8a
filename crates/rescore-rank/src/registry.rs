//! The expression-compiler boundary.
//!
//! The tensor expression compiler registers each compiled expression here:
//! an evaluator factory plus the query features, match features, and other
//! registered functions the expression consumes. Resolving an expression
//! transitively inlines user-defined function references, unioning the
//! feature sets of the whole call closure; malformed references (unknown
//! names, cycles) are configuration errors caught at setup-build time, never
//! per-query.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use rescore_core::error::{RankError, RankResult};
use rescore_core::traits::EvaluatorFactory;

use crate::eval::FeatureAlias;

/// One compiled expression with the metadata resolution needs.
#[derive(Clone)]
pub struct RegisteredExpression {
    factory: Arc<dyn EvaluatorFactory>,
    from_query: Vec<String>,
    from_hit: Vec<FeatureAlias>,
    calls: Vec<String>,
}

impl fmt::Debug for RegisteredExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredExpression")
            .field("from_query", &self.from_query)
            .field("from_hit", &self.from_hit)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl RegisteredExpression {
    /// Wraps a compiled factory with empty metadata.
    #[must_use]
    pub fn new(factory: Arc<dyn EvaluatorFactory>) -> Self {
        Self {
            factory,
            from_query: Vec::new(),
            from_hit: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Declares a consumed query feature.
    #[must_use]
    pub fn with_query_feature(mut self, name: impl Into<String>) -> Self {
        self.from_query.push(name.into());
        self
    }

    /// Declares a consumed per-hit match feature.
    #[must_use]
    pub fn with_match_feature(mut self, name: impl Into<String>) -> Self {
        self.from_hit.push(FeatureAlias::direct(name));
        self
    }

    /// Declares a consumed per-hit match feature bound under another name.
    #[must_use]
    pub fn with_match_feature_as(
        mut self,
        source: impl Into<String>,
        bind_as: impl Into<String>,
    ) -> Self {
        self.from_hit.push(FeatureAlias::renamed(source, bind_as));
        self
    }

    /// Declares a reference to another registered function.
    #[must_use]
    pub fn with_call(mut self, name: impl Into<String>) -> Self {
        self.calls.push(name.into());
        self
    }
}

/// An expression resolved through its whole call closure.
#[derive(Clone)]
pub struct ResolvedExpression {
    /// Factory of the root expression (the compiler inlines called bodies).
    pub factory: Arc<dyn EvaluatorFactory>,
    /// Query features of the closure, deduplicated, in first-reference order.
    pub from_query: Vec<String>,
    /// Per-hit features of the closure, deduplicated, in first-reference order.
    pub from_hit: Vec<FeatureAlias>,
}

impl fmt::Debug for ResolvedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedExpression")
            .field("from_query", &self.from_query)
            .field("from_hit", &self.from_hit)
            .finish_non_exhaustive()
    }
}

/// Registry of compiled expressions for one rank profile.
#[derive(Debug, Default)]
pub struct ExpressionRegistry {
    expressions: HashMap<String, RegisteredExpression>,
}

impl ExpressionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `expression` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, expression: RegisteredExpression) {
        self.expressions.insert(name.into(), expression);
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.expressions.contains_key(name)
    }

    /// Resolves `name` through its call closure.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::UnknownFunction`] for a reference to an
    /// unregistered name and [`RankError::CyclicFunction`] when the call
    /// graph contains a cycle reachable from `name`.
    pub fn resolve(&self, name: &str) -> RankResult<ResolvedExpression> {
        let root = self
            .expressions
            .get(name)
            .ok_or_else(|| RankError::UnknownFunction {
                name: name.to_string(),
                referrer: name.to_string(),
            })?;

        let mut from_query = Vec::new();
        let mut from_hit = Vec::new();
        let mut seen_query = HashSet::new();
        let mut seen_hit = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        self.collect(
            name,
            &mut from_query,
            &mut seen_query,
            &mut from_hit,
            &mut seen_hit,
            &mut visited,
            &mut stack,
        )?;

        Ok(ResolvedExpression {
            factory: Arc::clone(&root.factory),
            from_query,
            from_hit,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn collect(
        &self,
        name: &str,
        from_query: &mut Vec<String>,
        seen_query: &mut HashSet<String>,
        from_hit: &mut Vec<FeatureAlias>,
        seen_hit: &mut HashSet<(String, String)>,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> RankResult<()> {
        if stack.iter().any(|frame| frame == name) {
            let mut path: Vec<&str> = stack.iter().map(String::as_str).collect();
            path.push(name);
            return Err(RankError::CyclicFunction {
                path: path.join(" -> "),
            });
        }
        if !visited.insert(name.to_string()) {
            // Diamond reference: already folded into the closure.
            return Ok(());
        }

        let expression = self
            .expressions
            .get(name)
            .ok_or_else(|| RankError::UnknownFunction {
                name: name.to_string(),
                referrer: stack.last().cloned().unwrap_or_else(|| name.to_string()),
            })?;

        for feature in &expression.from_query {
            if seen_query.insert(feature.clone()) {
                from_query.push(feature.clone());
            }
        }
        for alias in &expression.from_hit {
            let key = (alias.source.clone(), alias.bind_as.clone());
            if seen_hit.insert(key) {
                from_hit.push(alias.clone());
            }
        }

        stack.push(name.to_string());
        for call in &expression.calls {
            self.collect(
                call, from_query, seen_query, from_hit, seen_hit, visited, stack,
            )?;
        }
        stack.pop();
        Ok(())
    }
}
