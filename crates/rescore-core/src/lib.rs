//! Core traits, types, and error types for the rescore global-phase pipeline.
//!
//! This crate defines the shared vocabulary used across the rescore workspace:
//! the evaluator seam to the tensor expression compiler ([`Evaluator`],
//! [`EvaluatorFactory`]), boundary types shared with first-phase ranking
//! ([`Hit`], [`RankedResult`], [`Query`]), the minimal tensor value model
//! ([`TensorValue`], [`TensorType`]), and the unified error type
//! ([`RankError`]).
//!
//! It has minimal external dependencies and is intended to be depended on by
//! every other crate in the workspace.

pub mod error;
pub mod tensor;
pub mod traits;
pub mod types;

pub use error::{RankError, RankResult};
pub use tensor::{TensorType, TensorValue};
pub use traits::{Bindings, Evaluator, EvaluatorFactory, FnEvaluator, FnEvaluatorFactory};
pub use types::{Hit, Query, RankedResult};
