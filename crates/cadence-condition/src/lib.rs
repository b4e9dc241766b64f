//! Condition trees, evaluation context, and evaluation results for the
//! Cadence automation engine.
//!
//! Once per tick, each automated asset's [`Condition`] tree is evaluated
//! against the partitions that currently exist, producing an
//! [`EvaluationInfo`] that the cursor carries into the next tick.
//!
//! # Modules
//!
//! - [`condition`] -- The immutable [`Condition`] tree (rule leaves and
//!   all-of / any-of / not combinators), its structural identity, and the
//!   flattening `and` / `or` combinators.
//! - [`rule`] -- The [`Rule`] plugin interface evaluated at leaves.
//! - [`rules`] -- Built-in rules (missing, parent updated, parent missing).
//! - [`query`] -- [`AssetGraph`] and [`InstanceQuery`], the read-only view of
//!   the asset graph and instance, plus [`InMemoryInstance`].
//! - [`context`] -- Per-asset [`RootContext`] and per-node
//!   [`EvaluationContext`].
//! - [`result`] -- [`EvaluationResult`], [`EvaluationInfo`], and per-node
//!   extra state.
//!
//! # Evaluation
//!
//! ```text
//! RootContext::new(asset, condition, query, previous info, same-tick results)
//!     └── condition.evaluate(root.context())       candidate = all partitions
//!           ├── And: child i sees candidate ∩ true(0..i)
//!           ├── Or:  every child sees the candidate
//!           └── Not: candidate − true(child)
//! ```
//!
//! Evaluation of one tree is single-threaded and strictly ordered. No node
//! mutates shared state; each call returns a fresh result tree.

pub mod condition;
pub mod context;
pub mod query;
pub mod result;
pub mod rule;
pub mod rules;

// Re-export primary types at crate root.
pub use condition::{Condition, ConditionKind, ConditionSnapshot, and, not, or};
pub use context::{EvaluationContext, RootContext};
pub use query::{AssetGraph, InMemoryInstance, InstanceQuery};
pub use result::{
    CandidateSubset, EvaluationInfo, EvaluationResult, ExtraState, ExtraStateMap,
    FromExtraState, MetadataValue, SubsetWithMetadata,
};
pub use rule::{DecisionType, Rule};

use cadence_types::AssetKey;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while constructing a condition tree.
///
/// These are programming errors in tree construction, not runtime data
/// issues; callers should surface them rather than recover.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    /// A Not node must have exactly one child.
    #[error("a Not condition requires exactly one child, got {count}")]
    NotArity {
        /// The number of children supplied.
        count: usize,
    },
}

/// Errors raised when reading context state that is not available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The asset has no partitions definition.
    #[error("asset {asset_key} is not partitioned")]
    NotPartitioned {
        /// The asset being evaluated.
        asset_key: AssetKey,
    },

    /// The asset is partitioned but this context is not bound to a partition.
    #[error("evaluation context for {asset_key} is not bound to a partition")]
    Unbound {
        /// The asset being evaluated.
        asset_key: AssetKey,
    },
}

/// Errors raised by the query collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The asset is not part of the graph.
    #[error("unknown asset {asset_key}")]
    UnknownAsset {
        /// The requested asset.
        asset_key: AssetKey,
    },

    /// The backing store failed.
    #[error("query backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised while evaluating a condition tree.
///
/// Combinators never swallow these: a child's failure propagates unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// A query against the instance failed.
    #[error("query failed: {source}")]
    Query {
        /// The underlying query error.
        #[from]
        source: QueryError,
    },

    /// Context state was read when unavailable.
    #[error("context error: {source}")]
    Context {
        /// The underlying context error.
        #[from]
        source: ContextError,
    },

    /// A rule failed on its own terms.
    #[error("rule `{rule}` failed: {message}")]
    Rule {
        /// The failing rule's description.
        rule: String,
        /// Description of the failure.
        message: String,
    },
}
