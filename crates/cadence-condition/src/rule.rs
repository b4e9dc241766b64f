//! The rule plugin interface.
//!
//! A [`Rule`] is a leaf-level policy check ("is this partition missing?",
//! "did a parent update?"). The engine wraps each rule in a rule leaf of a
//! [`Condition`] tree; the rule's class name and description are the inputs
//! to the leaf's structural identity.
//!
//! [`Condition`]: crate::Condition

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::EvaluationError;
use crate::context::EvaluationContext;
use crate::result::EvaluationInfo;

/// How a rule's result participates in the legacy policy tree built by
/// [`Condition::from_rules`].
///
/// [`Condition::from_rules`]: crate::Condition::from_rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    /// True partitions are requested.
    Materialize,
    /// True partitions are held back.
    Skip,
    /// True partitions are dropped for this tick (deprecated).
    Discard,
}

/// A leaf-level policy check.
///
/// Implementations must be deterministic in `class_name` and `description`:
/// both feed the leaf's `unique_id`, which keys per-node state in the cursor.
/// Two different rules returning the same pair share that state.
pub trait Rule: Debug + Send + Sync {
    /// Stable identity of the rule implementation.
    fn class_name(&self) -> &'static str;

    /// Human-readable description, also part of the leaf identity.
    fn description(&self) -> String;

    /// Role of this rule in the legacy policy tree.
    fn decision_type(&self) -> DecisionType {
        DecisionType::Materialize
    }

    /// Evaluate the rule for the context's asset, restricted to the context's
    /// candidate subset.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] if a query fails or the rule cannot reach
    /// a decision.
    fn evaluate_for_asset(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError>;
}
