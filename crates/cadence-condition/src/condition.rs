//! The condition tree.
//!
//! A [`Condition`] is an immutable tree with four node kinds:
//!
//! | Kind | Description | True subset |
//! |------|-------------|-------------|
//! | Rule | wraps one [`Rule`] | whatever the rule returns |
//! | And | "All of" | candidate ∩ every child |
//! | Or | "Any of" | ∪ of every child |
//! | Not | "Not" | candidate − child |
//!
//! Every node carries a [`ConditionSnapshot`] computed at construction. The
//! snapshot's `unique_id` is a content hash: rule leaves hash their rule's
//! class name and description, combinators hash their class name and their
//! children's ids in order. Rebuilding an identical tree in a new process
//! yields identical ids, which is what lets the cursor find a node's state
//! from the previous tick.
//!
//! # Flattening
//!
//! [`and`] and [`or`] extend the left operand when it is already a node of
//! the same kind, so `and(and(a, b), c)` is the same node (and the same id) as
//! `Condition::all_of([a, b, c])`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::context::EvaluationContext;
use crate::result::EvaluationInfo;
use crate::rule::{DecisionType, Rule};
use crate::{ConditionError, EvaluationError};

/// Class name recorded for rule leaves.
pub const RULE_CLASS_NAME: &str = "RuleCondition";
/// Class name recorded for And nodes.
pub const AND_CLASS_NAME: &str = "AndCondition";
/// Class name recorded for Or nodes.
pub const OR_CLASS_NAME: &str = "OrCondition";
/// Class name recorded for Not nodes.
pub const NOT_CLASS_NAME: &str = "NotCondition";

/// Description recorded for And nodes.
pub const AND_DESCRIPTION: &str = "All of";
/// Description recorded for Or nodes.
pub const OR_DESCRIPTION: &str = "Any of";
/// Description recorded for Not nodes.
pub const NOT_DESCRIPTION: &str = "Not";

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Serializable identity of one tree node, independent of the live object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    /// Node kind.
    pub class_name: String,
    /// Node description (the rule description for leaves).
    pub description: String,
    /// Content hash identifying the node across tree reconstructions.
    pub unique_id: String,
}

impl ConditionSnapshot {
    /// Snapshot of a rule leaf, from the rule's class name and description.
    pub fn for_rule(rule_class_name: &str, description: &str) -> Self {
        Self {
            class_name: RULE_CLASS_NAME.to_owned(),
            description: description.to_owned(),
            unique_id: hash_parts([rule_class_name, description]),
        }
    }

    /// Snapshot of a combinator node from its children's ids, in order.
    pub fn for_children<'a, I>(class_name: &'a str, description: &str, child_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            class_name: class_name.to_owned(),
            description: description.to_owned(),
            unique_id: hash_parts(std::iter::once(class_name).chain(child_ids)),
        }
    }

    /// The placeholder snapshot used when no prior tree is known.
    pub fn placeholder() -> Self {
        Self {
            class_name: String::new(),
            description: String::new(),
            unique_id: String::new(),
        }
    }
}

/// Hex SHA-256 of the concatenated parts.
fn hash_parts<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// The four node kinds of a condition tree.
#[derive(Debug, Clone)]
pub enum ConditionKind {
    /// A leaf wrapping one rule.
    Rule(Arc<dyn Rule>),
    /// True where every child is true; children are evaluated in order.
    And(Vec<Condition>),
    /// True where any child is true.
    Or(Vec<Condition>),
    /// True where the single child is false.
    Not(Box<Condition>),
}

/// An immutable node of a condition tree with its cached snapshot.
#[derive(Debug, Clone)]
pub struct Condition {
    kind: ConditionKind,
    snapshot: ConditionSnapshot,
}

impl Condition {
    /// A leaf wrapping `rule`.
    pub fn rule(rule: Arc<dyn Rule>) -> Self {
        let snapshot = ConditionSnapshot::for_rule(rule.class_name(), &rule.description());
        Self {
            kind: ConditionKind::Rule(rule),
            snapshot,
        }
    }

    /// An And node over `children`, in order.
    pub fn all_of<I>(children: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let children: Vec<Self> = children.into_iter().collect();
        let snapshot = combinator_snapshot(AND_CLASS_NAME, AND_DESCRIPTION, &children);
        Self {
            kind: ConditionKind::And(children),
            snapshot,
        }
    }

    /// An Or node over `children`, in order.
    pub fn any_of<I>(children: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let children: Vec<Self> = children.into_iter().collect();
        let snapshot = combinator_snapshot(OR_CLASS_NAME, OR_DESCRIPTION, &children);
        Self {
            kind: ConditionKind::Or(children),
            snapshot,
        }
    }

    /// A Not node over `child`.
    pub fn negate(child: Self) -> Self {
        let snapshot = combinator_snapshot(NOT_CLASS_NAME, NOT_DESCRIPTION, std::slice::from_ref(&child));
        Self {
            kind: ConditionKind::Not(Box::new(child)),
            snapshot,
        }
    }

    /// A Not node from a child list, which must hold exactly one child.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::NotArity`] for any other count.
    pub fn not_of(children: Vec<Self>) -> Result<Self, ConditionError> {
        let count = children.len();
        let mut children = children.into_iter();
        match (children.next(), children.next()) {
            (Some(child), None) => Ok(Self::negate(child)),
            _ => Err(ConditionError::NotArity { count }),
        }
    }

    /// Build the legacy policy tree from a set of rules:
    ///
    /// ```text
    /// And[ Or[materialize..], Not[Or[skip..]], Not[Or[discard..]] ]
    /// ```
    ///
    /// The discard branch is present only when a discard rule is.
    pub fn from_rules(rules: &[Arc<dyn Rule>]) -> Self {
        let branch = |decision: DecisionType| {
            Self::any_of(
                rules
                    .iter()
                    .filter(|rule| rule.decision_type() == decision)
                    .map(|rule| Self::rule(Arc::clone(rule))),
            )
        };
        let mut children = vec![
            branch(DecisionType::Materialize),
            Self::negate(branch(DecisionType::Skip)),
        ];
        if rules
            .iter()
            .any(|rule| rule.decision_type() == DecisionType::Discard)
        {
            children.push(Self::negate(branch(DecisionType::Discard)));
        }
        Self::all_of(children)
    }

    /// The node kind.
    pub const fn kind(&self) -> &ConditionKind {
        &self.kind
    }

    /// The node's snapshot.
    pub const fn snapshot(&self) -> &ConditionSnapshot {
        &self.snapshot
    }

    /// The node's structural identity.
    pub fn unique_id(&self) -> &str {
        &self.snapshot.unique_id
    }

    /// The node's description.
    pub fn description(&self) -> &str {
        &self.snapshot.description
    }

    /// Child nodes, in order. Empty for rule leaves.
    pub fn children(&self) -> &[Self] {
        match &self.kind {
            ConditionKind::Rule(_) => &[],
            ConditionKind::And(children) | ConditionKind::Or(children) => children,
            ConditionKind::Not(child) => std::slice::from_ref(child.as_ref()),
        }
    }

    /// Whether this node has the shape produced by [`Condition::from_rules`]:
    /// an And with two or three children where child 0 is an Or, child 1 is a
    /// Not, and child 2 (if present) is a Not.
    ///
    /// Detection is purely structural so that trees persisted by older
    /// versions remain recognizable.
    pub fn is_legacy(&self) -> bool {
        let ConditionKind::And(children) = &self.kind else {
            return false;
        };
        match children.as_slice() {
            [first, second] => first.is_or() && second.is_not(),
            [first, second, third] => first.is_or() && second.is_not() && third.is_not(),
            _ => false,
        }
    }

    /// The deprecated "discard" branch of a three-child legacy tree.
    pub fn not_discard_condition(&self) -> Option<&Self> {
        if !self.is_legacy() {
            return None;
        }
        match self.children() {
            [_, _, third] => Some(third),
            _ => None,
        }
    }

    const fn is_or(&self) -> bool {
        matches!(self.kind, ConditionKind::Or(_))
    }

    const fn is_not(&self) -> bool {
        matches!(self.kind, ConditionKind::Not(_))
    }

    /// Evaluate this node against `context`.
    ///
    /// Children are evaluated in declared order. And narrows each child's
    /// candidate by the earlier siblings' results; Or and Not pass the
    /// candidate through unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the first [`EvaluationError`] raised anywhere in the tree.
    pub fn evaluate<'a>(
        &'a self,
        context: &EvaluationContext<'a>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        match &self.kind {
            ConditionKind::Rule(rule) => {
                debug!(
                    asset_key = %context.asset_key(),
                    rule = %self.snapshot.description,
                    "Evaluating rule"
                );
                let info = rule.evaluate_for_asset(context)?;
                debug!(
                    asset_key = %context.asset_key(),
                    true_count = info.true_subset().size(),
                    true_subset = %info.true_subset(),
                    "Rule returned partitions"
                );
                Ok(info)
            }
            ConditionKind::And(children) => {
                let mut true_subset = context.candidate_subset().clone();
                let mut child_infos = Vec::with_capacity(children.len());
                for child in children {
                    let child_context = context.for_child(child, true_subset.clone());
                    let child_info = child.evaluate(&child_context)?;
                    true_subset = true_subset.intersect(child_info.true_subset());
                    child_infos.push(child_info);
                }
                Ok(EvaluationInfo::create_from_children(
                    context,
                    true_subset,
                    child_infos,
                ))
            }
            ConditionKind::Or(children) => {
                let mut true_subset = context.empty_subset();
                let mut child_infos = Vec::with_capacity(children.len());
                for child in children {
                    let child_context =
                        context.for_child(child, context.candidate_subset().clone());
                    let child_info = child.evaluate(&child_context)?;
                    true_subset = true_subset.union(child_info.true_subset());
                    child_infos.push(child_info);
                }
                Ok(EvaluationInfo::create_from_children(
                    context,
                    true_subset,
                    child_infos,
                ))
            }
            ConditionKind::Not(child) => {
                let child_context = context.for_child(child, context.candidate_subset().clone());
                let child_info = child.evaluate(&child_context)?;
                let true_subset = context.candidate_subset().subtract(child_info.true_subset());
                Ok(EvaluationInfo::create_from_children(
                    context,
                    true_subset,
                    vec![child_info],
                ))
            }
        }
    }
}

fn combinator_snapshot(
    class_name: &str,
    description: &str,
    children: &[Condition],
) -> ConditionSnapshot {
    ConditionSnapshot::for_children(
        class_name,
        description,
        children.iter().map(Condition::unique_id),
    )
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

/// `left AND right`, extending `left` when it is already an And node.
pub fn and(left: Condition, right: Condition) -> Condition {
    match left.kind {
        ConditionKind::And(mut children) => {
            children.push(right);
            Condition::all_of(children)
        }
        kind => Condition::all_of([
            Condition {
                kind,
                snapshot: left.snapshot,
            },
            right,
        ]),
    }
}

/// `left OR right`, extending `left` when it is already an Or node.
pub fn or(left: Condition, right: Condition) -> Condition {
    match left.kind {
        ConditionKind::Or(mut children) => {
            children.push(right);
            Condition::any_of(children)
        }
        kind => Condition::any_of([
            Condition {
                kind,
                snapshot: left.snapshot,
            },
            right,
        ]),
    }
}

/// `NOT operand`.
pub fn not(operand: Condition) -> Condition {
    Condition::negate(operand)
}
