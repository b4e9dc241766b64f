//! Laws of the condition combinators, checked against independent leaf
//! evaluations.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cadence_condition::{
    Condition, EvaluationContext, EvaluationError, EvaluationInfo, InMemoryInstance, RootContext,
    Rule, and, not, or,
};
use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

const UNIVERSE: [&str; 5] = ["p1", "p2", "p3", "p4", "p5"];

/// True for the candidates that are also in a fixed key set.
#[derive(Debug)]
struct FixedRule {
    name: String,
    keys: BTreeSet<String>,
}

impl Rule for FixedRule {
    fn class_name(&self) -> &'static str {
        "FixedRule"
    }

    fn description(&self) -> String {
        format!("fixed {}", self.name)
    }

    fn evaluate_for_asset(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        let def = context.partitions_def().cloned().unwrap();
        let fixed = AssetSubset::from_keys(context.asset_key().clone(), def, self.keys.clone());
        Ok(EvaluationInfo::create(
            context,
            context.candidate_subset().intersect(&fixed),
            Vec::new(),
            None,
        ))
    }
}

/// Always fails.
#[derive(Debug)]
struct BrokenRule;

impl Rule for BrokenRule {
    fn class_name(&self) -> &'static str {
        "BrokenRule"
    }

    fn description(&self) -> String {
        "always fails".to_owned()
    }

    fn evaluate_for_asset(
        &self,
        _context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        Err(EvaluationError::Rule {
            rule: self.description(),
            message: "boom".to_owned(),
        })
    }
}

fn key() -> AssetKey {
    AssetKey::from("x")
}

fn def() -> PartitionsDefinition {
    PartitionsDefinition::fixed(UNIVERSE)
}

fn instance() -> InMemoryInstance {
    let mut instance = InMemoryInstance::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    instance.add_asset(key(), Some(def()), Vec::new());
    instance
}

fn leaf<'a>(name: &str, keys: impl IntoIterator<Item = &'a str>) -> Condition {
    Condition::rule(Arc::new(FixedRule {
        name: name.to_owned(),
        keys: keys.into_iter().map(str::to_owned).collect(),
    }))
}

fn subset<'a>(keys: impl IntoIterator<Item = &'a str>) -> AssetSubset {
    AssetSubset::from_keys(key(), def(), keys)
}

fn empty() -> AssetSubset {
    AssetSubset::empty(key(), Some(def()))
}

fn select(flags: &[bool]) -> Vec<&'static str> {
    UNIVERSE
        .iter()
        .zip(flags)
        .filter(|(_, keep)| **keep)
        .map(|(name, _)| *name)
        .collect()
}

/// Evaluate `condition` with `candidate` as its candidate subset.
fn evaluate_with(condition: &Condition, candidate: &AssetSubset) -> AssetSubset {
    let instance = instance();
    let same_tick = BTreeMap::new();
    let root = RootContext::new(key(), condition, &instance, None, &same_tick).unwrap();
    let context = root.context().for_child(condition, candidate.clone());
    condition.evaluate(&context).unwrap().true_subset().clone()
}

fn arb_flags() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), UNIVERSE.len())
}

proptest! {
    #[test]
    fn and_pruning_is_transparent(
        candidate in arb_flags(),
        a in arb_flags(),
        b in arb_flags(),
        c in arb_flags(),
    ) {
        let candidate = subset(select(&candidate));
        let leaves = [leaf("a", select(&a)), leaf("b", select(&b)), leaf("c", select(&c))];
        let expected = leaves
            .iter()
            .map(|child| evaluate_with(child, &candidate))
            .fold(candidate.clone(), |acc, child| acc.intersect(&child));
        let tree = Condition::all_of(leaves);
        prop_assert_eq!(evaluate_with(&tree, &candidate), expected);
    }

    #[test]
    fn or_is_the_union_over_the_same_candidate(
        candidate in arb_flags(),
        a in arb_flags(),
        b in arb_flags(),
    ) {
        let candidate = subset(select(&candidate));
        let leaves = [leaf("a", select(&a)), leaf("b", select(&b))];
        let expected = leaves
            .iter()
            .map(|child| evaluate_with(child, &candidate))
            .fold(empty(), |acc, child| acc.union(&child));
        let tree = Condition::any_of(leaves);
        prop_assert_eq!(evaluate_with(&tree, &candidate), expected);
    }

    #[test]
    fn not_complements_within_the_candidate(candidate in arb_flags(), a in arb_flags()) {
        let candidate = subset(select(&candidate));
        let child = leaf("a", select(&a));
        let child_true = evaluate_with(&child, &candidate);
        let negated = evaluate_with(&not(child), &candidate);
        for partition in candidate.partition_keys() {
            prop_assert_eq!(negated.contains(&partition), !child_true.contains(&partition));
        }
        prop_assert_eq!(negated, candidate.subtract(&child_true));
    }
}

#[test]
fn and_restricts_and_not_complements() {
    let restrict = || leaf("restrict", ["p1", "p2"]);
    let candidate = subset(["p1", "p2", "p3"]);

    let conjunction = Condition::all_of([restrict()]);
    assert_eq!(evaluate_with(&conjunction, &candidate), subset(["p1", "p2"]));

    let negation = not(restrict());
    assert_eq!(evaluate_with(&negation, &candidate), subset(["p3"]));
}

#[test]
fn empty_candidate_into_or_is_empty() {
    let tree = or(leaf("a", UNIVERSE), leaf("b", ["p1"]));
    assert!(evaluate_with(&tree, &empty()).is_empty());
}

#[test]
fn root_evaluation_starts_from_all_partitions() {
    let instance = instance();
    let same_tick = BTreeMap::new();
    let tree = and(leaf("a", ["p1", "p2", "p3"]), not(leaf("b", ["p2"])));
    let info = RootContext::new(key(), &tree, &instance, None, &same_tick)
        .unwrap()
        .evaluate()
        .unwrap();

    assert_eq!(info.true_subset(), &subset(["p1", "p3"]));
    let result = &info.evaluation_result;
    assert!(
        result
            .candidate_subset
            .as_subset()
            .unwrap()
            .is_all_partitions()
    );
    assert_eq!(result.child_evaluations.len(), 2);
    assert_eq!(
        result.child_evaluations[1].candidate_subset.as_subset(),
        Some(&subset(["p1", "p2", "p3"]))
    );
    assert_eq!(
        result.child_evaluations[0].start_timestamp.map(f64::to_bits),
        result.start_timestamp.map(f64::to_bits)
    );
}

#[test]
fn child_failures_propagate_unchanged() {
    let broken = || Condition::rule(Arc::new(BrokenRule));
    let expected = EvaluationError::Rule {
        rule: "always fails".to_owned(),
        message: "boom".to_owned(),
    };
    let instance = instance();
    let same_tick = BTreeMap::new();
    for tree in [
        and(leaf("a", UNIVERSE), broken()),
        or(broken(), leaf("a", UNIVERSE)),
        not(broken()),
    ] {
        let root = RootContext::new(key(), &tree, &instance, None, &same_tick).unwrap();
        assert_eq!(root.evaluate().err(), Some(expected.clone()));
    }
}

#[test]
fn previous_child_results_are_found_by_identity() {
    let instance = instance();
    let same_tick = BTreeMap::new();
    let shared = || leaf("shared", ["p1"]);

    let before = Condition::any_of([leaf("old", ["p2"]), shared()]);
    let first = RootContext::new(key(), &before, &instance, None, &same_tick)
        .unwrap()
        .evaluate()
        .unwrap();

    // A sibling was replaced and the shared leaf moved position.
    let after = Condition::any_of([shared(), leaf("new", ["p3"])]);
    let root = RootContext::new(key(), &after, &instance, Some(&first), &same_tick).unwrap();
    let context = root.context();
    let shared_context = context.for_child(&after.children()[0], context.candidate_subset().clone());
    let previous = shared_context.previous_evaluation().unwrap();
    assert_eq!(previous.condition_snapshot, *shared().snapshot());
    assert_eq!(shared_context.previous_true_subset(), subset(["p1"]));

    let new_context = context.for_child(&after.children()[1], context.candidate_subset().clone());
    assert!(new_context.previous_evaluation().is_none());
}
