//! Reading and writing cursors through the public API.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::BTreeMap;
use std::sync::Arc;

use cadence_condition::rules::{MaterializeOnMissingRule, SkipOnParentMissingRule};
use cadence_condition::{
    CandidateSubset, Condition, ConditionSnapshot, EvaluationInfo, EvaluationResult, ExtraState,
    ExtraStateMap, InMemoryInstance, RootContext, Rule,
};
use cadence_cursor::Cursor;
use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

fn instance() -> InMemoryInstance {
    let mut instance = InMemoryInstance::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    instance
        .add_asset(AssetKey::from("a"), None, Vec::new())
        .add_asset(
            AssetKey::new(["wh", "orders"]),
            Some(PartitionsDefinition::fixed(["x", "y", "z"])),
            vec![AssetKey::from("a")],
        );
    instance
}

fn policy() -> Condition {
    Condition::from_rules(&[
        Arc::new(MaterializeOnMissingRule) as Arc<dyn Rule>,
        Arc::new(SkipOnParentMissingRule),
    ])
}

/// Results of a real evaluation of every asset in `instance`.
fn evaluate_all(instance: &InMemoryInstance, condition: &Condition) -> Vec<EvaluationInfo> {
    let same_tick = BTreeMap::new();
    [AssetKey::from("a"), AssetKey::new(["wh", "orders"])]
        .into_iter()
        .map(|key| {
            RootContext::new(key, condition, instance, None, &same_tick)
                .unwrap()
                .evaluate()
                .unwrap()
        })
        .collect()
}

#[test]
fn evaluated_cursor_survives_the_wire() {
    let instance = instance();
    let condition = policy();
    let cursor = Cursor::empty(0).with_updates(
        1,
        1_709_251_200.0,
        &[AssetKey::from("a")],
        evaluate_all(&instance, &condition),
    );

    let raw = cursor.serialize().unwrap();
    let restored = Cursor::from_serialized(Some(&raw), Some(&instance), 0);
    assert!(restored.equivalent_to(&cursor));

    let orders = restored
        .get_previous_evaluation_info(&AssetKey::new(["wh", "orders"]))
        .unwrap();
    let missing = Condition::rule(Arc::new(MaterializeOnMissingRule));
    assert!(orders.extra_state::<AssetSubset>(&missing).is_some());
    assert_eq!(
        orders.evaluation_result.condition_snapshot,
        *condition.snapshot()
    );
}

#[test]
fn unknown_assets_have_no_previous_result() {
    let cursor = Cursor::from_parts(3, Vec::new(), BTreeMap::new());
    assert!(
        cursor
            .get_previous_evaluation_info(&AssetKey::from("nope"))
            .is_none()
    );
    assert!(
        cursor
            .get_previous_evaluation_result(&AssetKey::from("nope"))
            .is_none()
    );
}

#[test]
fn legacy_json_falls_back_to_the_legacy_reader() {
    let mut instance = InMemoryInstance::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    instance.add_asset(AssetKey::from("a"), None, Vec::new());

    let cursor = Cursor::from_serialized(
        Some(r#"{"handled_root_asset_keys": ["a"]}"#),
        Some(&instance),
        7,
    );
    assert_eq!(cursor.evaluation_id(), 7);
    let info = cursor
        .get_previous_evaluation_info(&AssetKey::from("a"))
        .unwrap();
    assert!(!info.extra_state_by_unique_id.is_empty());
}

#[test]
fn garbage_yields_an_empty_cursor() {
    let cursor = Cursor::from_serialized(Some("%%% not a cursor"), None, 4);
    assert_eq!(cursor, Cursor::empty(4));
}

#[test]
fn timestamps_survive_the_wire_bit_for_bit() {
    let seconds = 9_941_414_234.726_625_f64;
    let info = EvaluationInfo {
        timestamp: Some(seconds),
        ..evaluate_all(&instance(), &policy()).remove(0)
    };
    let cursor = Cursor::from_parts(
        2,
        [info],
        BTreeMap::from([(AssetKey::from("a"), seconds)]),
    );

    let decoded = Cursor::decode(&cursor.serialize().unwrap()).unwrap();
    assert!(decoded.equivalent_to(&cursor));
    assert_eq!(
        decoded.last_observe_request_timestamps()[&AssetKey::from("a")].to_bits(),
        seconds.to_bits()
    );
    assert_eq!(
        decoded
            .get_previous_evaluation_info(&AssetKey::from("a"))
            .and_then(|info| info.timestamp)
            .map(f64::to_bits),
        Some(seconds.to_bits())
    );
}

fn orders() -> AssetKey {
    AssetKey::new(["wh", "orders"])
}

fn orders_def() -> PartitionsDefinition {
    PartitionsDefinition::fixed(["x", "y", "z"])
}

fn arb_keys() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(vec!["x", "y", "z"], 0..=3)
}

/// A candidate: `None` stands for "all partitions".
fn arb_candidate() -> impl Strategy<Value = Option<Vec<&'static str>>> {
    prop::option::of(arb_keys())
}

fn arb_extra_state() -> impl Strategy<Value = Option<ExtraState>> {
    prop_oneof![
        Just(None),
        arb_keys().prop_map(|keys| Some(ExtraState::Subset(AssetSubset::from_keys(
            orders(),
            orders_def(),
            keys,
        )))),
        (0.0..1.0e10_f64).prop_map(|seconds| Some(ExtraState::Timestamp(seconds))),
    ]
}

fn candidate_subset(candidate: Option<Vec<&'static str>>) -> AssetSubset {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    candidate.map_or_else(
        || AssetSubset::all(orders(), Some(orders_def()), now),
        |keys| AssetSubset::from_keys(orders(), orders_def(), keys),
    )
}

prop_compose! {
    /// A partitioned result tree: a root over one rule leaf, with
    /// independently chosen true and candidate subsets at each level.
    fn arb_orders_info()(
        root_true in arb_keys(),
        root_candidate in arb_candidate(),
        leaf_true in arb_keys(),
        leaf_candidate in arb_candidate(),
        extra_state in arb_extra_state(),
        max_storage_id in prop::option::of(any::<i64>()),
        timestamp in prop::option::of(0.0..1.0e10_f64),
        end in prop::option::of(0.0..1.0e10_f64),
    ) -> EvaluationInfo {
        let leaf_condition = Condition::rule(Arc::new(MaterializeOnMissingRule));
        let leaf = EvaluationResult {
            condition_snapshot: leaf_condition.snapshot().clone(),
            true_subset: AssetSubset::from_keys(orders(), orders_def(), leaf_true),
            candidate_subset: CandidateSubset::Subset(candidate_subset(leaf_candidate)),
            start_timestamp: timestamp,
            end_timestamp: end,
            subsets_with_metadata: Vec::new(),
            child_evaluations: Vec::new(),
        };
        let root = EvaluationResult {
            condition_snapshot: Condition::any_of([leaf_condition.clone()]).snapshot().clone(),
            true_subset: AssetSubset::from_keys(orders(), orders_def(), root_true),
            candidate_subset: CandidateSubset::Subset(candidate_subset(root_candidate)),
            child_evaluations: vec![leaf],
            ..placeholder_root()
        };
        let mut extra_state_by_unique_id = ExtraStateMap::new();
        if let Some(state) = extra_state {
            extra_state_by_unique_id.insert(leaf_condition.unique_id(), state);
        }
        EvaluationInfo {
            asset_key: orders(),
            evaluation_result: root,
            max_storage_id,
            timestamp,
            extra_state_by_unique_id,
        }
    }
}

fn placeholder_root() -> EvaluationResult {
    EvaluationResult {
        condition_snapshot: ConditionSnapshot::placeholder(),
        true_subset: AssetSubset::empty(orders(), Some(orders_def())),
        candidate_subset: CandidateSubset::HistoricalAllPartitions,
        start_timestamp: None,
        end_timestamp: None,
        subsets_with_metadata: Vec::new(),
        child_evaluations: Vec::new(),
    }
}

fn arb_observations() -> impl Strategy<Value = BTreeMap<AssetKey, f64>> {
    prop::collection::btree_map(
        prop::collection::vec("[a-z]{1,6}", 1..3).prop_map(AssetKey::new),
        -1.0e9..1.0e10_f64,
        0..6,
    )
}

proptest! {
    #[test]
    fn serialized_cursors_decode_to_equivalent_values(
        evaluation_id in any::<i64>(),
        observations in arb_observations(),
        timestamp in 0.0..1.0e10_f64,
        orders_info in arb_orders_info(),
        requested_a in any::<bool>(),
    ) {
        let a = AssetKey::from("a");
        let mut a_info = evaluate_all(&instance(), &policy()).remove(0);
        a_info.evaluation_result.true_subset = AssetSubset::from_bool(a.clone(), requested_a);
        let cursor = Cursor::from_parts(evaluation_id, Vec::new(), observations)
            .with_updates(evaluation_id, timestamp, &[a], [a_info, orders_info]);

        let raw = cursor.serialize().unwrap();
        let decoded = Cursor::decode(&raw).unwrap();
        prop_assert!(decoded.equivalent_to(&cursor));
        prop_assert_eq!(decoded.evaluation_id(), evaluation_id);
        prop_assert_eq!(decoded.previous_evaluation_info().count(), 2);
    }
}
