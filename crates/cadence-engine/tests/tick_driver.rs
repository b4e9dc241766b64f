//! End-to-end ticks over an in-memory instance.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use cadence_condition::rules::{
    MaterializeOnMissingRule, MaterializeOnParentUpdatedRule, SkipOnParentMissingRule,
};
use cadence_condition::{
    AssetGraph, Condition, EvaluationContext, EvaluationError, EvaluationInfo, InMemoryInstance,
    Rule,
};
use cadence_cursor::Cursor;
use cadence_engine::config::TickConfig;
use cadence_engine::error::TickError;
use cadence_engine::store::{CursorStore, InMemoryCursorStore};
use cadence_engine::tick::{ConditionMap, TickEngine, TickOutcome};
use cadence_types::{AssetKey, PartitionsDefinition};
use chrono::{TimeZone, Utc};

fn up() -> AssetKey {
    AssetKey::from("up")
}

fn down() -> AssetKey {
    AssetKey::new(["warehouse", "down"])
}

fn instance() -> InMemoryInstance {
    let mut instance = InMemoryInstance::new(Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap());
    instance.add_asset(up(), None, Vec::new()).add_asset(
        down(),
        Some(PartitionsDefinition::fixed(["a", "b", "c"])),
        vec![up()],
    );
    instance
}

fn policy() -> Condition {
    Condition::from_rules(&[
        Arc::new(MaterializeOnMissingRule) as Arc<dyn Rule>,
        Arc::new(MaterializeOnParentUpdatedRule),
        Arc::new(SkipOnParentMissingRule),
    ])
}

fn conditions(condition: &Condition) -> Arc<ConditionMap> {
    Arc::new(ConditionMap::from([
        (up(), condition.clone()),
        (down(), condition.clone()),
    ]))
}

fn engine() -> TickEngine {
    TickEngine::new(TickConfig::default())
}

async fn tick(
    previous: &Cursor,
    instance: &InMemoryInstance,
    conditions: Arc<ConditionMap>,
) -> TickOutcome {
    let evaluation_id = TickEngine::next_evaluation_id(previous).unwrap();
    engine()
        .run_tick(
            previous,
            Arc::new(instance.clone()),
            conditions,
            evaluation_id,
            &[],
        )
        .await
        .unwrap()
}

fn requested(outcome: &TickOutcome, asset_key: &AssetKey) -> usize {
    outcome
        .cursor
        .get_previous_evaluation_info(asset_key)
        .unwrap()
        .true_subset()
        .size()
}

#[tokio::test]
async fn downstream_sees_upstream_results_from_the_same_tick() {
    let instance = instance();
    let outcome = tick(&Cursor::empty(0), &instance, conditions(&policy())).await;

    assert_eq!(outcome.cursor.evaluation_id(), 1);
    assert_eq!(outcome.evaluations.len(), 2);
    assert_eq!(requested(&outcome, &up()), 1);
    // The parent has no data yet, but will be materialized this tick.
    assert_eq!(requested(&outcome, &down()), 3);
    assert_eq!(outcome.requested().count(), 2);
}

#[tokio::test]
async fn partitions_are_requested_once_until_parents_update() {
    let mut instance = instance();
    let condition = policy();

    let first = tick(&Cursor::empty(0), &instance, conditions(&condition)).await;
    let second = tick(&first.cursor, &instance, conditions(&condition)).await;
    assert_eq!(second.cursor.evaluation_id(), 2);
    assert_eq!(requested(&second, &up()), 0);
    assert_eq!(requested(&second, &down()), 0);

    instance.record_materialization(&up(), None).unwrap();
    let third = tick(&second.cursor, &instance, conditions(&condition)).await;
    assert_eq!(requested(&third, &up()), 0);
    assert_eq!(requested(&third, &down()), 3);
}

#[tokio::test]
async fn cursor_survives_the_store_between_ticks() {
    let instance = instance();
    let mut store = InMemoryCursorStore::new();
    let graph: &dyn AssetGraph = &instance;

    let previous = store.load(Some(graph), 0).unwrap();
    let outcome = tick(&previous, &instance, conditions(&policy())).await;
    store.save(&outcome.cursor).unwrap();

    let reloaded = store.load(Some(graph), 0).unwrap();
    assert_eq!(store.writes(), 1);
    assert!(reloaded.equivalent_to(&outcome.cursor));
}

#[tokio::test]
async fn observation_timestamps_use_the_evaluation_time() {
    let instance = instance();
    let outcome = engine()
        .run_tick(
            &Cursor::empty(0),
            Arc::new(instance),
            conditions(&policy()),
            1,
            &[up()],
        )
        .await
        .unwrap();
    let stamps = outcome.cursor.last_observe_request_timestamps();
    assert_eq!(
        stamps.get(&up()).map(|seconds| seconds.to_bits()),
        Some(1_711_972_800.0_f64.to_bits())
    );
    assert!(!stamps.contains_key(&down()));
}

/// Fails for one asset only.
#[derive(Debug)]
struct FailingRule;

impl Rule for FailingRule {
    fn class_name(&self) -> &'static str {
        "FailingRule"
    }

    fn description(&self) -> String {
        "fails for downstream assets".to_owned()
    }

    fn evaluate_for_asset(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        if context.asset_key() == &down() {
            return Err(EvaluationError::Rule {
                rule: self.description(),
                message: "unavailable".to_owned(),
            });
        }
        Ok(EvaluationInfo::create(
            context,
            context.candidate_subset().clone(),
            Vec::new(),
            None,
        ))
    }
}

/// Blocks the worker thread for a while.
#[derive(Debug)]
struct SlowRule;

impl Rule for SlowRule {
    fn class_name(&self) -> &'static str {
        "SlowRule"
    }

    fn description(&self) -> String {
        "takes its time".to_owned()
    }

    fn evaluate_for_asset(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(EvaluationInfo::create(
            context,
            context.empty_subset(),
            Vec::new(),
            None,
        ))
    }
}

#[tokio::test]
async fn one_failing_asset_abandons_the_tick() {
    let condition = Condition::rule(Arc::new(FailingRule));
    let result = engine()
        .run_tick(
            &Cursor::empty(0),
            Arc::new(instance()),
            conditions(&condition),
            1,
            &[],
        )
        .await;
    assert!(matches!(
        result,
        Err(TickError::Evaluation { ref asset_key, .. }) if asset_key == &down()
    ));
}

#[tokio::test]
async fn slow_ticks_time_out() {
    let engine = TickEngine::new(TickConfig {
        timeout_ms: 20,
        ..TickConfig::default()
    });
    let condition = Condition::rule(Arc::new(SlowRule));
    let result = engine
        .run_tick(
            &Cursor::empty(0),
            Arc::new(instance()),
            conditions(&condition),
            1,
            &[],
        )
        .await;
    assert!(matches!(result, Err(TickError::Timeout { timeout_ms: 20 })));
}

#[tokio::test]
async fn every_automated_asset_needs_a_condition() {
    let only_up = Arc::new(ConditionMap::from([(up(), policy())]));
    let result = engine()
        .run_tick(&Cursor::empty(0), Arc::new(instance()), only_up, 1, &[])
        .await;
    assert!(matches!(
        result,
        Err(TickError::MissingCondition { ref asset_key }) if asset_key == &down()
    ));
}

#[tokio::test]
async fn single_worker_gives_the_same_results() {
    let instance = instance();
    let condition = policy();
    let serial = TickEngine::new(TickConfig {
        max_concurrency: 1,
        ..TickConfig::default()
    })
    .run_tick(
        &Cursor::empty(0),
        Arc::new(instance.clone()),
        conditions(&condition),
        1,
        &[],
    )
    .await
    .unwrap();
    let parallel = tick(&Cursor::empty(0), &instance, conditions(&condition)).await;
    assert!(serial.cursor.equivalent_to(&parallel.cursor));
}
