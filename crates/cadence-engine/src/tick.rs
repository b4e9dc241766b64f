//! One tick: evaluate every automated asset and produce the next cursor.
//!
//! Assets are grouped into dependency levels: level 0 has no automated
//! parents, and every asset sits one level below its deepest automated
//! parent. Levels run in order so downstream conditions can read upstream
//! results from the same tick; assets within a level run concurrently on
//! the blocking pool, each with its own context and result tree.
//!
//! ```text
//! previous cursor ──► level 0 ──► level 1 ──► ... ──► new cursor
//!                      │  │         │  │
//!                    asset asset  asset asset   (bounded by max_concurrency)
//! ```
//!
//! A tick is all or nothing. The first failure, or running past the
//! configured budget, abandons the tick and no cursor is produced.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cadence_condition::result::unix_timestamp;
use cadence_condition::{Condition, EvaluationInfo, EvaluationResult, InstanceQuery, RootContext};
use cadence_cursor::Cursor;
use cadence_types::AssetKey;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::TickConfig;
use crate::error::TickError;

/// Conditions keyed by the asset they govern.
pub type ConditionMap = BTreeMap<AssetKey, Condition>;

/// Everything a completed tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// The cursor to persist.
    pub cursor: Cursor,
    /// Per-asset results, ordered by asset key.
    pub evaluations: Vec<EvaluationInfo>,
}

impl TickOutcome {
    /// Assets with at least one partition to materialize this tick.
    pub fn requested(&self) -> impl Iterator<Item = &EvaluationInfo> {
        self.evaluations
            .iter()
            .filter(|info| !info.true_subset().is_empty())
    }
}

/// Drives ticks under a fixed set of limits.
#[derive(Debug, Clone)]
pub struct TickEngine {
    config: TickConfig,
}

impl TickEngine {
    /// Create an engine with the given limits.
    pub const fn new(config: TickConfig) -> Self {
        Self { config }
    }

    /// The evaluation id that follows `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::EvaluationIdOverflow`] at `i64::MAX`.
    pub fn next_evaluation_id(cursor: &Cursor) -> Result<i64, TickError> {
        cursor
            .evaluation_id()
            .checked_add(1)
            .ok_or(TickError::EvaluationIdOverflow {
                evaluation_id: cursor.evaluation_id(),
            })
    }

    /// Evaluate every automated asset once and build the next cursor.
    ///
    /// `previous_cursor` is left untouched. `newly_observed` lists assets
    /// whose observation was requested this tick; their timestamps are set
    /// to the evaluation time.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if any asset fails, the graph cannot be ordered,
    /// or the tick exceeds `timeout_ms`. No cursor is produced in that case.
    pub async fn run_tick<Q>(
        &self,
        previous_cursor: &Cursor,
        query: Arc<Q>,
        conditions: Arc<ConditionMap>,
        evaluation_id: i64,
        newly_observed: &[AssetKey],
    ) -> Result<TickOutcome, TickError>
    where
        Q: InstanceQuery + 'static,
    {
        let evaluation_time = query.evaluation_time();
        info!(
            evaluation_id,
            evaluation_time = %evaluation_time,
            "Tick started"
        );

        let evaluated = tokio::time::timeout(
            self.config.timeout(),
            self.evaluate_levels(previous_cursor, &query, &conditions),
        )
        .await
        .map_err(|_elapsed| {
            warn!(
                evaluation_id,
                timeout_ms = self.config.timeout_ms,
                "Tick timed out, abandoning"
            );
            TickError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }
        })??;

        let evaluations: Vec<EvaluationInfo> = evaluated.into_values().collect();
        let cursor = previous_cursor.with_updates(
            evaluation_id,
            unix_timestamp(evaluation_time),
            newly_observed,
            evaluations.iter().cloned(),
        );

        let outcome = TickOutcome {
            cursor,
            evaluations,
        };
        info!(
            evaluation_id,
            assets = outcome.evaluations.len(),
            requested = outcome.requested().count(),
            "Tick finished"
        );
        Ok(outcome)
    }

    async fn evaluate_levels<Q>(
        &self,
        previous_cursor: &Cursor,
        query: &Arc<Q>,
        conditions: &Arc<ConditionMap>,
    ) -> Result<BTreeMap<AssetKey, EvaluationInfo>, TickError>
    where
        Q: InstanceQuery + 'static,
    {
        let automated = query.automated_asset_keys();
        if let Some(asset_key) = automated.iter().find(|key| !conditions.contains_key(*key)) {
            return Err(TickError::MissingCondition {
                asset_key: asset_key.clone(),
            });
        }

        let levels = dependency_levels(query.as_ref(), &automated)?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut same_tick: BTreeMap<AssetKey, EvaluationResult> = BTreeMap::new();
        let mut evaluated: BTreeMap<AssetKey, EvaluationInfo> = BTreeMap::new();

        for (depth, level) in levels.into_iter().enumerate() {
            debug!(depth, assets = level.len(), "Evaluating dependency level");
            let upstream = Arc::new(same_tick.clone());
            let mut workers = JoinSet::new();

            for asset_key in level {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|error| TickError::Worker {
                        message: error.to_string(),
                    })?;
                let query = Arc::clone(query);
                let conditions = Arc::clone(conditions);
                let upstream = Arc::clone(&upstream);
                let previous = previous_cursor
                    .get_previous_evaluation_info(&asset_key)
                    .cloned();

                workers.spawn_blocking(move || {
                    let _permit = permit;
                    evaluate_asset(
                        query.as_ref(),
                        &conditions,
                        &asset_key,
                        previous.as_ref(),
                        &upstream,
                    )
                });
            }

            while let Some(joined) = workers.join_next().await {
                let info = joined.map_err(|error| TickError::Worker {
                    message: error.to_string(),
                })??;
                same_tick.insert(info.asset_key.clone(), info.evaluation_result.clone());
                evaluated.insert(info.asset_key.clone(), info);
            }
        }

        Ok(evaluated)
    }
}

/// Evaluate one asset's condition tree.
fn evaluate_asset<Q: InstanceQuery>(
    query: &Q,
    conditions: &ConditionMap,
    asset_key: &AssetKey,
    previous: Option<&EvaluationInfo>,
    same_tick: &BTreeMap<AssetKey, EvaluationResult>,
) -> Result<EvaluationInfo, TickError> {
    let condition = conditions
        .get(asset_key)
        .ok_or_else(|| TickError::MissingCondition {
            asset_key: asset_key.clone(),
        })?;
    let into_tick_error = |source| TickError::Evaluation {
        asset_key: asset_key.clone(),
        source,
    };
    let info = RootContext::new(asset_key.clone(), condition, query, previous, same_tick)
        .and_then(|root| root.evaluate())
        .map_err(into_tick_error)?;
    debug!(
        asset_key = %asset_key,
        true_count = info.true_subset().size(),
        max_storage_id = ?info.max_storage_id,
        "Asset evaluated"
    );
    Ok(info)
}

/// Group `assets` into levels so every asset comes after its automated
/// parents. Parents outside `assets` impose no ordering.
///
/// # Errors
///
/// Returns [`TickError::Cycle`] if parent links form a cycle, or
/// [`TickError::Graph`] if parents cannot be read.
pub fn dependency_levels<Q: InstanceQuery + ?Sized>(
    query: &Q,
    assets: &[AssetKey],
) -> Result<Vec<Vec<AssetKey>>, TickError> {
    let automated: BTreeSet<&AssetKey> = assets.iter().collect();
    let mut waiting_on: BTreeMap<AssetKey, BTreeSet<AssetKey>> = BTreeMap::new();
    for asset_key in assets {
        let parents = query
            .parents(asset_key)?
            .into_iter()
            .filter(|parent| automated.contains(parent))
            .collect();
        waiting_on.insert(asset_key.clone(), parents);
    }

    let mut levels = Vec::new();
    while !waiting_on.is_empty() {
        let ready: Vec<AssetKey> = waiting_on
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        if ready.is_empty() {
            return Err(TickError::Cycle {
                assets: waiting_on.into_keys().collect(),
            });
        }
        for key in &ready {
            waiting_on.remove(key);
        }
        for parents in waiting_on.values_mut() {
            for key in &ready {
                parents.remove(key);
            }
        }
        levels.push(ready);
    }
    Ok(levels)
}
