//! Evaluation context threaded top-down through a condition tree.
//!
//! [`RootContext`] is built once per asset per tick. It reads the evaluation
//! time and the storage id high-water mark from the query collaborator a
//! single time, so every node of the asset's tree sees the same "now", and it
//! computes the root-level derived subsets (what materialized since the last
//! tick, which parents updated) up front.
//!
//! [`EvaluationContext`] is the per-node view: the root plus the node's own
//! candidate subset and its previous result. Deriving a child context never
//! touches the root.

use std::collections::BTreeMap;

use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::condition::Condition;
use crate::query::InstanceQuery;
use crate::result::{
    CandidateSubset, EvaluationInfo, EvaluationResult, FromExtraState, SubsetWithMetadata,
    unix_timestamp,
};
use crate::{ContextError, EvaluationError};

// ---------------------------------------------------------------------------
// Root context
// ---------------------------------------------------------------------------

/// Per-asset state shared by every node of one tree evaluation.
pub struct RootContext<'a> {
    asset_key: AssetKey,
    partitions_def: Option<PartitionsDefinition>,
    condition: &'a Condition,
    query: &'a dyn InstanceQuery,
    previous_info: Option<&'a EvaluationInfo>,
    same_tick: &'a BTreeMap<AssetKey, EvaluationResult>,
    evaluation_time: DateTime<Utc>,
    start_timestamp: f64,
    previous_max_storage_id: Option<i64>,
    new_max_storage_id: Option<i64>,
    materialized_since_previous_tick: AssetSubset,
    parent_has_updated: AssetSubset,
    parent_will_update: AssetSubset,
}

impl<'a> RootContext<'a> {
    /// Snapshot the instance for evaluating `condition` on `asset_key`.
    ///
    /// `previous_info` is the asset's result from the previous tick, and
    /// `same_tick` holds results of assets already evaluated this tick.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::Query`] if the collaborator cannot answer.
    pub fn new(
        asset_key: AssetKey,
        condition: &'a Condition,
        query: &'a dyn InstanceQuery,
        previous_info: Option<&'a EvaluationInfo>,
        same_tick: &'a BTreeMap<AssetKey, EvaluationResult>,
    ) -> Result<Self, EvaluationError> {
        let partitions_def = query.partitions_def(&asset_key)?;
        let evaluation_time = query.evaluation_time();
        let new_max_storage_id = query.max_storage_id();
        let previous_max_storage_id = previous_info.and_then(|info| info.max_storage_id);
        let empty = AssetSubset::empty(asset_key.clone(), partitions_def.clone());

        let materialized_since_previous_tick = conform(
            &empty,
            query.updated_after(&asset_key, previous_max_storage_id)?,
        );

        let mut parent_has_updated = empty.clone();
        let mut parent_will_update = empty.clone();
        for parent in query.parents(&asset_key)? {
            let parent_def = query.partitions_def(&parent)?;
            let updated = query.updated_after(&parent, previous_max_storage_id)?;
            let mapped = if parent_def == partitions_def {
                updated.with_asset_key(asset_key.clone())
            } else if updated.bool_value() {
                AssetSubset::all(asset_key.clone(), partitions_def.clone(), evaluation_time)
            } else {
                empty.clone()
            };
            parent_has_updated = parent_has_updated.union(&conform(&empty, mapped));

            // Only parents with the same partitioning can run alongside the
            // child in one run.
            if let Some(result) = same_tick
                .get(&parent)
                .filter(|_| parent_def == partitions_def)
            {
                let relabelled = result.true_subset.clone().with_asset_key(asset_key.clone());
                parent_will_update = parent_will_update.union(&conform(&empty, relabelled));
            }
        }

        Ok(Self {
            asset_key,
            partitions_def,
            condition,
            query,
            previous_info,
            same_tick,
            evaluation_time,
            start_timestamp: unix_timestamp(Utc::now()),
            previous_max_storage_id,
            new_max_storage_id,
            materialized_since_previous_tick,
            parent_has_updated,
            parent_will_update,
        })
    }

    /// Context for the root node: the candidate is every partition that
    /// exists at the evaluation time.
    pub fn context(&self) -> EvaluationContext<'_> {
        EvaluationContext {
            root: self,
            condition: self.condition,
            candidate_subset: AssetSubset::all(
                self.asset_key.clone(),
                self.partitions_def.clone(),
                self.evaluation_time,
            ),
            previous_evaluation: self.previous_info.map(|info| &info.evaluation_result),
            partition_key: None,
        }
    }

    /// Evaluate the whole tree.
    ///
    /// # Errors
    ///
    /// Propagates the first error raised by any node.
    pub fn evaluate(&self) -> Result<EvaluationInfo, EvaluationError> {
        self.condition.evaluate(&self.context())
    }

    /// The asset being evaluated.
    pub const fn asset_key(&self) -> &AssetKey {
        &self.asset_key
    }
}

/// `subset` if it can be combined with `empty`, otherwise the empty subset.
///
/// Subsets read back from a previous tick or returned by the collaborator can
/// disagree with the current partitioning after a redeploy.
fn conform(empty: &AssetSubset, subset: AssetSubset) -> AssetSubset {
    if empty.is_compatible_with(&subset) {
        subset
    } else {
        warn!(
            asset_key = %empty.asset_key,
            subset = %subset,
            "Ignoring subset with mismatched partitioning"
        );
        empty.clone()
    }
}

// ---------------------------------------------------------------------------
// Node context
// ---------------------------------------------------------------------------

/// Working state for evaluating one node of a tree.
#[derive(Clone)]
pub struct EvaluationContext<'a> {
    root: &'a RootContext<'a>,
    condition: &'a Condition,
    candidate_subset: AssetSubset,
    previous_evaluation: Option<&'a EvaluationResult>,
    partition_key: Option<String>,
}

impl<'a> EvaluationContext<'a> {
    /// Context for `child`, judging `candidate_subset`.
    ///
    /// The child's previous result is found by structural identity, so it
    /// survives changes to its siblings.
    #[must_use]
    pub fn for_child(&self, child: &'a Condition, candidate_subset: AssetSubset) -> Self {
        Self {
            root: self.root,
            condition: child,
            candidate_subset,
            previous_evaluation: self
                .previous_evaluation
                .and_then(|previous| previous.for_child(child)),
            partition_key: self.partition_key.clone(),
        }
    }

    /// The same context bound to a single partition.
    #[must_use]
    pub fn with_partition_key(&self, partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: Some(partition_key.into()),
            ..self.clone()
        }
    }

    /// The partition this context is bound to.
    ///
    /// # Errors
    ///
    /// [`ContextError::NotPartitioned`] if the asset has no partitions, and
    /// [`ContextError::Unbound`] if no partition was bound.
    pub fn partition_key(&self) -> Result<&str, ContextError> {
        if self.root.partitions_def.is_none() {
            return Err(ContextError::NotPartitioned {
                asset_key: self.root.asset_key.clone(),
            });
        }
        self.partition_key
            .as_deref()
            .ok_or_else(|| ContextError::Unbound {
                asset_key: self.root.asset_key.clone(),
            })
    }

    /// The asset being evaluated.
    pub const fn asset_key(&self) -> &AssetKey {
        &self.root.asset_key
    }

    /// The asset's partition space.
    pub const fn partitions_def(&self) -> Option<&PartitionsDefinition> {
        self.root.partitions_def.as_ref()
    }

    /// The node being evaluated.
    pub const fn condition(&self) -> &'a Condition {
        self.condition
    }

    /// Partitions this node is asked to judge.
    pub const fn candidate_subset(&self) -> &AssetSubset {
        &self.candidate_subset
    }

    /// This node's result from the previous tick, if it existed.
    pub const fn previous_evaluation(&self) -> Option<&'a EvaluationResult> {
        self.previous_evaluation
    }

    /// The asset's whole result from the previous tick.
    pub const fn previous_evaluation_info(&self) -> Option<&'a EvaluationInfo> {
        self.root.previous_info
    }

    /// The query collaborator.
    pub const fn query(&self) -> &'a dyn InstanceQuery {
        self.root.query
    }

    /// Result of `asset_key` if it was already evaluated this tick.
    pub fn same_tick_result(&self, asset_key: &AssetKey) -> Option<&'a EvaluationResult> {
        self.root.same_tick.get(asset_key)
    }

    /// When evaluation of the asset's tree started, in Unix seconds.
    pub const fn start_timestamp(&self) -> f64 {
        self.root.start_timestamp
    }

    /// The tick's evaluation time.
    pub const fn evaluation_time(&self) -> DateTime<Utc> {
        self.root.evaluation_time
    }

    /// Storage id high-water mark consumed by the previous tick.
    pub const fn previous_max_storage_id(&self) -> Option<i64> {
        self.root.previous_max_storage_id
    }

    /// Storage id high-water mark consumed by this tick.
    pub const fn new_max_storage_id(&self) -> Option<i64> {
        self.root.new_max_storage_id
    }

    /// The empty subset of this asset.
    pub fn empty_subset(&self) -> AssetSubset {
        AssetSubset::empty(self.root.asset_key.clone(), self.root.partitions_def.clone())
    }

    /// Whether `subset` shares this asset's key and partitioning.
    pub fn is_compatible(&self, subset: &AssetSubset) -> bool {
        subset.asset_key == self.root.asset_key && subset.partitions_def == self.root.partitions_def
    }

    /// `subset` relabelled for this asset when `subset` belongs to a parent
    /// with the same partitioning.
    pub fn relabel_parent_subset(&self, subset: &AssetSubset) -> Option<AssetSubset> {
        (subset.partitions_def == self.root.partitions_def)
            .then(|| subset.clone().with_asset_key(self.root.asset_key.clone()))
    }

    /// Typed extra state this node stored on the previous tick.
    pub fn previous_extra_state<T: FromExtraState>(&self) -> Option<T> {
        self.root
            .previous_info
            .and_then(|info| info.extra_state(self.condition))
    }

    // -- Previous tick --------------------------------------------------------

    /// What this node judged true on the previous tick.
    pub fn previous_true_subset(&self) -> AssetSubset {
        self.previous_evaluation
            .map(|previous| &previous.true_subset)
            .filter(|subset| self.is_compatible(subset))
            .map_or_else(|| self.empty_subset(), Clone::clone)
    }

    /// Annotated sub-results this node produced on the previous tick.
    pub fn previous_subsets_with_metadata(&self) -> &'a [SubsetWithMetadata] {
        self.previous_evaluation
            .map(|previous| previous.subsets_with_metadata.as_slice())
            .unwrap_or_default()
    }

    /// Partitions requested (or discarded) for this asset on the previous
    /// tick.
    pub fn previous_tick_requested_subset(&self) -> AssetSubset {
        self.root
            .previous_info
            .map(|info| {
                info.evaluation_result
                    .requested_or_discarded_subset(self.root.condition)
            })
            .filter(|subset| self.is_compatible(subset))
            .unwrap_or_else(|| self.empty_subset())
    }

    /// Partitions materialized since the previous tick.
    pub const fn materialized_since_previous_tick_subset(&self) -> &AssetSubset {
        &self.root.materialized_since_previous_tick
    }

    /// Partitions materialized since the previous tick or requested on it.
    pub fn materialized_requested_or_discarded_since_previous_tick_subset(&self) -> AssetSubset {
        self.root
            .materialized_since_previous_tick
            .union(&self.previous_tick_requested_subset())
    }

    // -- Parents --------------------------------------------------------------

    /// Partitions whose parents updated since the previous tick.
    pub const fn parent_has_updated_subset(&self) -> &AssetSubset {
        &self.root.parent_has_updated
    }

    /// Partitions whose parents will be materialized this tick.
    pub const fn parent_will_update_subset(&self) -> &AssetSubset {
        &self.root.parent_will_update
    }

    /// Candidates whose parents updated since the previous tick or will
    /// update on this one.
    pub fn candidate_parent_has_or_will_update_subset(&self) -> AssetSubset {
        self.candidate_subset.intersect(
            &self
                .root
                .parent_has_updated
                .union(&self.root.parent_will_update),
        )
    }

    /// Candidates of this tick that were not candidates on the previous one.
    ///
    /// Empty when the previous candidate was "all partitions".
    pub fn candidates_not_evaluated_on_previous_tick_subset(&self) -> AssetSubset {
        let Some(previous) = self.previous_evaluation else {
            return self.candidate_subset.clone();
        };
        match &previous.candidate_subset {
            CandidateSubset::HistoricalAllPartitions => self.empty_subset(),
            CandidateSubset::Subset(subset) if self.is_compatible(subset) => {
                self.candidate_subset.subtract(subset)
            }
            CandidateSubset::Subset(_) => self.candidate_subset.clone(),
        }
    }
}
