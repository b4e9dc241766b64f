//! Evaluation results and per-node extra state.
//!
//! An [`EvaluationResult`] mirrors the condition tree it came from: one node
//! per condition node, children in the same order. An [`EvaluationInfo`]
//! wraps the root result of one asset with the bookkeeping the next tick
//! needs (storage id high-water mark, timestamp, extra state).
//!
//! # Candidate encoding
//!
//! The root of every tree is asked about "all partitions", which may be an
//! unbounded set. When a result is serialized, a candidate subset that is
//! exactly "all partitions" is written as `null` and read back as
//! [`CandidateSubset::HistoricalAllPartitions`]. Resolving that marker later
//! recomputes "all partitions" against the partition definition at read time,
//! so partitions added in between are included.

use std::collections::BTreeMap;

use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{Condition, ConditionSnapshot};
use crate::context::EvaluationContext;

/// Seconds since the Unix epoch, with microsecond precision.
#[allow(clippy::cast_precision_loss, clippy::arithmetic_side_effects)]
pub fn unix_timestamp(instant: DateTime<Utc>) -> f64 {
    instant.timestamp_micros() as f64 / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Candidate subset
// ---------------------------------------------------------------------------

/// The partitions a node was asked to judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSubset {
    /// An explicit candidate set.
    Subset(AssetSubset),
    /// "All partitions" at the time the result was stored; the exact set is
    /// no longer known.
    HistoricalAllPartitions,
}

impl CandidateSubset {
    /// The form written to the wire: "all partitions" becomes the marker.
    #[must_use]
    pub fn stored_form(&self) -> Self {
        match self {
            Self::Subset(subset) if subset.is_all_partitions() => Self::HistoricalAllPartitions,
            other => other.clone(),
        }
    }

    /// The explicit subset, if this candidate was not stored as the marker.
    pub const fn as_subset(&self) -> Option<&AssetSubset> {
        match self {
            Self::Subset(subset) => Some(subset),
            Self::HistoricalAllPartitions => None,
        }
    }
}

impl From<AssetSubset> for CandidateSubset {
    fn from(subset: AssetSubset) -> Self {
        Self::Subset(subset)
    }
}

/// `null` on the wire stands for [`CandidateSubset::HistoricalAllPartitions`].
mod candidate_encoding {
    use cadence_types::AssetSubset;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::CandidateSubset;

    pub fn serialize<S: Serializer>(
        candidate: &CandidateSubset,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match candidate.stored_form() {
            CandidateSubset::Subset(subset) => Some(subset).serialize(serializer),
            CandidateSubset::HistoricalAllPartitions => None::<AssetSubset>.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<CandidateSubset, D::Error> {
        Ok(Option::<AssetSubset>::deserialize(deserializer)?
            .map_or(CandidateSubset::HistoricalAllPartitions, CandidateSubset::Subset))
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// A user-facing annotation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    /// Free text.
    Text(String),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A flag.
    Bool(bool),
}

/// A subset annotated with metadata explaining why it was selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetWithMetadata {
    /// The annotated partitions.
    pub subset: AssetSubset,
    /// Annotations, keyed by label.
    pub metadata: BTreeMap<String, MetadataValue>,
}

// ---------------------------------------------------------------------------
// Evaluation result
// ---------------------------------------------------------------------------

/// The outcome of evaluating one condition node for one asset at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Identity of the node that produced this result.
    pub condition_snapshot: ConditionSnapshot,
    /// Partitions satisfying the node.
    pub true_subset: AssetSubset,
    /// Partitions the node was asked to judge.
    #[serde(with = "candidate_encoding")]
    pub candidate_subset: CandidateSubset,
    /// When evaluation of the asset's tree started.
    pub start_timestamp: Option<f64>,
    /// When evaluation of this node finished.
    pub end_timestamp: Option<f64>,
    /// Annotated sub-results for explanation.
    #[serde(default)]
    pub subsets_with_metadata: Vec<SubsetWithMetadata>,
    /// Child results, in the node's child order.
    #[serde(default)]
    pub child_evaluations: Vec<EvaluationResult>,
}

impl EvaluationResult {
    /// The asset this result belongs to.
    pub const fn asset_key(&self) -> &AssetKey {
        &self.true_subset.asset_key
    }

    /// The candidate subset, recomputing "all partitions" against
    /// `partitions_def` at `current_time` if it was stored as the marker.
    pub fn resolve_candidate_subset(
        &self,
        partitions_def: Option<PartitionsDefinition>,
        current_time: DateTime<Utc>,
    ) -> AssetSubset {
        match &self.candidate_subset {
            CandidateSubset::Subset(subset) => subset.clone(),
            CandidateSubset::HistoricalAllPartitions => {
                AssetSubset::all(self.asset_key().clone(), partitions_def, current_time)
            }
        }
    }

    /// Whether `other` holds the same evaluation, ignoring fields that vary
    /// from run to run.
    ///
    /// Candidate subsets are compared in their stored form, so "all
    /// partitions" matches the marker.
    pub fn equivalent_to_stored(&self, other: Option<&Self>) -> bool {
        let Some(other) = other else {
            return false;
        };
        self.condition_snapshot == other.condition_snapshot
            && self.true_subset == other.true_subset
            && self.candidate_subset.stored_form() == other.candidate_subset.stored_form()
            && self.subsets_with_metadata == other.subsets_with_metadata
            && self.child_evaluations.len() == other.child_evaluations.len()
            && self
                .child_evaluations
                .iter()
                .zip(&other.child_evaluations)
                .all(|(mine, theirs)| mine.equivalent_to_stored(Some(theirs)))
    }

    /// Partitions dropped by the deprecated discard branch of a legacy tree.
    ///
    /// `None` unless `condition` has a discard branch and this result has
    /// the matching three children.
    pub fn discarded_subset(&self, condition: &Condition) -> Option<&AssetSubset> {
        condition.not_discard_condition()?;
        match self.child_evaluations.as_slice() {
            [_, _, not_discard] => not_discard
                .child_evaluations
                .first()
                .map(|discard| &discard.true_subset),
            _ => None,
        }
    }

    /// The true subset plus any discarded partitions.
    pub fn requested_or_discarded_subset(&self, condition: &Condition) -> AssetSubset {
        match self.discarded_subset(condition) {
            Some(discarded) if discarded.is_compatible_with(&self.true_subset) => {
                self.true_subset.union(discarded)
            }
            _ => self.true_subset.clone(),
        }
    }

    /// The child result produced by `child`, matched by structural identity
    /// rather than position, so it survives sibling changes.
    pub fn for_child(&self, child: &Condition) -> Option<&Self> {
        self.child_evaluations
            .iter()
            .find(|evaluation| evaluation.condition_snapshot.unique_id == child.unique_id())
    }
}

// ---------------------------------------------------------------------------
// Extra state
// ---------------------------------------------------------------------------

/// A value a node asks to have remembered until the next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtraState {
    /// A partition subset, e.g. partitions already handled.
    Subset(AssetSubset),
    /// A point in time, in Unix seconds.
    Timestamp(f64),
    /// Anything else.
    Json(Value),
}

/// Typed extraction from an [`ExtraState`].
pub trait FromExtraState: Sized {
    /// The value, if `state` holds this type.
    fn from_extra_state(state: &ExtraState) -> Option<Self>;
}

impl FromExtraState for AssetSubset {
    fn from_extra_state(state: &ExtraState) -> Option<Self> {
        match state {
            ExtraState::Subset(subset) => Some(subset.clone()),
            _ => None,
        }
    }
}

impl FromExtraState for f64 {
    fn from_extra_state(state: &ExtraState) -> Option<Self> {
        match state {
            ExtraState::Timestamp(value) => Some(*value),
            _ => None,
        }
    }
}

impl FromExtraState for Value {
    fn from_extra_state(state: &ExtraState) -> Option<Self> {
        match state {
            ExtraState::Json(value) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Extra state of every node of one tree, keyed by node `unique_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraStateMap(BTreeMap<String, ExtraState>);

impl ExtraStateMap {
    /// An empty map.
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Store `state` for the node with `unique_id`.
    pub fn insert(&mut self, unique_id: impl Into<String>, state: ExtraState) {
        self.0.insert(unique_id.into(), state);
    }

    /// Raw state stored for `unique_id`.
    pub fn get(&self, unique_id: &str) -> Option<&ExtraState> {
        self.0.get(unique_id)
    }

    /// Typed state stored for `condition`; `None` if absent or of another
    /// type.
    pub fn get_as<T: FromExtraState>(&self, condition: &Condition) -> Option<T> {
        self.get(condition.unique_id()).and_then(T::from_extra_state)
    }

    /// Number of nodes with state.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no node has state.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(unique_id, state)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraState)> {
        self.0.iter()
    }
}

impl Extend<(String, ExtraState)> for ExtraStateMap {
    fn extend<I: IntoIterator<Item = (String, ExtraState)>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ExtraStateMap {
    type Item = (String, ExtraState);
    type IntoIter = std::collections::btree_map::IntoIter<String, ExtraState>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Evaluation info
// ---------------------------------------------------------------------------

/// Per-asset outcome of one tick: the root result plus the bookkeeping the
/// next tick reads back from the cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInfo {
    /// The evaluated asset.
    pub asset_key: AssetKey,
    /// The result tree.
    pub evaluation_result: EvaluationResult,
    /// Highest storage id consumed by this evaluation.
    pub max_storage_id: Option<i64>,
    /// Evaluation time, in Unix seconds.
    pub timestamp: Option<f64>,
    /// Remembered per-node state.
    #[serde(default)]
    pub extra_state_by_unique_id: ExtraStateMap,
}

impl EvaluationInfo {
    /// A leaf-level result for the node in `context`.
    pub fn create(
        context: &EvaluationContext<'_>,
        true_subset: AssetSubset,
        subsets_with_metadata: Vec<SubsetWithMetadata>,
        extra_state: Option<ExtraState>,
    ) -> Self {
        let mut extra_state_by_unique_id = ExtraStateMap::new();
        if let Some(state) = extra_state {
            extra_state_by_unique_id.insert(context.condition().unique_id(), state);
        }
        Self::assemble(
            context,
            true_subset,
            subsets_with_metadata,
            Vec::new(),
            extra_state_by_unique_id,
        )
    }

    /// A combinator result for the node in `context`, folding in its
    /// children's results and extra state.
    pub fn create_from_children(
        context: &EvaluationContext<'_>,
        true_subset: AssetSubset,
        children: Vec<Self>,
    ) -> Self {
        let mut extra_state_by_unique_id = ExtraStateMap::new();
        let mut child_evaluations = Vec::with_capacity(children.len());
        for child in children {
            extra_state_by_unique_id.extend(child.extra_state_by_unique_id);
            child_evaluations.push(child.evaluation_result);
        }
        Self::assemble(
            context,
            true_subset,
            Vec::new(),
            child_evaluations,
            extra_state_by_unique_id,
        )
    }

    fn assemble(
        context: &EvaluationContext<'_>,
        true_subset: AssetSubset,
        subsets_with_metadata: Vec<SubsetWithMetadata>,
        child_evaluations: Vec<EvaluationResult>,
        extra_state_by_unique_id: ExtraStateMap,
    ) -> Self {
        Self {
            asset_key: context.asset_key().clone(),
            evaluation_result: EvaluationResult {
                condition_snapshot: context.condition().snapshot().clone(),
                true_subset,
                candidate_subset: CandidateSubset::Subset(context.candidate_subset().clone()),
                start_timestamp: Some(context.start_timestamp()),
                end_timestamp: Some(unix_timestamp(Utc::now())),
                subsets_with_metadata,
                child_evaluations,
            },
            max_storage_id: context.new_max_storage_id(),
            timestamp: Some(unix_timestamp(context.evaluation_time())),
            extra_state_by_unique_id,
        }
    }

    /// Partitions satisfying the root condition.
    pub const fn true_subset(&self) -> &AssetSubset {
        &self.evaluation_result.true_subset
    }

    /// Typed extra state stored by `condition`.
    pub fn extra_state<T: FromExtraState>(&self, condition: &Condition) -> Option<T> {
        self.extra_state_by_unique_id.get_as(condition)
    }
}
