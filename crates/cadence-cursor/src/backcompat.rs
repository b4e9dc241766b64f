//! Reading the deprecated plain JSON cursor format.
//!
//! Old cursors were a JSON object with per-asset maps keyed by the
//! user-facing asset key string (`"warehouse/orders"`), or, older still, a
//! JSON array whose first element was the tick counter. Not everything can be
//! recovered; this module recovers enough for the engine to carry on:
//!
//! | Key | Recovered as |
//! |-----|--------------|
//! | `last_observe_request_timestamp_by_asset_key` | observation timestamps |
//! | `handled_root_partitions_by_asset_key` | handled subset of partitioned assets |
//! | `handled_root_asset_keys` | handled non-partitioned assets |
//! | `latest_evaluation_by_asset_key` | a legacy-shaped result tree per asset |
//! | `latest_storage_id` | every asset's `max_storage_id` |
//! | `latest_evaluation_timestamp` | every asset's `timestamp` |
//!
//! Handled subsets become extra state of the "materialization is missing"
//! rule leaf, which is where that rule looks for them.
//!
//! Failures are scoped as narrowly as possible. An unreadable per-asset entry
//! is skipped (or replaced by a placeholder result) and the rest of the
//! cursor still loads; a value that is not an array or object yields an
//! empty cursor.

use std::collections::{BTreeMap, BTreeSet};

use cadence_condition::condition::{
    AND_CLASS_NAME, AND_DESCRIPTION, NOT_CLASS_NAME, NOT_DESCRIPTION, OR_CLASS_NAME,
    OR_DESCRIPTION,
};
use cadence_condition::rules::MaterializeOnMissingRule;
use cadence_condition::{
    AssetGraph, CandidateSubset, ConditionSnapshot, DecisionType, EvaluationInfo,
    EvaluationResult, ExtraState, ExtraStateMap, Rule,
};
use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition, SubsetError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::Cursor;

/// Why one legacy per-asset entry could not be read.
#[derive(Debug, thiserror::Error)]
enum LegacyEntryError {
    #[error("malformed evaluation record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("malformed partition subset: {0}")]
    Subset(#[from] SubsetError),

    #[error("unknown decision type `{0}`")]
    DecisionType(String),

    #[error("partition subset recorded for an asset without partitions")]
    UnexpectedSubset,

    #[error("no partition subset recorded for a partitioned asset")]
    MissingSubset,
}

/// Rebuild a cursor from the legacy JSON format.
///
/// `asset_graph` supplies partition definitions and the set of automated
/// assets; without it, handled subsets cannot be interpreted and are dropped.
/// `current_time` bounds which time-window partitions exist.
pub fn parse_legacy(
    raw: &str,
    asset_graph: Option<&dyn AssetGraph>,
    default_evaluation_id: i64,
    current_time: DateTime<Utc>,
) -> Cursor {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => {
            let evaluation_id = items
                .first()
                .and_then(Value::as_i64)
                .unwrap_or(default_evaluation_id);
            Cursor::empty(evaluation_id)
        }
        Ok(Value::Object(data)) => {
            parse_object(&data, asset_graph, default_evaluation_id, current_time)
        }
        Ok(_) => Cursor::empty(default_evaluation_id),
        Err(error) => {
            debug!(%error, "Legacy cursor is not JSON, starting from an empty cursor");
            Cursor::empty(default_evaluation_id)
        }
    }
}

fn parse_object(
    data: &Map<String, Value>,
    asset_graph: Option<&dyn AssetGraph>,
    default_evaluation_id: i64,
    current_time: DateTime<Utc>,
) -> Cursor {
    let observed: BTreeMap<AssetKey, f64> =
        entries(data, "last_observe_request_timestamp_by_asset_key")
            .filter_map(|(key, value)| value.as_f64().map(|seconds| (key, seconds)))
            .collect();

    let mut handled_partitions: BTreeMap<AssetKey, BTreeSet<String>> = BTreeMap::new();
    for (asset_key, value) in entries(data, "handled_root_partitions_by_asset_key") {
        let Some(def) = partitions_def_of(asset_graph, &asset_key) else {
            continue;
        };
        let parsed = value
            .as_str()
            .ok_or_else(|| SubsetError::InvalidSerializedSubset {
                reason: "expected a string".to_owned(),
            })
            .and_then(|serialized| def.deserialize_subset(serialized, current_time));
        match parsed {
            Ok(keys) => {
                handled_partitions.insert(asset_key, keys);
            }
            Err(error) => {
                debug!(asset_key = %asset_key, %error, "Skipping unreadable handled partitions");
            }
        }
    }

    let handled_keys: BTreeSet<AssetKey> = data
        .get("handled_root_asset_keys")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(AssetKey::from_user_string)
        .collect();

    let mut latest: BTreeMap<AssetKey, EvaluationResult> = BTreeMap::new();
    for (asset_key, value) in entries(data, "latest_evaluation_by_asset_key") {
        let def = partitions_def_of(asset_graph, &asset_key);
        let result = legacy_evaluation_result(&asset_key, def.as_ref(), value, current_time)
            .unwrap_or_else(|error| {
                debug!(asset_key = %asset_key, %error, "Using a placeholder for unreadable evaluation");
                placeholder_result(&asset_key, def.as_ref())
            });
        latest.insert(asset_key, result);
    }

    let max_storage_id = data.get("latest_storage_id").and_then(Value::as_i64);
    let timestamp = data.get("latest_evaluation_timestamp").and_then(Value::as_f64);
    let missing_rule_id = missing_rule_unique_id();

    let asset_keys: Vec<AssetKey> = asset_graph.map_or_else(
        || latest.keys().cloned().collect(),
        |graph| graph.automated_asset_keys(),
    );
    let infos = asset_keys.into_iter().map(|asset_key| {
        let def = partitions_def_of(asset_graph, &asset_key);
        let evaluation_result = latest
            .remove(&asset_key)
            .unwrap_or_else(|| placeholder_result(&asset_key, def.as_ref()));

        let mut extra_state_by_unique_id = ExtraStateMap::new();
        if asset_graph.is_some() {
            let handled = match def {
                Some(def) => AssetSubset::from_keys(
                    asset_key.clone(),
                    def,
                    handled_partitions.remove(&asset_key).unwrap_or_default(),
                ),
                None => AssetSubset::from_bool(asset_key.clone(), handled_keys.contains(&asset_key)),
            };
            if !handled.is_empty() {
                extra_state_by_unique_id.insert(missing_rule_id.clone(), ExtraState::Subset(handled));
            }
        }

        EvaluationInfo {
            asset_key,
            evaluation_result,
            max_storage_id,
            timestamp,
            extra_state_by_unique_id,
        }
    });

    Cursor::from_parts(default_evaluation_id, infos.collect::<Vec<_>>(), observed)
}

/// `(asset key, value)` pairs of the object stored under `field`.
fn entries<'a>(
    data: &'a Map<String, Value>,
    field: &str,
) -> impl Iterator<Item = (AssetKey, &'a Value)> {
    data.get(field)
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .map(|(key, value)| (AssetKey::from_user_string(key), value))
}

fn partitions_def_of(
    asset_graph: Option<&dyn AssetGraph>,
    asset_key: &AssetKey,
) -> Option<PartitionsDefinition> {
    match asset_graph?.partitions_def(asset_key) {
        Ok(def) => def,
        Err(error) => {
            debug!(asset_key = %asset_key, %error, "Reading legacy entry as unpartitioned");
            None
        }
    }
}

/// Identity of the "materialization is missing" rule leaf.
fn missing_rule_unique_id() -> String {
    let rule = MaterializeOnMissingRule;
    ConditionSnapshot::for_rule(rule.class_name(), &rule.description()).unique_id
}

/// Stand-in for an asset with no readable evaluation.
fn placeholder_result(
    asset_key: &AssetKey,
    partitions_def: Option<&PartitionsDefinition>,
) -> EvaluationResult {
    let empty = AssetSubset::empty(asset_key.clone(), partitions_def.cloned());
    EvaluationResult {
        condition_snapshot: ConditionSnapshot::placeholder(),
        true_subset: empty.clone(),
        candidate_subset: CandidateSubset::Subset(empty),
        start_timestamp: None,
        end_timestamp: None,
        subsets_with_metadata: Vec::new(),
        child_evaluations: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Legacy evaluation records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LegacyAssetEvaluation {
    #[serde(default)]
    rule_snapshots: Vec<LegacyRuleSnapshot>,
    #[serde(default)]
    partition_subsets_by_condition: Vec<(LegacyRuleEvaluation, Option<LegacySubset>)>,
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyRuleSnapshot {
    class_name: String,
    description: String,
    decision_type: LegacyDecisionType,
}

#[derive(Debug, Deserialize)]
struct LegacyRuleEvaluation {
    rule_snapshot: LegacyRuleSnapshot,
}

/// `"MATERIALIZE"`, or the tagged `{"__enum__": "AutoMaterializeDecisionType.MATERIALIZE"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LegacyDecisionType {
    Name(String),
    Tagged {
        #[serde(rename = "__enum__")]
        name: String,
    },
}

impl LegacyDecisionType {
    fn resolve(&self) -> Result<DecisionType, LegacyEntryError> {
        let (Self::Name(name) | Self::Tagged { name }) = self;
        match name.rsplit('.').next().unwrap_or_default() {
            "MATERIALIZE" => Ok(DecisionType::Materialize),
            "SKIP" => Ok(DecisionType::Skip),
            "DISCARD" => Ok(DecisionType::Discard),
            _ => Err(LegacyEntryError::DecisionType(name.clone())),
        }
    }
}

/// A serialized partition subset, bare or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacySubset {
    Text(String),
    Wrapped { serialized_subset: String },
}

impl LegacySubset {
    fn as_str(&self) -> &str {
        match self {
            Self::Text(text) | Self::Wrapped {
                serialized_subset: text,
            } => text,
        }
    }
}

/// A rule's identity and the partitions it was true for.
struct RuleOutcome {
    class_name: String,
    description: String,
    decision_type: DecisionType,
    true_subset: AssetSubset,
}

/// Convert a legacy per-asset evaluation into the result tree that
/// `Condition::from_rules` would produce for the same rules, so node
/// identities line up with the current tree.
fn legacy_evaluation_result(
    asset_key: &AssetKey,
    partitions_def: Option<&PartitionsDefinition>,
    value: &Value,
    current_time: DateTime<Utc>,
) -> Result<EvaluationResult, LegacyEntryError> {
    let record = LegacyAssetEvaluation::deserialize(value)?;
    let empty = AssetSubset::empty(asset_key.clone(), partitions_def.cloned());

    let mut outcomes = record
        .rule_snapshots
        .iter()
        .map(|snapshot| {
            Ok(RuleOutcome {
                class_name: snapshot.class_name.clone(),
                description: snapshot.description.clone(),
                decision_type: snapshot.decision_type.resolve()?,
                true_subset: empty.clone(),
            })
        })
        .collect::<Result<Vec<_>, LegacyEntryError>>()?;

    for (evaluation, serialized) in &record.partition_subsets_by_condition {
        let subset = match (partitions_def, serialized) {
            (None, None) => AssetSubset::from_bool(asset_key.clone(), true),
            (Some(def), Some(serialized)) => AssetSubset::from_keys(
                asset_key.clone(),
                def.clone(),
                def.deserialize_subset(serialized.as_str(), current_time)?,
            ),
            (None, Some(_)) => return Err(LegacyEntryError::UnexpectedSubset),
            (Some(_), None) => return Err(LegacyEntryError::MissingSubset),
        };
        let rule = &evaluation.rule_snapshot;
        match outcomes
            .iter_mut()
            .find(|o| o.class_name == rule.class_name && o.description == rule.description)
        {
            Some(outcome) => outcome.true_subset = outcome.true_subset.union(&subset),
            None => outcomes.push(RuleOutcome {
                class_name: rule.class_name.clone(),
                description: rule.description.clone(),
                decision_type: rule.decision_type.resolve()?,
                true_subset: subset,
            }),
        }
    }

    let branch = |decision: DecisionType, candidate: CandidateSubset| {
        let leaves: Vec<EvaluationResult> = outcomes
            .iter()
            .filter(|outcome| outcome.decision_type == decision)
            .map(|outcome| EvaluationResult {
                condition_snapshot: ConditionSnapshot::for_rule(
                    &outcome.class_name,
                    &outcome.description,
                ),
                ..node(outcome.true_subset.clone(), candidate.clone(), Vec::new())
            })
            .collect();
        let true_subset = leaves
            .iter()
            .fold(empty.clone(), |acc, leaf| acc.union(&leaf.true_subset));
        combinator(OR_CLASS_NAME, OR_DESCRIPTION, true_subset, candidate, leaves)
    };
    let negate = |inner: EvaluationResult, candidate: AssetSubset| {
        let true_subset = candidate.subtract(&inner.true_subset);
        combinator(
            NOT_CLASS_NAME,
            NOT_DESCRIPTION,
            true_subset,
            CandidateSubset::Subset(candidate),
            vec![inner],
        )
    };

    let materialize = branch(
        DecisionType::Materialize,
        CandidateSubset::HistoricalAllPartitions,
    );
    let requested = materialize.true_subset.clone();
    let skip = branch(DecisionType::Skip, CandidateSubset::Subset(requested.clone()));
    let not_skip = negate(skip, requested);
    let mut requested = not_skip.true_subset.clone();
    let mut children = vec![materialize, not_skip];

    if outcomes
        .iter()
        .any(|outcome| outcome.decision_type == DecisionType::Discard)
    {
        let discard = branch(
            DecisionType::Discard,
            CandidateSubset::Subset(requested.clone()),
        );
        let not_discard = negate(discard, requested);
        requested = not_discard.true_subset.clone();
        children.push(not_discard);
    }

    Ok(combinator(
        AND_CLASS_NAME,
        AND_DESCRIPTION,
        requested,
        CandidateSubset::HistoricalAllPartitions,
        children,
    ))
}

fn combinator(
    class_name: &str,
    description: &str,
    true_subset: AssetSubset,
    candidate_subset: CandidateSubset,
    child_evaluations: Vec<EvaluationResult>,
) -> EvaluationResult {
    EvaluationResult {
        condition_snapshot: ConditionSnapshot::for_children(
            class_name,
            description,
            child_evaluations
                .iter()
                .map(|child| child.condition_snapshot.unique_id.as_str()),
        ),
        ..node(true_subset, candidate_subset, child_evaluations)
    }
}

fn node(
    true_subset: AssetSubset,
    candidate_subset: CandidateSubset,
    child_evaluations: Vec<EvaluationResult>,
) -> EvaluationResult {
    EvaluationResult {
        condition_snapshot: ConditionSnapshot::placeholder(),
        true_subset,
        candidate_subset,
        start_timestamp: None,
        end_timestamp: None,
        subsets_with_metadata: Vec::new(),
        child_evaluations,
    }
}
