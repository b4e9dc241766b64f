//! The cursor value.

use std::collections::BTreeMap;

use cadence_condition::{AssetGraph, EvaluationInfo, EvaluationResult};
use cadence_types::AssetKey;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CursorError, DecodeFailure, backcompat, codec};

/// State stored between ticks.
///
/// Cursors are immutable values: [`Cursor::with_updates`] returns a new
/// cursor and leaves the receiver untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CursorRecord", into = "CursorRecord")]
pub struct Cursor {
    evaluation_id: i64,
    previous_evaluation_info: BTreeMap<AssetKey, EvaluationInfo>,
    last_observe_request_timestamp_by_asset_key: BTreeMap<AssetKey, f64>,
}

impl Cursor {
    /// A cursor with no prior results.
    pub const fn empty(evaluation_id: i64) -> Self {
        Self {
            evaluation_id,
            previous_evaluation_info: BTreeMap::new(),
            last_observe_request_timestamp_by_asset_key: BTreeMap::new(),
        }
    }

    /// A cursor from its parts. Later infos for the same asset replace
    /// earlier ones.
    pub fn from_parts(
        evaluation_id: i64,
        previous_evaluation_info: impl IntoIterator<Item = EvaluationInfo>,
        last_observe_request_timestamp_by_asset_key: BTreeMap<AssetKey, f64>,
    ) -> Self {
        Self {
            evaluation_id,
            previous_evaluation_info: previous_evaluation_info
                .into_iter()
                .map(|info| (info.asset_key.clone(), info))
                .collect(),
            last_observe_request_timestamp_by_asset_key,
        }
    }

    /// The tick that produced this cursor.
    pub const fn evaluation_id(&self) -> i64 {
        self.evaluation_id
    }

    /// Every asset's result from the last tick, ordered by asset key.
    pub fn previous_evaluation_info(&self) -> impl Iterator<Item = &EvaluationInfo> {
        self.previous_evaluation_info.values()
    }

    /// When each asset last had an observation requested, in Unix seconds.
    pub const fn last_observe_request_timestamps(&self) -> &BTreeMap<AssetKey, f64> {
        &self.last_observe_request_timestamp_by_asset_key
    }

    /// The last tick's result for `asset_key`, or `None` if the asset is new
    /// or was not evaluated.
    pub fn get_previous_evaluation_info(&self, asset_key: &AssetKey) -> Option<&EvaluationInfo> {
        self.previous_evaluation_info.get(asset_key)
    }

    /// The last tick's result tree for `asset_key`.
    pub fn get_previous_evaluation_result(
        &self,
        asset_key: &AssetKey,
    ) -> Option<&EvaluationResult> {
        self.get_previous_evaluation_info(asset_key)
            .map(|info| &info.evaluation_result)
    }

    /// The cursor for the next tick.
    ///
    /// Prior results are replaced wholesale by `evaluation_info`. Observation
    /// timestamps are merged: only `newly_observed` keys are set to
    /// `evaluation_timestamp`, the rest are kept.
    #[must_use]
    pub fn with_updates(
        &self,
        evaluation_id: i64,
        evaluation_timestamp: f64,
        newly_observed: &[AssetKey],
        evaluation_info: impl IntoIterator<Item = EvaluationInfo>,
    ) -> Self {
        let mut observed = self.last_observe_request_timestamp_by_asset_key.clone();
        observed.extend(
            newly_observed
                .iter()
                .map(|key| (key.clone(), evaluation_timestamp)),
        );
        Self::from_parts(evaluation_id, evaluation_info, observed)
    }

    /// Encode in the primary wire format.
    pub fn serialize(&self) -> Result<String, CursorError> {
        codec::encode(self)
    }

    /// Decode from the primary wire format only.
    pub fn decode(raw: &str) -> Result<Self, DecodeFailure> {
        codec::decode(raw)
    }

    /// Read a stored cursor in either wire format.
    ///
    /// `None` yields an empty cursor at `default_evaluation_id`. Strings that
    /// are not in the primary format are handed to the legacy parser, which
    /// uses `asset_graph` to interpret partition data. This never fails.
    pub fn from_serialized(
        raw: Option<&str>,
        asset_graph: Option<&dyn AssetGraph>,
        default_evaluation_id: i64,
    ) -> Self {
        let Some(raw) = raw else {
            return Self::empty(default_evaluation_id);
        };
        match Self::decode(raw) {
            Ok(cursor) => cursor,
            Err(failure) => {
                debug!(
                    %failure,
                    "Cursor is not in the primary format, reading legacy format"
                );
                backcompat::parse_legacy(raw, asset_graph, default_evaluation_id, Utc::now())
            }
        }
    }

    /// Whether `other` holds the same state, comparing result trees with
    /// [`EvaluationResult::equivalent_to_stored`].
    pub fn equivalent_to(&self, other: &Self) -> bool {
        self.evaluation_id == other.evaluation_id
            && same_timestamps(
                &self.last_observe_request_timestamp_by_asset_key,
                &other.last_observe_request_timestamp_by_asset_key,
            )
            && self.previous_evaluation_info.len() == other.previous_evaluation_info.len()
            && self
                .previous_evaluation_info
                .iter()
                .zip(&other.previous_evaluation_info)
                .all(|((key, mine), (other_key, theirs))| {
                    key == other_key
                        && mine.max_storage_id == theirs.max_storage_id
                        && mine.timestamp.map(f64::to_bits) == theirs.timestamp.map(f64::to_bits)
                        && mine.extra_state_by_unique_id == theirs.extra_state_by_unique_id
                        && mine
                            .evaluation_result
                            .equivalent_to_stored(Some(&theirs.evaluation_result))
                })
    }
}

fn same_timestamps(a: &BTreeMap<AssetKey, f64>, b: &BTreeMap<AssetKey, f64>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
}

// ---------------------------------------------------------------------------
// Serialized form
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct CursorRecord {
    evaluation_id: i64,
    #[serde(default)]
    previous_evaluation_info: Vec<EvaluationInfo>,
    #[serde(default, with = "observe_timestamps")]
    last_observe_request_timestamp_by_asset_key: BTreeMap<AssetKey, f64>,
}

impl From<CursorRecord> for Cursor {
    fn from(record: CursorRecord) -> Self {
        Self::from_parts(
            record.evaluation_id,
            record.previous_evaluation_info,
            record.last_observe_request_timestamp_by_asset_key,
        )
    }
}

impl From<Cursor> for CursorRecord {
    fn from(cursor: Cursor) -> Self {
        Self {
            evaluation_id: cursor.evaluation_id,
            previous_evaluation_info: cursor.previous_evaluation_info.into_values().collect(),
            last_observe_request_timestamp_by_asset_key: cursor
                .last_observe_request_timestamp_by_asset_key,
        }
    }
}

/// Asset keys are structured, so the map is written as `[[key, seconds], ..]`.
mod observe_timestamps {
    use std::collections::BTreeMap;

    use cadence_types::AssetKey;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<AssetKey, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<AssetKey, f64>, D::Error> {
        Ok(Vec::<(AssetKey, f64)>::deserialize(deserializer)?
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use cadence_condition::{CandidateSubset, ConditionSnapshot, ExtraStateMap};
    use cadence_types::AssetSubset;
    use serde_json::Value;

    use super::*;

    fn info(name: &str, storage_id: i64) -> EvaluationInfo {
        let key = AssetKey::from(name);
        EvaluationInfo {
            asset_key: key.clone(),
            evaluation_result: EvaluationResult {
                condition_snapshot: ConditionSnapshot::for_rule("R", "r"),
                true_subset: AssetSubset::from_bool(key.clone(), true),
                candidate_subset: CandidateSubset::Subset(AssetSubset::from_bool(key, true)),
                start_timestamp: Some(1.0),
                end_timestamp: Some(1.5),
                subsets_with_metadata: Vec::new(),
                child_evaluations: Vec::new(),
            },
            max_storage_id: Some(storage_id),
            timestamp: Some(2.0),
            extra_state_by_unique_id: ExtraStateMap::new(),
        }
    }

    #[test]
    fn empty_cursor_has_no_results() {
        let cursor = Cursor::empty(0);
        assert_eq!(cursor.evaluation_id(), 0);
        assert_eq!(cursor.previous_evaluation_info().count(), 0);
        assert!(
            cursor
                .get_previous_evaluation_info(&AssetKey::from("a"))
                .is_none()
        );
    }

    #[test]
    fn with_updates_replaces_results_and_merges_observations() {
        let observed = BTreeMap::from([(AssetKey::from("a"), 10.0), (AssetKey::from("b"), 11.0)]);
        let first = Cursor::from_parts(4, [info("a", 1)], observed);
        let second = first.with_updates(5, 20.0, &[AssetKey::from("b")], [info("c", 2)]);

        assert_eq!(second.evaluation_id(), 5);
        assert!(
            second
                .get_previous_evaluation_info(&AssetKey::from("a"))
                .is_none()
        );
        assert_eq!(
            second
                .get_previous_evaluation_info(&AssetKey::from("c"))
                .and_then(|info| info.max_storage_id),
            Some(2)
        );
        let stamps = second.last_observe_request_timestamps();
        assert_eq!(stamps.get(&AssetKey::from("a")), Some(&10.0));
        assert_eq!(stamps.get(&AssetKey::from("b")), Some(&20.0));

        // The receiver is unchanged.
        assert_eq!(first.evaluation_id(), 4);
        assert!(
            first
                .get_previous_evaluation_result(&AssetKey::from("a"))
                .is_some()
        );
    }

    #[test]
    fn observation_map_is_written_as_pairs() {
        let cursor = Cursor::from_parts(
            1,
            Vec::new(),
            BTreeMap::from([(AssetKey::new(["a", "b"]), 3.5)]),
        );
        let json = serde_json::to_value(&cursor).unwrap();
        assert_eq!(
            json["last_observe_request_timestamp_by_asset_key"],
            serde_json::json!([[{"path": ["a", "b"]}, 3.5]])
        );
        assert!(matches!(json["previous_evaluation_info"], Value::Array(_)));
    }

    #[test]
    fn serialize_round_trips() {
        let cursor = Cursor::from_parts(
            9,
            [info("a", 3), info("b", 4)],
            BTreeMap::from([(AssetKey::from("a"), 7.25)]),
        );
        let raw = cursor.serialize().unwrap();
        let restored = Cursor::decode(&raw).unwrap();
        assert!(cursor.equivalent_to(&restored));
        assert_eq!(restored, cursor);
    }

    #[test]
    fn missing_raw_cursor_uses_default_id() {
        let cursor = Cursor::from_serialized(None, None, 12);
        assert_eq!(cursor, Cursor::empty(12));
    }
}
