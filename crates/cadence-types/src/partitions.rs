//! Partition definitions: the space of partition keys an asset can have.
//!
//! Two shapes are supported:
//!
//! - [`PartitionsDefinition::Static`] -- a fixed, finite list of keys.
//! - [`PartitionsDefinition::TimeWindow`] -- one key per complete time window
//!   since a start instant. The space grows with the evaluation time and has
//!   no fixed upper bound, so callers must never assume it can be cheaply
//!   enumerated. Membership, size, and index lookups are computed
//!   arithmetically from the window cadence.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SubsetError;

/// Version tag written into serialized partition subsets.
const SERIALIZED_SUBSET_VERSION: u64 = 1;

/// The partition space of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionsDefinition {
    /// A fixed set of partition keys, in declaration order.
    Static {
        /// The partition keys.
        keys: Vec<String>,
    },
    /// One partition per complete time window since `start`.
    TimeWindow(TimeWindowPartitions),
}

impl PartitionsDefinition {
    /// Create a static definition from a list of keys.
    pub fn fixed<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Static {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Return whether `key` names an existing partition at `current_time`.
    pub fn contains(&self, key: &str, current_time: DateTime<Utc>) -> bool {
        match self {
            Self::Static { keys } => keys.iter().any(|k| k == key),
            Self::TimeWindow(windows) => windows.contains(key, current_time),
        }
    }

    /// Number of partitions that exist at `current_time`.
    pub fn num_partitions(&self, current_time: DateTime<Utc>) -> usize {
        match self {
            Self::Static { keys } => keys.len(),
            Self::TimeWindow(windows) => windows.num_partitions(current_time),
        }
    }

    /// Enumerate every partition key that exists at `current_time`.
    ///
    /// For time windows this is linear in the number of windows; the subset
    /// algebra only calls it when a subset has to be materialized.
    pub fn keys(&self, current_time: DateTime<Utc>) -> Vec<String> {
        match self {
            Self::Static { keys } => keys.clone(),
            Self::TimeWindow(windows) => windows.keys(current_time),
        }
    }

    /// Parse a serialized partition subset into the set of keys it names.
    ///
    /// Accepted encodings:
    ///
    /// - static: `{"version": 1, "subset": ["a", "b"]}` or a bare `["a", "b"]`
    /// - time window: `{"version": 1, "time_windows": [[start, end], ...]}`
    ///   with epoch-second bounds, end exclusive
    ///
    /// Keys that do not exist at `current_time` are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SubsetError`] if the string is not valid JSON or does not
    /// match the encoding for this definition.
    pub fn deserialize_subset(
        &self,
        serialized: &str,
        current_time: DateTime<Utc>,
    ) -> Result<BTreeSet<String>, SubsetError> {
        let value: Value = serde_json::from_str(serialized)?;
        match self {
            Self::Static { .. } => {
                let listed = match &value {
                    Value::Array(items) => items,
                    Value::Object(map) => {
                        check_version(map.get("version"))?;
                        map.get("subset").and_then(Value::as_array).ok_or_else(|| {
                            SubsetError::InvalidSerializedSubset {
                                reason: String::from("missing `subset` array"),
                            }
                        })?
                    }
                    _ => {
                        return Err(SubsetError::InvalidSerializedSubset {
                            reason: String::from("expected an object or array"),
                        });
                    }
                };
                let mut keys = BTreeSet::new();
                for item in listed {
                    let key = item
                        .as_str()
                        .ok_or_else(|| SubsetError::InvalidSerializedSubset {
                            reason: format!("partition key {item} is not a string"),
                        })?;
                    if self.contains(key, current_time) {
                        keys.insert(key.to_owned());
                    }
                }
                Ok(keys)
            }
            Self::TimeWindow(windows) => {
                let map = value
                    .as_object()
                    .ok_or_else(|| SubsetError::InvalidSerializedSubset {
                        reason: String::from("expected an object"),
                    })?;
                check_version(map.get("version"))?;
                let ranges = map
                    .get("time_windows")
                    .and_then(Value::as_array)
                    .ok_or_else(|| SubsetError::InvalidSerializedSubset {
                        reason: String::from("missing `time_windows` array"),
                    })?;
                let mut keys = BTreeSet::new();
                for range in ranges {
                    let (start, end) = parse_epoch_range(range)?;
                    keys.extend(windows.keys_in_range(start, end, current_time));
                }
                Ok(keys)
            }
        }
    }
}

/// Accept a missing version or version 1.
fn check_version(version: Option<&Value>) -> Result<(), SubsetError> {
    match version {
        None => Ok(()),
        Some(v) if v.as_u64() == Some(SERIALIZED_SUBSET_VERSION) => Ok(()),
        Some(v) => Err(SubsetError::InvalidSerializedSubset {
            reason: format!("unsupported subset version {v}"),
        }),
    }
}

/// Parse `[start, end]` epoch seconds into UTC instants.
fn parse_epoch_range(range: &Value) -> Result<(DateTime<Utc>, DateTime<Utc>), SubsetError> {
    let bound = |v: Option<&Value>| -> Result<DateTime<Utc>, SubsetError> {
        let seconds = v.and_then(Value::as_f64).ok_or_else(|| {
            SubsetError::InvalidSerializedSubset {
                reason: format!("time window bound in {range} is not a number"),
            }
        })?;
        #[allow(clippy::cast_possible_truncation)]
        let whole = seconds.floor() as i64;
        DateTime::from_timestamp(whole, 0).ok_or_else(|| SubsetError::InvalidSerializedSubset {
            reason: format!("time window bound {seconds} is out of range"),
        })
    };
    let pair = range
        .as_array()
        .ok_or_else(|| SubsetError::InvalidSerializedSubset {
            reason: format!("time window {range} is not a pair"),
        })?;
    Ok((bound(pair.first())?, bound(pair.get(1))?))
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

/// Length of one time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// One partition per hour.
    Hourly,
    /// One partition per day.
    Daily,
    /// One partition per week.
    Weekly,
}

impl Cadence {
    /// Window length.
    pub fn step(self) -> TimeDelta {
        match self {
            Self::Hourly => TimeDelta::hours(1),
            Self::Daily => TimeDelta::days(1),
            Self::Weekly => TimeDelta::weeks(1),
        }
    }

    /// Default `strftime` format for keys of this cadence.
    pub const fn default_format(self) -> &'static str {
        match self {
            Self::Hourly => "%Y-%m-%d-%H:%M",
            Self::Daily | Self::Weekly => "%Y-%m-%d",
        }
    }
}

/// A time-window partition space.
///
/// Window `i` starts at `start + i * step` and exists once it has fully
/// elapsed, i.e. when `start + (i + 1) * step <= current_time`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindowPartitions {
    /// Start of the first window.
    pub start: DateTime<Utc>,
    /// Window length.
    pub cadence: Cadence,
    /// `strftime` format used to render and parse partition keys.
    pub format: String,
}

impl TimeWindowPartitions {
    /// Create a time-window space with the cadence's default key format.
    pub fn new(start: DateTime<Utc>, cadence: Cadence) -> Self {
        Self {
            start,
            cadence,
            format: cadence.default_format().to_owned(),
        }
    }

    /// Daily partitions starting at `start`.
    pub fn daily(start: DateTime<Utc>) -> Self {
        Self::new(start, Cadence::Daily)
    }

    /// Hourly partitions starting at `start`.
    pub fn hourly(start: DateTime<Utc>) -> Self {
        Self::new(start, Cadence::Hourly)
    }

    fn step_seconds(&self) -> i64 {
        self.cadence.step().num_seconds()
    }

    /// Number of complete windows at `current_time`.
    pub fn num_partitions(&self, current_time: DateTime<Utc>) -> usize {
        self.windows_before(current_time)
    }

    /// Number of windows that end at or before `instant`.
    fn windows_before(&self, instant: DateTime<Utc>) -> usize {
        let elapsed = instant.signed_duration_since(self.start).num_seconds();
        if elapsed <= 0 {
            return 0;
        }
        let count = elapsed.checked_div(self.step_seconds()).unwrap_or(0);
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    /// Number of windows that start before `instant`.
    fn windows_starting_before(&self, instant: DateTime<Utc>) -> usize {
        let elapsed = instant.signed_duration_since(self.start).num_seconds();
        if elapsed <= 0 {
            return 0;
        }
        let step = self.step_seconds();
        let full = elapsed.checked_div(step).unwrap_or(0);
        let partial = i64::from(elapsed.checked_rem(step).unwrap_or(0) > 0);
        usize::try_from(full.saturating_add(partial)).unwrap_or(usize::MAX)
    }

    /// Render the key of window `index`.
    pub fn key_for_index(&self, index: usize) -> Option<String> {
        let index = i32::try_from(index).ok()?;
        let offset = self.cadence.step().checked_mul(index)?;
        let window_start = self.start.checked_add_signed(offset)?;
        Some(window_start.format(&self.format).to_string())
    }

    /// Index of the window named by `key`, if the key parses, is aligned to
    /// the cadence, and does not precede `start`.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        let instant = self.parse_key(key)?;
        let elapsed = instant.signed_duration_since(self.start).num_seconds();
        if elapsed < 0 {
            return None;
        }
        let step = self.step_seconds();
        if elapsed.checked_rem(step)? != 0 {
            return None;
        }
        usize::try_from(elapsed.checked_div(step)?).ok()
    }

    fn parse_key(&self, key: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(key, &self.format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(key, &self.format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
            .map(|naive| naive.and_utc())
    }

    /// Return whether `key` names a complete window at `current_time`.
    pub fn contains(&self, key: &str, current_time: DateTime<Utc>) -> bool {
        self.index_of(key)
            .is_some_and(|index| index < self.num_partitions(current_time))
    }

    /// Every key that exists at `current_time`, oldest first.
    pub fn keys(&self, current_time: DateTime<Utc>) -> Vec<String> {
        (0..self.num_partitions(current_time))
            .filter_map(|index| self.key_for_index(index))
            .collect()
    }

    /// Keys of windows starting in `[range_start, range_end)` that exist at
    /// `current_time`.
    pub fn keys_in_range(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        current_time: DateTime<Utc>,
    ) -> Vec<String> {
        let first = self.windows_starting_before(range_start);
        let last = self
            .windows_starting_before(range_end)
            .min(self.num_partitions(current_time));
        (first..last)
            .filter_map(|index| self.key_for_index(index))
            .collect()
    }
}
