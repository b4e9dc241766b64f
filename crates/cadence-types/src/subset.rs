//! The partition subset algebra.
//!
//! An [`AssetSubset`] answers "which partitions of this asset are currently
//! true". Non-partitioned assets carry a single boolean. Partitioned assets
//! carry either an explicit finite key set or a co-finite set: "every
//! partition that exists at time `t`, except these keys". The co-finite form
//! is how "all partitions" is represented, and it keeps union, intersection,
//! subtraction, membership, and size closed without enumerating the
//! partition space (which, for time windows, has no fixed upper bound).
//!
//! # Invariants
//!
//! - A subset has a [`PartitionsDefinition`] if and only if its value is not
//!   [`SubsetValue::Bool`].
//! - Binary operations require both operands to have the same asset key and
//!   the same partitions definition. Mixing them is a programming error and
//!   fails loudly.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssetKey, PartitionsDefinition, SubsetError};

/// The value of an [`AssetSubset`].
#[derive(Debug, Clone)]
pub enum SubsetValue {
    /// A non-partitioned asset: true or false.
    Bool(bool),
    /// An explicit, finite set of partition keys.
    Keys(BTreeSet<String>),
    /// Every partition that exists at `current_time`, minus `excluded`.
    ///
    /// With an empty exclusion set this is "all partitions".
    AllExcept {
        /// Instant against which the partition space is evaluated.
        current_time: DateTime<Utc>,
        /// Keys removed from the full space.
        excluded: BTreeSet<String>,
    },
}

/// The set of partitions of one asset that satisfy some condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SerializedSubset", into = "SerializedSubset")]
pub struct AssetSubset {
    /// The asset this subset belongs to.
    pub asset_key: AssetKey,
    /// The asset's partition space, or `None` for non-partitioned assets.
    pub partitions_def: Option<PartitionsDefinition>,
    /// Which partitions are included.
    pub value: SubsetValue,
}

impl AssetSubset {
    /// The empty subset.
    pub fn empty(asset_key: AssetKey, partitions_def: Option<PartitionsDefinition>) -> Self {
        let value = if partitions_def.is_some() {
            SubsetValue::Keys(BTreeSet::new())
        } else {
            SubsetValue::Bool(false)
        };
        Self {
            asset_key,
            partitions_def,
            value,
        }
    }

    /// Every partition that exists at `current_time`.
    ///
    /// No partition keys are enumerated.
    pub fn all(
        asset_key: AssetKey,
        partitions_def: Option<PartitionsDefinition>,
        current_time: DateTime<Utc>,
    ) -> Self {
        let value = if partitions_def.is_some() {
            SubsetValue::AllExcept {
                current_time,
                excluded: BTreeSet::new(),
            }
        } else {
            SubsetValue::Bool(true)
        };
        Self {
            asset_key,
            partitions_def,
            value,
        }
    }

    /// A subset of a non-partitioned asset.
    pub const fn from_bool(asset_key: AssetKey, value: bool) -> Self {
        Self {
            asset_key,
            partitions_def: None,
            value: SubsetValue::Bool(value),
        }
    }

    /// An explicit subset of a partitioned asset.
    pub fn from_keys<I, S>(asset_key: AssetKey, partitions_def: PartitionsDefinition, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            asset_key,
            partitions_def: Some(partitions_def),
            value: SubsetValue::Keys(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// The same partitions, relabelled as belonging to another asset with the
    /// same partitioning.
    #[must_use]
    pub fn with_asset_key(mut self, asset_key: AssetKey) -> Self {
        self.asset_key = asset_key;
        self
    }

    /// Whether set operations with `other` are allowed: same asset, same
    /// partitioning.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.asset_key == other.asset_key && self.partitions_def == other.partitions_def
    }

    /// Whether this subset is exactly "all partitions" of a partitioned
    /// asset, in its unmaterialized form.
    pub fn is_all_partitions(&self) -> bool {
        matches!(&self.value, SubsetValue::AllExcept { excluded, .. } if excluded.is_empty())
    }

    /// Whether the partition `key` is included.
    ///
    /// Always false for non-partitioned assets; use [`bool_value`] there.
    ///
    /// [`bool_value`]: AssetSubset::bool_value
    pub fn contains(&self, key: &str) -> bool {
        match &self.value {
            SubsetValue::Bool(_) => false,
            SubsetValue::Keys(keys) => keys.contains(key),
            SubsetValue::AllExcept {
                current_time,
                excluded,
            } => !excluded.contains(key) && self.exists(key, *current_time),
        }
    }

    /// The boolean value of a non-partitioned subset, or whether a partitioned
    /// subset is non-empty.
    pub fn bool_value(&self) -> bool {
        match &self.value {
            SubsetValue::Bool(value) => *value,
            _ => self.size() > 0,
        }
    }

    /// Number of partitions included (0 or 1 for non-partitioned assets).
    ///
    /// For the co-finite form this is computed from the partition space size
    /// without enumerating keys.
    pub fn size(&self) -> usize {
        match &self.value {
            SubsetValue::Bool(value) => usize::from(*value),
            SubsetValue::Keys(keys) => keys.len(),
            SubsetValue::AllExcept {
                current_time,
                excluded,
            } => {
                let total = self
                    .partitions_def
                    .as_ref()
                    .map_or(0, |def| def.num_partitions(*current_time));
                let removed = excluded
                    .iter()
                    .filter(|key| self.exists(key, *current_time))
                    .count();
                total.saturating_sub(removed)
            }
        }
    }

    /// Whether no partitions are included.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The included partition keys, enumerating the space if necessary.
    ///
    /// Empty for non-partitioned assets.
    pub fn partition_keys(&self) -> BTreeSet<String> {
        match &self.value {
            SubsetValue::Bool(_) => BTreeSet::new(),
            SubsetValue::Keys(keys) => keys.clone(),
            SubsetValue::AllExcept {
                current_time,
                excluded,
            } => self
                .partitions_def
                .as_ref()
                .map(|def| def.keys(*current_time))
                .unwrap_or_default()
                .into_iter()
                .filter(|key| !excluded.contains(key))
                .collect(),
        }
    }

    /// Partitions in either subset.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        self.assert_compatible(other, "union");
        let value = match self.aligned_values(other) {
            (SubsetValue::Bool(a), SubsetValue::Bool(b)) => SubsetValue::Bool(a || b),
            (SubsetValue::Keys(a), SubsetValue::Keys(b)) => {
                SubsetValue::Keys(a.union(&b).cloned().collect())
            }
            (
                SubsetValue::AllExcept {
                    current_time,
                    excluded,
                },
                SubsetValue::Keys(keys),
            )
            | (
                SubsetValue::Keys(keys),
                SubsetValue::AllExcept {
                    current_time,
                    excluded,
                },
            ) => SubsetValue::AllExcept {
                current_time,
                excluded: excluded.difference(&keys).cloned().collect(),
            },
            (
                SubsetValue::AllExcept {
                    current_time,
                    excluded: a,
                },
                SubsetValue::AllExcept { excluded: b, .. },
            ) => SubsetValue::AllExcept {
                current_time,
                excluded: a.intersection(&b).cloned().collect(),
            },
            (a, b) => mismatched_values(&a, &b),
        };
        self.with_value(value)
    }

    /// Partitions in both subsets.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        self.assert_compatible(other, "intersect");
        let value = match self.aligned_values(other) {
            (SubsetValue::Bool(a), SubsetValue::Bool(b)) => SubsetValue::Bool(a && b),
            (SubsetValue::Keys(a), SubsetValue::Keys(b)) => {
                SubsetValue::Keys(a.intersection(&b).cloned().collect())
            }
            (
                SubsetValue::AllExcept {
                    current_time,
                    excluded,
                },
                SubsetValue::Keys(keys),
            )
            | (
                SubsetValue::Keys(keys),
                SubsetValue::AllExcept {
                    current_time,
                    excluded,
                },
            ) => SubsetValue::Keys(
                keys.into_iter()
                    .filter(|key| !excluded.contains(key) && self.exists(key, current_time))
                    .collect(),
            ),
            (
                SubsetValue::AllExcept {
                    current_time,
                    excluded: a,
                },
                SubsetValue::AllExcept { excluded: b, .. },
            ) => SubsetValue::AllExcept {
                current_time,
                excluded: a.union(&b).cloned().collect(),
            },
            (a, b) => mismatched_values(&a, &b),
        };
        self.with_value(value)
    }

    /// Partitions in `self` but not in `other`.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        self.assert_compatible(other, "subtract");
        let value = match self.aligned_values(other) {
            (SubsetValue::Bool(a), SubsetValue::Bool(b)) => SubsetValue::Bool(a && !b),
            (SubsetValue::Keys(a), SubsetValue::Keys(b)) => {
                SubsetValue::Keys(a.difference(&b).cloned().collect())
            }
            (
                SubsetValue::AllExcept {
                    current_time,
                    excluded,
                },
                SubsetValue::Keys(keys),
            ) => SubsetValue::AllExcept {
                current_time,
                excluded: excluded.union(&keys).cloned().collect(),
            },
            (
                SubsetValue::Keys(keys),
                SubsetValue::AllExcept {
                    current_time,
                    excluded,
                },
            ) => SubsetValue::Keys(
                keys.into_iter()
                    .filter(|key| excluded.contains(key) || !self.exists(key, current_time))
                    .collect(),
            ),
            (
                SubsetValue::AllExcept {
                    current_time,
                    excluded: a,
                },
                SubsetValue::AllExcept { excluded: b, .. },
            ) => SubsetValue::Keys(
                b.into_iter()
                    .filter(|key| !a.contains(key) && self.exists(key, current_time))
                    .collect(),
            ),
            (a, b) => mismatched_values(&a, &b),
        };
        self.with_value(value)
    }

    fn with_value(&self, value: SubsetValue) -> Self {
        Self {
            asset_key: self.asset_key.clone(),
            partitions_def: self.partitions_def.clone(),
            value,
        }
    }

    fn exists(&self, key: &str, current_time: DateTime<Utc>) -> bool {
        self.partitions_def
            .as_ref()
            .is_some_and(|def| def.contains(key, current_time))
    }

    fn assert_compatible(&self, other: &Self, operation: &str) {
        assert!(
            self.is_compatible_with(other),
            "cannot {operation} subsets of different assets or partitionings: {} and {}",
            self.asset_key,
            other.asset_key,
        );
    }

    /// Both values, with co-finite sets evaluated at different instants
    /// materialized so the pairwise rules can assume a shared universe.
    fn aligned_values(&self, other: &Self) -> (SubsetValue, SubsetValue) {
        match (&self.value, &other.value) {
            (
                SubsetValue::AllExcept {
                    current_time: a, ..
                },
                SubsetValue::AllExcept {
                    current_time: b, ..
                },
            ) if a != b => (
                SubsetValue::Keys(self.partition_keys()),
                SubsetValue::Keys(other.partition_keys()),
            ),
            (a, b) => (a.clone(), b.clone()),
        }
    }
}

/// Guarded by `assert_compatible`: a definition is present on both sides or
/// on neither, so booleans never meet partition sets.
#[allow(clippy::panic)]
fn mismatched_values(a: &SubsetValue, b: &SubsetValue) -> ! {
    panic!("subset values of incompatible kinds: {a:?} and {b:?}")
}

impl PartialEq for AssetSubset {
    fn eq(&self, other: &Self) -> bool {
        if self.asset_key != other.asset_key || self.partitions_def != other.partitions_def {
            return false;
        }
        match (&self.value, &other.value) {
            (SubsetValue::Bool(a), SubsetValue::Bool(b)) => a == b,
            (SubsetValue::Keys(a), SubsetValue::Keys(b)) => a == b,
            (
                SubsetValue::AllExcept {
                    current_time: ta,
                    excluded: a,
                },
                SubsetValue::AllExcept {
                    current_time: tb,
                    excluded: b,
                },
            ) if ta == tb => {
                let live = |set: &BTreeSet<String>| -> BTreeSet<String> {
                    set.iter()
                        .filter(|key| self.exists(key, *ta))
                        .cloned()
                        .collect()
                };
                live(a) == live(b)
            }
            (SubsetValue::Keys(keys), _) => {
                keys.len() == other.size() && keys.iter().all(|key| other.contains(key))
            }
            (_, SubsetValue::Keys(keys)) => {
                keys.len() == self.size() && keys.iter().all(|key| self.contains(key))
            }
            _ => self.partition_keys() == other.partition_keys(),
        }
    }
}

impl Eq for AssetSubset {}

impl core::fmt::Display for AssetSubset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.value {
            SubsetValue::Bool(value) => write!(f, "{}={value}", self.asset_key),
            SubsetValue::Keys(keys) => {
                let listed: Vec<&str> = keys.iter().map(String::as_str).collect();
                write!(f, "{}[{}]", self.asset_key, listed.join(", "))
            }
            SubsetValue::AllExcept { excluded, .. } if excluded.is_empty() => {
                write!(f, "{}[all]", self.asset_key)
            }
            SubsetValue::AllExcept { excluded, .. } => {
                let listed: Vec<&str> = excluded.iter().map(String::as_str).collect();
                write!(f, "{}[all except {}]", self.asset_key, listed.join(", "))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Serialized form
// ---------------------------------------------------------------------------

/// On-disk shape of an [`AssetSubset`]. Co-finite sets are materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedSubset {
    asset_key: AssetKey,
    #[serde(default)]
    partitions_def: Option<PartitionsDefinition>,
    value: SerializedValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum SerializedValue {
    Bool(bool),
    Keys(BTreeSet<String>),
}

impl From<AssetSubset> for SerializedSubset {
    fn from(subset: AssetSubset) -> Self {
        let value = match &subset.value {
            SubsetValue::Bool(value) => SerializedValue::Bool(*value),
            SubsetValue::Keys(_) | SubsetValue::AllExcept { .. } => {
                SerializedValue::Keys(subset.partition_keys())
            }
        };
        Self {
            asset_key: subset.asset_key,
            partitions_def: subset.partitions_def,
            value,
        }
    }
}

impl TryFrom<SerializedSubset> for AssetSubset {
    type Error = SubsetError;

    fn try_from(serialized: SerializedSubset) -> Result<Self, Self::Error> {
        let value = match (&serialized.partitions_def, serialized.value) {
            (None, SerializedValue::Bool(value)) => SubsetValue::Bool(value),
            (Some(_), SerializedValue::Keys(keys)) => SubsetValue::Keys(keys),
            (None, SerializedValue::Keys(_)) => {
                return Err(SubsetError::ShapeMismatch {
                    asset_key: serialized.asset_key,
                    reason: "partition keys without a partitions definition",
                });
            }
            (Some(_), SerializedValue::Bool(_)) => {
                return Err(SubsetError::ShapeMismatch {
                    asset_key: serialized.asset_key,
                    reason: "boolean value with a partitions definition",
                });
            }
        };
        Ok(Self {
            asset_key: serialized.asset_key,
            partitions_def: serialized.partitions_def,
            value,
        })
    }
}
