//! The read-only view of the asset graph and the instance.
//!
//! The engine never talks to storage directly. Everything it needs to know
//! about the world ("what partitions exist", "what was materialized", "what
//! time is it") comes through [`AssetGraph`] and [`InstanceQuery`].
//! Implementations may cache per tick; the engine does not.
//!
//! [`InMemoryInstance`] is a complete in-process implementation used by the
//! tick driver's tests and by embedders that keep state in memory.

use std::collections::BTreeMap;

use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition};
use chrono::{DateTime, Utc};

use crate::QueryError;

/// Static shape of the asset graph.
pub trait AssetGraph: Send + Sync {
    /// Partition space of `asset_key`, or `None` if it is not partitioned.
    fn partitions_def(&self, asset_key: &AssetKey)
    -> Result<Option<PartitionsDefinition>, QueryError>;

    /// Direct upstream dependencies of `asset_key`.
    fn parents(&self, asset_key: &AssetKey) -> Result<Vec<AssetKey>, QueryError>;

    /// Every asset that carries an automation condition.
    fn automated_asset_keys(&self) -> Vec<AssetKey>;
}

/// Live instance state, read once per asset per tick.
pub trait InstanceQuery: AssetGraph {
    /// The instant the tick evaluates against.
    fn evaluation_time(&self) -> DateTime<Utc>;

    /// High-water mark of the instance event log, if any event exists.
    fn max_storage_id(&self) -> Option<i64>;

    /// Every partition of `asset_key` that has ever been materialized.
    fn materialized_subset(&self, asset_key: &AssetKey) -> Result<AssetSubset, QueryError>;

    /// Partitions of `asset_key` materialized by an event with a storage id
    /// greater than `after`. `None` means "since the beginning".
    fn updated_after(
        &self,
        asset_key: &AssetKey,
        after: Option<i64>,
    ) -> Result<AssetSubset, QueryError>;
}

// ---------------------------------------------------------------------------
// In-memory instance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct AssetRecord {
    partitions_def: Option<PartitionsDefinition>,
    parents: Vec<AssetKey>,
    automated: bool,
    materializations: Vec<Materialization>,
}

#[derive(Debug, Clone)]
struct Materialization {
    storage_id: i64,
    partition_key: Option<String>,
}

/// An [`InstanceQuery`] backed by in-process maps.
///
/// Storage ids are assigned sequentially starting at 1, one per recorded
/// materialization.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInstance {
    assets: BTreeMap<AssetKey, AssetRecord>,
    evaluation_time: DateTime<Utc>,
    last_storage_id: Option<i64>,
}

impl InMemoryInstance {
    /// An empty instance evaluating at `evaluation_time`.
    pub fn new(evaluation_time: DateTime<Utc>) -> Self {
        Self {
            evaluation_time,
            ..Self::default()
        }
    }

    /// Register an automated asset with its partitioning and parents.
    pub fn add_asset(
        &mut self,
        asset_key: AssetKey,
        partitions_def: Option<PartitionsDefinition>,
        parents: Vec<AssetKey>,
    ) -> &mut Self {
        self.insert(asset_key, partitions_def, parents, true)
    }

    /// Register an asset that is part of the graph but carries no condition.
    pub fn add_source_asset(
        &mut self,
        asset_key: AssetKey,
        partitions_def: Option<PartitionsDefinition>,
    ) -> &mut Self {
        self.insert(asset_key, partitions_def, Vec::new(), false)
    }

    fn insert(
        &mut self,
        asset_key: AssetKey,
        partitions_def: Option<PartitionsDefinition>,
        parents: Vec<AssetKey>,
        automated: bool,
    ) -> &mut Self {
        self.assets.insert(
            asset_key,
            AssetRecord {
                partitions_def,
                parents,
                automated,
                materializations: Vec::new(),
            },
        );
        self
    }

    /// Move the evaluation clock.
    pub const fn set_evaluation_time(&mut self, evaluation_time: DateTime<Utc>) {
        self.evaluation_time = evaluation_time;
    }

    /// Record a materialization and return its storage id.
    ///
    /// `partition_key` must be `None` exactly when the asset is not
    /// partitioned.
    pub fn record_materialization(
        &mut self,
        asset_key: &AssetKey,
        partition_key: Option<&str>,
    ) -> Result<i64, QueryError> {
        let storage_id = self
            .last_storage_id
            .map_or(Some(1), |id| id.checked_add(1))
            .ok_or_else(|| QueryError::Backend {
                message: "storage id overflow".to_owned(),
            })?;
        let record = self
            .assets
            .get_mut(asset_key)
            .ok_or_else(|| QueryError::UnknownAsset {
                asset_key: asset_key.clone(),
            })?;
        if record.partitions_def.is_some() != partition_key.is_some() {
            return Err(QueryError::Backend {
                message: format!("partition key does not match the partitioning of {asset_key}"),
            });
        }
        record.materializations.push(Materialization {
            storage_id,
            partition_key: partition_key.map(ToOwned::to_owned),
        });
        self.last_storage_id = Some(storage_id);
        Ok(storage_id)
    }

    fn record(&self, asset_key: &AssetKey) -> Result<&AssetRecord, QueryError> {
        self.assets
            .get(asset_key)
            .ok_or_else(|| QueryError::UnknownAsset {
                asset_key: asset_key.clone(),
            })
    }

    fn subset_where<F>(&self, asset_key: &AssetKey, keep: F) -> Result<AssetSubset, QueryError>
    where
        F: Fn(&Materialization) -> bool,
    {
        let record = self.record(asset_key)?;
        let mut matching = record.materializations.iter().filter(|m| keep(m));
        Ok(match &record.partitions_def {
            None => AssetSubset::from_bool(asset_key.clone(), matching.next().is_some()),
            Some(def) => AssetSubset::from_keys(
                asset_key.clone(),
                def.clone(),
                matching.filter_map(|m| m.partition_key.clone()),
            ),
        })
    }
}

impl AssetGraph for InMemoryInstance {
    fn partitions_def(
        &self,
        asset_key: &AssetKey,
    ) -> Result<Option<PartitionsDefinition>, QueryError> {
        Ok(self.record(asset_key)?.partitions_def.clone())
    }

    fn parents(&self, asset_key: &AssetKey) -> Result<Vec<AssetKey>, QueryError> {
        Ok(self.record(asset_key)?.parents.clone())
    }

    fn automated_asset_keys(&self) -> Vec<AssetKey> {
        self.assets
            .iter()
            .filter(|(_, record)| record.automated)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl InstanceQuery for InMemoryInstance {
    fn evaluation_time(&self) -> DateTime<Utc> {
        self.evaluation_time
    }

    fn max_storage_id(&self) -> Option<i64> {
        self.last_storage_id
    }

    fn materialized_subset(&self, asset_key: &AssetKey) -> Result<AssetSubset, QueryError> {
        self.subset_where(asset_key, |_| true)
    }

    fn updated_after(
        &self,
        asset_key: &AssetKey,
        after: Option<i64>,
    ) -> Result<AssetSubset, QueryError> {
        self.subset_where(asset_key, |m| after.is_none_or(|after| m.storage_id > after))
    }
}
