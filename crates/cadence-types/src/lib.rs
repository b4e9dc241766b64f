//! Asset keys, partition definitions, and the partition subset algebra for the
//! Cadence automation engine.
//!
//! Every decision the engine makes is phrased as "which partitions of which
//! asset": this crate provides the vocabulary for that question.
//!
//! # Modules
//!
//! - [`asset_key`] -- [`AssetKey`], the path-like asset identifier.
//! - [`partitions`] -- [`PartitionsDefinition`]: static and time-window
//!   partition spaces, plus parsing of serialized partition subsets.
//! - [`subset`] -- [`AssetSubset`]: union, intersection, subtraction,
//!   membership, and size over partition sets, including an unmaterialized
//!   "all partitions" form.
//!
//! # Usage
//!
//! ```
//! use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition};
//! use chrono::Utc;
//!
//! let key = AssetKey::from("orders");
//! let def = PartitionsDefinition::fixed(["p1", "p2", "p3"]);
//! let all = AssetSubset::all(key.clone(), Some(def.clone()), Utc::now());
//! let done = AssetSubset::from_keys(key, def, ["p1"]);
//!
//! let remaining = all.subtract(&done);
//! assert_eq!(remaining.size(), 2);
//! assert!(!remaining.contains("p1"));
//! ```

pub mod asset_key;
pub mod partitions;
pub mod subset;

// Re-export primary types at crate root.
pub use asset_key::AssetKey;
pub use partitions::{Cadence, PartitionsDefinition, TimeWindowPartitions};
pub use subset::{AssetSubset, SubsetValue};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while decoding partition subsets.
#[derive(Debug, thiserror::Error)]
pub enum SubsetError {
    /// The serialized subset was not valid JSON.
    #[error("invalid partition subset JSON: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The JSON did not match the encoding for the partitions definition.
    #[error("invalid serialized partition subset: {reason}")]
    InvalidSerializedSubset {
        /// What was wrong with the encoding.
        reason: String,
    },

    /// The subset value does not match the presence of a partitions
    /// definition.
    #[error("subset of {asset_key} has an inconsistent shape: {reason}")]
    ShapeMismatch {
        /// The asset the subset belongs to.
        asset_key: AssetKey,
        /// Which inconsistency was found.
        reason: &'static str,
    },
}
