//! Asset identifiers.
//!
//! An [`AssetKey`] is an ordered path of string components, e.g.
//! `["warehouse", "orders"]`. Keys are immutable values: they are hashed,
//! compared, and used as map keys throughout the engine and the cursor.

use serde::{Deserialize, Serialize};

/// Separator used by the user-facing string form of an [`AssetKey`].
const USER_STRING_SEPARATOR: char = '/';

/// Identifier for one asset in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    /// Ordered path components.
    pub path: Vec<String>,
}

impl AssetKey {
    /// Create a key from its path components.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the user-facing string form (`"warehouse/orders"`).
    ///
    /// This is the encoding used by the legacy cursor format for map keys.
    pub fn from_user_string(value: &str) -> Self {
        Self::new(value.split(USER_STRING_SEPARATOR))
    }

    /// Render the user-facing string form (`"warehouse/orders"`).
    pub fn to_user_string(&self) -> String {
        self.path.join("/")
    }
}

impl core::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.to_user_string())
    }
}

impl From<&str> for AssetKey {
    fn from(value: &str) -> Self {
        Self::from_user_string(value)
    }
}
