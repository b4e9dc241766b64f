//! Where the cursor lives between ticks.
//!
//! A store holds exactly one serialized cursor and replaces it as a whole.
//! [`FileCursorStore`] writes to a sibling temporary file and renames it
//! over the target, so a crash mid-write leaves the previous cursor intact.

use std::path::{Path, PathBuf};

use cadence_condition::AssetGraph;
use cadence_cursor::Cursor;
use tracing::debug;

use crate::error::StoreError;

/// Persistence for the serialized cursor.
pub trait CursorStore {
    /// The stored cursor text, or `None` if nothing has been stored.
    fn load_raw(&self) -> Result<Option<String>, StoreError>;

    /// Replace the stored cursor text.
    fn save_raw(&mut self, raw: &str) -> Result<(), StoreError>;

    /// Read the stored cursor in either wire format.
    ///
    /// A missing or unreadable cursor yields an empty cursor at
    /// `default_evaluation_id`.
    fn load(
        &self,
        asset_graph: Option<&dyn AssetGraph>,
        default_evaluation_id: i64,
    ) -> Result<Cursor, StoreError> {
        let raw = self.load_raw()?;
        Ok(Cursor::from_serialized(
            raw.as_deref(),
            asset_graph,
            default_evaluation_id,
        ))
    }

    /// Serialize and store `cursor`.
    fn save(&mut self, cursor: &Cursor) -> Result<(), StoreError> {
        let raw = cursor.serialize()?;
        self.save_raw(&raw)
    }
}

/// A store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCursorStore {
    raw: Option<String>,
    writes: usize,
}

impl InMemoryCursorStore {
    /// An empty store.
    pub const fn new() -> Self {
        Self {
            raw: None,
            writes: 0,
        }
    }

    /// A store already holding `raw`.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            writes: 0,
        }
    }

    /// How many times the cursor has been replaced.
    pub const fn writes(&self) -> usize {
        self.writes
    }
}

impl CursorStore for InMemoryCursorStore {
    fn load_raw(&self) -> Result<Option<String>, StoreError> {
        Ok(self.raw.clone())
    }

    fn save_raw(&mut self, raw: &str) -> Result<(), StoreError> {
        self.raw = Some(raw.to_owned());
        self.writes = self.writes.saturating_add(1);
        Ok(())
    }
}

/// A store backed by one file.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// A store at `path`. Nothing is touched until the first load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The cursor file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CursorStore for FileCursorStore {
    fn load_raw(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored cursor");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn save_raw(&mut self, raw: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        std::fs::write(&temp, raw)?;
        std::fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), bytes = raw.len(), "Cursor written");
        Ok(())
    }
}
