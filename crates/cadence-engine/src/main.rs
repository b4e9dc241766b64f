//! Cursor inspection binary for the Cadence automation engine.
//!
//! Loads configuration, reads the stored cursor in either wire format, and
//! logs what it holds: the tick counter, and for every asset the number of
//! partitions requested on the last tick and the storage id consumed.
//!
//! # Usage
//!
//! ```text
//! cadence-engine [CONFIG]        # defaults to ./cadence.yaml
//! ```
//!
//! A missing config file falls back to defaults; a missing cursor file is
//! reported as an empty cursor.

use std::path::PathBuf;

use cadence_engine::config::EngineConfig;
use cadence_engine::error::EngineError;
use cadence_engine::logging;
use cadence_engine::store::{CursorStore, FileCursorStore};
use tracing::{debug, info};

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the config is invalid or the cursor file cannot be
/// read.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("cadence.yaml"), PathBuf::from);
    let config = if config_path.exists() {
        EngineConfig::from_file(&config_path)?
    } else {
        EngineConfig::parse("")?
    };

    logging::init(&config.logging)?;
    info!(
        config = %config_path.display(),
        cursor = %config.cursor.path.display(),
        max_concurrency = config.tick.max_concurrency,
        timeout_ms = config.tick.timeout_ms,
        "cadence-engine starting"
    );

    let store = FileCursorStore::new(config.cursor.path.clone());
    let cursor = tokio::task::spawn_blocking(move || {
        store.load(None, config.tick.default_evaluation_id)
    })
    .await
    .map_err(|error| EngineError::Store {
        source: cadence_engine::error::StoreError::Worker {
            message: error.to_string(),
        },
    })??;

    info!(
        evaluation_id = cursor.evaluation_id(),
        assets = cursor.previous_evaluation_info().count(),
        observed = cursor.last_observe_request_timestamps().len(),
        "Cursor loaded"
    );
    for evaluation in cursor.previous_evaluation_info() {
        info!(
            asset_key = %evaluation.asset_key,
            requested = evaluation.true_subset().size(),
            max_storage_id = ?evaluation.max_storage_id,
            extra_state = evaluation.extra_state_by_unique_id.len(),
            "Previous evaluation"
        );
        debug!(
            asset_key = %evaluation.asset_key,
            requested = %evaluation.true_subset(),
            condition = %evaluation.evaluation_result.condition_snapshot.description,
            "Previous evaluation detail"
        );
    }

    Ok(())
}
