//! Error types for the tick driver.
//!
//! [`EngineError`] is the top-level error that `main` propagates with `?`;
//! [`TickError`] and [`StoreError`] belong to one tick and one cursor write.

use cadence_condition::{EvaluationError, QueryError};
use cadence_cursor::CursorError;
use cadence_types::AssetKey;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Reasons a tick is abandoned.
///
/// Any of these means no cursor is produced for the tick.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// An asset's condition tree failed to evaluate.
    #[error("evaluation of {asset_key} failed: {source}")]
    Evaluation {
        /// The asset whose evaluation failed.
        asset_key: AssetKey,
        /// The underlying evaluation error.
        #[source]
        source: EvaluationError,
    },

    /// The asset graph could not be read.
    #[error("asset graph query failed: {source}")]
    Graph {
        /// The underlying query error.
        #[from]
        source: QueryError,
    },

    /// Parent links form a cycle, so no evaluation order exists.
    #[error("dependency cycle among {assets:?}")]
    Cycle {
        /// Assets that could not be ordered.
        assets: Vec<AssetKey>,
    },

    /// An automated asset has no condition.
    #[error("no condition configured for {asset_key}")]
    MissingCondition {
        /// The asset without a condition.
        asset_key: AssetKey,
    },

    /// The tick ran past its budget.
    #[error("tick exceeded its {timeout_ms} ms budget")]
    Timeout {
        /// The configured budget.
        timeout_ms: u64,
    },

    /// A worker task panicked or was cancelled.
    #[error("evaluation worker failed: {message}")]
    Worker {
        /// Description of the failure.
        message: String,
    },

    /// The evaluation id would overflow.
    #[error("evaluation id {evaluation_id} cannot be advanced")]
    EvaluationIdOverflow {
        /// The last evaluation id.
        evaluation_id: i64,
    },
}

/// Errors raised while persisting or loading a cursor.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The cursor could not be serialized.
    #[error("cursor encoding failed: {source}")]
    Encode {
        /// The underlying cursor error.
        #[from]
        source: CursorError,
    },

    /// The cursor file could not be read or written.
    #[error("cursor file I/O failed: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The blocking file task failed.
    #[error("cursor store worker failed: {message}")]
    Worker {
        /// Description of the failure.
        message: String,
    },
}

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A tick was abandoned.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },

    /// The cursor store failed.
    #[error("cursor store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// Logging could not be initialized.
    #[error("logging setup failed: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
