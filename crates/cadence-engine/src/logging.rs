//! Tracing subscriber setup for the engine binary.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::EngineError;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`. With `logging.json`,
/// every event is written as one JSON object per line.
///
/// # Errors
///
/// Returns [`EngineError::Logging`] if the filter directive is invalid or a
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|error| EngineError::Logging {
            message: error.to_string(),
        })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|error| EngineError::Logging {
        message: error.to_string(),
    })
}
