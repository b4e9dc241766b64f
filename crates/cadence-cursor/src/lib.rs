//! The cursor carried between ticks of the Cadence automation engine.
//!
//! A [`Cursor`] is the only state that survives from one tick to the next:
//! the tick counter, every asset's [`EvaluationInfo`] from the last tick, and
//! when each asset last had an observation requested. It is replaced as a
//! whole at the end of every tick.
//!
//! # Modules
//!
//! - [`cursor`] -- The [`Cursor`] value and its update and lookup operations.
//! - [`codec`] -- The primary wire format: JSON, gzip, standard base64.
//! - [`backcompat`] -- Reconstruction of a cursor from the deprecated plain
//!   JSON format.
//!
//! # Reading a stored cursor
//!
//! ```text
//! raw string ──► codec::decode ──ok──► Cursor
//!                     │
//!                     └─ DecodeFailure ──► backcompat::parse_legacy ──► Cursor
//! ```
//!
//! Reading never fails: anything unreadable degrades to an empty cursor.
//!
//! [`EvaluationInfo`]: cadence_condition::EvaluationInfo

pub mod backcompat;
pub mod codec;
pub mod cursor;

// Re-export primary types at crate root.
pub use cursor::Cursor;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a string is not a cursor in the primary wire format.
///
/// Every variant sends the reader to the legacy parser; none is fatal.
#[derive(Debug, thiserror::Error)]
pub enum DecodeFailure {
    /// The text is not standard base64.
    #[error("not base64: {source}")]
    Base64 {
        /// The underlying decode error.
        #[from]
        source: base64::DecodeError,
    },

    /// The bytes are not a gzip stream.
    #[error("not a gzip stream: {source}")]
    Compression {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The decompressed bytes are not UTF-8.
    #[error("not UTF-8: {source}")]
    Utf8 {
        /// The underlying conversion error.
        #[from]
        source: std::string::FromUtf8Error,
    },

    /// The JSON does not describe a cursor.
    #[error("not a cursor structure: {source}")]
    Structure {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Errors raised while writing a cursor.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// The cursor could not be encoded as JSON.
    #[error("failed to encode cursor: {source}")]
    Encode {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The encoded cursor could not be compressed.
    #[error("failed to compress cursor: {source}")]
    Compress {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
