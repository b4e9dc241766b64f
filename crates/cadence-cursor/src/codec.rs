//! The primary cursor wire format.
//!
//! ```text
//! value ──JSON──► UTF-8 bytes ──gzip──► compressed bytes ──base64──► ASCII text
//! ```
//!
//! The output is standard-alphabet, padded base64 with no length prefix or
//! version marker. Decoding reverses the four steps; a failure at any step is
//! reported as a [`DecodeFailure`] naming that step.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{CursorError, DecodeFailure};

/// Encode `value` in the primary wire format.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CursorError> {
    let json = serde_json::to_vec(value).map_err(|source| CursorError::Encode { source })?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|source| CursorError::Compress { source })?;
    let compressed = encoder
        .finish()
        .map_err(|source| CursorError::Compress { source })?;
    Ok(STANDARD.encode(compressed))
}

/// Decode a value from the primary wire format.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeFailure> {
    let compressed = STANDARD.decode(raw.trim().as_bytes())?;
    let mut bytes = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut bytes)?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}
