//! JSON encoding for streaming events and history payloads.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum accepted size of a single encoded frame (128 KB).
pub const MAX_FRAME_SIZE: usize = 128 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Encodes a value as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] for oversized frames, or
/// [`CodecError::Serialization`] if the text is not a valid `T`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}
