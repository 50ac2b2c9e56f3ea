//! Centralized serialization and deserialization for marker payloads.
//!
//! All payloads that cross a cluster boundary go through these two
//! functions, so the on-wire encoding (postcard) is decided in exactly one
//! place. postcard is deterministic: encoding the same value always yields
//! the same bytes, which the protocol relies on for idempotent markers.

use serde::{de::DeserializeOwned, Serialize};
use snafu::Snafu;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed.
    #[snafu(display("decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },
}

/// Encodes a value to bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes bytes to a value.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes are not a valid encoding of
/// `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::position::Position;

    #[test]
    fn test_roundtrip_position() {
        let original = Position::new(42, 7);
        let bytes = encode(&original).expect("encode position");
        let decoded: Position = decode(&bytes).expect("decode position");
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Position, _> = decode(&[0xff]);
        assert!(result.is_err());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let value = Position::new(9, 9);
        assert_eq!(encode(&value).unwrap(), encode(&value).unwrap());
    }
}
