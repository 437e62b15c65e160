//! Length-prefixed CBOR framing

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Upper bound on a single frame; anything larger is rejected before decode.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Errors raised while framing or unframing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame truncated: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(usize),

    #[error("unknown sequencer request kind {0}")]
    UnknownKind(u8),

    #[error("codec failure: {0}")]
    Codec(String),
}

/// Encode `value` as a length-prefixed CBOR frame.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(value, &mut body)
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one length-prefixed CBOR frame. Returns the value and the number
/// of bytes consumed.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), ProtocolError> {
    if bytes.len() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4,
            have: bytes.len(),
        });
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    if bytes.len() < 4 + len {
        return Err(ProtocolError::Truncated {
            needed: 4 + len,
            have: bytes.len(),
        });
    }
    let value = ciborium::de::from_reader(&bytes[4..4 + len])
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;
    Ok((value, 4 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let frame = encode_frame(&("hello".to_string(), 42u64)).unwrap();
        let (value, consumed): ((String, u64), usize) = decode_frame(&frame).unwrap();
        assert_eq!(value, ("hello".to_string(), 42));
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_truncated_frame() {
        let mut frame = encode_frame(&1u64).unwrap();
        frame.truncate(frame.len() - 1);
        assert!(matches!(
            decode_frame::<u64>(&frame),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_are_left_alone() {
        let mut bytes = encode_frame(&7u64).unwrap();
        let frame_len = bytes.len();
        bytes.extend_from_slice(&[0xde, 0xad]);
        let (value, consumed): (u64, usize) = decode_frame(&bytes).unwrap();
        assert_eq!(value, 7);
        assert_eq!(consumed, frame_len);
    }
}
