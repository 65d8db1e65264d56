//! PCM16 wire codec.
//!
//! The remote session consumes PCM16 little-endian mono at 16 kHz and
//! produces PCM16 at 24 kHz. The exact transform here is part of the wire
//! contract: a deviation does not fail at runtime, it just degrades audio,
//! so the tests below byte-compare encoded output for fixed input vectors.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Capture side of the wire contract.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Playback side of the wire contract.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Both directions are mono.
pub const WIRE_CHANNELS: u16 = 1;

/// Encode float samples in [-1, 1] as PCM16 little-endian bytes.
///
/// Each sample is scaled by 32768 and truncated toward zero, then clamped to
/// the i16 range so +1.0 maps to 32767.
pub fn encode(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * 32768.0) as i32;
        out.put_i16_le(scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }
    out.freeze()
}

/// Decode PCM16 little-endian bytes back to float samples in [-1, 1].
pub fn decode(payload: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    if payload.len() % 2 != 0 {
        return Err(DecodeError::TruncatedPayload { len: payload.len() });
    }
    Ok(payload
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect())
}
