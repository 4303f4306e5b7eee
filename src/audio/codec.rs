//! # Audio Transport Codec
//!
//! Converts between the pipeline's in-memory representation (f32 samples in
//! [-1.0, 1.0]) and the agent's wire format (base64-encoded 16-bit
//! little-endian PCM).
//!
//! ## Outbound (microphone → agent):
//! 1. Nearest-neighbor resample to the 16 kHz transport rate if the capture
//!    rate differs. Deterministic index mapping, no interpolation — an
//!    accepted lossy simplification for speech.
//! 2. Clamp each sample to [-1, 1], scale to the signed 16-bit range.
//! 3. Pack little-endian, base64-encode.
//!
//! ## Inbound (agent → playback):
//! base64 → 16-bit LE PCM → f32 at the fixed 24 kHz playback rate.
//!
//! All functions are pure and allocation-per-call only, so the encode path is
//! safe to run from the high-frequency frame handler without shared state.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Sample rate of audio sent to the agent.
pub const TRANSPORT_RATE: u32 = 16_000;

/// Sample rate of synthesized speech received from the agent.
pub const PLAYBACK_RATE: u32 = 24_000;

/// MIME descriptor attached to every outbound packet.
pub const TRANSPORT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// One encoded, ready-to-transmit audio payload. One-shot: built, sent,
/// discarded.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// base64-encoded 16-bit little-endian PCM
    pub data: String,
    /// Transport MIME descriptor (fixed at 16 kHz PCM)
    pub mime_type: &'static str,
}

/// Decode failures on inbound agent audio.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload has odd byte count ({0})")]
    OddByteCount(usize),
}

/// Encode one send unit for transmission.
///
/// `source_rate` is the rate the browser actually captured at; it is
/// resampled down (or up) to the fixed transport rate when they differ.
pub fn encode_send_unit(samples: &[f32], source_rate: u32) -> EncodedPacket {
    let resampled;
    let samples = if source_rate != TRANSPORT_RATE {
        resampled = resample_nearest(samples, source_rate, TRANSPORT_RATE);
        &resampled[..]
    } else {
        samples
    };

    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = sample.clamp(-1.0, 1.0) * 32768.0;
        let quantized = scaled.clamp(-32768.0, 32767.0) as i16;
        // Writing into a Vec cannot fail
        bytes.write_i16::<LittleEndian>(quantized).unwrap();
    }

    EncodedPacket {
        data: BASE64.encode(&bytes),
        mime_type: TRANSPORT_MIME_TYPE,
    }
}

/// Decode one inbound speech chunk into playback samples.
pub fn decode_playback_payload(data: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = BASE64.decode(data)?;
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddByteCount(bytes.len()));
    }

    let mut cursor = Cursor::new(&bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(samples)
}

/// Convert playback samples back to raw 16-bit LE PCM bytes (the format the
/// browser client plays locally).
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = sample.clamp(-1.0, 1.0) * 32768.0;
        bytes
            .write_i16::<LittleEndian>(scaled.clamp(-32768.0, 32767.0) as i16)
            .unwrap();
    }
    bytes
}

/// Nearest-neighbor resampling via index mapping: `idx = floor(i * src/dst)`.
fn resample_nearest(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    let ratio = source_rate as f64 / target_rate as f64;
    let new_len = (samples.len() as f64 / ratio).round() as usize;

    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let idx = (i as f64 * ratio).floor() as usize;
        out.push(samples[idx.min(samples.len() - 1)]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_one_quantization_step() {
        // At the transport rate no resampling happens, so encode→decode must
        // reproduce each sample to within 1/32768.
        let samples: Vec<f32> = (0..1600)
            .map(|i| ((i as f32) * 0.01).sin() * 0.8)
            .collect();

        let packet = encode_send_unit(&samples, TRANSPORT_RATE);
        let decoded = decode_playback_payload(&packet.data).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (original, restored) in samples.iter().zip(decoded.iter()) {
            assert!(
                (original - restored).abs() <= 1.0 / 32768.0,
                "sample drifted: {} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_encode_clamps_out_of_range_samples() {
        let packet = encode_send_unit(&[2.0, -3.0], TRANSPORT_RATE);
        let decoded = decode_playback_payload(&packet.data).unwrap();

        assert!(decoded[0] <= 1.0 && decoded[0] > 0.99);
        assert!(decoded[1] >= -1.0 && decoded[1] < -0.99);
    }

    #[test]
    fn test_resample_halves_sample_count() {
        // 32 kHz capture → 16 kHz transport keeps every other sample.
        let samples: Vec<f32> = (0..3200).map(|i| i as f32 / 3200.0).collect();
        let packet = encode_send_unit(&samples, 32_000);
        let decoded = decode_playback_payload(&packet.data).unwrap();

        assert_eq!(decoded.len(), 1600);
        // Nearest-neighbor keeps indices 0, 2, 4, ...
        assert!((decoded[1] - samples[2]).abs() <= 1.0 / 32768.0);
    }

    #[test]
    fn test_decode_rejects_odd_byte_count() {
        let odd = BASE64.encode([0u8, 1, 2]);
        assert!(matches!(
            decode_playback_payload(&odd),
            Err(CodecError::OddByteCount(3))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(
            decode_playback_payload("not//valid!!"),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn test_mime_type_is_fixed() {
        let packet = encode_send_unit(&[0.0; 16], TRANSPORT_RATE);
        assert_eq!(packet.mime_type, "audio/pcm;rate=16000");
    }
}
