//! PCM codec: 16-bit little-endian integers ⇄ normalised `f32` samples, and
//! the minimal RIFF/WAVE framing used on the wire.
//!
//! Inbound reply fragments may arrive either as bare PCM or wrapped in a
//! RIFF container.  Outbound utterances are always wrapped in a canonical
//! 44-byte header (PCM, mono, 24 kHz, 16-bit).
//!
//! # Example
//!
//! ```rust
//! use voice_duplex::audio::{codec, AudioFrame};
//!
//! let frame = AudioFrame::new(vec![0.0, 0.5, -0.5]);
//! let bytes = codec::encode_container(&frame);
//! assert_eq!(bytes.len(), codec::WAV_HEADER_LEN + 6);
//!
//! let decoded = codec::decode_container(&bytes).unwrap();
//! assert_eq!(decoded.len(), 3);
//! ```

use std::io::{Cursor, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use thiserror::Error;

use super::frame::{AudioFrame, SAMPLE_RATE};

/// Length of the canonical header written by [`encode_container`].
pub const WAV_HEADER_LEN: usize = 44;

const RIFF_TAG: &[u8; 4] = b"RIFF";
const WAVE_TAG: &[u8; 4] = b"WAVE";
const FMT_TAG: &[u8; 4] = b"fmt ";
const DATA_TAG: &[u8; 4] = b"data";

/// Divisor used when decoding (full negative range maps to -1.0).
const DECODE_SCALE: f32 = 32_768.0;
/// Multiplier used when encoding (+1.0 maps to `i16::MAX`).
const ENCODE_SCALE: f32 = 32_767.0;

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Reasons a wire payload could not be decoded as-is.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Container framing is broken (no `data` marker, odd payload length).
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// The container declares a sample rate other than 24 kHz.
    #[error("unsupported sample rate {0} Hz (expected 24000 Hz)")]
    UnsupportedSampleRate(u32),
}

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// Convert little-endian 16-bit PCM bytes to `f32` samples (`s / 32768`).
///
/// # Errors
///
/// [`CodecError::MalformedAudio`] when `bytes.len()` is odd.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::MalformedAudio(format!(
            "payload length {} is not a multiple of 2",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(LittleEndian::read_i16(pair)) / DECODE_SCALE)
        .collect())
}

/// Convert `f32` samples to little-endian 16-bit PCM bytes.
///
/// Samples are clamped to `[-1, 1]`, scaled by 32767 and truncated toward
/// zero.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * 2];
    for (chunk, &sample) in out.chunks_exact_mut(2).zip(samples) {
        LittleEndian::write_i16(chunk, quantize(sample));
    }
    out
}

fn quantize(sample: f32) -> i16 {
    // NaN clamps to NaN and casts to 0.
    (sample.clamp(-1.0, 1.0) * ENCODE_SCALE) as i16
}

// ---------------------------------------------------------------------------
// Container framing
// ---------------------------------------------------------------------------

/// Locate the PCM payload inside `bytes`.
///
/// Buffers that do not start with `RIFF` are bare PCM.  Otherwise the buffer
/// is scanned for a `data` marker; the payload begins 8 bytes after it and
/// runs to the end of the buffer (the declared size is not trusted, since
/// streamed fragments often carry a placeholder).
fn payload_region(bytes: &[u8]) -> Result<&[u8], CodecError> {
    if !bytes.starts_with(RIFF_TAG) {
        return Ok(bytes);
    }

    let mut offset = if bytes.get(8..12) == Some(WAVE_TAG.as_slice()) {
        12
    } else {
        4
    };

    while offset + 4 <= bytes.len() {
        let tag = &bytes[offset..offset + 4];

        if tag == FMT_TAG {
            if let Some(rate) = bytes.get(offset + 12..offset + 16) {
                let rate = LittleEndian::read_u32(rate);
                if rate != SAMPLE_RATE {
                    return Err(CodecError::UnsupportedSampleRate(rate));
                }
            }
        } else if tag == DATA_TAG {
            let start = (offset + 8).min(bytes.len());
            return Ok(&bytes[start..]);
        }

        offset += 1;
    }

    Err(CodecError::MalformedAudio(
        "RIFF container without a data marker".into(),
    ))
}

/// Strictly decode a wire payload into an [`AudioFrame`].
///
/// # Errors
///
/// * [`CodecError::MalformedAudio`] — missing `data` marker in a RIFF buffer
///   or an odd payload length.
/// * [`CodecError::UnsupportedSampleRate`] — the `fmt ` chunk declares a rate
///   other than 24 kHz.
pub fn decode_container(bytes: &[u8]) -> Result<AudioFrame, CodecError> {
    let payload = payload_region(bytes)?;
    Ok(AudioFrame::new(pcm16_to_f32(payload)?))
}

/// Decode an inbound fragment, degrading instead of failing on bad framing.
///
/// Malformed framing falls back to interpreting the whole buffer as raw PCM
/// (a trailing odd byte is dropped).  Only a wrong sample rate is reported,
/// because that is a protocol violation rather than a framing glitch.
///
/// # Errors
///
/// [`CodecError::UnsupportedSampleRate`] only.
pub fn decode_fragment(bytes: &[u8]) -> Result<AudioFrame, CodecError> {
    match decode_container(bytes) {
        Ok(frame) => Ok(frame),
        Err(err @ CodecError::UnsupportedSampleRate(_)) => Err(err),
        Err(CodecError::MalformedAudio(reason)) => {
            log::warn!(
                "codec: {reason}; decoding {} bytes as raw PCM (degraded)",
                bytes.len()
            );
            let even = bytes.len() - bytes.len() % 2;
            pcm16_to_f32(&bytes[..even]).map(AudioFrame::new)
        }
    }
}

/// Wrap `frame` in a canonical 44-byte RIFF/WAVE header.
pub fn encode_container(frame: &AudioFrame) -> Vec<u8> {
    let pcm = f32_to_pcm16(frame.samples());
    let data_len = pcm.len() as u32;

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + pcm.len()));
    // Writes into a Vec cannot fail.
    let _ = write_header(&mut cursor, data_len);
    let _ = cursor.write_all(&pcm);
    cursor.into_inner()
}

fn write_header<W: Write>(w: &mut W, data_len: u32) -> std::io::Result<()> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;

    w.write_all(RIFF_TAG)?;
    w.write_u32::<LittleEndian>(36 + data_len)?;
    w.write_all(WAVE_TAG)?;
    w.write_all(FMT_TAG)?;
    w.write_u32::<LittleEndian>(16)?;
    w.write_u16::<LittleEndian>(1)?; // PCM
    w.write_u16::<LittleEndian>(CHANNELS)?;
    w.write_u32::<LittleEndian>(SAMPLE_RATE)?;
    w.write_u32::<LittleEndian>(SAMPLE_RATE * u32::from(block_align))?;
    w.write_u16::<LittleEndian>(block_align)?;
    w.write_u16::<LittleEndian>(BITS_PER_SAMPLE)?;
    w.write_all(DATA_TAG)?;
    w.write_u32::<LittleEndian>(data_len)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(rate: u32) -> Vec<u8> {
        let mut bytes = encode_container(&AudioFrame::new(vec![0.25, -0.25]));
        bytes[24..28].copy_from_slice(&rate.to_le_bytes());
        bytes
    }

    #[test]
    fn header_layout_is_canonical() {
        let bytes = encode_container(&AudioFrame::new(vec![0.0; 10]));
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 20);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 36 + 20);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(LittleEndian::read_u16(&bytes[22..24]), 1); // mono
        assert_eq!(LittleEndian::read_u32(&bytes[24..28]), 24_000);
        assert_eq!(LittleEndian::read_u16(&bytes[34..36]), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(LittleEndian::read_u32(&bytes[40..44]), 20);
    }

    /// Encoding scales by 32767 and truncates while decoding divides by
    /// 32768, so each sample may drift by up to two steps of the 16-bit grid.
    const ROUND_TRIP_TOLERANCE: f32 = 2.0 / 32_768.0;

    #[test]
    fn round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..257)
            .map(|i| ((i as f32) * 0.37).sin() * 0.999)
            .collect();
        let frame = AudioFrame::new(samples.clone());

        let decoded = decode_container(&encode_container(&frame)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.samples()) {
            assert!((a - b).abs() <= ROUND_TRIP_TOLERANCE, "{a} vs {b}");
        }
    }

    #[test]
    fn single_sample_round_trip() {
        let decoded = decode_container(&encode_container(&AudioFrame::new(vec![-0.75]))).unwrap();
        assert!((decoded.samples()[0] + 0.75).abs() <= ROUND_TRIP_TOLERANCE);
    }

    #[test]
    fn encoding_clamps_and_truncates() {
        let pcm = f32_to_pcm16(&[2.0, -2.0, 0.5]);
        assert_eq!(LittleEndian::read_i16(&pcm[0..2]), 32_767);
        assert_eq!(LittleEndian::read_i16(&pcm[2..4]), -32_767);
        // 0.5 * 32767 = 16383.5 → truncated toward zero
        assert_eq!(LittleEndian::read_i16(&pcm[4..6]), 16_383);
    }

    #[test]
    fn raw_buffer_without_riff_is_payload() {
        let raw = [0x00, 0x40, 0x00, 0xC0]; // 16384, -16384
        let frame = decode_container(&raw).unwrap();
        assert_eq!(frame.samples(), &[0.5, -0.5]);
    }

    #[test]
    fn data_marker_is_found_after_extra_chunks() {
        let mut bytes = b"RIFF\0\0\0\0WAVE".to_vec();
        bytes.extend_from_slice(b"LIST\x04\0\0\0abcd");
        bytes.extend_from_slice(b"data\xff\xff\xff\xff");
        bytes.extend_from_slice(&[0x00, 0x40]);
        let frame = decode_container(&bytes).unwrap();
        assert_eq!(frame.samples(), &[0.5]);
    }

    #[test]
    fn odd_payload_is_malformed() {
        assert!(matches!(
            decode_container(&[1, 2, 3]),
            Err(CodecError::MalformedAudio(_))
        ));
    }

    #[test]
    fn riff_without_data_marker_is_malformed_but_degrades() {
        let bytes = b"RIFF\0\0\0\0WAVEjunk".to_vec();
        assert!(matches!(
            decode_container(&bytes),
            Err(CodecError::MalformedAudio(_))
        ));

        let degraded = decode_fragment(&bytes).unwrap();
        assert_eq!(degraded.len(), bytes.len() / 2);
    }

    #[test]
    fn wrong_sample_rate_is_rejected() {
        let bytes = header_for(16_000);
        assert_eq!(
            decode_container(&bytes),
            Err(CodecError::UnsupportedSampleRate(16_000))
        );
        assert!(decode_fragment(&bytes).is_err());
    }
}
