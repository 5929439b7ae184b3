//! Channel down-mixing and streaming sample-rate conversion.
//!
//! The client works at **24 kHz mono**.  When the platform cannot open the
//! capture device in that format, the cpal callback delivers interleaved
//! audio at the native rate; this module brings it to the client format:
//!
//! 1. [`downmix`]: average interleaved channels to mono.
//! 2. [`StreamResampler`]: `rubato::FftFixedIn` fed from a carry-over
//!    buffer, since cpal callbacks never line up with the resampler's
//!    fixed input block.

use rubato::{FftFixedIn, Resampler, ResamplerConstructionError};

// ---------------------------------------------------------------------------
// downmix
// ---------------------------------------------------------------------------

/// Average interleaved multi-channel audio down to mono.
///
/// * `channels == 1` returns a copy.
/// * `channels == 0` returns an empty vector.
///
/// ```rust
/// use voice_duplex::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = usize::from(n);
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Input frames per resampler block.
const BLOCK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Streaming mono resampler.  Output lags input by up to one block.
pub struct StreamResampler {
    /// `None` when source and target rates match.
    inner: Option<FftFixedIn<f32>>,
    /// Input not yet consumed by a full block.
    carry: Vec<f32>,
}

impl StreamResampler {
    /// # Errors
    ///
    /// `rubato` rejects the rate pair (e.g. a zero rate).
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, ResamplerConstructionError> {
        let inner = if source_rate == target_rate {
            None
        } else {
            Some(FftFixedIn::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                BLOCK_FRAMES,
                SUB_CHUNKS,
                1,
            )?)
        };
        Ok(Self {
            inner,
            carry: Vec::with_capacity(BLOCK_FRAMES * 2),
        })
    }

    /// Returns `true` when no conversion is performed.
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Convert one callback buffer.  Returns every output block completed by
    /// this input, possibly none.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(inner) = self.inner.as_mut() else {
            return input.to_vec();
        };
        self.carry.extend_from_slice(input);

        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let need = inner.input_frames_next();
            if self.carry.len() - consumed < need {
                break;
            }
            let block = &self.carry[consumed..consumed + need];
            match inner.process(&[block], None) {
                Ok(channels) => {
                    if let Some(mono) = channels.first() {
                        out.extend_from_slice(mono);
                    }
                }
                Err(e) => log::warn!("resample: dropping {need} frames: {e}"),
            }
            consumed += need;
        }
        self.carry.drain(..consumed);
        out
    }

    /// Forget stream history (use when the stream restarts).
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
        self.carry.clear();
    }
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("passthrough", &self.is_passthrough())
            .field("carry", &self.carry.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- downmix -----------------------------------------------------------

    #[test]
    fn downmix_mono_is_copy() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix(&input, 1), input);
    }

    #[test]
    fn downmix_two_channels() {
        let out = downmix(&[1.0, -1.0, 0.5, 0.5], 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels() {
        assert!(downmix(&[1.0, 2.0], 0).is_empty());
    }

    // ---- StreamResampler ---------------------------------------------------

    fn blocks(r: &StreamResampler) -> (usize, usize) {
        let inner = r.inner.as_ref().unwrap();
        (inner.input_frames_next(), inner.output_frames_next())
    }

    #[test]
    fn same_rate_is_passthrough() {
        let mut r = StreamResampler::new(24_000, 24_000).unwrap();
        assert!(r.is_passthrough());
        assert_eq!(r.process(&[0.1, 0.2]), vec![0.1, 0.2]);
    }

    #[test]
    fn short_input_waits_for_a_full_block() {
        let mut r = StreamResampler::new(48_000, 24_000).unwrap();
        let (block_in, _) = blocks(&r);
        assert!(r.process(&vec![0.5; block_in - 1]).is_empty());
        assert!(!r.process(&[0.5]).is_empty());
    }

    #[test]
    fn downsample_48k_halves_block_length() {
        let mut r = StreamResampler::new(48_000, 24_000).unwrap();
        let (block_in, block_out) = blocks(&r);
        assert_eq!(block_out * 2, block_in);

        let out = r.process(&vec![0.5; block_in * 4]);
        assert_eq!(out.len(), block_out * 4);
        // Past the filter delay a constant signal comes through unchanged.
        let tail = &out[out.len() - block_out / 2..];
        let mean = tail.iter().sum::<f32>() / tail.len() as f32;
        assert!((mean - 0.5).abs() < 0.02, "mean {mean}");
    }

    #[test]
    fn chunked_matches_one_shot() {
        let input: Vec<f32> = (0..8_000).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut whole = StreamResampler::new(44_100, 24_000).unwrap();
        let expected = whole.process(&input);

        let mut chunked = StreamResampler::new(44_100, 24_000).unwrap();
        let mut got = Vec::new();
        for block in input.chunks(441) {
            got.extend(chunked.process(block));
        }

        assert!(!expected.is_empty());
        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn reset_drops_carried_input() {
        let mut r = StreamResampler::new(16_000, 24_000).unwrap();
        let (block_in, _) = blocks(&r);
        r.process(&vec![0.1; block_in - 1]);
        r.reset();
        assert!(r.process(&vec![0.1; block_in - 1]).is_empty());
    }
}
