//! Core audio value types shared by every stage of the client.
//!
//! All audio inside the client is **24 kHz mono `f32`** in `[-1.0, 1.0]`.
//! Converting to and from the wire representation is the job of
//! [`crate::audio::codec`]; converting from whatever the platform device
//! delivers is the job of [`crate::audio::resample`].

/// Sample rate used end-to-end (capture, wire payloads, playback).
pub const SAMPLE_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// An immutable, owned block of 24 kHz mono samples.
///
/// Frames are moved from stage to stage; nothing holds a mutable alias to a
/// frame once it has been handed on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    /// Wrap `samples` (assumed 24 kHz mono) in a frame.
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Read-only view of the samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Give the samples back to the caller.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Number of samples in the frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds at [`SAMPLE_RATE`].
    ///
    /// ```
    /// use voice_duplex::audio::AudioFrame;
    ///
    /// let frame = AudioFrame::new(vec![0.0; 12_000]);
    /// assert!((frame.duration() - 0.5).abs() < 1e-9);
    /// ```
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(SAMPLE_RATE)
    }
}

impl From<Vec<f32>> for AudioFrame {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}

// ---------------------------------------------------------------------------
// PlayableUnit
// ---------------------------------------------------------------------------

/// A frame placed on the output device timeline.
///
/// `start_time` is expressed in the output device's monotonic clock
/// (seconds, see [`crate::audio::OutputDevice::now`]).  `index` is 1-based
/// within the current reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableUnit {
    pub frame: AudioFrame,
    pub start_time: f64,
    pub index: u64,
}

impl PlayableUnit {
    /// Duration of the unit in seconds.
    pub fn duration(&self) -> f64 {
        self.frame.duration()
    }

    /// Timeline position at which the unit stops playing.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_sample_rate() {
        let frame = AudioFrame::new(vec![0.0; 24_000]);
        assert!((frame.duration() - 1.0).abs() < 1e-9);
        assert!(AudioFrame::default().is_empty());
    }

    #[test]
    fn unit_end_time() {
        let unit = PlayableUnit {
            frame: AudioFrame::new(vec![0.0; 2_400]),
            start_time: 3.0,
            index: 1,
        };
        assert!((unit.end_time() - 3.1).abs() < 1e-9);
    }
}
