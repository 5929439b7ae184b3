//! Speech boundary tracking on top of the RMS energy signal.
//!
//! Two independent, device-free state machines:
//!
//! * [`OnsetDetector`] — used while waiting for the user to speak.  Keeps a
//!   pre-roll ring buffer of recent audio and declares onset after
//!   `required_frames` consecutive analysis frames above `speech_threshold`.
//!   Gives up with [`OnsetEvent::Timeout`] when nothing happens for
//!   `timeout`.
//! * [`OffsetDetector`] — used while recording.  Declares the end of speech
//!   once the signal has stayed below `silence_threshold` for
//!   `silence_duration`.
//!
//! Time is measured in samples fed, so both detectors behave identically in
//! tests and on a live device.
//!
//! ```text
//! frames ──▶ OnsetDetector ──SpeechStart(pre-roll)──▶ OffsetDetector ──SpeechEnd
//!                 └──Timeout (restart listening)
//! ```

use crate::config::VadConfig;

use super::buffer::RingBuffer;
use super::energy::rms;
use super::frame::SAMPLE_RATE;

fn secs_to_samples(secs: f32) -> usize {
    (secs.max(0.0) * SAMPLE_RATE as f32).round() as usize
}

// ---------------------------------------------------------------------------
// OnsetDetector
// ---------------------------------------------------------------------------

/// Result of feeding one analysis frame to the [`OnsetDetector`].
#[derive(Debug, Clone, PartialEq)]
pub enum OnsetEvent {
    /// No decision yet.
    Pending,
    /// Sustained speech detected.  Carries the pre-roll (which already
    /// includes the triggering frames) to seed the utterance.
    SpeechStart(Vec<f32>),
    /// No onset within the timeout; the detector has reset itself.
    Timeout,
}

/// Detects the start of an utterance.
pub struct OnsetDetector {
    speech_threshold: f32,
    required_frames: u32,
    timeout_samples: usize,
    pre_roll: RingBuffer,
    consecutive: u32,
    elapsed_samples: usize,
}

impl OnsetDetector {
    /// Create a detector.
    ///
    /// * `required_frames` — consecutive loud frames needed (at least 1).
    /// * `pre_roll_secs`   — seconds of audio retained before onset.
    /// * `timeout_secs`    — listening budget before [`OnsetEvent::Timeout`].
    pub fn new(
        speech_threshold: f32,
        required_frames: u32,
        pre_roll_secs: f32,
        timeout_secs: f32,
    ) -> Self {
        Self {
            speech_threshold,
            required_frames: required_frames.max(1),
            timeout_samples: secs_to_samples(timeout_secs),
            pre_roll: RingBuffer::with_duration(pre_roll_secs),
            consecutive: 0,
            elapsed_samples: 0,
        }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(
            config.speech_threshold,
            config.required_consecutive_frames,
            config.pre_roll_secs,
            config.onset_timeout_secs,
        )
    }

    /// Feed one analysis frame.
    pub fn push(&mut self, frame: &[f32]) -> OnsetEvent {
        self.pre_roll.push_slice(frame);
        self.elapsed_samples += frame.len();

        if rms(frame) > self.speech_threshold {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }

        if self.consecutive >= self.required_frames {
            log::debug!(
                "vad: onset after {} loud frames ({:.2}s listening)",
                self.consecutive,
                self.elapsed_samples as f32 / SAMPLE_RATE as f32
            );
            let pre_roll = self.pre_roll.drain();
            self.reset();
            return OnsetEvent::SpeechStart(pre_roll);
        }

        if self.timeout_samples > 0 && self.elapsed_samples >= self.timeout_samples {
            log::debug!("vad: no onset within timeout");
            self.reset();
            return OnsetEvent::Timeout;
        }

        OnsetEvent::Pending
    }

    /// Forget all history (counters and pre-roll).
    pub fn reset(&mut self) {
        self.pre_roll.clear();
        self.consecutive = 0;
        self.elapsed_samples = 0;
    }

    /// Consecutive above-threshold frames seen so far.
    pub fn consecutive_frames(&self) -> u32 {
        self.consecutive
    }

    /// Samples currently held as pre-roll.
    pub fn pre_roll_len(&self) -> usize {
        self.pre_roll.len()
    }
}

// ---------------------------------------------------------------------------
// OffsetDetector
// ---------------------------------------------------------------------------

/// Detects the end of an utterance.
pub struct OffsetDetector {
    silence_threshold: f32,
    silence_samples: usize,
    silent_run: usize,
}

impl OffsetDetector {
    pub fn new(silence_threshold: f32, silence_duration_secs: f32) -> Self {
        Self {
            silence_threshold,
            silence_samples: secs_to_samples(silence_duration_secs).max(1),
            silent_run: 0,
        }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(config.silence_threshold, config.silence_duration_secs)
    }

    /// Feed one analysis frame.  Returns `true` exactly when the continuous
    /// silence reaches the configured duration; the detector then resets.
    pub fn push(&mut self, frame: &[f32]) -> bool {
        if rms(frame) >= self.silence_threshold {
            self.silent_run = 0;
            return false;
        }

        self.silent_run += frame.len();
        if self.silent_run >= self.silence_samples {
            log::debug!(
                "vad: offset after {:.2}s of silence",
                self.silent_run as f32 / SAMPLE_RATE as f32
            );
            self.silent_run = 0;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.silent_run = 0;
    }

    /// Seconds of continuous silence observed so far.
    pub fn silent_secs(&self) -> f32 {
        self.silent_run as f32 / SAMPLE_RATE as f32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 1024;

    fn loud() -> Vec<f32> {
        vec![0.3; FRAME]
    }

    fn quiet() -> Vec<f32> {
        vec![0.001; FRAME]
    }

    fn onset() -> OnsetDetector {
        OnsetDetector::new(0.02, 2, 2.0, 10.0)
    }

    // ---- Onset -------------------------------------------------------------

    #[test]
    fn onset_fires_on_exactly_the_required_frame() {
        let mut det = onset();
        assert_eq!(det.push(&quiet()), OnsetEvent::Pending);
        assert_eq!(det.push(&loud()), OnsetEvent::Pending);
        assert!(matches!(det.push(&loud()), OnsetEvent::SpeechStart(_)));
    }

    #[test]
    fn quiet_frame_resets_the_run() {
        let mut det = onset();
        assert_eq!(det.push(&loud()), OnsetEvent::Pending);
        assert_eq!(det.push(&quiet()), OnsetEvent::Pending);
        assert_eq!(det.consecutive_frames(), 0);
        assert_eq!(det.push(&loud()), OnsetEvent::Pending);
        assert!(matches!(det.push(&loud()), OnsetEvent::SpeechStart(_)));
    }

    #[test]
    fn pre_roll_carries_leading_audio() {
        let mut det = onset();
        det.push(&quiet());
        det.push(&loud());
        let OnsetEvent::SpeechStart(pre_roll) = det.push(&loud()) else {
            panic!("expected onset");
        };
        assert_eq!(pre_roll.len(), 3 * FRAME);
        assert!((pre_roll[0] - 0.001).abs() < 1e-9);
        assert!((pre_roll[3 * FRAME - 1] - 0.3).abs() < 1e-9);
        assert_eq!(det.pre_roll_len(), 0);
    }

    #[test]
    fn pre_roll_is_bounded() {
        let mut det = OnsetDetector::new(0.02, 2, 0.1, 0.0); // 2400 samples
        for _ in 0..10 {
            det.push(&quiet());
        }
        assert_eq!(det.pre_roll_len(), 2_400);
    }

    #[test]
    fn detector_is_reusable_after_onset() {
        let mut det = onset();
        det.push(&loud());
        assert!(matches!(det.push(&loud()), OnsetEvent::SpeechStart(_)));
        assert_eq!(det.push(&loud()), OnsetEvent::Pending);
    }

    #[test]
    fn times_out_without_speech() {
        // 0.5 s timeout = 12 000 samples → 12th frame of 1024 crosses it.
        let mut det = OnsetDetector::new(0.02, 2, 2.0, 0.5);
        for _ in 0..11 {
            assert_eq!(det.push(&quiet()), OnsetEvent::Pending);
        }
        assert_eq!(det.push(&quiet()), OnsetEvent::Timeout);
        assert_eq!(det.pre_roll_len(), 0);
    }

    // ---- Offset ------------------------------------------------------------

    #[test]
    fn offset_fires_exactly_at_silence_duration() {
        // 10 ms frames, 0.9 s → 90 frames.
        let mut det = OffsetDetector::new(0.01, 0.9);
        let silent = vec![0.0; 240];

        assert!(!det.push(&vec![0.5; 240]));
        for _ in 0..89 {
            assert!(!det.push(&silent));
        }
        assert!(det.push(&silent));
    }

    #[test]
    fn speech_resets_silence_run() {
        let mut det = OffsetDetector::new(0.01, 0.9);
        let silent = vec![0.0; 240];
        for _ in 0..80 {
            assert!(!det.push(&silent));
        }
        assert!(!det.push(&vec![0.2; 240]));
        assert_eq!(det.silent_secs(), 0.0);
        for _ in 0..89 {
            assert!(!det.push(&silent));
        }
        assert!(det.push(&silent));
    }

    #[test]
    fn offset_uses_looser_threshold() {
        // Between silence (0.01) and speech (0.02) thresholds counts as speech
        // for the offset detector.
        let mut det = OffsetDetector::new(0.01, 0.01);
        assert!(!det.push(&vec![0.015; 240]));
        assert!(det.push(&vec![0.0; 240]));
    }
}
