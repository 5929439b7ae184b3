//! Fixed-capacity sample storage for the capture side.
//!
//! * [`RingBuffer`] keeps the most recent `capacity` samples (the pre-roll
//!   that lets an utterance keep its first syllable while onset detection is
//!   still pending).  Writes are block copies into a pre-allocated arena;
//!   the buffer never grows.
//! * [`CaptureBuffer`] is the append-only store for the current utterance.
//!   It is sealed exactly once into an [`AudioFrame`].
//!
//! # Example
//!
//! ```rust
//! use voice_duplex::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]); // oldest sample dropped
//! assert_eq!(buf.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
//! ```

use super::frame::{AudioFrame, SAMPLE_RATE};

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer of `f32` samples.
///
/// When a push would exceed `capacity`, the oldest samples are overwritten.
pub struct RingBuffer {
    arena: Box<[f32]>,
    /// Next write position (wraps around the arena).
    cursor: usize,
    /// Number of valid samples (≤ capacity).
    len: usize,
}

impl RingBuffer {
    /// Create a ring buffer holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            arena: vec![0.0; capacity].into_boxed_slice(),
            cursor: 0,
            len: 0,
        }
    }

    /// Ring buffer sized for `secs` seconds of 24 kHz audio (at least one
    /// sample).
    pub fn with_duration(secs: f32) -> Self {
        let capacity = (secs.max(0.0) * SAMPLE_RATE as f32).round() as usize;
        Self::new(capacity.max(1))
    }

    /// Append `data`, overwriting the oldest samples on overflow.
    pub fn push_slice(&mut self, data: &[f32]) {
        let capacity = self.arena.len();

        // Only the newest `capacity` samples can survive.
        let data = &data[data.len().saturating_sub(capacity)..];

        let first = data.len().min(capacity - self.cursor);
        self.arena[self.cursor..self.cursor + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.arena[..rest].copy_from_slice(&data[first..]);

        self.cursor = (self.cursor + data.len()) % capacity;
        self.len = (self.len + data.len()).min(capacity);
    }

    /// Copy out the stored samples in chronological order.
    pub fn snapshot(&self) -> Vec<f32> {
        let capacity = self.arena.len();
        let start = (self.cursor + capacity - self.len) % capacity;

        let mut out = Vec::with_capacity(self.len);
        let first = self.len.min(capacity - start);
        out.extend_from_slice(&self.arena[start..start + first]);
        out.extend_from_slice(&self.arena[..self.len - first]);
        out
    }

    /// Copy out the stored samples and reset the buffer.
    pub fn drain(&mut self) -> Vec<f32> {
        let out = self.snapshot();
        self.clear();
        out
    }

    /// Discard all samples.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Returns `true` once the buffer holds `capacity` samples.
    pub fn is_full(&self) -> bool {
        self.len == self.arena.len()
    }
}

// ---------------------------------------------------------------------------
// CaptureBuffer
// ---------------------------------------------------------------------------

/// Append-only sample store for one utterance.
///
/// Created at speech onset (seeded with the pre-roll), appended in arrival
/// order while recording, then sealed into a single frame.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    samples: Vec<f32>,
}

impl CaptureBuffer {
    /// Start a new utterance whose first samples are `pre_roll`.
    pub fn with_pre_roll(pre_roll: Vec<f32>) -> Self {
        Self { samples: pre_roll }
    }

    /// Append one capture fragment.
    pub fn append(&mut self, fragment: &[f32]) {
        self.samples.extend_from_slice(fragment);
    }

    /// Number of samples captured so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Size of the utterance once encoded as 16-bit PCM (header excluded).
    pub fn pcm_bytes(&self) -> usize {
        self.samples.len() * 2
    }

    /// Current utterance duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / SAMPLE_RATE as f32
    }

    /// Consume the buffer and produce the utterance frame.
    pub fn seal(self) -> AudioFrame {
        AudioFrame::new(self.samples)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- RingBuffer --------------------------------------------------------

    #[test]
    fn push_within_capacity() {
        let mut buf = RingBuffer::new(8);
        buf.push_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_full());
        assert_eq!(buf.snapshot(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn overflow_keeps_newest_in_order() {
        let mut buf = RingBuffer::new(4);
        buf.push_slice(&[1.0, 2.0, 3.0]);
        buf.push_slice(&[4.0, 5.0, 6.0]);
        assert!(buf.is_full());
        assert_eq!(buf.snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn single_push_larger_than_capacity() {
        let mut buf = RingBuffer::new(3);
        buf.push_slice(&[1.0]);
        buf.push_slice(&[2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(buf.snapshot(), vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn wraps_many_times() {
        let mut buf = RingBuffer::new(5);
        for i in 0..23 {
            buf.push_slice(&[i as f32, i as f32 + 0.5]);
        }
        assert_eq!(buf.snapshot(), vec![20.5, 21.0, 21.5, 22.0, 22.5]);
    }

    #[test]
    fn drain_resets() {
        let mut buf = RingBuffer::new(4);
        buf.push_slice(&[1.0, 2.0]);
        assert_eq!(buf.drain(), vec![1.0, 2.0]);
        assert!(buf.is_empty());

        buf.push_slice(&[9.0]);
        assert_eq!(buf.drain(), vec![9.0]);
    }

    #[test]
    fn duration_constructor() {
        let buf = RingBuffer::with_duration(2.0);
        assert_eq!(buf.capacity(), 48_000);
        assert_eq!(RingBuffer::with_duration(0.0).capacity(), 1);
    }

    #[test]
    #[should_panic(expected = "RingBuffer capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = RingBuffer::new(0);
    }

    // ---- CaptureBuffer -----------------------------------------------------

    #[test]
    fn capture_appends_after_pre_roll() {
        let mut cap = CaptureBuffer::with_pre_roll(vec![0.1, 0.2]);
        cap.append(&[0.3]);
        cap.append(&[0.4, 0.5]);
        assert_eq!(cap.len(), 5);
        assert_eq!(cap.pcm_bytes(), 10);
        assert_eq!(cap.seal().samples(), &[0.1, 0.2, 0.3, 0.4, 0.5]);
    }
}
