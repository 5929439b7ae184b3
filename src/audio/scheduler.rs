//! Gapless playback scheduling for streamed reply fragments.
//!
//! Reply audio arrives as fragments of arbitrary size at irregular times.
//! [`PlaybackScheduler`] turns them into [`PlayableUnit`]s laid end-to-end
//! on the output device timeline:
//!
//! ```text
//! fragment ─┬─ short & reply already playing ─▶ accumulate ──(≥ max)──┐
//!           └─ otherwise ─▶ flush accumulation, schedule fragment ◀───┘
//!
//! start = max(now, last_play_end)      last_play_end = start + duration
//! ```
//!
//! The scheduler is a pure value: the caller passes the output device's
//! current time into every call and hands the returned units to the device.
//!
//! # Example
//!
//! ```rust
//! use voice_duplex::audio::{AudioFrame, PlaybackScheduler};
//!
//! let mut sched = PlaybackScheduler::new(0.05, 1.0);
//! sched.reset(0.0);
//!
//! let units = sched.submit(AudioFrame::new(vec![0.0; 2_400]), 0.0); // 0.1 s
//! assert_eq!(units.len(), 1);
//! let units = sched.submit(AudioFrame::new(vec![0.0; 2_400]), 0.01);
//! assert!((units[0].start_time - 0.1).abs() < 1e-9); // no gap, no overlap
//! ```

use crate::config::PlaybackConfig;

use super::frame::{AudioFrame, PlayableUnit, SAMPLE_RATE};

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Owns the output timeline for the current reply.
#[derive(Debug)]
pub struct PlaybackScheduler {
    min_playable_secs: f64,
    max_combined_secs: f64,
    last_play_end: f64,
    /// Accumulation arena, sized once; only its length changes.
    pending: Vec<f32>,
    pending_secs: f64,
    units_played: u64,
}

impl PlaybackScheduler {
    /// * `min_playable_secs` — fragments shorter than this are accumulated
    ///   once the reply has started playing.
    /// * `max_combined_secs` — an accumulation is flushed as soon as it
    ///   reaches this duration.
    pub fn new(min_playable_secs: f64, max_combined_secs: f64) -> Self {
        // Each accumulated fragment is shorter than `min_playable_secs` and
        // the arena flushes at `max_combined_secs`, so this never overflows.
        let capacity =
            ((min_playable_secs + max_combined_secs).max(0.0) * f64::from(SAMPLE_RATE)).ceil();
        Self {
            min_playable_secs,
            max_combined_secs,
            last_play_end: 0.0,
            pending: Vec::with_capacity(capacity as usize),
            pending_secs: 0.0,
            units_played: 0,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(
            f64::from(config.min_playable_secs),
            f64::from(config.max_combined_secs),
        )
    }

    /// Start a fresh timeline for a new reply.
    pub fn reset(&mut self, now: f64) {
        self.pending.clear();
        self.pending_secs = 0.0;
        self.last_play_end = now;
        self.units_played = 0;
    }

    /// Accept one decoded fragment.
    ///
    /// Returns the units that became playable, in timeline order (zero, one,
    /// or two: a flushed accumulation followed by the fragment itself).
    pub fn submit(&mut self, fragment: AudioFrame, now: f64) -> Vec<PlayableUnit> {
        let mut units = Vec::new();
        if fragment.is_empty() {
            return units;
        }

        let duration = fragment.duration();
        if duration < self.min_playable_secs && self.units_played > 0 {
            if self.pending.len() + fragment.len() > self.pending.capacity() {
                units.extend(self.flush(now));
            }
            self.pending.extend_from_slice(fragment.samples());
            self.pending_secs += duration;

            if self.pending_secs >= self.max_combined_secs {
                units.extend(self.flush(now));
            }
        } else {
            units.extend(self.flush(now));
            units.push(self.schedule(fragment, now));
        }

        units
    }

    /// Schedule whatever has been accumulated (used on "reply finished" and
    /// when the output drains while fragments are still pending).
    pub fn flush(&mut self, now: f64) -> Option<PlayableUnit> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = self.pending.to_vec();
        self.pending.clear();
        self.pending_secs = 0.0;
        log::debug!(
            "scheduler: flushing {:.3}s accumulated audio",
            samples.len() as f64 / f64::from(SAMPLE_RATE)
        );
        Some(self.schedule(AudioFrame::new(samples), now))
    }

    /// Place a unit directly on the timeline, bypassing accumulation.
    pub fn schedule(&mut self, frame: AudioFrame, now: f64) -> PlayableUnit {
        let start_time = now.max(self.last_play_end);
        self.last_play_end = start_time + frame.duration();
        self.units_played += 1;

        log::debug!(
            "scheduler: unit {} at {:.3}s for {:.3}s",
            self.units_played,
            start_time,
            frame.duration()
        );

        PlayableUnit {
            frame,
            start_time,
            index: self.units_played,
        }
    }

    /// Units scheduled since the last [`reset`](Self::reset).
    pub fn units_played(&self) -> u64 {
        self.units_played
    }

    /// Timeline position where the last scheduled unit ends.
    pub fn last_play_end(&self) -> f64 {
        self.last_play_end
    }

    /// Seconds of audio waiting in the accumulation buffer.
    pub fn pending_secs(&self) -> f64 {
        self.pending_secs
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(d: f64) -> AudioFrame {
        AudioFrame::new(vec![0.1; (d * f64::from(SAMPLE_RATE)).round() as usize])
    }

    fn scheduler() -> PlaybackScheduler {
        let mut s = PlaybackScheduler::new(0.05, 1.0);
        s.reset(0.0);
        s
    }

    #[test]
    fn first_fragment_plays_even_if_short() {
        let mut s = scheduler();
        let units = s.submit(secs(0.02), 0.0);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].index, 1);
    }

    #[test]
    fn short_fragments_combine_before_large_fragment() {
        let mut s = scheduler();
        // Reply already playing.
        let lead = s.submit(secs(0.5), 0.0);
        assert_eq!(lead.len(), 1);

        let mut units = Vec::new();
        for (i, d) in [0.02, 0.02, 0.03, 1.2].into_iter().enumerate() {
            units.extend(s.submit(secs(d), 0.1 * i as f64));
        }

        assert_eq!(units.len(), 2);
        assert!((units[0].duration() - 0.07).abs() < 1e-6);
        assert!((units[1].duration() - 1.2).abs() < 1e-6);
        assert!((units[0].start_time - 0.5).abs() < 1e-9);
        assert!((units[1].start_time - units[0].end_time()).abs() < 1e-9);
    }

    #[test]
    fn accumulation_flushes_at_max_duration() {
        let mut s = PlaybackScheduler::new(0.05, 0.1);
        s.reset(0.0);
        s.submit(secs(0.2), 0.0);

        assert!(s.submit(secs(0.04), 0.0).is_empty());
        assert!(s.submit(secs(0.04), 0.0).is_empty());
        let units = s.submit(secs(0.04), 0.0);
        assert_eq!(units.len(), 1);
        assert!((units[0].duration() - 0.12).abs() < 1e-6);
        assert!(!s.has_pending());
    }

    #[test]
    fn accumulation_reuses_its_arena() {
        let mut s = PlaybackScheduler::new(0.05, 0.1);
        s.reset(0.0);
        s.submit(secs(0.2), 0.0);
        let capacity = s.pending.capacity();
        assert!(capacity >= (0.15 * f64::from(SAMPLE_RATE)) as usize);

        for _ in 0..50 {
            s.submit(secs(0.04), 0.0);
        }
        s.flush(0.0);
        s.reset(0.0);
        assert_eq!(s.pending.capacity(), capacity);
    }

    #[test]
    fn explicit_flush_schedules_pending() {
        let mut s = scheduler();
        s.submit(secs(0.3), 0.0);
        s.submit(secs(0.01), 0.0);
        assert!(s.has_pending());

        let unit = s.flush(0.0).expect("pending audio");
        assert!((unit.start_time - 0.3).abs() < 1e-9);
        assert!(s.flush(0.0).is_none());
    }

    #[test]
    fn late_fragment_starts_now() {
        let mut s = scheduler();
        s.submit(secs(0.1), 0.0);
        let units = s.submit(secs(0.1), 5.0);
        assert!((units[0].start_time - 5.0).abs() < 1e-9);
    }

    #[test]
    fn units_never_overlap_for_irregular_arrivals() {
        let mut s = scheduler();
        let durations = [0.3, 0.01, 0.2, 0.04, 0.04, 0.6, 0.02, 0.9, 0.03, 0.03, 1.5];
        let arrivals = [0.0, 0.05, 0.07, 0.4, 0.41, 0.9, 2.5, 2.6, 2.61, 4.0, 9.0];

        let mut units = Vec::new();
        for (&d, &t) in durations.iter().zip(&arrivals) {
            units.extend(s.submit(secs(d), t));
        }
        units.extend(s.flush(10.0));

        for pair in units.windows(2) {
            assert!(pair[1].start_time >= pair[0].start_time);
            assert!(pair[1].start_time >= pair[0].end_time() - 1e-9);
        }
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.index, i as u64 + 1);
        }
    }

    #[test]
    fn reset_drops_stale_timeline() {
        let mut s = scheduler();
        s.submit(secs(1.0), 0.0);
        s.submit(secs(0.01), 0.0);
        s.reset(0.2);

        assert_eq!(s.units_played(), 0);
        assert!(!s.has_pending());
        let units = s.submit(secs(0.1), 0.2);
        assert!((units[0].start_time - 0.2).abs() < 1e-9);
        assert_eq!(units[0].index, 1);
    }

    #[test]
    fn empty_fragment_is_ignored() {
        let mut s = scheduler();
        assert!(s.submit(AudioFrame::default(), 0.0).is_empty());
        assert_eq!(s.units_played(), 0);
    }
}
