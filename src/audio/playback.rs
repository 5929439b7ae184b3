//! Audio output via `cpal`.
//!
//! [`OutputDevice`] is the capability the session schedules playable units
//! on.  The device exposes a monotonic clock ([`OutputDevice::now`]) and
//! reports each unit's completion on a channel.
//!
//! [`CpalOutput`] keeps a [`Timeline`] behind a mutex shared with the cpal
//! callback.  The callback advances a sample clock; a unit plays when the
//! clock reaches its start sample and is reported finished when the clock
//! passes its last sample.  Silence is rendered between units.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use super::frame::{PlayableUnit, SAMPLE_RATE};

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// The output device rejected a unit or could not be opened.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("output device is not open")]
    NotOpen,

    #[error("output device unavailable: {0}")]
    Unavailable(String),

    #[error("unit {0} rejected by the output device")]
    Rejected(u64),
}

// ---------------------------------------------------------------------------
// OutputDevice
// ---------------------------------------------------------------------------

/// Notification that a unit has been fully rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitFinished {
    pub index: u64,
}

/// Output capability owned by the session.
pub trait OutputDevice {
    /// Acquire the device.  Completions are reported on `completions`.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Unavailable`] when no suitable device exists.
    fn open(&mut self, completions: mpsc::UnboundedSender<UnitFinished>) -> Result<(), PlaybackError>;

    /// Current position of the output clock in seconds.
    fn now(&self) -> f64;

    /// Queue `unit` to start at `unit.start_time`.
    ///
    /// # Errors
    ///
    /// [`PlaybackError`] when the device is closed or refuses the unit.
    fn schedule(&mut self, unit: &PlayableUnit) -> Result<(), PlaybackError>;

    /// Drop every queued unit without reporting completion.
    fn stop(&mut self);

    /// Release the device.  Must be safe to call when already closed.
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct QueuedUnit {
    index: u64,
    start: u64,
    samples: Vec<f32>,
}

impl QueuedUnit {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sample-clock renderer shared between the session and the audio callback.
#[derive(Debug, Default)]
pub struct Timeline {
    clock: u64,
    queue: VecDeque<QueuedUnit>,
}

impl Timeline {
    /// Clock position in seconds.
    pub fn now(&self) -> f64 {
        self.clock as f64 / f64::from(SAMPLE_RATE)
    }

    /// Queue a unit.  Start times in the past are clamped to the current
    /// clock; the queue is kept ordered by start sample.
    pub fn enqueue(&mut self, unit: &PlayableUnit) {
        let start = ((unit.start_time * f64::from(SAMPLE_RATE)).round() as u64).max(self.clock);
        let queued = QueuedUnit {
            index: unit.index,
            start,
            samples: unit.frame.samples().to_vec(),
        };
        let at = self.queue.partition_point(|q| q.start <= start);
        self.queue.insert(at, queued);
    }

    /// Render `frames` mono samples into `out` (one value per frame) and
    /// return the indices of units that finished during this block.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<u64> {
        let mut finished = Vec::new();
        for slot in out.iter_mut() {
            while self.queue.front().is_some_and(|u| u.end() <= self.clock) {
                if let Some(done) = self.queue.pop_front() {
                    finished.push(done.index);
                }
            }

            *slot = match self.queue.front() {
                Some(unit) if unit.start <= self.clock => {
                    unit.samples[(self.clock - unit.start) as usize]
                }
                _ => 0.0,
            };
            self.clock += 1;
        }

        while self.queue.front().is_some_and(|u| u.end() <= self.clock) {
            if let Some(done) = self.queue.pop_front() {
                finished.push(done.index);
            }
        }
        finished
    }

    /// Drop all queued units.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// [`OutputDevice`] backed by the default cpal output device at 24 kHz.
pub struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    stream: Option<cpal::Stream>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Timeline::default())),
            stream: None,
        }
    }

    fn pick_config(device: &cpal::Device) -> Result<cpal::StreamConfig, PlaybackError> {
        let rate = cpal::SampleRate(SAMPLE_RATE);
        let supports = |channels: u16| -> Option<cpal::StreamConfig> {
            device
                .supported_output_configs()
                .ok()?
                .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
                .find(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                })
                .map(|c| c.with_sample_rate(rate).config())
        };

        // Mono first, stereo (duplicated) as fallback.
        supports(1)
            .or_else(|| supports(2))
            .ok_or_else(|| PlaybackError::Unavailable("no 24 kHz output config".into()))
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for CpalOutput {
    fn open(&mut self, completions: mpsc::UnboundedSender<UnitFinished>) -> Result<(), PlaybackError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| PlaybackError::Unavailable("no output device".into()))?;
        let config = Self::pick_config(&device)?;
        let channels = usize::from(config.channels);

        log::info!(
            "playback: opening '{}' at {SAMPLE_RATE} Hz, {channels} ch",
            device.name().unwrap_or_default()
        );

        let timeline = Arc::clone(&self.timeline);
        let mut mono = Vec::new();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    mono.resize(frames, 0.0);

                    let finished = match timeline.lock() {
                        Ok(mut t) => t.render(&mut mono),
                        Err(_) => {
                            mono.fill(0.0);
                            Vec::new()
                        }
                    };

                    for (frame, &sample) in data.chunks_mut(channels).zip(&mono) {
                        frame.fill(sample);
                    }
                    for index in finished {
                        let _ = completions.send(UnitFinished { index });
                    }
                },
                |err| {
                    log::error!("playback: cpal stream error: {err}");
                },
                None,
            )
            .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn now(&self) -> f64 {
        self.timeline.lock().map(|t| t.now()).unwrap_or(0.0)
    }

    fn schedule(&mut self, unit: &PlayableUnit) -> Result<(), PlaybackError> {
        if self.stream.is_none() {
            return Err(PlaybackError::NotOpen);
        }
        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| PlaybackError::Rejected(unit.index))?;
        timeline.enqueue(unit);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut t) = self.timeline.lock() {
            t.clear();
        }
    }

    fn close(&mut self) {
        self.stop();
        if self.stream.take().is_some() {
            log::info!("playback: stream closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::AudioFrame;

    fn unit(index: u64, start_time: f64, samples: Vec<f32>) -> PlayableUnit {
        PlayableUnit {
            frame: AudioFrame::new(samples),
            start_time,
            index,
        }
    }

    #[test]
    fn renders_units_back_to_back() {
        let mut t = Timeline::default();
        let step = 1.0 / f64::from(SAMPLE_RATE);
        t.enqueue(&unit(1, 0.0, vec![0.1, 0.2]));
        t.enqueue(&unit(2, 2.0 * step, vec![0.3]));

        let mut out = vec![9.0; 4];
        let finished = t.render(&mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.0]);
        assert_eq!(finished, vec![1, 2]);
        assert_eq!(t.queued(), 0);
    }

    #[test]
    fn silence_before_start_and_completion_across_blocks() {
        let mut t = Timeline::default();
        let step = 1.0 / f64::from(SAMPLE_RATE);
        t.enqueue(&unit(7, 2.0 * step, vec![0.5, 0.5, 0.5]));

        let mut out = vec![0.0; 3];
        assert!(t.render(&mut out).is_empty());
        assert_eq!(out, vec![0.0, 0.0, 0.5]);

        let mut out = vec![0.0; 2];
        assert_eq!(t.render(&mut out), vec![7]);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn past_start_is_clamped_to_clock() {
        let mut t = Timeline::default();
        let mut out = vec![0.0; 10];
        t.render(&mut out);

        t.enqueue(&unit(1, 0.0, vec![0.4]));
        let mut out = vec![0.0; 1];
        t.render(&mut out);
        assert_eq!(out, vec![0.4]);
    }

    #[test]
    fn clear_drops_without_completion() {
        let mut t = Timeline::default();
        t.enqueue(&unit(1, 0.0, vec![0.1; 100]));
        t.clear();
        let mut out = vec![0.0; 200];
        assert!(t.render(&mut out).is_empty());
        assert!((t.now() - 200.0 / 24_000.0).abs() < 1e-12);
    }

    #[test]
    fn schedule_before_open_fails() {
        let mut out = CpalOutput::new();
        assert_eq!(
            out.schedule(&unit(1, 0.0, vec![0.0])),
            Err(PlaybackError::NotOpen)
        );
    }
}
