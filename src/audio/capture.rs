//! Microphone capture via `cpal`.
//!
//! [`CaptureDevice`] is the capability the session drives: open it with a
//! channel, receive fixed-size analysis frames of 24 kHz mono audio, close
//! it.  [`CpalCapture`] is the platform implementation.  It prefers a native
//! 24 kHz mono stream and otherwise down-mixes and resamples inside the
//! callback.
//!
//! ```text
//! cpal callback ─▶ downmix ─▶ StreamResampler ─▶ FrameChunker ─▶ AudioFrame (mpsc)
//! ```

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::AudioConfig;

use super::frame::{AudioFrame, SAMPLE_RATE};
use super::resample::{downmix, StreamResampler};

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Capture device could not be acquired (permission denied, busy, missing).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device '{0}' not found")]
    NamedDeviceMissing(String),

    #[error("failed to query input config: {0}")]
    Config(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("cannot convert {rate} Hz input: {reason}")]
    Resampler { rate: u32, reason: String },
}

// ---------------------------------------------------------------------------
// CaptureConstraints
// ---------------------------------------------------------------------------

/// What the session asks of the capture device.
///
/// The processing flags are requests; platforms that do not expose them
/// apply their own defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Samples per analysis frame delivered to the session.
    pub frame_samples: usize,
}

impl CaptureConstraints {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
            sample_rate: SAMPLE_RATE,
            channel_count: 1,
            frame_samples: config.analysis_frame_samples.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// Capture capability owned by the session.
pub trait CaptureDevice {
    /// Acquire the device and start delivering frames to `frames`.
    ///
    /// # Errors
    ///
    /// [`DeviceError`] when the device is unavailable.
    fn open(
        &mut self,
        constraints: &CaptureConstraints,
        frames: mpsc::UnboundedSender<AudioFrame>,
    ) -> Result<(), DeviceError>;

    /// Stop the stream and release the device.  Must be safe to call when
    /// already closed.
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// FrameChunker
// ---------------------------------------------------------------------------

/// Regroups arbitrarily sized callback buffers into fixed-size frames.
#[derive(Debug)]
pub struct FrameChunker {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Add samples and return every complete frame, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_samples - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_samples {
                let full = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_samples),
                );
                frames.push(AudioFrame::new(full));
            }
        }
        frames
    }
}

// ---------------------------------------------------------------------------
// CpalCapture
// ---------------------------------------------------------------------------

/// [`CaptureDevice`] backed by the default (or named) cpal input device.
pub struct CpalCapture {
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
}

impl CpalCapture {
    /// `device_name = None` selects the system default input.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, DeviceError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host.default_input_device().ok_or(DeviceError::NoDevice),
            Some(name) => host
                .input_devices()
                .map_err(|e| DeviceError::Config(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| DeviceError::NamedDeviceMissing(name.clone())),
        }
    }

    /// Prefer a native config matching the constraints, else the default.
    fn pick_config(
        device: &cpal::Device,
        constraints: &CaptureConstraints,
    ) -> Result<cpal::StreamConfig, DeviceError> {
        let wanted = cpal::SampleRate(constraints.sample_rate);

        let native = device
            .supported_input_configs()
            .map_err(|e| DeviceError::Config(e.to_string()))?
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .find(|c| {
                c.channels() == constraints.channel_count
                    && c.min_sample_rate() <= wanted
                    && c.max_sample_rate() >= wanted
            });

        match native {
            Some(range) => Ok(range.with_sample_rate(wanted).config()),
            None => device
                .default_input_config()
                .map(Into::into)
                .map_err(|e| DeviceError::Config(e.to_string())),
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn open(
        &mut self,
        constraints: &CaptureConstraints,
        frames: mpsc::UnboundedSender<AudioFrame>,
    ) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = self.find_device()?;
        let config = Self::pick_config(&device, constraints)?;
        let channels = config.channels;
        let rate = config.sample_rate.0;

        log::info!(
            "capture: opening '{}' at {rate} Hz, {channels} ch (echo_cancellation={}, noise_suppression={}, agc={} requested from platform)",
            device.name().unwrap_or_default(),
            constraints.echo_cancellation,
            constraints.noise_suppression,
            constraints.auto_gain_control,
        );

        let resampler = StreamResampler::new(rate, constraints.sample_rate).map_err(|e| {
            DeviceError::Resampler {
                rate,
                reason: e.to_string(),
            }
        })?;
        let pipeline = Arc::new(Mutex::new((
            resampler,
            FrameChunker::new(constraints.frame_samples),
        )));

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix(data, channels);
                let Ok(mut guard) = pipeline.lock() else {
                    return;
                };
                let (resampler, chunker) = &mut *guard;
                let converted = resampler.process(&mono);
                for frame in chunker.push(&converted) {
                    // Receiver dropped means the session is closing.
                    let _ = frames.send(frame);
                }
            },
            |err: cpal::StreamError| {
                log::error!("capture: cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("capture: pause on close failed: {e}");
            }
            log::info!("capture: stream closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_emits_fixed_frames_in_order() {
        let mut chunker = FrameChunker::new(4);
        assert!(chunker.push(&[1.0, 2.0, 3.0]).is_empty());

        let frames = chunker.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(frames[1].samples(), &[5.0, 6.0, 7.0, 8.0]);

        let frames = chunker.push(&[10.0, 11.0, 12.0]);
        assert_eq!(frames[0].samples(), &[9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn constraints_follow_config() {
        let config = AudioConfig::default();
        let c = CaptureConstraints::from_config(&config);
        assert_eq!(c.sample_rate, 24_000);
        assert_eq!(c.channel_count, 1);
        assert_eq!(c.frame_samples, 1024);
        assert!(c.echo_cancellation && c.noise_suppression && c.auto_gain_control);
    }

    #[test]
    fn audio_frame_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioFrame>();
    }
}
