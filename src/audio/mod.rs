//! Audio layer: frames, codec, energy, speech boundaries, playback timeline,
//! and the cpal-backed capture/output devices.
//!
//! # Data flow
//!
//! ```text
//! capture ─▶ AudioFrame ─▶ energy::rms ─▶ OnsetDetector / OffsetDetector
//!                                            │
//!                           CaptureBuffer ◀──┘ ─▶ codec::encode_container ─▶ socket
//!
//! socket ─▶ codec::decode_fragment ─▶ PlaybackScheduler ─▶ PlayableUnit ─▶ output
//! ```
//!
//! Everything is 24 kHz mono end to end ([`SAMPLE_RATE`]).

pub mod buffer;
pub mod capture;
pub mod codec;
pub mod energy;
pub mod frame;
pub mod playback;
pub mod resample;
pub mod scheduler;
pub mod tone;
pub mod vad;

pub use buffer::{CaptureBuffer, RingBuffer};
pub use capture::{CaptureConstraints, CaptureDevice, CpalCapture, DeviceError, FrameChunker};
pub use codec::CodecError;
pub use frame::{AudioFrame, PlayableUnit, SAMPLE_RATE};
pub use playback::{CpalOutput, OutputDevice, PlaybackError, Timeline, UnitFinished};
pub use resample::{downmix, StreamResampler};
pub use scheduler::PlaybackScheduler;
pub use tone::reply_chime;
pub use vad::{OffsetDetector, OnsetDetector, OnsetEvent};
