//! Full-duplex voice conversation client.
//!
//! Microphone audio is segmented into utterances by an energy detector,
//! encoded as 24 kHz 16-bit mono WAV and sent over a socket; reply audio
//! streams back as fragments that are coalesced into playable units and
//! scheduled gaplessly on the output device.
//!
//! - [`audio`]: PCM codec, energy/VAD, playback scheduling, cpal devices.
//! - [`connection`]: socket lifecycle, reconnects, keep-alive.
//! - [`session`]: the conversation state machine.
//! - [`config`]: TOML settings.
//! - [`hotkey`]: global hotkeys.
//! - [`app`]: the egui window.

pub mod app;
pub mod audio;
pub mod config;
pub mod connection;
pub mod hotkey;
pub mod session;
