//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to the session
//! thread.  Every section is `#[serde(default)]` so a partial
//! `settings.toml` fills the rest from defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use super::AppPaths;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Remote conversation endpoint and socket resilience settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host the client talks to, e.g. `http://localhost:8000`.  The socket
    /// URL is derived from it (see [`AppConfig::socket_url`]).
    pub base_url: String,
    /// Seconds between keep-alive messages while the socket is open.
    pub keepalive_secs: u64,
    /// Reconnect delay step: attempt `n` waits `n * reconnect_base_ms`.
    pub reconnect_base_ms: u64,
    /// Upper bound on any single reconnect delay.
    pub reconnect_max_ms: u64,
    /// Consecutive failed reconnects before giving up.
    pub max_reconnect_attempts: u32,
    /// Wait before the single retry of a send that found the socket closed.
    pub send_retry_delay_ms: u64,
    /// Give up on a reply that has not started after this many seconds.
    pub reply_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            keepalive_secs: 30,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 5_000,
            max_reconnect_attempts: 3,
            send_retry_delay_ms: 1_000,
            reply_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Client sample rate in Hz.  Must be 24 000.
    pub sample_rate: u32,
    /// Samples per analysis frame fed to the speech detectors.
    pub analysis_frame_samples: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Audio input device name.  `None` means the system default.
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::audio::SAMPLE_RATE,
            analysis_frame_samples: 1_024,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            input_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// VadConfig
// ---------------------------------------------------------------------------

/// Speech onset / offset detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS a frame must exceed to count towards onset.
    pub speech_threshold: f32,
    /// Consecutive loud frames that declare onset.
    pub required_consecutive_frames: u32,
    /// RMS below which a frame counts as silence while recording.
    pub silence_threshold: f32,
    /// Continuous silence that ends an utterance.
    pub silence_duration_secs: f32,
    /// Audio kept before onset so the first word is not clipped.
    pub pre_roll_secs: f32,
    /// Listening budget before the onset detector restarts.
    pub onset_timeout_secs: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.02,
            required_consecutive_frames: 2,
            silence_threshold: 0.01,
            silence_duration_secs: 0.9,
            pre_roll_secs: 2.0,
            onset_timeout_secs: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Reply playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Fragments shorter than this are accumulated once a reply is playing.
    pub min_playable_secs: f32,
    /// Accumulated audio is flushed when it reaches this length.
    pub max_combined_secs: f32,
    /// Quiet period after the last unit finishes before listening resumes.
    pub completion_grace_secs: f32,
    /// Attempts to hand a unit to the output device before giving up.
    pub max_retries: u32,
    /// First retry delay; doubles on every further attempt.
    pub retry_backoff_ms: u64,
    /// Play a short chime when a reply begins.
    pub reply_chime: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_playable_secs: 0.05,
            max_combined_secs: 1.0,
            completion_grace_secs: 0.75,
            max_retries: 3,
            retry_backoff_ms: 100,
            reply_chime: true,
        }
    }
}

// ---------------------------------------------------------------------------
// UtteranceConfig
// ---------------------------------------------------------------------------

/// Minimum-utterance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UtteranceConfig {
    /// Sealed utterances below this many PCM bytes are dropped.
    pub discard_below_bytes: usize,
    /// Utterances below this many PCM bytes are sent but flagged.
    pub usable_bytes: usize,
    /// Delay before listening resumes after a send/reply error.
    pub error_resume_ms: u64,
}

impl Default for UtteranceConfig {
    fn default() -> Self {
        Self {
            discard_below_bytes: 1_000,
            // 0.5 s of 24 kHz 16-bit mono.
            usable_bytes: 24_000,
            error_resume_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Starts the conversation when idle, ends it otherwise.
    pub toggle_conversation_key: String,
    /// Ends the current utterance without waiting for silence.
    pub stop_speaking_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            toggle_conversation_key: "F9".into(),
            stop_speaking_key: "F10".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// egui window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Last saved window position `(x, y)` in screen pixels.  `None` lets
    /// the window manager choose.
    pub window_position: Option<(f32, f32)>,
    /// Keep the window floating above all other windows.
    pub always_on_top: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_position: None,
            always_on_top: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_duplex::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// println!("{}", config.socket_url().unwrap());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub playback: PlaybackConfig,
    pub utterance: UtteranceConfig,
    pub hotkey: HotkeyConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path and validate it.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the client cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate != crate::audio::SAMPLE_RATE {
            bail!(
                "audio.sample_rate must be {} Hz, got {}",
                crate::audio::SAMPLE_RATE,
                self.audio.sample_rate
            );
        }
        if self.audio.analysis_frame_samples == 0 {
            bail!("audio.analysis_frame_samples must be > 0");
        }
        if self.vad.silence_threshold > self.vad.speech_threshold {
            bail!(
                "vad.silence_threshold ({}) must not exceed vad.speech_threshold ({})",
                self.vad.silence_threshold,
                self.vad.speech_threshold
            );
        }
        if self.utterance.discard_below_bytes > self.utterance.usable_bytes {
            bail!("utterance.discard_below_bytes must not exceed utterance.usable_bytes");
        }
        self.socket_url()?;
        Ok(())
    }

    /// Socket endpoint derived from `server.base_url`: same host, path `/ws`,
    /// `wss` when the base is `https`.
    pub fn socket_url(&self) -> Result<Url> {
        let base = Url::parse(&self.server.base_url)
            .with_context(|| format!("invalid server.base_url '{}'", self.server.base_url))?;
        let scheme = match base.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => bail!("unsupported server.base_url scheme '{other}'"),
        };
        let host = base
            .host_str()
            .context("server.base_url has no host")?;
        let authority = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Url::parse(&format!("{scheme}://{authority}/ws"))?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
