//! Configuration: `AppConfig` with one section per subsystem, `AppPaths`
//! for the platform config directory, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, HotkeyConfig, PlaybackConfig, ServerConfig, UiConfig,
    UtteranceConfig, VadConfig,
};
