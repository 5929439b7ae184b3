//! Global hotkeys, backed by `rdev`.
//!
//! Two bindings: one toggles the conversation (start when idle, end
//! otherwise), the other ends the current utterance without waiting for
//! silence.  `rdev::listen()` blocks forever, so it runs on a dedicated OS
//! thread ([`HotkeyListener`]); the UI thread turns [`HotkeyEvent`]s into
//! session commands.
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use voice_duplex::config::HotkeyConfig;
//! use voice_duplex::hotkey::{HotkeyBindings, HotkeyListener};
//!
//! let bindings = HotkeyBindings::from_config(&HotkeyConfig::default()).unwrap();
//! let (tx, _rx) = mpsc::unbounded_channel();
//! let _listener = HotkeyListener::start(bindings, tx).unwrap();
//! ```

pub mod listener;

use anyhow::{anyhow, Result};

use crate::config::HotkeyConfig;

pub use listener::{HotkeyListener, KeyRouter};

// ---------------------------------------------------------------------------
// HotkeyEvent
// ---------------------------------------------------------------------------

/// Events emitted by the hotkey listener thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// Start the conversation, or end it if one is running.
    ToggleConversation,
    /// Finish the current utterance now.
    StopSpeaking,
}

// ---------------------------------------------------------------------------
// HotkeyBindings
// ---------------------------------------------------------------------------

/// Resolved key bindings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotkeyBindings {
    pub toggle_conversation: rdev::Key,
    pub stop_speaking: rdev::Key,
}

impl HotkeyBindings {
    /// Resolve the configured key names.
    ///
    /// # Errors
    ///
    /// Unknown key names, or both actions bound to the same key.
    pub fn from_config(config: &HotkeyConfig) -> Result<Self> {
        let resolve = |name: &str| {
            parse_key(name).ok_or_else(|| anyhow!("unknown hotkey '{name}'"))
        };
        let bindings = Self {
            toggle_conversation: resolve(&config.toggle_conversation_key)?,
            stop_speaking: resolve(&config.stop_speaking_key)?,
        };
        if bindings.toggle_conversation == bindings.stop_speaking {
            return Err(anyhow!(
                "toggle and stop hotkeys are both bound to '{}'",
                config.toggle_conversation_key
            ));
        }
        Ok(bindings)
    }
}

// ---------------------------------------------------------------------------
// parse_key
// ---------------------------------------------------------------------------

/// Parse a key name from the config into an [`rdev::Key`].
///
/// Supports F1–F12, a handful of named keys that are rarely typed, and
/// single ASCII letters (case-insensitive).
///
/// ```
/// use voice_duplex::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"),    Some(rdev::Key::F9));
/// assert_eq!(parse_key("Pause"), Some(rdev::Key::Pause));
/// assert_eq!(parse_key("q"),     Some(rdev::Key::KeyQ));
/// assert_eq!(parse_key("Hyper"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key::*;

    let key = match name.trim() {
        "F1" => F1,
        "F2" => F2,
        "F3" => F3,
        "F4" => F4,
        "F5" => F5,
        "F6" => F6,
        "F7" => F7,
        "F8" => F8,
        "F9" => F9,
        "F10" => F10,
        "F11" => F11,
        "F12" => F12,
        "Escape" | "Esc" => Escape,
        "Pause" => Pause,
        "ScrollLock" => ScrollLock,
        "PrintScreen" => PrintScreen,
        "Insert" => Insert,
        "Home" => Home,
        "End" => End,
        "PageUp" => PageUp,
        "PageDown" => PageDown,
        other => return parse_letter(other),
    };
    Some(key)
}

fn parse_letter(name: &str) -> Option<rdev::Key> {
    use rdev::Key::*;

    let mut chars = name.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return None;
    };
    const LETTERS: [rdev::Key; 26] = [
        KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM, KeyN, KeyO,
        KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
    ];
    let c = c.to_ascii_uppercase();
    c.is_ascii_uppercase()
        .then(|| LETTERS[usize::from(c as u8 - b'A')])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_function_and_named_keys() {
        assert_eq!(parse_key("F1"), Some(rdev::Key::F1));
        assert_eq!(parse_key("F10"), Some(rdev::Key::F10));
        assert_eq!(parse_key(" F12 "), Some(rdev::Key::F12));
        assert_eq!(parse_key("Esc"), Some(rdev::Key::Escape));
        assert_eq!(parse_key("PageDown"), Some(rdev::Key::PageDown));
    }

    #[test]
    fn parse_letters_case_insensitive() {
        assert_eq!(parse_key("a"), Some(rdev::Key::KeyA));
        assert_eq!(parse_key("Z"), Some(rdev::Key::KeyZ));
        assert_eq!(parse_key("m"), Some(rdev::Key::KeyM));
    }

    #[test]
    fn parse_unknown_returns_none() {
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("ab"), None);
        assert_eq!(parse_key("1"), None);
        assert_eq!(parse_key("é"), None);
        assert_eq!(parse_key("Ctrl+V"), None);
    }

    #[test]
    fn default_bindings_resolve() {
        let b = HotkeyBindings::from_config(&HotkeyConfig::default()).unwrap();
        assert_eq!(b.toggle_conversation, rdev::Key::F9);
        assert_eq!(b.stop_speaking, rdev::Key::F10);
    }

    #[test]
    fn duplicate_or_unknown_bindings_fail() {
        let mut cfg = HotkeyConfig::default();
        cfg.stop_speaking_key = "F9".into();
        assert!(HotkeyBindings::from_config(&cfg).is_err());

        cfg.stop_speaking_key = "Hyper".into();
        assert!(HotkeyBindings::from_config(&cfg).is_err());
    }
}
