//! Dedicated OS-thread hotkey listener using `rdev::listen`.
//!
//! `rdev::listen` is a blocking call that must live on its own OS thread.
//! [`HotkeyListener`] owns that thread and a stop flag; dropping it sets the
//! flag so the callback silently ignores further events.
//!
//! # Shutdown caveat
//!
//! `rdev::listen` has **no graceful shutdown API**.  The OS thread stays
//! blocked in the rdev event loop until the process exits.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::{HotkeyBindings, HotkeyEvent};

// ---------------------------------------------------------------------------
// KeyRouter
// ---------------------------------------------------------------------------

/// Maps raw key events to [`HotkeyEvent`]s.
///
/// Holding a key makes the OS repeat `KeyPress`; only the first press
/// before a release is reported, so a held toggle key does not flap the
/// conversation on and off.
#[derive(Debug)]
pub struct KeyRouter {
    bindings: HotkeyBindings,
    toggle_held: bool,
    stop_held: bool,
}

impl KeyRouter {
    pub fn new(bindings: HotkeyBindings) -> Self {
        Self {
            bindings,
            toggle_held: false,
            stop_held: false,
        }
    }

    pub fn route(&mut self, event: &rdev::EventType) -> Option<HotkeyEvent> {
        match *event {
            rdev::EventType::KeyPress(k) if k == self.bindings.toggle_conversation => {
                (!std::mem::replace(&mut self.toggle_held, true))
                    .then_some(HotkeyEvent::ToggleConversation)
            }
            rdev::EventType::KeyPress(k) if k == self.bindings.stop_speaking => {
                (!std::mem::replace(&mut self.stop_held, true)).then_some(HotkeyEvent::StopSpeaking)
            }
            rdev::EventType::KeyRelease(k) if k == self.bindings.toggle_conversation => {
                self.toggle_held = false;
                None
            }
            rdev::EventType::KeyRelease(k) if k == self.bindings.stop_speaking => {
                self.stop_held = false;
                None
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyListener
// ---------------------------------------------------------------------------

/// Handle to a running hotkey listener thread.  Drop it to stop forwarding
/// events.
pub struct HotkeyListener {
    /// Shared stop flag, set on [`Drop`].
    stop: Arc<AtomicBool>,
    /// Never joined: `rdev::listen` never returns.
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Spawn the listener thread; matching key presses are sent on `tx`.
    ///
    /// # Errors
    ///
    /// The OS refused to create the thread.
    pub fn start(
        bindings: HotkeyBindings,
        tx: mpsc::UnboundedSender<HotkeyEvent>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let mut router = KeyRouter::new(bindings);
                let result = rdev::listen(move |event| {
                    if stop_clone.load(Ordering::Relaxed) {
                        return;
                    }
                    if let Some(hotkey) = router.route(&event.event_type) {
                        log::debug!("hotkey: {hotkey:?}");
                        let _ = tx.send(hotkey);
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {:?}", e);
                }
            })?;

        log::info!(
            "hotkey: toggle={:?} stop={:?}",
            bindings.toggle_conversation,
            bindings.stop_speaking
        );
        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
