//! The conversation session: state machine plus the loop that drives it.
//!
//! # Architecture
//!
//! ```text
//! egui app / hotkeys ── SessionCommand (mpsc) ──▶ ConversationSession::run()
//!                                                   │  owns capture, output, socket
//! egui app ◀──────────── UiEvent (mpsc) ────────────┘
//! ```
//!
//! The session runs on its own thread inside a current-thread tokio
//! runtime, so the cpal streams it owns never cross threads.

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{ConversationSession, SessionError};
pub use state::{ConversationState, Panel, SessionCommand, UiEvent};
