//! Conversation state machine and the messages exchanged with the UI.
//!
//! [`ConversationState`] is the single source of truth for where the session
//! is in a turn.  The UI never reads it directly; it receives [`UiEvent`]s
//! and sends back [`SessionCommand`]s.

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

/// States of one conversation.
///
/// ```text
/// Idle ──start──▶ AwaitingSpeech ──onset──▶ Recording ──offset / stop──▶ Sending
///                   ▲   │ timeout                                          │
///                   │   └──────▶ (self)                       handed off ──┘
///                   │                                                      ▼
///                   ├──────── grace elapsed ─── PlayingReply ◀─ fragment ─ AwaitingReply
///                   └──────── error / timeout / too short ◀─────────────────┘
/// any state ──end──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    /// No conversation; devices and socket released.
    #[default]
    Idle,
    /// Microphone open, waiting for speech onset.
    AwaitingSpeech,
    /// Speech detected; audio accumulates in the capture buffer.
    Recording,
    /// Utterance sealed and being handed to the socket.
    Sending,
    /// Utterance sent; no reply audio yet.
    AwaitingReply,
    /// Reply audio is being scheduled / played.
    PlayingReply,
}

impl ConversationState {
    /// `true` for every state except [`Idle`](Self::Idle).
    ///
    /// ```
    /// use voice_duplex::session::ConversationState;
    ///
    /// assert!(!ConversationState::Idle.is_active());
    /// assert!(ConversationState::AwaitingSpeech.is_active());
    /// assert!(ConversationState::PlayingReply.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        !matches!(self, ConversationState::Idle)
    }

    /// `true` while a reply is expected or playing.
    pub fn is_replying(&self) -> bool {
        matches!(
            self,
            ConversationState::AwaitingReply | ConversationState::PlayingReply
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: ConversationState) -> bool {
        use ConversationState::*;

        if next == Idle {
            return true;
        }
        matches!(
            (self, next),
            (Idle, AwaitingSpeech)
                | (AwaitingSpeech, AwaitingSpeech)
                | (AwaitingSpeech, Recording)
                | (Recording, Sending)
                | (Recording, AwaitingSpeech)
                | (Sending, AwaitingReply)
                | (Sending, AwaitingSpeech)
                | (AwaitingReply, PlayingReply)
                | (AwaitingReply, AwaitingSpeech)
                | (PlayingReply, AwaitingSpeech)
        )
    }

    /// A short human-readable label for the status bar.
    pub fn label(&self) -> &'static str {
        match self {
            ConversationState::Idle => "Idle",
            ConversationState::AwaitingSpeech => "Listening",
            ConversationState::Recording => "Recording",
            ConversationState::Sending => "Sending",
            ConversationState::AwaitingReply => "Waiting for reply",
            ConversationState::PlayingReply => "Replying",
        }
    }
}

// ---------------------------------------------------------------------------
// UI messages
// ---------------------------------------------------------------------------

/// The two text panels of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    /// What the server heard.
    Transcript,
    /// Progress of the spoken reply.
    Response,
}

/// Session → UI.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Free-text status line.
    Status(String),
    /// The conversation moved to a new state.
    State(ConversationState),
    /// Show a panel with the given text.
    ShowPanel(Panel, String),
    HidePanel(Panel),
}

/// UI / hotkeys → session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin a conversation (no-op while one is active).
    Start,
    /// End the current utterance now, or halt a playing reply.
    Stop,
    /// End the conversation and release every device.
    End,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationState::*;

    const ALL: [ConversationState; 6] = [
        Idle,
        AwaitingSpeech,
        Recording,
        Sending,
        AwaitingReply,
        PlayingReply,
    ];

    #[test]
    fn every_state_can_end() {
        for s in ALL {
            assert!(s.can_transition_to(Idle), "{s:?} -> Idle");
        }
    }

    #[test]
    fn turn_cycle_is_legal() {
        let cycle = [
            Idle,
            AwaitingSpeech,
            Recording,
            Sending,
            AwaitingReply,
            PlayingReply,
            AwaitingSpeech,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn illegal_shortcuts() {
        assert!(!Idle.can_transition_to(Recording));
        assert!(!AwaitingSpeech.can_transition_to(PlayingReply));
        assert!(!Recording.can_transition_to(PlayingReply));
        assert!(!PlayingReply.can_transition_to(Recording));
    }

    #[test]
    fn labels_are_distinct() {
        let mut labels: Vec<_> = ALL.iter().map(|s| s.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), ALL.len());
    }
}
