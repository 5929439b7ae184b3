//! Conversation session: drives capture, speech detection, the socket and
//! reply playback through one turn after another.
//!
//! [`ConversationSession`] singly owns the capture device, the output device
//! and the [`ConnectionManager`].  [`run`](ConversationSession::run) is one
//! `tokio::select!` loop over every event source:
//!
//! ```text
//! SessionCommand ──┐
//! capture frames ──┤
//! unit finished  ──┼─▶ LoopEvent ─▶ handle_event ─▶ state transition + UiEvent
//! connection     ──┤
//! deadlines      ──┘   (grace window, error resume, reply timeout, send retry)
//! ```
//!
//! Explicit stop and silence-based offset share one path,
//! [`finish_utterance`](ConversationSession::finish_utterance).

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio::{
    codec, reply_chime, AudioFrame, CaptureBuffer, CaptureConstraints, CaptureDevice, CodecError,
    DeviceError, OffsetDetector, OnsetDetector, OnsetEvent, OutputDevice, PlayableUnit,
    PlaybackError, PlaybackScheduler, UnitFinished,
};
use crate::config::AppConfig;
use crate::connection::{
    messages, ConnectionError, ConnectionEvent, ConnectionManager, ControlMessage, WireMessage,
};

use super::state::{ConversationState, Panel, SessionCommand, UiEvent};

/// Index given to the reply chime so it never counts as a reply fragment.
const CHIME_INDEX: u64 = 0;

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Failures inside a turn.  None of them ends the conversation by itself;
/// the session routes each back to listening or idle.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("microphone unavailable: {0}")]
    Device(#[from] DeviceError),

    #[error("audio output failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("could not reach the server: {0}")]
    Connection(#[from] ConnectionError),

    #[error("bad reply audio: {0}")]
    Codec(#[from] CodecError),

    #[error("server error: {0}")]
    Server(String),

    #[error("utterance too short ({bytes} bytes)")]
    UtteranceTooShort { bytes: usize },
}

// ---------------------------------------------------------------------------
// LoopEvent
// ---------------------------------------------------------------------------

/// Everything the session loop can wake up for.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    Command(SessionCommand),
    Frame(Option<AudioFrame>),
    UnitFinished(Option<UnitFinished>),
    Connection(ConnectionEvent),
    GraceElapsed,
    ResumeDue,
    ReplyTimeout,
    SendRetryDue,
    /// The command channel closed; the UI is gone.
    Shutdown,
}

// ---------------------------------------------------------------------------
// ConversationSession
// ---------------------------------------------------------------------------

pub struct ConversationSession {
    config: AppConfig,
    state: ConversationState,
    ui: mpsc::UnboundedSender<UiEvent>,

    capture: Box<dyn CaptureDevice>,
    capture_open: bool,
    frames: Option<mpsc::UnboundedReceiver<AudioFrame>>,

    output: Box<dyn OutputDevice>,
    output_open: bool,
    completions: Option<mpsc::UnboundedReceiver<UnitFinished>>,

    connection: ConnectionManager,

    onset: OnsetDetector,
    offset: OffsetDetector,
    utterance: Option<CaptureBuffer>,

    scheduler: PlaybackScheduler,
    /// The scheduler was reset for the current reply.
    reply_started: bool,
    /// The server signalled the end of the current reply.
    reply_done: bool,
    /// Units handed to the output device and not yet finished.
    in_flight: usize,

    grace_deadline: Option<Instant>,
    resume_deadline: Option<Instant>,
    reply_deadline: Option<Instant>,
    /// An utterance waiting for its one send retry.
    pending_send: Option<PendingSend>,
}

/// Sealed utterance the socket could not take on the first try.
#[derive(Debug)]
struct PendingSend {
    payload: Vec<u8>,
    flagged: bool,
    due: Instant,
}

impl ConversationSession {
    pub fn new(
        config: AppConfig,
        capture: Box<dyn CaptureDevice>,
        output: Box<dyn OutputDevice>,
        connection: ConnectionManager,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            onset: OnsetDetector::from_config(&config.vad),
            offset: OffsetDetector::from_config(&config.vad),
            scheduler: PlaybackScheduler::from_config(&config.playback),
            config,
            state: ConversationState::Idle,
            ui,
            capture,
            capture_open: false,
            frames: None,
            output,
            output_open: false,
            completions: None,
            connection,
            utterance: None,
            reply_started: false,
            reply_done: false,
            in_flight: 0,
            grace_deadline: None,
            resume_deadline: None,
            reply_deadline: None,
            pending_send: None,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Drive the session until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        log::info!("session: started");
        loop {
            let event = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => LoopEvent::Command(cmd),
                    None => LoopEvent::Shutdown,
                },
                frame = next_item(&mut self.frames) => LoopEvent::Frame(frame),
                done = next_item(&mut self.completions) => LoopEvent::UnitFinished(done),
                event = self.connection.recv() => LoopEvent::Connection(event),
                _ = sleep_until_opt(self.grace_deadline) => LoopEvent::GraceElapsed,
                _ = sleep_until_opt(self.resume_deadline) => LoopEvent::ResumeDue,
                _ = sleep_until_opt(self.reply_deadline) => LoopEvent::ReplyTimeout,
                _ = sleep_until_opt(self.pending_send.as_ref().map(|p| p.due)) => {
                    LoopEvent::SendRetryDue
                }
            };

            if !self.handle_event(event).await {
                break;
            }
        }
        log::info!("session: stopped");
    }

    /// Returns `false` when the loop should exit.
    pub(crate) async fn handle_event(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::Command(cmd) => self.handle_command(cmd).await,
            LoopEvent::Frame(Some(frame)) => self.handle_frame(frame).await,
            LoopEvent::Frame(None) => {
                log::warn!("session: capture stream ended");
                self.frames = None;
                if self.state.is_active() {
                    self.end_conversation();
                    self.status("Microphone disconnected");
                }
            }
            LoopEvent::UnitFinished(Some(done)) => self.handle_unit_finished(done).await,
            LoopEvent::UnitFinished(None) => self.completions = None,
            LoopEvent::Connection(event) => self.handle_connection(event).await,
            LoopEvent::GraceElapsed => {
                self.grace_deadline = None;
                if self.state == ConversationState::PlayingReply && self.in_flight == 0 {
                    log::info!("session: reply complete");
                    self.ui(UiEvent::ShowPanel(Panel::Response, "Reply finished".into()));
                    self.begin_listening();
                }
            }
            LoopEvent::ResumeDue => {
                self.resume_deadline = None;
                if self.state.is_active() {
                    self.begin_listening();
                }
            }
            LoopEvent::ReplyTimeout => {
                self.reply_deadline = None;
                // A reply-started notice with no audio behind it counts as
                // no reply at all.
                let silent_reply = self.state == ConversationState::PlayingReply
                    && self.scheduler.units_played() == 0;
                if self.state == ConversationState::AwaitingReply || silent_reply {
                    log::warn!("session: no reply within timeout");
                    if silent_reply {
                        self.stop_playback();
                    }
                    self.status("No reply from the server, listening again...");
                    self.begin_listening();
                }
            }
            LoopEvent::SendRetryDue => self.retry_send().await,
            LoopEvent::Shutdown => {
                self.end_conversation();
                return false;
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: SessionCommand) {
        log::debug!("session: command {cmd:?} in {:?}", self.state);
        match cmd {
            SessionCommand::Start => {
                if self.state.is_active() {
                    return;
                }
                if let Err(e) = self.start_conversation() {
                    log::error!("session: start failed: {e}");
                    self.release_devices();
                    self.status(format!("{e}. Check your audio devices and permissions."));
                }
            }
            SessionCommand::Stop => match self.state {
                ConversationState::Recording => self.finish_utterance().await,
                ConversationState::AwaitingReply | ConversationState::PlayingReply => {
                    let _ = self.connection.send(messages::stop());
                    self.halt_reply("Reply stopped");
                }
                _ => {}
            },
            SessionCommand::End => {
                if self.state.is_replying() {
                    let _ = self.connection.send(messages::stop());
                }
                self.end_conversation();
            }
        }
    }

    fn start_conversation(&mut self) -> Result<(), SessionError> {
        self.status("Connecting...");
        self.connection.open();

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        self.output.open(done_tx)?;
        self.output_open = true;
        self.completions = Some(done_rx);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let constraints = CaptureConstraints::from_config(&self.config.audio);
        self.capture.open(&constraints, frames_tx)?;
        self.capture_open = true;
        self.frames = Some(frames_rx);

        self.begin_listening();
        Ok(())
    }

    /// Tear down in a fixed order: capture stream, analysis, pending
    /// utterance, then playback and socket.  Safe to call repeatedly.
    fn end_conversation(&mut self) {
        let was_active = self.state.is_active();

        if self.capture_open {
            self.capture.close();
            self.capture_open = false;
        }
        self.frames = None;
        self.onset.reset();
        self.offset.reset();
        self.utterance = None;

        self.stop_playback();
        if self.output_open {
            self.output.close();
            self.output_open = false;
        }
        self.completions = None;

        self.connection.close();
        self.clear_deadlines();

        if was_active {
            self.transition(ConversationState::Idle);
            self.ui(UiEvent::HidePanel(Panel::Transcript));
            self.ui(UiEvent::HidePanel(Panel::Response));
            self.status("Conversation ended");
        }
    }

    /// Release devices opened by a start that failed half-way.
    fn release_devices(&mut self) {
        if self.capture_open {
            self.capture.close();
            self.capture_open = false;
        }
        if self.output_open {
            self.output.close();
            self.output_open = false;
        }
        self.frames = None;
        self.completions = None;
        self.connection.close();
    }

    // -----------------------------------------------------------------------
    // Capture side
    // -----------------------------------------------------------------------

    fn begin_listening(&mut self) {
        self.clear_deadlines();
        self.reply_started = false;
        self.reply_done = false;
        self.in_flight = 0;
        self.onset.reset();
        self.offset.reset();
        self.utterance = None;
        self.transition(ConversationState::AwaitingSpeech);
        self.status("Listening...");
    }

    async fn handle_frame(&mut self, frame: AudioFrame) {
        match self.state {
            ConversationState::AwaitingSpeech => match self.onset.push(frame.samples()) {
                OnsetEvent::Pending => {}
                OnsetEvent::SpeechStart(pre_roll) => {
                    self.utterance = Some(CaptureBuffer::with_pre_roll(pre_roll));
                    self.offset.reset();
                    self.transition(ConversationState::Recording);
                    self.status("Recording...");
                }
                OnsetEvent::Timeout => {
                    log::info!("session: no speech detected, listening again");
                    self.transition(ConversationState::AwaitingSpeech);
                }
            },
            ConversationState::Recording => {
                if let Some(buffer) = self.utterance.as_mut() {
                    buffer.append(frame.samples());
                }
                if self.offset.push(frame.samples()) {
                    self.finish_utterance().await;
                }
            }
            // Frames outside a listening turn are dropped.
            _ => {}
        }
    }

    /// Seal the utterance and hand it to the socket.
    async fn finish_utterance(&mut self) {
        let Some(buffer) = self.utterance.take() else {
            self.begin_listening();
            return;
        };
        self.transition(ConversationState::Sending);

        let payload = match self.seal_utterance(buffer) {
            Ok(payload) => payload,
            Err(SessionError::UtteranceTooShort { bytes }) => {
                log::info!("session: discarding {bytes} byte utterance");
                self.begin_listening();
                return;
            }
            Err(e) => {
                self.fail_turn(e);
                return;
            }
        };
        let flagged = payload.len() - codec::WAV_HEADER_LEN < self.config.utterance.usable_bytes;

        self.status("Sending audio...");
        match self.connection.send(WireMessage::Binary(payload.clone())) {
            Ok(()) => self.handed_off(flagged),
            Err(e) => {
                // Single retry, fired by the loop at `due`.
                log::warn!("session: send failed ({e}), retrying once");
                let delay = self.connection.prepare_retry();
                self.pending_send = Some(PendingSend {
                    payload,
                    flagged,
                    due: Instant::now() + delay,
                });
                self.status("Connection lost, retrying...");
            }
        }
    }

    async fn retry_send(&mut self) {
        let Some(pending) = self.pending_send.take() else {
            return;
        };
        if self.state != ConversationState::Sending {
            return;
        }
        match self
            .connection
            .retry_send(WireMessage::Binary(pending.payload))
            .await
        {
            Ok(()) => self.handed_off(pending.flagged),
            Err(e) => self.fail_turn(e.into()),
        }
    }

    /// The payload is with the socket; wait for the reply.
    fn handed_off(&mut self, flagged: bool) {
        self.transition(ConversationState::AwaitingReply);
        self.reply_deadline =
            Some(Instant::now() + Duration::from_secs(self.config.server.reply_timeout_secs));
        self.ui(UiEvent::ShowPanel(Panel::Transcript, "Processing...".into()));
        if flagged {
            self.status("Very short utterance, may fail recognition");
        } else {
            self.status("Processing audio...");
        }
    }

    fn seal_utterance(&self, buffer: CaptureBuffer) -> Result<Vec<u8>, SessionError> {
        let bytes = buffer.pcm_bytes();
        if bytes < self.config.utterance.discard_below_bytes {
            return Err(SessionError::UtteranceTooShort { bytes });
        }
        log::info!(
            "session: utterance of {:.2}s ({bytes} bytes)",
            buffer.duration_secs()
        );
        Ok(codec::encode_container(&buffer.seal()))
    }

    /// Report a failed turn and resume listening after a short delay.
    fn fail_turn(&mut self, err: SessionError) {
        log::warn!("session: turn failed: {err}");
        self.status(err.to_string());
        self.clear_deadlines();
        self.resume_deadline =
            Some(Instant::now() + Duration::from_millis(self.config.utterance.error_resume_ms));
    }

    // -----------------------------------------------------------------------
    // Connection side
    // -----------------------------------------------------------------------

    async fn handle_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                log::info!("session: connected");
                if self.state == ConversationState::AwaitingSpeech {
                    self.status("Connected. Listening...");
                }
            }
            ConnectionEvent::Binary(bytes) => self.handle_fragment(&bytes).await,
            ConnectionEvent::Control(control) => self.handle_control(control).await,
            ConnectionEvent::Reconnecting { attempt, delay } => {
                self.status(format!(
                    "Connection lost, reconnecting in {:.0}s (attempt {attempt}/{})",
                    delay.as_secs_f32(),
                    self.config.server.max_reconnect_attempts
                ));
            }
            ConnectionEvent::Disconnected => {
                self.end_conversation();
                self.status("Disconnected from the server. Press Start to try again.");
            }
        }
    }

    async fn handle_control(&mut self, control: ControlMessage) {
        log::debug!("session: control {control:?}");
        match control {
            ControlMessage::Processing => {
                if self.state == ConversationState::AwaitingReply {
                    self.status("Processing audio...");
                }
            }
            ControlMessage::ReplyStarted => {
                if self.state.is_replying() && !self.reply_started {
                    let _ = self.start_reply().await;
                }
            }
            ControlMessage::ReplyFinished => match self.state {
                ConversationState::PlayingReply => {
                    self.reply_done = true;
                    if let Some(unit) = self.scheduler.flush(self.output.now()) {
                        self.play_unit(unit).await;
                    }
                    self.arm_grace_if_drained();
                }
                ConversationState::AwaitingReply => {
                    self.ui(UiEvent::ShowPanel(Panel::Response, "Reply finished".into()));
                    self.begin_listening();
                }
                _ => {}
            },
            ControlMessage::ReplyCancelled => {
                if self.state.is_replying() {
                    self.halt_reply("Reply cancelled");
                }
            }
            ControlMessage::Stop => {
                if self.state.is_replying() {
                    self.halt_reply("Reply stopped by the server");
                }
            }
            ControlMessage::Error(message) => {
                log::warn!("session: server error: {message}");
                if self.state.is_replying() || self.state == ConversationState::Sending {
                    self.stop_playback();
                    self.fail_turn(SessionError::Server(message));
                } else {
                    self.status(format!("Server error: {message}"));
                }
            }
            ControlMessage::Transcript(text) => {
                self.ui(UiEvent::ShowPanel(Panel::Transcript, text));
            }
            ControlMessage::Notice(text) => self.status(text),
            ControlMessage::Lifecycle(phase) => log::debug!("session: lifecycle '{phase}'"),
            ControlMessage::Ping => {}
        }
    }

    // -----------------------------------------------------------------------
    // Playback side
    // -----------------------------------------------------------------------

    /// Reset the timeline for a new reply.  Runs once per reply, on the
    /// first fragment or the reply-started notice, whichever comes first.
    /// Returns `false` when the chime could not be played and the reply was
    /// abandoned.
    async fn start_reply(&mut self) -> bool {
        self.reply_started = true;
        self.reply_done = false;
        self.transition(ConversationState::PlayingReply);
        self.ui(UiEvent::ShowPanel(Panel::Response, "Receiving reply...".into()));

        let now = self.output.now();
        if self.config.playback.reply_chime {
            let chime = reply_chime();
            let lead = chime.duration();
            let unit = PlayableUnit {
                frame: chime,
                start_time: now,
                index: CHIME_INDEX,
            };
            self.scheduler.reset(now + lead);
            self.play_unit(unit).await
        } else {
            self.scheduler.reset(now);
            true
        }
    }

    async fn handle_fragment(&mut self, bytes: &[u8]) {
        if !self.state.is_replying() {
            log::debug!(
                "session: dropping {} byte fragment in {:?}",
                bytes.len(),
                self.state
            );
            return;
        }

        let frame = match codec::decode_fragment(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("session: {}", SessionError::from(e));
                return;
            }
        };

        if !self.reply_started && !self.start_reply().await {
            return;
        }
        // A fragment during the grace window means the reply is not over.
        self.grace_deadline = None;
        self.reply_deadline = None;

        let now = self.output.now();
        for unit in self.scheduler.submit(frame, now) {
            if !self.play_unit(unit).await {
                return;
            }
        }
    }

    /// Hand a unit to the output device, retrying with doubling backoff.
    /// Returns `false` when the reply was abandoned.
    async fn play_unit(&mut self, unit: PlayableUnit) -> bool {
        let attempts = self.config.playback.max_retries.max(1);
        let mut backoff = Duration::from_millis(self.config.playback.retry_backoff_ms);

        for attempt in 1..=attempts {
            match self.output.schedule(&unit) {
                Ok(()) => {
                    self.in_flight += 1;
                    if unit.index != CHIME_INDEX {
                        self.status(format!("Playing reply (fragment {})...", unit.index));
                    }
                    return true;
                }
                Err(e) => {
                    log::warn!(
                        "session: unit {} rejected (attempt {attempt}/{attempts}): {e}",
                        unit.index
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        log::error!("session: giving up on unit {}", unit.index);
        self.halt_reply("Playback failed, listening again...");
        false
    }

    async fn handle_unit_finished(&mut self, done: UnitFinished) {
        if self.state != ConversationState::PlayingReply {
            return;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        log::debug!("session: unit {} finished ({} in flight)", done.index, self.in_flight);

        if self.in_flight == 0 {
            // Do not strand short fragments that never reached the flush size.
            if let Some(unit) = self.scheduler.flush(self.output.now()) {
                self.play_unit(unit).await;
                return;
            }
        }
        self.arm_grace_if_drained();
    }

    /// Start the grace window once every unit has played, provided the
    /// reply has actually produced audio or been declared finished.
    fn arm_grace_if_drained(&mut self) {
        if self.state != ConversationState::PlayingReply || self.in_flight > 0 {
            return;
        }
        if self.scheduler.units_played() == 0 && !self.reply_done {
            return;
        }
        let grace = Duration::from_secs_f32(self.config.playback.completion_grace_secs.max(0.0));
        self.grace_deadline = Some(Instant::now() + grace);
    }

    fn stop_playback(&mut self) {
        if self.output_open {
            self.output.stop();
        }
        self.in_flight = 0;
        self.scheduler.reset(self.output.now());
        self.reply_started = false;
        self.reply_done = false;
    }

    fn halt_reply(&mut self, message: &str) {
        self.stop_playback();
        self.ui(UiEvent::ShowPanel(Panel::Response, message.into()));
        self.begin_listening();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn transition(&mut self, next: ConversationState) {
        if !self.state.can_transition_to(next) {
            log::warn!("session: unexpected transition {:?} -> {next:?}", self.state);
        }
        if self.state != next {
            log::info!("session: {:?} -> {next:?}", self.state);
        }
        self.state = next;
        self.ui(UiEvent::State(next));
    }

    fn clear_deadlines(&mut self) {
        self.grace_deadline = None;
        self.resume_deadline = None;
        self.reply_deadline = None;
        self.pending_send = None;
    }

    fn status(&self, text: impl Into<String>) {
        let text = text.into();
        log::info!("session: status '{text}'");
        self.ui(UiEvent::Status(text));
    }

    fn ui(&self, event: UiEvent) {
        // UI gone means shutdown is underway.
        let _ = self.ui.send(event);
    }
}

async fn next_item<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
