//! Floating conversation widget, egui/eframe application.
//!
//! # Architecture
//!
//! [`VoiceApp`] is the top-level [`eframe::App`].  It never touches audio or
//! the socket; it owns three channel endpoints:
//!
//! * `command_tx`: sends [`SessionCommand`] to the session thread.
//! * `ui_rx`: receives [`UiEvent`] from the session.
//! * `hotkey_rx`: receives [`HotkeyEvent`] from the rdev listener thread.
//!
//! # Widget states
//!
//! | State | Visual |
//! |-------|--------|
//! | `Idle` | "Press F9 to talk", dim gray |
//! | `AwaitingSpeech` | "Listening", green |
//! | `Recording` | red indicator + elapsed timer |
//! | `Sending` / `AwaitingReply` | spinner, blue |
//! | `PlayingReply` | response panel, blue |

use std::time::{Duration, Instant};

use eframe::egui;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::hotkey::HotkeyEvent;
use crate::session::{ConversationState, Panel, SessionCommand, UiEvent};

// ---------------------------------------------------------------------------
// VoiceApp
// ---------------------------------------------------------------------------

/// eframe application: the floating voice conversation widget.
pub struct VoiceApp {
    // ── Session mirror ───────────────────────────────────────────────────
    /// Last state reported by the session.
    pub state: ConversationState,
    /// Free-text status line.
    pub status: String,
    /// Transcript panel text; `None` while hidden.
    pub transcript: Option<String>,
    /// Response panel text; `None` while hidden.
    pub response: Option<String>,

    // ── Timing ───────────────────────────────────────────────────────────
    /// When the current utterance started recording.
    recording_start: Option<Instant>,

    // ── UI state ─────────────────────────────────────────────────────────
    show_settings: bool,
    spinner_phase: f32,

    // ── Channels ─────────────────────────────────────────────────────────
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    hotkey_rx: mpsc::UnboundedReceiver<HotkeyEvent>,

    // ── Configuration ────────────────────────────────────────────────────
    pub config: AppConfig,
}

impl VoiceApp {
    pub fn new(
        command_tx: mpsc::UnboundedSender<SessionCommand>,
        ui_rx: mpsc::UnboundedReceiver<UiEvent>,
        hotkey_rx: mpsc::UnboundedReceiver<HotkeyEvent>,
        config: AppConfig,
    ) -> Self {
        Self {
            state: ConversationState::Idle,
            status: String::new(),
            transcript: None,
            response: None,
            recording_start: None,
            show_settings: false,
            spinner_phase: 0.0,
            command_tx,
            ui_rx,
            hotkey_rx,
            config,
        }
    }

    // ── Channel polling ──────────────────────────────────────────────────

    /// Drain all pending hotkey events (non-blocking).
    fn poll_hotkey(&mut self) {
        while let Ok(event) = self.hotkey_rx.try_recv() {
            let command = self.command_for(event);
            self.send(command);
        }
    }

    /// Drain all pending session events (non-blocking).
    fn poll_session(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            self.apply(event);
        }
    }

    /// The command a hotkey stands for, given the state last reported.
    pub fn command_for(&self, event: HotkeyEvent) -> SessionCommand {
        match event {
            HotkeyEvent::ToggleConversation if self.state.is_active() => SessionCommand::End,
            HotkeyEvent::ToggleConversation => SessionCommand::Start,
            HotkeyEvent::StopSpeaking => SessionCommand::Stop,
        }
    }

    /// Fold one session event into the widget state.
    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Status(text) => self.status = text,
            UiEvent::State(next) => {
                if next == ConversationState::Recording && self.state != next {
                    self.recording_start = Some(Instant::now());
                } else if next != ConversationState::Recording {
                    self.recording_start = None;
                }
                if next == ConversationState::Idle {
                    self.transcript = None;
                    self.response = None;
                }
                self.state = next;
            }
            UiEvent::ShowPanel(Panel::Transcript, text) => self.transcript = Some(text),
            UiEvent::ShowPanel(Panel::Response, text) => self.response = Some(text),
            UiEvent::HidePanel(Panel::Transcript) => self.transcript = None,
            UiEvent::HidePanel(Panel::Response) => self.response = None,
        }
    }

    fn send(&self, command: SessionCommand) {
        if self.command_tx.send(command).is_err() {
            log::warn!("ui: session thread is gone, dropping {command:?}");
        }
    }

    // ── Window sizing ────────────────────────────────────────────────────

    fn update_window_size(&self, ctx: &egui::Context) {
        let panels = usize::from(self.transcript.is_some()) + usize::from(self.response.is_some());
        let height = match self.state {
            ConversationState::Idle => 70.0,
            _ => 90.0,
        } + 22.0 * panels as f32;
        ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(egui::vec2(300.0, height)));
    }

    // ── Custom title bar ─────────────────────────────────────────────────

    /// Draggable title bar with status icon and window controls.
    fn draw_title_bar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.horizontal(|ui| {
            let icon = match self.state {
                ConversationState::Idle => "  ",
                ConversationState::AwaitingSpeech => "o ",
                ConversationState::Recording => "* ",
                ConversationState::Sending | ConversationState::AwaitingReply => ". ",
                ConversationState::PlayingReply => "> ",
            };
            ui.label(egui::RichText::new(icon).color(self.state_color()));

            let title_resp = ui.label(
                egui::RichText::new("Voice Duplex")
                    .color(egui::Color32::from_rgb(200, 200, 200))
                    .size(13.0),
            );
            if title_resp.is_pointer_button_down_on() {
                if let Some(outer_rect) = ctx.input(|i| i.viewport().outer_rect) {
                    let delta = ctx.input(|i| i.pointer.delta());
                    ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(
                        outer_rect.min + delta,
                    ));
                }
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if title_button(ui, "x", egui::Color32::from_rgb(200, 100, 100)) {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
                if title_button(ui, "-", egui::Color32::from_rgb(150, 150, 150)) {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Minimized(true));
                }
                if title_button(ui, "=", egui::Color32::from_rgb(150, 150, 150)) {
                    self.show_settings = !self.show_settings;
                }
            });
        });
    }

    // ── Body ─────────────────────────────────────────────────────────────

    fn draw_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let (label, command) = if self.state.is_active() {
                ("End", SessionCommand::End)
            } else {
                ("Start", SessionCommand::Start)
            };
            if ui
                .add(egui::Button::new(egui::RichText::new(label).size(11.0)))
                .clicked()
            {
                self.send(command);
            }
            let can_stop = matches!(
                self.state,
                ConversationState::Recording
                    | ConversationState::AwaitingReply
                    | ConversationState::PlayingReply
            );
            if ui
                .add_enabled(
                    can_stop,
                    egui::Button::new(egui::RichText::new("Stop").size(11.0)),
                )
                .clicked()
            {
                self.send(SessionCommand::Stop);
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(
                    egui::RichText::new(self.state_caption())
                        .color(self.state_color())
                        .size(12.0),
                );
            });
        });
    }

    fn draw_status(&self, ui: &mut egui::Ui) {
        let text = if self.status.is_empty() {
            format!("Press {} to talk", self.config.hotkey.toggle_conversation_key)
        } else {
            self.status.clone()
        };
        ui.label(
            egui::RichText::new(text)
                .color(egui::Color32::from_rgb(160, 160, 160))
                .size(11.0),
        );
    }

    fn draw_panels(&self, ui: &mut egui::Ui) {
        if let Some(ref text) = self.transcript {
            ui.label(
                egui::RichText::new(text.as_str())
                    .color(egui::Color32::from_rgb(220, 220, 220))
                    .size(12.0),
            );
        }
        if let Some(ref text) = self.response {
            ui.label(
                egui::RichText::new(text.as_str())
                    .color(egui::Color32::from_rgb(68, 136, 255))
                    .italics()
                    .size(11.0),
            );
        }
    }

    fn draw_settings(&self, ui: &mut egui::Ui) {
        let line = |ui: &mut egui::Ui, text: String| {
            ui.label(
                egui::RichText::new(text)
                    .color(egui::Color32::from_rgb(140, 140, 140))
                    .size(11.0),
            );
        };
        ui.add_space(4.0);
        line(ui, format!("  Server: {}", self.config.server.base_url));
        line(
            ui,
            format!(
                "  Hotkeys: {} toggle, {} stop",
                self.config.hotkey.toggle_conversation_key, self.config.hotkey.stop_speaking_key
            ),
        );
        line(
            ui,
            format!(
                "  Silence: {:.2} s below {:.3}",
                self.config.vad.silence_duration_secs, self.config.vad.silence_threshold
            ),
        );
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn state_caption(&self) -> String {
        match self.state {
            ConversationState::Recording => {
                let elapsed = self
                    .recording_start
                    .map(|t| t.elapsed().as_secs_f32())
                    .unwrap_or(0.0);
                format!("Recording {elapsed:.1}s")
            }
            ConversationState::Sending | ConversationState::AwaitingReply => {
                format!("{} {}", self.spinner_char(), self.state.label())
            }
            _ => self.state.label().to_string(),
        }
    }

    fn spinner_char(&self) -> char {
        let chars = ['|', '/', '-', '\\'];
        let idx = (self.spinner_phase as usize) % chars.len();
        chars[idx]
    }

    fn state_color(&self) -> egui::Color32 {
        match self.state {
            ConversationState::Idle => egui::Color32::from_rgb(100, 100, 100),
            ConversationState::AwaitingSpeech => egui::Color32::from_rgb(80, 200, 120),
            ConversationState::Recording => egui::Color32::from_rgb(255, 68, 68),
            ConversationState::Sending
            | ConversationState::AwaitingReply
            | ConversationState::PlayingReply => egui::Color32::from_rgb(68, 136, 255),
        }
    }
}

fn title_button(ui: &mut egui::Ui, text: &str, color: egui::Color32) -> bool {
    ui.add(egui::Button::new(egui::RichText::new(text).color(color).size(12.0)).frame(false))
        .clicked()
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for VoiceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_hotkey();
        self.poll_session();

        self.spinner_phase += 0.08;
        if self.spinner_phase >= 4.0 {
            self.spinner_phase = 0.0;
        }

        // Session events arrive off-thread, so keep polling even when idle.
        let repaint = match self.state {
            ConversationState::Recording => Duration::from_millis(33),
            ConversationState::Sending | ConversationState::AwaitingReply => {
                Duration::from_millis(66)
            }
            _ => Duration::from_millis(100),
        };
        ctx.request_repaint_after(repaint);

        self.update_window_size(ctx);

        let frame = egui::Frame::new()
            .fill(egui::Color32::from_rgba_premultiplied(30, 30, 30, 220))
            .corner_radius(egui::CornerRadius::same(8))
            .inner_margin(egui::Margin::same(8));

        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            self.draw_title_bar(ui, ctx);
            ui.separator();

            if self.show_settings {
                self.draw_settings(ui);
                return;
            }

            self.draw_controls(ui);
            self.draw_status(ui);
            self.draw_panels(ui);
        });
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("ui: window closing, ending conversation");
        self.send(SessionCommand::End);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
