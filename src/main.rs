//! Application entry point: full-duplex voice client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (defaults on first run).
//! 3. Derive the socket URL from the server base URL.
//! 4. Create the session channels (`command`, `ui`, `hotkey`).
//! 5. Spawn the session thread: a current-thread tokio runtime driving
//!    [`ConversationSession::run`].  cpal streams are `!Send`, so the devices
//!    are built on that thread.
//! 6. Spawn the hotkey listener thread.
//! 7. Run [`eframe::run_native`]; blocks the main thread until the window
//!    is closed.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use eframe::egui;
use tokio::sync::mpsc;
use url::Url;
use voice_duplex::{
    app::VoiceApp,
    audio::{CpalCapture, CpalOutput},
    config::AppConfig,
    connection::{ConnectionManager, TungsteniteConnector},
    hotkey::{HotkeyBindings, HotkeyEvent, HotkeyListener},
    session::{ConversationSession, SessionCommand, UiEvent},
};

// ---------------------------------------------------------------------------
// Session thread
// ---------------------------------------------------------------------------

fn spawn_session(
    config: AppConfig,
    url: Url,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("voice-session".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("session: failed to create tokio runtime: {e}");
                    return;
                }
            };

            rt.block_on(async move {
                let capture = CpalCapture::new(config.audio.input_device.clone());
                let output = CpalOutput::new();
                let connection =
                    ConnectionManager::new(Arc::new(TungsteniteConnector), url, &config.server);
                let session = ConversationSession::new(
                    config,
                    Box::new(capture),
                    Box::new(output),
                    connection,
                    ui_tx,
                );
                session.run(commands).await;
            });
            log::info!("session: thread exiting");
        })
        .context("failed to spawn session thread")
}

// ---------------------------------------------------------------------------
// Native options builder
// ---------------------------------------------------------------------------

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let mut vp = egui::ViewportBuilder::default()
        .with_decorations(false)
        .with_transparent(true)
        .with_inner_size([300.0, 90.0])
        .with_min_inner_size([250.0, 60.0])
        .with_resizable(false);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }

    if let Some((x, y)) = config.ui.window_position {
        vp = vp.with_position(egui::pos2(x, y));
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-duplex starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Socket URL
    let url = config.socket_url()?;
    log::info!("server socket: {url}");

    // 4. Channels
    let (command_tx, command_rx) = mpsc::unbounded_channel::<SessionCommand>();
    let (ui_tx, ui_rx) = mpsc::unbounded_channel::<UiEvent>();
    let (hotkey_tx, hotkey_rx) = mpsc::unbounded_channel::<HotkeyEvent>();

    // 5. Session thread
    let session_thread = spawn_session(config.clone(), url, command_rx, ui_tx)?;

    // 6. Hotkeys (the window still works without them)
    let _hotkey_listener = match HotkeyBindings::from_config(&config.hotkey) {
        Ok(bindings) => HotkeyListener::start(bindings, hotkey_tx)
            .map_err(|e| log::error!("hotkey: failed to start listener: {e}"))
            .ok(),
        Err(e) => {
            log::error!("hotkey: {e:#}");
            None
        }
    };

    // 7. UI (blocks until the window is closed)
    let app = VoiceApp::new(command_tx, ui_rx, hotkey_rx, config.clone());
    eframe::run_native(
        "Voice Duplex",
        native_options(&config),
        Box::new(move |_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow!("ui: {e}"))?;

    // The app dropped its command sender, so the session loop winds down.
    if session_thread.join().is_err() {
        log::error!("session: thread panicked");
    }
    Ok(())
}
