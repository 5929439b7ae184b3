//! Connection manager: one logical socket with reconnects and keep-alive.
//!
//! ```text
//!            open()                    socket closes unexpectedly
//! Closed ──────────▶ Connecting ──▶ Open ─────────────────────────▶ Reconnecting
//!                        ▲                                              │
//!                        └──────────── delay = min(n·base, max) ◀───────┘
//!                                       n > max_attempts ─▶ Closed (Disconnected)
//! ```
//!
//! [`ConnectionManager::recv`] is the single event source the session
//! awaits.  It is cancel-safe: connect attempts run as spawned tasks whose
//! handles live in the manager, and the reconnect deadline is stored, so
//! dropping a pending `recv` future (e.g. inside `tokio::select!`) loses no
//! state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use url::Url;

use crate::config::ServerConfig;

use super::messages::{self, ControlMessage, WireMessage};
use super::policy::ReconnectPolicy;
use super::socket::{ConnectionError, SocketChannels, SocketConnector};

// ---------------------------------------------------------------------------
// ConnectionState / ConnectionEvent
// ---------------------------------------------------------------------------

/// Lifecycle of the current socket.  Payloads are only sent while `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

/// What [`ConnectionManager::recv`] reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Binary(Vec<u8>),
    Control(ControlMessage),
    /// A reconnect is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The reconnect budget is spent; no further automatic attempts.
    Disconnected,
}

type ConnectTask = JoinHandle<Result<SocketChannels, ConnectionError>>;

enum Wake {
    Inbound(Option<WireMessage>),
    Connected(Result<SocketChannels, ConnectionError>),
    ReconnectDue,
    Keepalive,
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

pub struct ConnectionManager {
    connector: Arc<dyn SocketConnector>,
    url: Url,
    state: ConnectionState,
    policy: ReconnectPolicy,
    outbound: Option<mpsc::UnboundedSender<WireMessage>>,
    inbound: Option<mpsc::UnboundedReceiver<WireMessage>>,
    connecting: Option<ConnectTask>,
    reconnect_at: Option<Instant>,
    keepalive_period: Duration,
    keepalive: Interval,
    send_retry_delay: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn SocketConnector>, url: Url, config: &ServerConfig) -> Self {
        let keepalive_period = Duration::from_secs(config.keepalive_secs.max(1));
        Self {
            connector,
            url,
            state: ConnectionState::Closed,
            policy: ReconnectPolicy::from_config(config),
            outbound: None,
            inbound: None,
            connecting: None,
            reconnect_at: None,
            keepalive_period,
            keepalive: keepalive_interval(keepalive_period),
            send_retry_delay: Duration::from_millis(config.send_retry_delay_ms),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Start connecting.  The outcome arrives through [`recv`](Self::recv)
    /// as `Opened` or `Reconnecting`/`Disconnected`.  No-op while a socket
    /// is open or an attempt is underway.
    pub fn open(&mut self) {
        if self.state != ConnectionState::Closed {
            return;
        }
        self.policy.reset();
        self.begin_connect();
    }

    /// Next connection event.  Keep-alives are sent from inside this call
    /// while the socket is open.
    pub async fn recv(&mut self) -> ConnectionEvent {
        loop {
            let open = self.state == ConnectionState::Open;
            let wake = tokio::select! {
                msg = next_inbound(&mut self.inbound) => Wake::Inbound(msg),
                res = next_connect(&mut self.connecting) => Wake::Connected(res),
                _ = sleep_until_opt(self.reconnect_at) => Wake::ReconnectDue,
                _ = self.keepalive.tick(), if open => Wake::Keepalive,
            };

            match wake {
                Wake::Inbound(Some(WireMessage::Binary(bytes))) => {
                    return ConnectionEvent::Binary(bytes);
                }
                Wake::Inbound(Some(WireMessage::Text(text))) => {
                    if let Some(control) = ControlMessage::parse(&text) {
                        return ConnectionEvent::Control(control);
                    }
                }
                Wake::Inbound(Some(WireMessage::Closed(code))) => {
                    log::warn!("connection: socket closed unexpectedly (code {code:?})");
                    return self.schedule_reconnect();
                }
                Wake::Inbound(None) => {
                    log::warn!("connection: socket closed unexpectedly");
                    return self.schedule_reconnect();
                }
                Wake::Connected(Ok(channels)) => {
                    self.install(channels);
                    return ConnectionEvent::Opened;
                }
                Wake::Connected(Err(e)) => {
                    log::warn!("connection: {e}");
                    return self.schedule_reconnect();
                }
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    log::info!(
                        "connection: reconnect attempt {}/{}",
                        self.policy.attempt(),
                        self.policy.max_attempts
                    );
                    self.begin_connect();
                }
                Wake::Keepalive => {
                    log::debug!("connection: keep-alive");
                    if self.send(messages::ping()).is_err() {
                        log::debug!("connection: keep-alive skipped, socket not open");
                    }
                }
            }
        }
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::SocketUnavailable`] when the socket is not open,
    /// [`ConnectionError::Closed`] when the writer has gone away.
    pub fn send(&mut self, msg: WireMessage) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::SocketUnavailable);
        }
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(ConnectionError::SocketUnavailable)?;
        outbound.send(msg).map_err(|_| ConnectionError::Closed)
    }

    /// Arm the single retry of a failed send: make sure a connect attempt
    /// is underway now, then return how long the caller should wait before
    /// [`retry_send`](Self::retry_send).
    ///
    /// A reconnect waiting out its backoff is started immediately; the
    /// attempt was already counted when the backoff was scheduled.
    pub fn prepare_retry(&mut self) -> Duration {
        match self.state {
            ConnectionState::Closed => self.begin_connect(),
            ConnectionState::Reconnecting if self.connecting.is_none() => {
                self.reconnect_at = None;
                log::info!("connection: send pending, reconnecting now");
                self.begin_connect();
            }
            _ => {}
        }
        self.send_retry_delay
    }

    /// The one retry after [`prepare_retry`](Self::prepare_retry).  A
    /// failure here is final for this payload.
    pub async fn retry_send(&mut self, msg: WireMessage) -> Result<(), ConnectionError> {
        self.poll_connect().await;
        self.send(msg)
    }

    /// Close the socket and cancel any pending reconnect.  Idempotent.
    pub fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(WireMessage::Closed(None));
        }
        self.inbound = None;
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        self.reconnect_at = None;
        if self.state != ConnectionState::Closed {
            log::info!("connection: closed");
        }
        self.state = ConnectionState::Closed;
    }

    // -----------------------------------------------------------------------

    fn begin_connect(&mut self) {
        if self.connecting.is_some() {
            return;
        }
        self.state = if self.policy.attempt() == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        self.connecting = Some(tokio::spawn(async move { connector.connect(&url).await }));
    }

    /// Collect a connect attempt that finished while nobody was awaiting
    /// [`recv`](Self::recv).
    async fn poll_connect(&mut self) {
        let finished = self.connecting.as_ref().is_some_and(|t| t.is_finished());
        if !finished {
            return;
        }
        if let Some(task) = self.connecting.take() {
            match flatten(task.await) {
                Ok(channels) => self.install(channels),
                Err(e) => {
                    log::warn!("connection: retry connect failed: {e}");
                    if self.reconnect_at.is_none() {
                        self.state = ConnectionState::Closed;
                    }
                }
            }
        }
    }

    fn install(&mut self, channels: SocketChannels) {
        self.outbound = Some(channels.outbound);
        self.inbound = Some(channels.inbound);
        self.reconnect_at = None;
        self.state = ConnectionState::Open;
        self.policy.reset();
        self.keepalive = keepalive_interval(self.keepalive_period);
        log::info!("connection: open ({})", self.url);
    }

    fn schedule_reconnect(&mut self) -> ConnectionEvent {
        self.outbound = None;
        self.inbound = None;

        match self.policy.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                self.reconnect_at = Some(Instant::now() + delay);
                let attempt = self.policy.attempt();
                log::info!("connection: reconnecting in {} ms (attempt {attempt})", delay.as_millis());
                ConnectionEvent::Reconnecting { attempt, delay }
            }
            None => {
                self.state = ConnectionState::Closed;
                self.reconnect_at = None;
                log::error!(
                    "connection: giving up after {} reconnect attempts",
                    self.policy.max_attempts
                );
                ConnectionEvent::Disconnected
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// select! helpers
// ---------------------------------------------------------------------------

fn keepalive_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_inbound(rx: &mut Option<mpsc::UnboundedReceiver<WireMessage>>) -> Option<WireMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_connect(task: &mut Option<ConnectTask>) -> Result<SocketChannels, ConnectionError> {
    let result = match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    };
    *task = None;
    flatten(result)
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn flatten(
    result: Result<Result<SocketChannels, ConnectionError>, tokio::task::JoinError>,
) -> Result<SocketChannels, ConnectionError> {
    result.unwrap_or_else(|e| {
        Err(ConnectionError::Connect {
            url: String::new(),
            reason: format!("connect task failed: {e}"),
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
