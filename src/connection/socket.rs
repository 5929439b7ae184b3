//! Duplex socket capability.
//!
//! [`SocketConnector`] opens one socket and returns it as a pair of channels
//! ([`SocketChannels`]).  The session never touches the socket library
//! directly, which keeps the connection manager testable with
//! [`MockConnector`] (available under `#[cfg(test)]`).
//!
//! [`TungsteniteConnector`] is the real implementation:
//!
//! ```text
//!             ┌─ writer task: outbound rx ─▶ ws sink
//! connect ────┤
//!             └─ reader task: ws stream ─▶ inbound tx   (ends with Closed)
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::messages::WireMessage;

// ---------------------------------------------------------------------------
// ConnectionError
// ---------------------------------------------------------------------------

/// Errors raised by the socket layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// A send was attempted while the socket was not open.
    #[error("socket is not open")]
    SocketUnavailable,

    #[error("connecting to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("invalid socket url: {0}")]
    InvalidUrl(String),

    /// The socket closed underneath a send.
    #[error("socket closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// SocketConnector
// ---------------------------------------------------------------------------

/// An open socket, as channels.  Dropping `outbound` closes the socket;
/// `inbound` yields [`WireMessage::Closed`] (or ends) when the peer goes away.
#[derive(Debug)]
pub struct SocketChannels {
    pub outbound: mpsc::UnboundedSender<WireMessage>,
    pub inbound: mpsc::UnboundedReceiver<WireMessage>,
}

/// Opens duplex sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<SocketChannels, ConnectionError>;
}

// ---------------------------------------------------------------------------
// TungsteniteConnector
// ---------------------------------------------------------------------------

/// [`SocketConnector`] over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<SocketChannels, ConnectionError> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(ConnectionError::InvalidUrl(format!("scheme '{other}'"))),
        }

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<WireMessage>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let frame = match msg {
                    WireMessage::Binary(bytes) => Message::Binary(bytes),
                    WireMessage::Text(text) => Message::Text(text),
                    WireMessage::Closed(_) => Message::Close(None),
                };
                let closing = matches!(frame, Message::Close(_));
                if let Err(e) = write.send(frame).await {
                    log::warn!("connection: write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            let mut code = None;
            while let Some(item) = read.next().await {
                match item {
                    Ok(Message::Binary(bytes)) => {
                        if in_tx.send(WireMessage::Binary(bytes)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Text(text)) => {
                        if in_tx.send(WireMessage::Text(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        code = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("connection: read failed: {e}");
                        break;
                    }
                }
            }
            let _ = in_tx.send(WireMessage::Closed(code));
        });

        log::info!("connection: connected to {url}");
        Ok(SocketChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// MockConnector  (test-only)
// ---------------------------------------------------------------------------

/// Server side of a socket handed out by [`MockConnector`].
#[cfg(test)]
pub struct MockPeer {
    /// Frames the client will receive.
    pub to_client: mpsc::UnboundedSender<WireMessage>,
    /// Frames the client sent.
    pub from_client: mpsc::UnboundedReceiver<WireMessage>,
}

/// A scripted connector: each `connect` pops the next outcome (`true` =
/// accept).  An empty script refuses.
#[cfg(test)]
#[derive(Default)]
pub struct MockConnector {
    script: std::sync::Mutex<std::collections::VecDeque<bool>>,
    peers: std::sync::Mutex<Vec<MockPeer>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockConnector {
    pub fn scripted(outcomes: &[bool]) -> Self {
        Self {
            script: std::sync::Mutex::new(outcomes.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Number of `connect` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Take the server side of the oldest accepted socket.
    pub fn take_peer(&self) -> MockPeer {
        self.peers.lock().unwrap().remove(0)
    }
}

#[cfg(test)]
#[async_trait]
impl SocketConnector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<SocketChannels, ConnectionError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let accept = self.script.lock().unwrap().pop_front().unwrap_or(false);
        if !accept {
            return Err(ConnectionError::Connect {
                url: url.to_string(),
                reason: "refused".into(),
            });
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().push(MockPeer {
            to_client: in_tx,
            from_client: out_rx,
        });
        Ok(SocketChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tungstenite_rejects_http_scheme() {
        let url = Url::parse("http://localhost:1/ws").unwrap();
        let err = TungsteniteConnector.connect(&url).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn mock_connector_follows_script() {
        let url = Url::parse("ws://localhost/ws").unwrap();
        let mock = MockConnector::scripted(&[false, true]);

        assert!(mock.connect(&url).await.is_err());
        let mut channels = mock.connect(&url).await.expect("second accepts");
        assert_eq!(mock.calls(), 2);

        let mut peer = mock.take_peer();
        channels.outbound.send(WireMessage::Text("hi".into())).unwrap();
        assert_eq!(
            peer.from_client.recv().await,
            Some(WireMessage::Text("hi".into()))
        );
        peer.to_client.send(WireMessage::Binary(vec![1, 2])).unwrap();
        assert_eq!(
            channels.inbound.recv().await,
            Some(WireMessage::Binary(vec![1, 2]))
        );
    }
}
