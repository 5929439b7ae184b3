//! Duplex socket to the conversation server.
//!
//! - [`messages`]: wire frames and the JSON control vocabulary.
//! - [`policy`]: reconnect backoff.
//! - [`socket`]: the connector capability and its `tokio-tungstenite`
//!   implementation.
//! - [`manager`]: lifecycle, reconnects, keep-alive, send-with-retry.

pub mod manager;
pub mod messages;
pub mod policy;
pub mod socket;

pub use manager::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use messages::{ControlMessage, WireMessage};
pub use policy::ReconnectPolicy;
pub use socket::{ConnectionError, SocketChannels, SocketConnector, TungsteniteConnector};
