//! # Transports
//!
//! A [`Transport`] opens a bidirectional [`Link`] to an endpoint. The link is a
//! pair of unbounded channels, so the connection manager never blocks on the
//! socket: writes are queued to a writer task and reads arrive as
//! [`WireEvent`]s. Dropping the outbound sender closes the socket.
//!
//! Two transports ship with the crate:
//!
//! - [`ws_tungstenite::TungsteniteTransport`] (feature `tungstenite`): real
//!   WebSocket connections over `tokio-tungstenite`.
//! - [`memory::MemoryTransport`]: an in-process fake for tests.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportError;

pub mod memory;
#[cfg(feature = "tungstenite")]
pub mod ws_tungstenite;

/// RFC 6455 close codes used by the client.
pub mod close_code {
    /// Clean, intentional closure.
    pub const NORMAL: u16 = 1000;
    /// The stream ended without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// The client gave up on a link that stopped answering heartbeats.
    pub const HEARTBEAT_TIMEOUT: u16 = 4000;
}

/// Messages the manager writes to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    /// Heartbeat ping. Control plane only; never a routed frame.
    Ping(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Things the socket reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Closed { code: u16, reason: String },
    Error(String),
}

/// An open connection as seen by the manager.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<WireMessage>,
    pub inbound: mpsc::UnboundedReceiver<WireEvent>,
}

pub trait Transport: Send + Sync + 'static {
    /// Opens a link to `url`. The future must be cancel-safe: dropping it
    /// before completion must not leave a socket behind.
    fn open(&self, url: &Url) -> BoxFuture<'static, Result<Link, TransportError>>;
}
