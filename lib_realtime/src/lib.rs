//! # lib_realtime
//!
//! A real-time transport client for dashboard backends: one physical socket,
//! many logical topics, automatic reconnection with backoff, heartbeat-based
//! dead-link detection, and a bounded outbound queue that keeps callers from
//! ever blocking on a slow or dead link.
//!
//! The entry point is [`RealtimeClient`]. It is constructed explicitly with an
//! endpoint URL, a [`RealtimeOptions`] value and a [`Transport`]; there is no
//! process-wide singleton.
//!
//! ```no_run
//! use lib_realtime::{OutboundFrame, RealtimeClient, RealtimeOptions};
//!
//! # async fn demo() -> Result<(), lib_realtime::RealtimeError> {
//! let client = RealtimeClient::websocket("wss://example.com/ws", RealtimeOptions::default())?;
//! let alerts = client.subscribe("alerts", |frame| {
//!     println!("alert: {}", frame.data);
//!     Ok(())
//! });
//! client.connect();
//! client.send(OutboundFrame::new("ack", serde_json::json!({ "seen": true })));
//! alerts.unsubscribe();
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod core;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod transport;

// --- Public API Re-exports ---
pub use crate::configs::config_realtime::RealtimeOptions;
pub use crate::core::connection_manager::RealtimeClient;
pub use crate::core::frame::{Frame, OutboundFrame, SendOutcome};
pub use crate::core::lifecycle::ConnectionState;
pub use crate::core::outbound_queue::OverflowPolicy;
pub use crate::core::reconnect_policy::ReconnectPolicy;
pub use crate::core::router::{Subscription, SubscriptionId};
pub use crate::core::status::{Diagnostic, StatusSnapshot, StatusSubscription};
pub use crate::error::{ConfigError, FrameError, RealtimeError, TransportError};
#[cfg(feature = "loggers")]
pub use crate::error::LoggerError;
pub use crate::transport::{Link, Transport, WireEvent, WireMessage};
