//! # Core Engine Module
//!
//! The pieces that make up the connection lifecycle manager. Everything here is
//! owned by one [`RealtimeClient`] instance; nothing is process-global.
//!
//! ## Core Components:
//!
//! - **`lifecycle`**: The `ConnectionState` machine as a pure transition table.
//!   Socket callbacks are mapped to `LinkEvent`s and the table decides the next
//!   state, so the machine is testable without any socket at all.
//!
//! - **`connection_manager`**: The "brain". Owns the link, drives connect and
//!   reconnect, runs the heartbeat, and gates both data directions on state.
//!
//! - **`router`**: Deterministic topic fan-out of inbound frames with per-handler
//!   failure isolation.
//!
//! - **`outbound_queue`**: Bounded FIFO holding consumer frames while the link
//!   is down.
//!
//! - **`reconnect_policy`**: Exponential backoff with jitter and an attempt
//!   ceiling.
//!
//! - **`status`**: State listeners, a `watch` channel for reactive bindings and
//!   the diagnostics broadcast.

/// Connection states and the event-to-transition table.
pub mod lifecycle;
/// Inbound and outbound frame types and their wire encoding.
pub mod frame;
/// Backoff delay and retry ceiling.
pub mod reconnect_policy;
/// Topic-to-handler fan-out.
pub mod router;
/// Bounded outbound buffer.
pub mod outbound_queue;
/// Status and diagnostics surface.
pub mod status;
/// The lifecycle manager tying it all together.
pub mod connection_manager;

pub use connection_manager::RealtimeClient;
pub use frame::{Frame, OutboundFrame, SendOutcome};
pub use lifecycle::{ConnectionState, LinkEvent};
pub use outbound_queue::{Enqueued, OutboundQueue, OverflowPolicy};
pub use reconnect_policy::ReconnectPolicy;
pub use router::{Router, Subscription, SubscriptionId};
pub use status::{Diagnostic, StatusHub, StatusSnapshot, StatusSubscription};
