//! # Connection Lifecycle
//!
//! ```text
//! Idle ──connect──▶ Connecting ──opened──▶ Open
//!                      │                    │
//!                      ├──failed────────────┤──closed by peer / failed──▶ Closed
//!                      │                    │                               │
//!                      └──close requested───┴──▶ Closing ──completed──▶ Closed
//!                                                                           │
//!                           Connecting ◀──retry fired── Reconnecting ◀──retry scheduled
//! ```
//!
//! Exactly one state is active at any instant. Only the connection manager
//! applies events; everyone else observes.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Constructed, never connected.
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    /// Closed abnormally with a reconnect timer pending.
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    /// States in which the manager may hold a socket handle.
    pub fn may_hold_link(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested,
    Opened,
    /// Open failure, heartbeat timeout, transport error or abnormal close.
    Failed,
    /// The peer closed the socket with a close frame.
    ClosedByPeer,
    CloseRequested,
    CloseCompleted,
    RetryScheduled,
    RetryFired,
}

/// The transition table. `None` means the event does not apply in `from` and
/// must be ignored.
pub fn transition(from: ConnectionState, event: LinkEvent) -> Option<ConnectionState> {
    use ConnectionState::*;
    use LinkEvent::*;

    match (from, event) {
        (Idle | Closed, ConnectRequested) => Some(Connecting),
        (Reconnecting, RetryFired) => Some(Connecting),
        (Connecting, Opened) => Some(Open),
        (Connecting | Open | Closing, Failed) => Some(Closed),
        (Open | Closing, ClosedByPeer) => Some(Closed),
        (Connecting | Open, CloseRequested) => Some(Closing),
        (Idle | Reconnecting, CloseRequested) => Some(Closed),
        (Closing, CloseCompleted) => Some(Closed),
        (Closed, RetryScheduled) => Some(Reconnecting),
        _ => None,
    }
}
