//! # Status & Diagnostics Surface
//!
//! The only way the rest of an application observes the transport:
//!
//! - **State listeners** (`on_change`) are called synchronously for every
//!   transition, in order, and are isolated from each other like router handlers.
//! - **A `watch` channel** carries the latest state for reactive UI bindings;
//!   intermediate states may be coalesced there.
//!
//! Every transition carries the sequence number it was given under the
//! manager's lock. A transition older than the last one published is dropped,
//! and listeners are not called for a transition that was superseded while
//! earlier listeners ran (e.g. one of them called `disconnect()`). The `watch`
//! value therefore always ends on the manager's current state.
//! - **A `broadcast` channel** carries [`Diagnostic`] events. Slow diagnostic
//!   receivers lag and lose events; they never slow the transport down.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::core::lifecycle::ConnectionState;
use crate::core::outbound_queue::OverflowPolicy;
use crate::core::router::{panic_message, SubscriptionId};

const DIAGNOSTICS_CAPACITY: usize = 256;

pub type StatusListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Non-fatal events worth surfacing to operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    ConnectFailed { attempt: u32, error: String },
    AbnormalClose { code: u16, reason: String },
    HeartbeatTimeout { timeout: Duration },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Terminal: the client stays closed until `connect()` is called again.
    RetriesExhausted { attempts: u32 },
    HandlerFailed {
        topic: String,
        subscription: SubscriptionId,
        error: String,
    },
    ListenerFailed { error: String },
    QueueOverflow {
        topic: String,
        capacity: usize,
        policy: OverflowPolicy,
    },
    MalformedFrame { error: String },
}

impl Diagnostic {
    fn log(&self) {
        match self {
            Diagnostic::ConnectFailed { attempt, error } => {
                log::warn!("Connect attempt {} failed: {}", attempt, error)
            }
            Diagnostic::AbnormalClose { code, reason } => {
                log::warn!("Link closed abnormally ({}): {}", code, reason)
            }
            Diagnostic::HeartbeatTimeout { timeout } => {
                log::warn!("No traffic within {:?} of heartbeat ping; link presumed dead", timeout)
            }
            Diagnostic::ReconnectScheduled { attempt, delay } => {
                log::info!("Reconnect attempt {} scheduled in {:?}", attempt, delay)
            }
            Diagnostic::RetriesExhausted { attempts } => {
                log::error!("Giving up after {} reconnect attempts", attempts)
            }
            Diagnostic::HandlerFailed {
                topic,
                subscription,
                error,
            } => log::error!("Handler {} for topic '{}' failed: {}", subscription, topic, error),
            Diagnostic::ListenerFailed { error } => log::error!("Status listener failed: {}", error),
            Diagnostic::QueueOverflow {
                topic,
                capacity,
                policy,
            } => log::warn!(
                "Outbound queue full (capacity {}, {:?}); frame for '{}' affected",
                capacity,
                policy,
                topic
            ),
            Diagnostic::MalformedFrame { error } => log::warn!("Dropping malformed frame: {}", error),
        }
    }
}

/// Point-in-time view of the client, cheap to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    /// Consecutive failures since the last successful open.
    pub attempt: u32,
    /// Whether a socket handle is currently held.
    pub link_active: bool,
    pub queued: usize,
    pub subscriptions: usize,
    pub retries_exhausted: bool,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, StatusListener)>,
}

pub struct StatusHub {
    state_tx: watch::Sender<ConnectionState>,
    /// Sequence number of the last published transition.
    published: Mutex<u64>,
    diagnostics_tx: broadcast::Sender<Diagnostic>,
    listeners: Mutex<Listeners>,
}

impl StatusHub {
    pub fn new() -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (diagnostics_tx, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);
        Arc::new(Self {
            state_tx,
            published: Mutex::new(0),
            diagnostics_tx,
            listeners: Mutex::new(Listeners::default()),
        })
    }

    /// Announces transition number `seq`. Must not be called with the
    /// manager's state lock held, since listeners may call back into the client.
    pub fn publish(&self, seq: u64, state: ConnectionState) {
        {
            let mut published = self.last_published();
            if seq <= *published {
                log::trace!("Dropping superseded transition {} to {}", seq, state);
                return;
            }
            *published = seq;
            self.state_tx.send_replace(state);
        }
        let listeners: Vec<StatusListener> = self
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if *self.last_published() != seq {
                break;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(state))) {
                self.report(Diagnostic::ListenerFailed {
                    error: panic_message(payload.as_ref()),
                });
            }
        }
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        diagnostic.log();
        // No receivers is fine.
        let _ = self.diagnostics_tx.send(diagnostic);
    }

    pub fn on_change<F>(self: &Arc<Self>, listener: F) -> StatusSubscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let mut listeners = self.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Arc::new(listener)));
        StatusSubscription {
            hub: Arc::downgrade(self),
            id,
        }
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics_tx.subscribe()
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    fn last_published(&self) -> MutexGuard<'_, u64> {
        self.published.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Capability to remove one status listener.
#[derive(Debug)]
pub struct StatusSubscription {
    hub: Weak<StatusHub>,
    id: u64,
}

impl StatusSubscription {
    pub fn unsubscribe(self) -> bool {
        self.hub.upgrade().is_some_and(|hub| hub.remove(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_see_every_transition_in_order() {
        let hub = StatusHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = {
            let seen = Arc::clone(&seen);
            hub.on_change(move |state| seen.lock().unwrap().push(state))
        };
        hub.publish(1, ConnectionState::Connecting);
        hub.publish(2, ConnectionState::Open);
        assert!(sub.unsubscribe());
        hub.publish(3, ConnectionState::Closed);
        assert_eq!(
            *seen.lock().unwrap(),
            [ConnectionState::Connecting, ConnectionState::Open]
        );
    }

    #[test]
    fn watch_holds_latest_state() {
        let hub = StatusHub::new();
        let rx = hub.watch();
        assert_eq!(*rx.borrow(), ConnectionState::Idle);
        hub.publish(1, ConnectionState::Reconnecting);
        assert_eq!(*rx.borrow(), ConnectionState::Reconnecting);
    }

    #[test]
    fn superseded_transition_is_dropped() {
        let hub = StatusHub::new();
        let rx = hub.watch();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = Arc::clone(&seen);
            hub.on_change(move |state| seen.lock().unwrap().push(state))
        };
        hub.publish(1, ConnectionState::Connecting);
        hub.publish(3, ConnectionState::Closed);
        hub.publish(2, ConnectionState::Reconnecting);
        assert_eq!(*rx.borrow(), ConnectionState::Closed);
        assert_eq!(
            *seen.lock().unwrap(),
            [ConnectionState::Connecting, ConnectionState::Closed]
        );
    }

    #[test]
    fn nested_publish_stops_the_outer_fan_out() {
        let hub = StatusHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _first = {
            let (nested, seen) = (Arc::clone(&hub), Arc::clone(&seen));
            hub.on_change(move |state| {
                seen.lock().unwrap().push(("first", state));
                if state == ConnectionState::Reconnecting {
                    nested.publish(2, ConnectionState::Closed);
                }
            })
        };
        let _second = {
            let seen = Arc::clone(&seen);
            hub.on_change(move |state| seen.lock().unwrap().push(("second", state)))
        };
        hub.publish(1, ConnectionState::Reconnecting);
        assert_eq!(
            *seen.lock().unwrap(),
            [
                ("first", ConnectionState::Reconnecting),
                ("first", ConnectionState::Closed),
                ("second", ConnectionState::Closed),
            ]
        );
        assert_eq!(*hub.watch().borrow(), ConnectionState::Closed);
    }

    #[test]
    fn panicking_listener_is_reported_and_isolated() {
        let hub = StatusHub::new();
        let mut diagnostics = hub.diagnostics();
        let reached = Arc::new(Mutex::new(false));
        let _bad = hub.on_change(|_| panic!("listener bug"));
        let _good = {
            let reached = Arc::clone(&reached);
            hub.on_change(move |_| *reached.lock().unwrap() = true)
        };
        hub.publish(1, ConnectionState::Open);
        assert!(*reached.lock().unwrap());
        match diagnostics.try_recv() {
            Ok(Diagnostic::ListenerFailed { error }) => assert!(error.contains("listener bug")),
            other => panic!("unexpected diagnostic: {other:?}"),
        }
    }

    #[test]
    fn report_without_receivers_is_fine() {
        let hub = StatusHub::new();
        hub.report(Diagnostic::MalformedFrame {
            error: "x".into(),
        });
    }
}
