//! # Subscription Router
//!
//! Maps topics to the handlers interested in them and fans each inbound frame
//! out to every one of them.
//!
//! ## Delivery rules:
//!
//! 1.  **Registration order**: handlers for one topic run in the order they
//!     were subscribed, synchronously, on the task that received the frame.
//! 2.  **Isolation**: a handler that returns `Err` or panics is reported in the
//!     [`DispatchReport`] and the remaining handlers still run.
//! 3.  **Snapshot semantics**: the handler list is cloned before delivery, so
//!     an unsubscribe takes effect from the next frame on and never skips a
//!     handler of the frame currently being delivered. Handlers may subscribe
//!     and unsubscribe from inside a callback without deadlocking.
//! 4.  **Unknown topics** are dropped silently.
//! 5.  **Gating**: [`Router::dispatch_while`] checks a condition before each
//!     handler and stops at the first `false`. A handler already running is
//!     never interrupted.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::core::frame::Frame;

pub type Handler = Arc<dyn Fn(&Frame) -> anyhow::Result<()> + Send + Sync>;

/// Opaque identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Registration {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    topics: HashMap<String, Vec<Registration>>,
}

/// A handler that failed while a frame was being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub subscription: SubscriptionId,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Handlers not called because the dispatch was cut short.
    pub skipped: usize,
    pub failures: Vec<HandlerFailure>,
}

#[derive(Default)]
pub struct Router {
    inner: Mutex<RouterInner>,
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handler` for `topic` and returns the capability that removes
    /// exactly this registration.
    pub fn subscribe<F>(self: &Arc<Self>, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Frame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner
            .topics
            .entry(topic.clone())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        log::debug!("Subscription {} registered for topic '{}'", id, topic);
        Subscription {
            router: Arc::downgrade(self),
            topic,
            id,
        }
    }

    /// Returns `false` when the registration was already gone.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let Some(registrations) = inner.topics.get_mut(topic) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            inner.topics.remove(topic);
        }
        if removed {
            log::debug!("Subscription {} removed from topic '{}'", id, topic);
        }
        removed
    }

    pub fn dispatch(&self, frame: &Frame) -> DispatchReport {
        self.dispatch_while(frame, || true)
    }

    /// Like [`Router::dispatch`], but stops before the next handler once
    /// `keep_going` returns `false`.
    pub fn dispatch_while(&self, frame: &Frame, keep_going: impl Fn() -> bool) -> DispatchReport {
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let inner = self.lock();
            match inner.topics.get(&frame.topic) {
                Some(registrations) => registrations
                    .iter()
                    .map(|r| (r.id, Arc::clone(&r.handler)))
                    .collect(),
                None => {
                    log::trace!("No subscribers for topic '{}'; frame dropped", frame.topic);
                    return DispatchReport::default();
                }
            }
        };

        let mut report = DispatchReport::default();
        for (id, handler) in handlers {
            if !keep_going() {
                log::debug!("Delivery of '{}' stopped before handler {}", frame.topic, id);
                report.skipped += 1;
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(frame)));
            let error = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
            };
            report.failures.push(HandlerFailure {
                subscription: id,
                error,
            });
        }
        report
    }

    pub fn subscription_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, Vec::len)
    }

    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.lock().topics.values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, RouterInner> {
        // Handlers never run under this lock, so poisoning only follows a bug in
        // this module; the map is still structurally valid.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Capability to remove one registration. Dropping it keeps the handler
/// registered.
#[derive(Debug)]
pub struct Subscription {
    router: Weak<Router>,
    topic: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Removes the handler. Returns `false` if the router is gone or the
    /// handler was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.router.upgrade() {
            Some(router) => router.unsubscribe(&self.topic, self.id),
            None => false,
        }
    }
}
