//! # Connection Manager
//!
//! [`RealtimeClient`] owns the one physical link and is the single source of
//! truth for [`ConnectionState`]. Public operations are synchronous and never
//! wait on the network; the socket work happens on a driver task spawned per
//! connection session.
//!
//! ## Session model:
//!
//! - `connect()` starts a session: it bumps a generation counter, moves to
//!   `Connecting` and spawns the driver. The driver opens the link, runs the
//!   heartbeat while `Open`, and on any abnormal close consults the
//!   [`ReconnectPolicy`] to either schedule a retry (`Reconnecting`) or settle
//!   in `Closed`.
//! - `disconnect()` ends the session atomically: it bumps the generation,
//!   cancels the session token (which drops any pending reconnect timer and the
//!   heartbeat), sends a normal-closure frame if a link is held and settles in
//!   `Closed`. A driver step that was already in flight sees the stale
//!   generation and does nothing.
//!
//! All state lives behind one mutex that is never held across an `.await` and
//! never held while subscriber handlers or status listeners run. Transitions
//! are numbered under that mutex and published after it is released; the
//! status hub drops any that a later transition already overtook.
//!
//! Inbound frames are routed only while their session is `Open`, checked
//! again before each handler: once `disconnect()` returns, no handler that had
//! not yet started for a frame will run.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::configs::config_realtime::RealtimeOptions;
use crate::core::frame::{Frame, OutboundFrame, SendOutcome};
use crate::core::lifecycle::{transition, ConnectionState, LinkEvent};
use crate::core::outbound_queue::{Enqueued, OutboundQueue};
use crate::core::reconnect_policy::ReconnectPolicy;
use crate::core::router::{Router, Subscription};
use crate::core::status::{Diagnostic, StatusHub, StatusSnapshot, StatusSubscription};
use crate::error::{RealtimeError, TransportError};
use crate::transport::{close_code, Link, Transport, WireEvent, WireMessage};

/// Handle to one transport client. Cheap to clone; the connection is shut down
/// when the last clone is dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    owner: Arc<Owner>,
}

struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

struct Shared {
    url: Url,
    options: RealtimeOptions,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    router: Arc<Router>,
    status: Arc<StatusHub>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    /// Consecutive failures since the last successful open.
    attempt: u32,
    /// Backoff used for the previous failure of this run of retries.
    last_delay: Option<Duration>,
    /// Number of the last transition applied.
    seq: u64,
    /// Present only while `Open` (and for the instant of `Closing`).
    link: Option<mpsc::UnboundedSender<WireMessage>>,
    queue: OutboundQueue,
    session: Option<Session>,
    generation: u64,
    retries_exhausted: bool,
    last_error: Option<String>,
}

struct Session {
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

impl Inner {
    fn apply(&mut self, event: LinkEvent, published: &mut Vec<(u64, ConnectionState)>) {
        match transition(self.state, event) {
            Some(next) => {
                log::debug!("{} -> {} on {:?}", self.state, next, event);
                debug_assert!(self.link.is_none() || next.may_hold_link());
                self.state = next;
                self.seq += 1;
                published.push((self.seq, next));
            }
            None => log::trace!("Ignoring {:?} while {}", event, self.state),
        }
    }
}

/// Why an open link (or an open attempt) ended.
#[derive(Debug)]
enum CloseCause {
    Voluntary,
    ConnectFailed(String),
    HeartbeatTimeout,
    Closed { code: u16, reason: String },
    Errored(String),
}

impl CloseCause {
    fn describe(&self) -> String {
        match self {
            CloseCause::Voluntary => "disconnected".to_string(),
            CloseCause::ConnectFailed(error) => format!("connect failed: {error}"),
            CloseCause::HeartbeatTimeout => "heartbeat timeout".to_string(),
            CloseCause::Closed { code, reason } => format!("closed with code {code}: {reason}"),
            CloseCause::Errored(error) => format!("transport error: {error}"),
        }
    }
}

impl RealtimeClient {
    /// Builds a client for `url` over `transport`, with the backoff policy
    /// described by `options`. Must be called inside a tokio runtime.
    pub fn new(
        url: &str,
        options: RealtimeOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RealtimeError> {
        let policy = ReconnectPolicy::from_options(&options);
        Self::with_policy(url, options, transport, policy)
    }

    /// Like [`RealtimeClient::new`] with an explicit policy, e.g. one with a
    /// pinned jitter source.
    pub fn with_policy(
        url: &str,
        options: RealtimeOptions,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Result<Self, RealtimeError> {
        options.validate()?;
        let parsed = Url::parse(url).map_err(|source| RealtimeError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        let queue = OutboundQueue::new(options.outbound_queue_capacity, options.overflow_policy);

        let shared = Arc::new(Shared {
            url: parsed,
            options,
            policy,
            transport,
            runtime,
            router: Router::new(),
            status: StatusHub::new(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                attempt: 0,
                last_delay: None,
                seq: 0,
                link: None,
                queue,
                session: None,
                generation: 0,
                retries_exhausted: false,
                last_error: None,
            }),
        });
        Ok(Self {
            owner: Arc::new(Owner { shared }),
        })
    }

    /// A client speaking WebSocket via `tokio-tungstenite`.
    #[cfg(feature = "tungstenite")]
    pub fn websocket(url: &str, options: RealtimeOptions) -> Result<Self, RealtimeError> {
        let transport = Arc::new(crate::transport::ws_tungstenite::TungsteniteTransport::new());
        Self::new(url, options, transport)
    }

    /// Starts connecting. A no-op while `Connecting` or `Open`; while
    /// `Reconnecting` it skips the remaining backoff and retries immediately.
    pub fn connect(&self) {
        self.shared().connect();
    }

    /// Closes the link on purpose. Always ends in `Closed` and never triggers
    /// a reconnect.
    pub fn disconnect(&self) {
        self.shared().disconnect();
    }

    /// Writes `frame` now if the link is open; otherwise queues it, or drops it
    /// when it is ephemeral.
    pub fn send(&self, frame: OutboundFrame) -> SendOutcome {
        self.shared().send(frame)
    }

    /// Registers a handler for `topic`. Works in any state; the registration
    /// is local bookkeeping only.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Frame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared().router.subscribe(topic, handler)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().lock().state
    }

    /// Calls `listener` synchronously on every state transition.
    pub fn on_status_change<F>(&self, listener: F) -> StatusSubscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.shared().status.on_change(listener)
    }

    /// Latest state as a `watch` channel, for reactive bindings.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared().status.watch()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.shared().status.diagnostics()
    }

    pub fn status(&self) -> StatusSnapshot {
        let shared = self.shared();
        let subscriptions = shared.router.total_subscriptions();
        let inner = shared.lock();
        StatusSnapshot {
            state: inner.state,
            attempt: inner.attempt,
            link_active: inner.link.is_some(),
            queued: inner.queue.len(),
            subscriptions,
            retries_exhausted: inner.retries_exhausted,
            last_error: inner.last_error.clone(),
        }
    }

    pub fn subscription_count(&self, topic: &str) -> usize {
        self.shared().router.subscription_count(topic)
    }

    pub fn url(&self) -> &Url {
        &self.shared().url
    }

    pub fn options(&self) -> &RealtimeOptions {
        &self.shared().options
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.owner.shared
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing user-supplied runs under this lock; a poisoned guard still
        // holds consistent state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, states: Vec<(u64, ConnectionState)>) {
        for (seq, state) in states {
            self.status.publish(seq, state);
        }
    }

    fn connect(self: &Arc<Self>) {
        let mut published = Vec::new();
        {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => {
                    log::debug!("connect() ignored while {}", inner.state);
                    return;
                }
                ConnectionState::Reconnecting => {
                    if let Some(session) = &inner.session {
                        log::info!("connect() while reconnecting; retrying {} now", self.url);
                        session.wake.notify_one();
                    }
                    return;
                }
                ConnectionState::Idle | ConnectionState::Closed => {}
            }

            inner.generation += 1;
            let generation = inner.generation;
            inner.attempt = 0;
            inner.last_delay = None;
            inner.retries_exhausted = false;
            let cancel = CancellationToken::new();
            let wake = Arc::new(Notify::new());
            inner.session = Some(Session {
                cancel: cancel.clone(),
                wake: Arc::clone(&wake),
            });
            inner.apply(LinkEvent::ConnectRequested, &mut published);
            self.runtime
                .spawn(drive(Arc::clone(self), generation, cancel, wake));
        }
        self.publish(published);
    }

    fn disconnect(&self) {
        let mut published = Vec::new();
        {
            let mut inner = self.lock();
            inner.generation += 1;
            if let Some(session) = inner.session.take() {
                session.cancel.cancel();
            }
            let link = inner.link.take();
            inner.apply(LinkEvent::CloseRequested, &mut published);
            if let Some(link) = link {
                let _ = link.send(WireMessage::Close {
                    code: close_code::NORMAL,
                    reason: "client disconnect".to_string(),
                });
                log::info!("Disconnected from {}", self.url);
            }
            inner.apply(LinkEvent::CloseCompleted, &mut published);
        }
        self.publish(published);
    }

    fn send(&self, frame: OutboundFrame) -> SendOutcome {
        let drop_if_offline = frame.drop_if_offline;
        let frame = frame.into_frame();
        let text = match frame.to_wire() {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Refusing unencodable frame for '{}': {}", frame.topic, e);
                return SendOutcome::Rejected;
            }
        };

        let mut inner = self.lock();
        if inner.state == ConnectionState::Open {
            if let Some(link) = &inner.link {
                if link.send(WireMessage::Text(text)).is_ok() {
                    return SendOutcome::Sent;
                }
                log::debug!("Link writer is gone; treating '{}' as offline", frame.topic);
            }
        }
        if drop_if_offline {
            log::trace!("Dropping ephemeral frame for '{}' while {}", frame.topic, inner.state);
            return SendOutcome::Dropped;
        }

        let capacity = inner.queue.capacity();
        let policy = inner.queue.policy();
        let pushed = inner.queue.push(frame);
        drop(inner);
        match pushed {
            Enqueued::Accepted => SendOutcome::Queued,
            Enqueued::Evicted(oldest) => {
                self.status.report(Diagnostic::QueueOverflow {
                    topic: oldest.topic,
                    capacity,
                    policy,
                });
                SendOutcome::Queued
            }
            Enqueued::Rejected(newest) => {
                self.status.report(Diagnostic::QueueOverflow {
                    topic: newest.topic,
                    capacity,
                    policy,
                });
                SendOutcome::Rejected
            }
        }
    }

    async fn open_link(&self) -> Result<Link, TransportError> {
        let open = self.transport.open(&self.url);
        match self.options.connect_timeout() {
            Some(limit) => time::timeout(limit, open)
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => open.await,
        }
    }

    /// Installs a freshly opened link, flushes the queue and moves to `Open`.
    /// Returns `None` (dropping the link) when the session went stale meanwhile.
    fn on_open(&self, generation: u64, link: Link) -> Option<mpsc::UnboundedReceiver<WireEvent>> {
        let Link { outbound, inbound } = link;
        let mut published = Vec::new();
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                log::debug!("Discarding link to {} opened for a stale session", self.url);
                return None;
            }

            let pending: Vec<Frame> = inner.queue.drain().collect();
            let mut flushed = 0usize;
            let mut unsent = pending.into_iter();
            for frame in unsent.by_ref() {
                let text = match frame.to_wire() {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Skipping queued frame for '{}': {}", frame.topic, e);
                        continue;
                    }
                };
                if outbound.send(WireMessage::Text(text)).is_err() {
                    // Writer died immediately; keep this frame and the rest for next time.
                    inner.queue.push(frame);
                    break;
                }
                flushed += 1;
            }
            for frame in unsent {
                inner.queue.push(frame);
            }

            inner.link = Some(outbound);
            inner.attempt = 0;
            inner.last_delay = None;
            inner.retries_exhausted = false;
            inner.last_error = None;
            inner.apply(LinkEvent::Opened, &mut published);
            log::info!("Connected to {} ({} queued frames flushed)", self.url, flushed);
        }
        self.publish(published);
        Some(inbound)
    }

    /// Pumps inbound events and runs the heartbeat until the link ends.
    async fn run_open(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        mut inbound: mpsc::UnboundedReceiver<WireEvent>,
    ) -> CloseCause {
        let timeout = self.options.heartbeat_timeout();
        let mut ticker = self.options.heartbeat_interval().map(|period| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut awaiting_since: Option<Instant> = None;

        loop {
            let deadline = awaiting_since.map(|sent| sent + timeout);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return CloseCause::Voluntary,
                event = inbound.recv() => match event {
                    Some(WireEvent::Text(text)) => {
                        awaiting_since = None;
                        self.deliver(generation, text.as_bytes());
                    }
                    Some(WireEvent::Binary(bytes)) => {
                        awaiting_since = None;
                        self.deliver(generation, &bytes);
                    }
                    Some(WireEvent::Ping | WireEvent::Pong) => awaiting_since = None,
                    Some(WireEvent::Closed { code, reason }) => {
                        return CloseCause::Closed { code, reason };
                    }
                    Some(WireEvent::Error(error)) => return CloseCause::Errored(error),
                    None => {
                        return CloseCause::Closed {
                            code: close_code::ABNORMAL,
                            reason: "link dropped".to_string(),
                        };
                    }
                },
                _ = next_tick(&mut ticker) => {
                    if awaiting_since.is_none() {
                        if !self.write_control(generation, WireMessage::Ping(Vec::new())) {
                            return CloseCause::Errored("link writer stopped".to_string());
                        }
                        log::trace!("Heartbeat ping sent to {}", self.url);
                        awaiting_since = Some(Instant::now());
                    }
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    return CloseCause::HeartbeatTimeout;
                }
            }
        }
    }

    fn write_control(&self, generation: u64, message: WireMessage) -> bool {
        let inner = self.lock();
        match &inner.link {
            Some(link) if inner.generation == generation => link.send(message).is_ok(),
            _ => false,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.lock();
        inner.generation == generation && inner.state == ConnectionState::Open
    }

    /// Decodes and routes one inbound payload, only while this session is open.
    fn deliver(&self, generation: u64, bytes: &[u8]) {
        if !self.is_current(generation) {
            return;
        }
        match Frame::from_wire(bytes) {
            Ok(frame) => {
                let report = self.router.dispatch_while(&frame, || self.is_current(generation));
                for failure in report.failures {
                    self.status.report(Diagnostic::HandlerFailed {
                        topic: frame.topic.clone(),
                        subscription: failure.subscription,
                        error: failure.error,
                    });
                }
            }
            Err(e) => self.status.report(Diagnostic::MalformedFrame {
                error: e.to_string(),
            }),
        }
    }

    /// Settles the session after the link (or an attempt) ended. Returns the
    /// backoff delay when a retry was scheduled.
    fn on_closed(&self, generation: u64, cause: CloseCause) -> Option<Duration> {
        let mut published = Vec::new();
        let delay = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return None;
            }

            let link = inner.link.take();
            if let (CloseCause::HeartbeatTimeout, Some(link)) = (&cause, &link) {
                let _ = link.send(WireMessage::Close {
                    code: close_code::HEARTBEAT_TIMEOUT,
                    reason: "heartbeat timeout".to_string(),
                });
            }
            drop(link);

            let event = match cause {
                CloseCause::Closed { .. } => LinkEvent::ClosedByPeer,
                _ => LinkEvent::Failed,
            };
            inner.apply(event, &mut published);

            let abnormal = match &cause {
                CloseCause::Voluntary => false,
                CloseCause::Closed { code, reason } if *code == close_code::NORMAL => {
                    log::info!("{} closed the link normally: {}", self.url, reason);
                    false
                }
                CloseCause::Closed { code, reason } => {
                    self.status.report(Diagnostic::AbnormalClose {
                        code: *code,
                        reason: reason.clone(),
                    });
                    true
                }
                CloseCause::ConnectFailed(error) => {
                    self.status.report(Diagnostic::ConnectFailed {
                        attempt: inner.attempt,
                        error: error.clone(),
                    });
                    true
                }
                CloseCause::HeartbeatTimeout => {
                    self.status.report(Diagnostic::HeartbeatTimeout {
                        timeout: self.options.heartbeat_timeout(),
                    });
                    true
                }
                CloseCause::Errored(error) => {
                    self.status.report(Diagnostic::AbnormalClose {
                        code: close_code::ABNORMAL,
                        reason: error.clone(),
                    });
                    true
                }
            };
            if abnormal {
                inner.last_error = Some(cause.describe());
            }

            if !abnormal || !self.options.auto_reconnect {
                inner.session = None;
                None
            } else if !self.policy.should_retry(inner.attempt) {
                inner.session = None;
                inner.retries_exhausted = true;
                self.status.report(Diagnostic::RetriesExhausted {
                    attempts: inner.attempt,
                });
                None
            } else {
                let delay = self.policy.next_delay_after(inner.attempt, inner.last_delay);
                inner.last_delay = Some(delay);
                inner.attempt += 1;
                inner.apply(LinkEvent::RetryScheduled, &mut published);
                self.status.report(Diagnostic::ReconnectScheduled {
                    attempt: inner.attempt,
                    delay,
                });
                Some(delay)
            }
        };
        self.publish(published);
        delay
    }

    fn begin_retry(&self, generation: u64) -> bool {
        let mut published = Vec::new();
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Reconnecting {
                return false;
            }
            inner.apply(LinkEvent::RetryFired, &mut published);
        }
        self.publish(published);
        true
    }
}

/// One connection session: connect, stay open, back off, repeat.
async fn drive(shared: Arc<Shared>, generation: u64, cancel: CancellationToken, wake: Arc<Notify>) {
    loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = shared.open_link() => opened,
        };

        let cause = match opened {
            Ok(link) => match shared.on_open(generation, link) {
                Some(inbound) => shared.run_open(generation, &cancel, inbound).await,
                None => return,
            },
            Err(e) => CloseCause::ConnectFailed(e.to_string()),
        };
        if cancel.is_cancelled() {
            return;
        }

        let Some(delay) = shared.on_closed(generation, cause) else {
            return;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = wake.notified() => log::debug!("Reconnect to {} requested ahead of backoff", shared.url),
            _ = time::sleep(delay) => {}
        }
        if !shared.begin_retry(generation) {
            return;
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
