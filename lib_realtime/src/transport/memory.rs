//! # In-Memory Transport
//!
//! A fake socket for exercising a [`RealtimeClient`](crate::RealtimeClient)
//! without a network. Every successful open hands a [`MemoryPeer`] (the
//! "server side" of the link) to the [`MemoryServer`]. Refusals can be
//! scripted, and every open attempt is timestamped with the tokio clock so
//! paused-time tests can measure backoff.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::core::frame::Frame;
use crate::error::TransportError;
use crate::transport::{Link, Transport, WireEvent, WireMessage};

#[derive(Default)]
struct Script {
    refuse_next: u32,
    refuse_all: bool,
    attempts: Vec<Instant>,
}

pub struct MemoryTransport {
    script: Mutex<Script>,
    accepted_tx: mpsc::UnboundedSender<MemoryPeer>,
}

/// Receives the server side of every link the transport opens.
pub struct MemoryServer {
    accepted_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, MemoryServer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(Script::default()),
            accepted_tx,
        });
        (transport, MemoryServer { accepted_rx })
    }

    /// Refuses the next `count` open attempts.
    pub fn refuse_next(&self, count: u32) {
        self.lock().refuse_next = count;
    }

    /// Refuses every open attempt until switched off.
    pub fn refuse_all(&self, refuse: bool) {
        self.lock().refuse_all = refuse;
    }

    /// Time of every open attempt so far, successful or not.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn open(&self, url: &Url) -> BoxFuture<'static, Result<Link, TransportError>> {
        let refused = {
            let mut script = self.lock();
            script.attempts.push(Instant::now());
            if script.refuse_all {
                true
            } else if script.refuse_next > 0 {
                script.refuse_next -= 1;
                true
            } else {
                false
            }
        };
        if refused {
            return future::ready(Err(TransportError::Refused(url.to_string()))).boxed();
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            to_client: inbound_tx,
            from_client: outbound_rx,
        };
        // A dropped server just means nobody is watching this link.
        let _ = self.accepted_tx.send(peer);
        future::ready(Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }))
        .boxed()
    }
}

impl MemoryServer {
    /// Waits for the next opened link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted_rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted_rx.try_recv().ok()
    }
}

/// The server side of one in-memory link.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<WireEvent>,
    from_client: mpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryPeer {
    /// Returns `false` when the client already dropped the link.
    pub fn push(&self, event: WireEvent) -> bool {
        self.to_client.send(event).is_ok()
    }

    pub fn push_frame(&self, frame: &Frame) -> bool {
        match frame.to_wire() {
            Ok(text) => self.push(WireEvent::Text(text)),
            Err(_) => false,
        }
    }

    pub fn pong(&self) -> bool {
        self.push(WireEvent::Pong)
    }

    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.push(WireEvent::Closed {
            code,
            reason: reason.to_string(),
        })
    }

    /// Next message written by the client; `None` once the client closed the link.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.from_client.try_recv().ok()
    }

    /// Next data frame written by the client, skipping heartbeat pings.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            match self.from_client.recv().await? {
                WireMessage::Text(text) => return Frame::from_wire(text.as_bytes()).ok(),
                WireMessage::Ping(_) => continue,
                WireMessage::Close { .. } => return None,
            }
        }
    }

    /// Everything the client has written so far, without waiting.
    pub fn drain(&mut self) -> Vec<WireMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.from_client.try_recv() {
            out.push(message);
        }
        out
    }

    /// Whether the client still holds the link.
    pub fn is_connected(&self) -> bool {
        !self.to_client.is_closed()
    }
}
