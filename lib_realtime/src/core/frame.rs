//! # Frames
//!
//! The wire unit is a JSON object:
//!
//! ```json
//! { "type": "alerts", "data": { "level": "high" }, "timestamp": 1718000000000, "id": "abc" }
//! ```
//!
//! `type` is the routed topic, `timestamp` is Unix milliseconds and `id` is an
//! optional correlation id. Inbound frames are handed to subscribers by shared
//! reference and are never mutated after decoding.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FrameError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub topic: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Frame {
    /// Builds a frame stamped with the current time.
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
            timestamp: now_millis(),
            correlation_id: None,
        }
    }

    /// Decodes one wire frame. A missing or zero timestamp is replaced with
    /// the time of receipt.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut frame: Frame = serde_json::from_slice(bytes)?;
        if frame.topic.is_empty() {
            return Err(FrameError::EmptyTopic);
        }
        if frame.timestamp == 0 {
            frame.timestamp = now_millis();
        }
        Ok(frame)
    }

    pub fn to_wire(&self) -> Result<String, FrameError> {
        if self.topic.is_empty() {
            return Err(FrameError::EmptyTopic);
        }
        Ok(serde_json::to_string(self)?)
    }
}

/// A consumer-originated message, before it is stamped and queued or sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub topic: String,
    pub data: Value,
    pub correlation_id: Option<String>,
    /// Deliver now or never; such frames bypass the outbound queue.
    pub drop_if_offline: bool,
}

impl OutboundFrame {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
            correlation_id: None,
            drop_if_offline: false,
        }
    }

    /// A best-effort frame (presence updates and the like) that is discarded
    /// instead of queued while the link is down.
    pub fn ephemeral(topic: impl Into<String>, data: Value) -> Self {
        Self {
            drop_if_offline: true,
            ..Self::new(topic, data)
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub(crate) fn into_frame(self) -> Frame {
        Frame {
            topic: self.topic,
            data: self.data,
            timestamp: now_millis(),
            correlation_id: self.correlation_id,
        }
    }
}

/// What `send` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open link.
    Sent,
    /// Buffered; flushed in FIFO order on the next open.
    Queued,
    /// Discarded because it was ephemeral and the link was down.
    Dropped,
    /// Refused by a full queue under `OverflowPolicy::RejectNewest`, or not encodable.
    Rejected,
}

impl SendOutcome {
    /// `true` when the frame was either delivered or will be.
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Sent | SendOutcome::Queued)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
