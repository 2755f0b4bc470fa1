//! # Outbound Queue
//!
//! Holds consumer frames while the link is down. The queue is bounded; what
//! happens at capacity is an explicit [`OverflowPolicy`].

use std::collections::VecDeque;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::frame::Frame;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room for the new one.
    #[default]
    DropOldest,
    /// Keep the queue as is and refuse the new frame.
    RejectNewest,
}

/// Accepts the JSON spelling (`dropOldest`) as well as the kebab-case one
/// (`drop-oldest`) used on command lines.
impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "dropoldest" => Ok(OverflowPolicy::DropOldest),
            "rejectnewest" => Ok(OverflowPolicy::RejectNewest),
            _ => Err(ConfigError::Invalid {
                field: "overflowPolicy",
                reason: format!("`{s}` is neither dropOldest nor rejectNewest"),
            }),
        }
    }
}

/// Result of [`OutboundQueue::push`].
#[derive(Debug, PartialEq)]
pub enum Enqueued {
    Accepted,
    /// Accepted after evicting this frame.
    Evicted(Frame),
    /// Not accepted; the frame is handed back.
    Rejected(Frame),
}

#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            policy,
        }
    }

    pub fn push(&mut self, frame: Frame) -> Enqueued {
        if self.frames.len() < self.capacity {
            self.frames.push_back(frame);
            return Enqueued::Accepted;
        }
        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = self.frames.pop_front();
                self.frames.push_back(frame);
                match evicted {
                    Some(old) => Enqueued::Evicted(old),
                    None => Enqueued::Accepted,
                }
            }
            OverflowPolicy::RejectNewest => Enqueued::Rejected(frame),
        }
    }

    /// Removes every queued frame, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Frame> + '_ {
        self.frames.drain(..)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(n: u64) -> Frame {
        Frame::new(format!("t{n}"), json!(n))
    }

    fn topics(queue: &mut OutboundQueue) -> Vec<String> {
        queue.drain().map(|f| f.topic).collect()
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = OutboundQueue::new(8, OverflowPolicy::DropOldest);
        for n in 0..3 {
            assert_eq!(queue.push(frame(n)), Enqueued::Accepted);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(topics(&mut queue), ["t0", "t1", "t2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let mut queue = OutboundQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(frame(0));
        queue.push(frame(1));
        match queue.push(frame(2)) {
            Enqueued::Evicted(old) => assert_eq!(old.topic, "t0"),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(topics(&mut queue), ["t1", "t2"]);
    }

    #[test]
    fn reject_newest_keeps_existing() {
        let mut queue = OutboundQueue::new(2, OverflowPolicy::RejectNewest);
        queue.push(frame(0));
        queue.push(frame(1));
        match queue.push(frame(2)) {
            Enqueued::Rejected(new) => assert_eq!(new.topic, "t2"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(topics(&mut queue), ["t0", "t1"]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = OutboundQueue::new(0, OverflowPolicy::DropOldest);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn policy_names_parse_in_either_spelling() {
        assert_eq!("dropOldest".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::DropOldest);
        assert_eq!("reject-newest".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::RejectNewest);
        assert!("newest".parse::<OverflowPolicy>().is_err());
    }
}
