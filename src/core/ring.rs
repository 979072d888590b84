//! Fixed-size history of recent console messages.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::lock;
use super::message::Message;

/// Number of messages kept by the hub.
pub const RING_BUFFER_SIZE: usize = 64;

/// Circular buffer holding the last [`RING_BUFFER_SIZE`] messages in
/// insertion order.
pub struct RingBuffer {
    messages: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(RING_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append a message, overwriting the oldest one when full.
    pub fn push(&self, message: Message) {
        let mut messages = lock(&self.messages);
        if messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
    }

    /// Copy of the contents, oldest first.
    pub fn to_vec(&self) -> Vec<Message> {
        lock(&self.messages).iter().cloned().collect()
    }

    /// Call `f` for every message, oldest first, with the buffer locked.
    pub fn for_each(&self, mut f: impl FnMut(&Message)) {
        lock(&self.messages).iter().for_each(|m| f(m));
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        lock(&self.messages).clear();
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MessageInfo, Severity};

    fn msg(i: usize) -> Message {
        Message::new(MessageInfo::new(Severity::Info), i.to_string())
    }

    fn texts(ring: &RingBuffer) -> Vec<String> {
        ring.to_vec().into_iter().map(|m| m.text).collect()
    }

    #[test]
    fn test_keeps_min_n_in_order() {
        for n in [0, 1, 10, 63, 64, 65, 200] {
            let ring = RingBuffer::new();
            for i in 0..n {
                ring.push(msg(i));
            }

            let expected: Vec<String> = (n.saturating_sub(RING_BUFFER_SIZE)..n)
                .map(|i| i.to_string())
                .collect();
            assert_eq!(ring.len(), n.min(RING_BUFFER_SIZE));
            assert_eq!(texts(&ring), expected, "n = {n}");
        }
    }

    #[test]
    fn test_small_capacity_wraps() {
        let ring = RingBuffer::with_capacity(3);
        for i in 0..5 {
            ring.push(msg(i));
        }
        assert_eq!(texts(&ring), ["2", "3", "4"]);

        let mut seen = Vec::new();
        ring.for_each(|m| seen.push(m.text.clone()));
        assert_eq!(seen, ["2", "3", "4"]);

        ring.clear();
        assert!(ring.is_empty());
    }
}
