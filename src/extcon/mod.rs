//! Remote console access over TCP.
//!
//! [`ExtconHost`] is a [`ConsoleReceiver`](crate::core::ConsoleReceiver)
//! that forwards console output to one connected controller and queues the
//! commands it sends. [`proto`] holds the wire format for both sides.

mod host;
pub mod proto;

pub use host::{ExtconConfig, ExtconHost, MAX_QUEUE_SIZE};
