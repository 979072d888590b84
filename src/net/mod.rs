//! Networking: framing, a poll-driven TCP listener and a TCP client.
//!
//! The sockets are non-blocking and multiplexed with `poll(2)`.

mod client;
mod frame;
mod listener;
mod socket;

pub use client::{ConnectionStatus, TcpClient};
pub use frame::{FrameBuilder, FrameParser, FrameReader, MAX_MAGIC_SIZE};
pub use listener::{DEFAULT_QUEUE_DEPTH, ListenerCallbacks, ListenerEvents, TcpListener};
pub use socket::{ClientSocket, CloseReason};

use std::io;
use std::os::fd::RawFd;

/// `poll(2)` with `EINTR` retried. Returns the number of ready descriptors.
pub(crate) fn poll_fds(fds: &mut [libc::pollfd], timeout_ms: i32) -> io::Result<usize> {
    loop {
        // SAFETY: `fds` is a valid, exclusively borrowed slice of pollfd.
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if n >= 0 {
            return Ok(n as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Wait until `fd` reports one of `events` or the timeout expires. Returns
/// the reported events (0 on timeout).
pub(crate) fn wait_fd(fd: RawFd, events: i16, timeout_ms: i32) -> io::Result<i16> {
    let mut pfd = [libc::pollfd {
        fd,
        events,
        revents: 0,
    }];
    poll_fds(&mut pfd, timeout_ms)?;
    Ok(pfd[0].revents)
}
