//! Accepted TCP connection.

use std::any::Any;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::wait_fd;
use crate::core::lock;
use crate::error::NetError;

/// Why a socket was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Unrecoverable socket error.
    Failure,
    /// The peer went away.
    ConnAborted,
    TimedOut,
    /// Closed by the application.
    User,
    /// The listener is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloseReason::Failure => "failure",
            CloseReason::ConnAborted => "connection aborted",
            CloseReason::TimedOut => "timed out",
            CloseReason::User => "closed by user",
            CloseReason::Shutdown => "shutdown",
        })
    }
}

type UserData = Arc<dyn Any + Send + Sync>;

/// A client connection owned by a [`TcpListener`](super::TcpListener).
///
/// All I/O is non-blocking. [`close`](Self::close) only marks the socket;
/// the listener shuts it down and reports it at the end of its current
/// `poll`.
pub struct ClientSocket {
    stream: TcpStream,
    peer: SocketAddr,
    closing: AtomicBool,
    reason: Mutex<CloseReason>,
    user_data: Mutex<Option<UserData>>,
}

impl ClientSocket {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            closing: AtomicBool::new(false),
            reason: Mutex::new(CloseReason::User),
            user_data: Mutex::new(None),
        }
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// The reason passed to the first `close`, if closing.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.is_closing().then(|| *lock(&self.reason))
    }

    /// Mark the socket for closing. Later calls keep the first reason.
    pub fn close(&self, reason: CloseReason) {
        let mut saved = lock(&self.reason);
        if !self.closing.swap(true, Ordering::AcqRel) {
            *saved = reason;
        }
    }

    /// Non-blocking read.
    ///
    /// Returns 0 when nothing is available. End of stream also returns 0
    /// and marks the socket closed with [`CloseReason::ConnAborted`]. Errors
    /// close the socket before they are returned.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, NetError> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match (&self.stream).read(buf) {
                Ok(0) => {
                    self.close(CloseReason::ConnAborted);
                    return Ok(0);
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail("read", e)),
            }
        }
    }

    /// Non-blocking write. Returns the number of bytes accepted.
    pub fn write(&self, buf: &[u8]) -> Result<usize, NetError> {
        loop {
            match (&self.stream).write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail("write", e)),
            }
        }
    }

    /// Write the whole buffer, waiting for the kernel to accept it.
    pub fn write_all(&self, mut buf: &[u8]) -> Result<(), NetError> {
        while !buf.is_empty() {
            if self.is_closing() {
                return Err(NetError::NotConnected);
            }

            let n = self.write(buf)?;
            if n == 0 {
                wait_fd(self.raw_fd(), libc::POLLOUT, 100)
                    .map_err(|e| self.fail("poll", e))?;
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Attach application data.
    pub fn set_user_data<T: Any + Send + Sync>(&self, data: T) {
        *lock(&self.user_data) = Some(Arc::new(data));
    }

    /// Get the attached data if it is a `T`.
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        lock(&self.user_data).clone()?.downcast::<T>().ok()
    }

    pub fn clear_user_data(&self) {
        *lock(&self.user_data) = None;
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Shut the connection down in both directions. The descriptor itself
    /// is closed when the last reference is dropped.
    pub(crate) fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn fail(&self, context: &'static str, e: io::Error) -> NetError {
        let (reason, err) = classify(context, e);
        self.close(reason);
        err
    }
}

impl fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSocket")
            .field("peer", &self.peer)
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Map an I/O error to a close reason and a [`NetError`].
pub(crate) fn classify(context: &'static str, e: io::Error) -> (CloseReason, NetError) {
    match e.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected => (CloseReason::ConnAborted, NetError::ConnectionAborted),
        ErrorKind::TimedOut => (CloseReason::TimedOut, NetError::TimedOut),
        _ => (CloseReason::Failure, NetError::socket(context, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener as StdListener;

    use super::*;

    fn pair() -> (ClientSocket, TcpStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (ClientSocket::new(server, peer), client)
    }

    #[test]
    fn test_read_would_block_is_zero() {
        let (socket, _client) = pair();
        let mut buf = [0u8; 16];
        assert_eq!(socket.read(&mut buf).unwrap(), 0);
        assert!(!socket.is_closing());
    }

    #[test]
    fn test_read_and_write() {
        let (socket, mut client) = pair();
        client.write_all(b"ping").unwrap();

        let mut buf = [0u8; 16];
        wait_fd(socket.raw_fd(), libc::POLLIN, 1000).unwrap();
        assert_eq!(socket.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");

        socket.write_all(b"pong").unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"pong");
    }

    #[test]
    fn test_eof_closes() {
        let (socket, client) = pair();
        drop(client);

        wait_fd(socket.raw_fd(), libc::POLLIN, 1000).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(socket.read(&mut buf).unwrap(), 0);
        assert_eq!(socket.close_reason(), Some(CloseReason::ConnAborted));
    }

    #[test]
    fn test_close_keeps_first_reason() {
        let (socket, _client) = pair();
        assert_eq!(socket.close_reason(), None);

        socket.close(CloseReason::User);
        socket.close(CloseReason::Shutdown);
        assert_eq!(socket.close_reason(), Some(CloseReason::User));
        assert!(matches!(socket.write_all(b"x"), Err(NetError::NotConnected)));
    }

    #[test]
    fn test_user_data() {
        let (socket, _client) = pair();
        socket.set_user_data(42u32);
        assert_eq!(socket.user_data::<u32>().as_deref(), Some(&42));
        assert!(socket.user_data::<String>().is_none());

        socket.clear_user_data();
        assert!(socket.user_data::<u32>().is_none());
    }

    #[test]
    fn test_classify() {
        let (reason, err) = classify("read", io::Error::from(ErrorKind::ConnectionReset));
        assert_eq!(reason, CloseReason::ConnAborted);
        assert!(matches!(err, NetError::ConnectionAborted));

        let (reason, err) = classify("read", io::Error::from(ErrorKind::TimedOut));
        assert_eq!(reason, CloseReason::TimedOut);
        assert!(matches!(err, NetError::TimedOut));

        let (reason, err) = classify("read", io::Error::from(ErrorKind::PermissionDenied));
        assert_eq!(reason, CloseReason::Failure);
        assert!(matches!(err, NetError::Socket { context: "read", .. }));
    }
}
