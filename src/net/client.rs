//! Non-blocking IPv4 TCP client.

use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::net::{SocketAddrV4, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::{Duration, Instant};

use tracing::debug;

use super::socket::classify;
use super::wait_fd;
use crate::error::NetError;

/// Connection state of a [`TcpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Closed,
    Connecting,
    Connected,
}

/// TCP client with a non-blocking connect.
///
/// [`connect`](Self::connect) returns immediately; call
/// [`update_status`](Self::update_status) until the status leaves
/// [`ConnectionStatus::Connecting`].
///
/// ```no_run
/// use std::net::{Ipv4Addr, SocketAddrV4};
/// use std::time::Duration;
/// use appfw::net::{ConnectionStatus, TcpClient};
///
/// let mut client = TcpClient::new();
/// client.connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7777), Duration::from_secs(5))?;
/// while client.status() == ConnectionStatus::Connecting {
///     client.update_status(10)?;
/// }
/// client.write_all(b"hello\n")?;
/// # Ok::<(), appfw::NetError>(())
/// ```
#[derive(Debug, Default)]
pub struct TcpClient {
    stream: Option<TcpStream>,
    status: ConnectionStatus,
    remote: Option<SocketAddrV4>,
    timeout: Duration,
    started: Option<Instant>,
}

impl TcpClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddrV4> {
        self.remote
    }

    /// Start connecting to `addr`. Fails if the client is not closed.
    pub fn connect(&mut self, addr: SocketAddrV4, timeout: Duration) -> Result<(), NetError> {
        if self.status != ConnectionStatus::Closed {
            return Err(NetError::AlreadyConnected);
        }

        // SAFETY: plain socket(2) call; the result is checked below.
        let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if raw < 0 {
            return Err(NetError::last_os("socket"));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let stream = TcpStream::from(unsafe { OwnedFd::from_raw_fd(raw) });
        stream
            .set_nonblocking(true)
            .map_err(|e| NetError::socket("set_nonblocking", e))?;

        // SAFETY: all-zero is a valid sockaddr_in.
        let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
        sa.sin_family = libc::AF_INET as libc::sa_family_t;
        sa.sin_port = addr.port().to_be();
        sa.sin_addr = libc::in_addr {
            s_addr: u32::from(*addr.ip()).to_be(),
        };

        // SAFETY: `sa` outlives the call and the length matches its type.
        let result = unsafe {
            libc::connect(
                stream.as_raw_fd(),
                (&sa as *const libc::sockaddr_in).cast(),
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };

        self.status = if result == 0 {
            ConnectionStatus::Connected
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(classify("connect", err).1);
            }
            ConnectionStatus::Connecting
        };

        debug!(%addr, status = ?self.status, "connecting");
        self.stream = Some(stream);
        self.remote = Some(addr);
        self.timeout = timeout;
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Wait up to `timeout_ms` (-1 waits forever) for the socket.
    ///
    /// While connecting, this completes the connection or fails with
    /// [`NetError::TimedOut`] once the connect timeout has passed. When
    /// connected, returns `true` if data (or end of stream) is readable.
    /// The client is closed on any error.
    pub fn update_status(&mut self, timeout_ms: i32) -> Result<bool, NetError> {
        let result = self.poll_status(timeout_ms);
        if result.is_err() {
            self.close();
        }
        result
    }

    fn poll_status(&mut self, timeout_ms: i32) -> Result<bool, NetError> {
        let stream = self.stream.as_ref().ok_or(NetError::NotConnected)?;
        let fd = stream.as_raw_fd();

        match self.status {
            ConnectionStatus::Closed => Err(NetError::NotConnected),
            ConnectionStatus::Connecting => {
                let revents = wait_fd(fd, libc::POLLOUT, timeout_ms).map_err(|e| NetError::socket("poll", e))?;

                if revents != 0 {
                    match stream.take_error().map_err(|e| NetError::socket("getsockopt", e))? {
                        None => {
                            debug!(addr = ?self.remote, "connected");
                            self.status = ConnectionStatus::Connected;
                            return Ok(false);
                        }
                        Some(e) if e.kind() == ErrorKind::TimedOut => return Err(NetError::TimedOut),
                        Some(e) if e.raw_os_error() != Some(libc::EINPROGRESS) => {
                            return Err(NetError::socket("connect", e));
                        }
                        Some(_) => {}
                    }
                }

                let elapsed = self.started.map_or(Duration::ZERO, |t| t.elapsed());
                if elapsed >= self.timeout {
                    return Err(NetError::TimedOut);
                }
                Ok(false)
            }
            ConnectionStatus::Connected => {
                let revents = wait_fd(fd, libc::POLLIN, timeout_ms).map_err(|e| NetError::socket("poll", e))?;
                Ok(revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
            }
        }
    }

    /// Non-blocking read. Returns 0 when nothing is available or at end of
    /// stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        let mut stream = self.stream.as_ref().ok_or(NetError::NotConnected)?;
        loop {
            match stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Err(classify("read", e).1);
                }
            }
        }
    }

    /// Non-blocking write. Returns the number of bytes accepted.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, NetError> {
        let mut stream = self.stream.as_ref().ok_or(NetError::NotConnected)?;
        loop {
            match stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Err(classify("write", e).1);
                }
            }
        }
    }

    /// Write the whole buffer. May block.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<(), NetError> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                let fd = self.stream.as_ref().ok_or(NetError::NotConnected)?.as_raw_fd();
                if let Err(e) = wait_fd(fd, libc::POLLOUT, 100) {
                    self.close();
                    return Err(NetError::socket("poll", e));
                }
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Close the connection. Does nothing if already closed.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(addr = ?self.remote, "client closed");
        }
        self.status = ConnectionStatus::Closed;
        self.remote = None;
        self.started = None;
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener as StdListener};

    use super::*;

    fn connected(listener: &StdListener) -> TcpClient {
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(a) => a,
            std::net::SocketAddr::V6(_) => unreachable!(),
        };

        let mut client = TcpClient::new();
        client.connect(addr, Duration::from_secs(5)).unwrap();
        for _ in 0..500 {
            if client.status() == ConnectionStatus::Connected {
                break;
            }
            client.update_status(10).unwrap();
        }
        assert_eq!(client.status(), ConnectionStatus::Connected);
        client
    }

    #[test]
    fn test_connect_and_exchange() {
        let listener = StdListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let mut client = connected(&listener);
        let (mut server, _) = listener.accept().unwrap();

        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").unwrap();
        assert!(client.update_status(1000).unwrap());
        let mut reply = [0u8; 16];
        assert_eq!(client.read(&mut reply).unwrap(), 4);
        assert_eq!(&reply[..4], b"pong");
    }

    #[test]
    fn test_connect_twice_fails() {
        let listener = StdListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let mut client = connected(&listener);
        let addr = client.remote_addr().unwrap();
        assert!(matches!(
            client.connect(addr, Duration::from_secs(1)),
            Err(NetError::AlreadyConnected)
        ));

        client.close();
        assert_eq!(client.status(), ConnectionStatus::Closed);
        assert!(client.remote_addr().is_none());
        assert!(matches!(client.update_status(0), Err(NetError::NotConnected)));
    }
}
