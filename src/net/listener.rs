//! Poll-driven single-port TCP listener.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener as StdListener};
use std::os::fd::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::poll_fds;
use super::socket::{ClientSocket, CloseReason};
use crate::error::NetError;

/// Default length of the pending connections queue.
pub const DEFAULT_QUEUE_DEPTH: i32 = 16;

/// Listener callbacks.
///
/// `idx` is the socket's position in the listener's client list at the time
/// of the call. Callbacks must not panic: a panic is an assertion failure
/// and aborts the process.
pub trait ListenerEvents {
    /// A connection was accepted.
    fn on_accepted(&mut self, _idx: usize, _socket: &Arc<ClientSocket>) {}

    /// A connection was closed and is about to be removed.
    fn on_closed(&mut self, _idx: usize, _socket: &Arc<ClientSocket>, _reason: CloseReason) {}

    /// A connection has data to read.
    fn on_ready_read(&mut self, _idx: usize, _socket: &Arc<ClientSocket>) {}
}

type SocketFn = Box<dyn FnMut(usize, &Arc<ClientSocket>) + Send>;
type ClosedFn = Box<dyn FnMut(usize, &Arc<ClientSocket>, CloseReason) + Send>;

/// [`ListenerEvents`] built from closures.
#[derive(Default)]
pub struct ListenerCallbacks {
    accepted: Option<SocketFn>,
    closed: Option<ClosedFn>,
    ready_read: Option<SocketFn>,
}

impl ListenerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_accepted<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, &Arc<ClientSocket>) + Send + 'static,
    {
        self.accepted = Some(Box::new(f));
        self
    }

    pub fn on_closed<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, &Arc<ClientSocket>, CloseReason) + Send + 'static,
    {
        self.closed = Some(Box::new(f));
        self
    }

    pub fn on_ready_read<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, &Arc<ClientSocket>) + Send + 'static,
    {
        self.ready_read = Some(Box::new(f));
        self
    }
}

impl ListenerEvents for ListenerCallbacks {
    fn on_accepted(&mut self, idx: usize, socket: &Arc<ClientSocket>) {
        if let Some(f) = &mut self.accepted {
            f(idx, socket);
        }
    }

    fn on_closed(&mut self, idx: usize, socket: &Arc<ClientSocket>, reason: CloseReason) {
        if let Some(f) = &mut self.closed {
            f(idx, socket, reason);
        }
    }

    fn on_ready_read(&mut self, idx: usize, socket: &Arc<ClientSocket>) {
        if let Some(f) = &mut self.ready_read {
            f(idx, socket);
        }
    }
}

struct Listening {
    listener: StdListener,
    /// Entry 0 is the listen socket, entry `i + 1` is `sockets[i]`.
    poll_list: Vec<libc::pollfd>,
    sockets: Vec<Arc<ClientSocket>>,
}

/// IPv4 TCP listener multiplexing its clients with `poll(2)`.
///
/// Within one [`poll`](Self::poll) the callbacks run in this order: all
/// accepts, then all reads, then all closes.
///
/// # Examples
///
/// ```no_run
/// use std::net::Ipv4Addr;
/// use appfw::net::{ListenerCallbacks, TcpListener};
///
/// let callbacks = ListenerCallbacks::new().on_ready_read(|_, socket| {
///     let mut buf = [0u8; 1024];
///     if let Ok(n) = socket.read(&mut buf) {
///         let _ = socket.write_all(&buf[..n]);
///     }
/// });
///
/// let mut listener = TcpListener::new(callbacks);
/// listener.start_listening(Ipv4Addr::LOCALHOST, 7777, 16)?;
/// loop {
///     listener.poll(100)?;
/// }
/// # Ok::<(), appfw::NetError>(())
/// ```
pub struct TcpListener<H: ListenerEvents> {
    handler: H,
    state: Option<Listening>,
}

impl<H: ListenerEvents> TcpListener<H> {
    pub fn new(handler: H) -> Self {
        Self { handler, state: None }
    }

    #[inline]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    #[inline]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    #[inline]
    pub fn is_listening(&self) -> bool {
        self.state.is_some()
    }

    /// Address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.as_ref()?.listener.local_addr().ok()
    }

    /// Bind and start accepting connections.
    pub fn start_listening(&mut self, ip: Ipv4Addr, port: u16, queue_depth: i32) -> Result<(), NetError> {
        if self.is_listening() {
            return Err(NetError::AlreadyListening);
        }

        let listener =
            StdListener::bind(SocketAddrV4::new(ip, port)).map_err(|e| NetError::socket("bind", e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| NetError::socket("set_nonblocking", e))?;

        // std picks its own backlog; apply the requested one.
        // SAFETY: the descriptor is owned by `listener` and valid.
        if unsafe { libc::listen(listener.as_raw_fd(), queue_depth) } != 0 {
            return Err(NetError::last_os("listen"));
        }

        let poll_list = vec![libc::pollfd {
            fd: listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];

        debug!(%ip, port, queue_depth, "listening");
        self.state = Some(Listening {
            listener,
            poll_list,
            sockets: Vec::new(),
        });
        Ok(())
    }

    /// Close every client with [`CloseReason::Shutdown`] and stop
    /// listening. Does nothing if not listening.
    pub fn stop_listening(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        for (idx, socket) in state.sockets.iter().enumerate() {
            socket.close(CloseReason::Shutdown);
            socket.shutdown();
            let reason = socket.close_reason().unwrap_or(CloseReason::Shutdown);
            guarded(|| self.handler.on_closed(idx, socket, reason));
        }

        debug!("stopped listening");
    }

    /// Wait up to `timeout_ms` for activity and handle it.
    ///
    /// A failure of the listen socket stops the listener and is returned.
    pub fn poll(&mut self, timeout_ms: i32) -> Result<(), NetError> {
        let Some(state) = self.state.as_mut() else {
            return Err(NetError::NotListening);
        };

        let ready = match poll_fds(&mut state.poll_list, timeout_ms) {
            Ok(n) => n,
            Err(e) => {
                self.stop_listening();
                return Err(NetError::socket("poll", e));
            }
        };

        if ready > 0 {
            let revents = state.poll_list[0].revents;
            if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                self.stop_listening();
                return Err(NetError::ListenSocketFailed(revents));
            }

            // Sockets accepted below have no events yet.
            let polled = state.poll_list.len();

            if revents & libc::POLLIN != 0 {
                accept_all(state, &mut self.handler);
            }

            for i in 1..polled {
                let revents = state.poll_list[i].revents;
                let socket = &state.sockets[i - 1];

                if revents & libc::POLLHUP != 0 {
                    socket.close(CloseReason::ConnAborted);
                } else if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                    socket.close(CloseReason::Failure);
                } else if revents & libc::POLLIN != 0 && !socket.is_closing() {
                    guarded(|| self.handler.on_ready_read(i - 1, socket));
                }
            }
        }

        for idx in (0..state.sockets.len()).rev() {
            if !state.sockets[idx].is_closing() {
                continue;
            }

            let socket = state.sockets.remove(idx);
            state.poll_list.remove(idx + 1);
            socket.shutdown();

            let reason = socket.close_reason().unwrap_or(CloseReason::Failure);
            debug!(peer = %socket.peer_addr(), %reason, "connection closed");
            guarded(|| self.handler.on_closed(idx, &socket, reason));
        }

        Ok(())
    }

    /// Number of live clients.
    pub fn connected_clients(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.sockets.len())
    }

    pub fn socket(&self, idx: usize) -> Option<&Arc<ClientSocket>> {
        self.state.as_ref()?.sockets.get(idx)
    }

    /// Write `buf` to every client. Clients that fail are closed; the first
    /// error is returned after all clients were tried.
    pub fn send_to_all(&self, buf: &[u8]) -> Result<(), NetError> {
        let Some(state) = &self.state else {
            return Err(NetError::NotListening);
        };

        let mut first_err = None;
        for socket in state.sockets.iter().filter(|s| !s.is_closing()) {
            if let Err(e) = socket.write_all(buf) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<H: ListenerEvents> Drop for TcpListener<H> {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

fn accept_all<H: ListenerEvents>(state: &mut Listening, handler: &mut H) {
    loop {
        match state.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!(%peer, error = %e, "dropping connection");
                    continue;
                }

                let socket = Arc::new(ClientSocket::new(stream, peer));
                state.poll_list.push(libc::pollfd {
                    fd: socket.raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                });
                state.sockets.push(socket.clone());

                debug!(%peer, "connection accepted");
                let idx = state.sockets.len() - 1;
                guarded(|| handler.on_accepted(idx, &socket));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // The peer gave up before we got to it.
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset) => continue,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn guarded(f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        crate::afw_assert_rel!(false, "listener callback must not panic");
        std::process::abort();
    }
}
