//! External console host.

use std::collections::VecDeque;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use bytes::BytesMut;
use tracing::debug;

use super::proto::{self, ClientPacket};
use crate::core::{ConsoleHub, ConsoleReceiver, Message, MessageInfo, Severity, lock};
use crate::error::NetError;
use crate::net::{ClientSocket, CloseReason, FrameParser, ListenerEvents, TcpListener};

/// Queued prints above which producers wait for the worker.
pub const MAX_QUEUE_SIZE: usize = 128;

const POLL_TIME_MS: i32 = 1000 / 60;
const MAX_READ_SIZE: usize = 65535;
const TAG: &str = "extcon";

/// Where the host listens.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtconConfig {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Default for ExtconConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            port: 5666,
        }
    }
}

/// Connection state as seen by the worker.
#[derive(Debug, Clone, Copy, Default)]
struct Connection {
    connected: bool,
    /// Bumped on every accepted client.
    serial: u64,
}

#[derive(Default)]
struct PrintQueue {
    messages: VecDeque<Message>,
    /// A client is attached on the worker side.
    open: bool,
}

/// State shared with the worker. Lock order: `state`, `prints`,
/// `available`, `commands`.
#[derive(Default)]
struct Shared {
    running: AtomicBool,
    worker: Mutex<Option<ThreadId>>,
    hub: Mutex<Weak<ConsoleHub>>,

    state: Mutex<Connection>,

    prints: Mutex<PrintQueue>,
    drained: Condvar,

    /// Item names waiting to be sent as CMD_LIST.
    available: Mutex<Vec<String>>,

    /// Command lines received from the client.
    commands: Mutex<VecDeque<String>>,

    client_focus: AtomicBool,
    host_focus: AtomicBool,
}

impl Shared {
    fn log(&self, severity: Severity, text: String) {
        let hub = lock(&self.hub).upgrade();
        if let Some(hub) = hub {
            hub.print(MessageInfo::new(severity).tag(TAG), text);
        }
    }

    fn is_worker(&self) -> bool {
        *lock(&self.worker) == Some(thread::current().id())
    }
}

/// Console receiver that serves one remote controller over TCP.
///
/// A worker thread owns the listener. The main thread calls
/// [`tick`](Self::tick) to pick up connection changes and to queue received
/// commands on the hub.
///
/// While connected, printing threads are held back once
/// [`MAX_QUEUE_SIZE`] messages are waiting to be sent, until the worker has
/// sent them all.
pub struct ExtconHost {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Connection state as seen by the main thread.
    connected: AtomicBool,
    /// Serial of the last connection `tick` has set up.
    seen_serial: AtomicU64,
}

impl ExtconHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::default(),
            thread: Mutex::new(None),
            connected: AtomicBool::new(false),
            seen_serial: AtomicU64::new(0),
        })
    }

    /// Start listening. A running worker is stopped first. Returns the bound
    /// address.
    pub fn enable(&self, config: &ExtconConfig) -> Result<SocketAddr, NetError> {
        self.disable();

        let events = WorkerEvents {
            shared: self.shared.clone(),
            client: None,
            parser: proto::parser(),
            read_buf: vec![0; MAX_READ_SIZE],
            send_buf: BytesMut::new(),
        };

        let mut listener = TcpListener::new(events);
        listener.start_listening(config.address, config.port, 1)?;
        let addr = listener.local_addr().ok_or(NetError::NotListening)?;

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("appfw-extcon".into())
            .spawn(move || run(shared, listener))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                NetError::socket("spawn", e)
            })?;

        *lock(&self.shared.worker) = Some(handle.thread().id());
        *lock(&self.thread) = Some(handle);

        debug!(%addr, "extcon enabled");
        Ok(addr)
    }

    /// Disconnect the client and stop listening.
    pub fn disable(&self) {
        let handle = lock(&self.thread).take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.running.store(false, Ordering::Release);
        let _ = handle.join();

        *lock(&self.shared.worker) = None;
        lock(&self.shared.state).connected = false;
        self.connected.store(false, Ordering::Release);
        debug!("extcon disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether a client is connected, as of the last [`tick`](Self::tick).
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Main thread update.
    pub fn tick(&self) {
        let state = *lock(&self.shared.state);
        self.connected.store(state.connected, Ordering::Release);
        let seen = self.seen_serial.swap(state.serial, Ordering::AcqRel);

        let hub = lock(&self.shared.hub).upgrade();
        let Some(hub) = hub else {
            return;
        };

        // A reconnect between two ticks still counts as a new client.
        if state.connected && state.serial != seen {
            self.on_client_connected(&hub);
        }

        let commands = mem::take(&mut *lock(&self.shared.commands));
        for command in commands {
            hub.command(&command);
        }
    }

    /// Ask the remote controller to take focus.
    pub fn request_client_focus(&self) {
        self.shared.client_focus.store(true, Ordering::Release);
    }

    /// Whether the remote controller asked the host to take focus. Resets
    /// the request.
    pub fn take_host_focus_request(&self) -> bool {
        self.shared.host_focus.swap(false, Ordering::AcqRel)
    }

    fn on_client_connected(&self, hub: &ConsoleHub) {
        hub.replay_ring_buffer_to(self);
        *lock(&self.shared.available) = hub.registry().names();
    }
}

impl ConsoleReceiver for ExtconHost {
    fn on_add(&self, hub: &Arc<ConsoleHub>) {
        let mut current = lock(&self.shared.hub);
        crate::afw_assert!(current.upgrade().is_none(), "extcon host is already added to a hub");
        *current = Arc::downgrade(hub);
    }

    fn on_remove(&self, _hub: &Arc<ConsoleHub>) {
        *lock(&self.shared.hub) = Weak::new();
    }

    fn print(&self, msg: &Message) {
        if !self.is_connected() {
            return;
        }

        let mut prints = lock(&self.shared.prints);
        if prints.open {
            prints.messages.push_back(msg.clone());
        }
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn throttle(&self) {
        if !self.is_connected() || self.shared.is_worker() {
            return;
        }

        let prints = lock(&self.shared.prints);
        if prints.open && prints.messages.len() >= MAX_QUEUE_SIZE {
            let _prints = self
                .shared
                .drained
                .wait_while(prints, |q| q.open && !q.messages.is_empty())
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for ExtconHost {
    fn drop(&mut self) {
        self.disable();
    }
}

fn run(shared: Arc<Shared>, mut listener: TcpListener<WorkerEvents>) {
    while shared.running.load(Ordering::Acquire) {
        if let Err(e) = listener.poll(POLL_TIME_MS) {
            shared.log(Severity::Error, format!("Server error: {e}"));
            break;
        }
        listener.handler_mut().update_client();
    }

    listener.stop_listening();
    shared.running.store(false, Ordering::Release);
}

struct WorkerEvents {
    shared: Arc<Shared>,
    client: Option<Arc<ClientSocket>>,
    parser: FrameParser,
    read_buf: Vec<u8>,
    send_buf: BytesMut,
}

impl WorkerEvents {
    fn update_client(&mut self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        if client.is_closing() {
            return;
        }

        if let Err(e) = self.send_pending(&client) {
            self.shared.log(Severity::Error, format!("Write failed: {e}"));
        }
    }

    fn send_pending(&mut self, client: &ClientSocket) -> Result<(), NetError> {
        let names = mem::take(&mut *lock(&self.shared.available));
        if !names.is_empty() {
            proto::encode_cmd_list(&mut self.send_buf, &names);
            self.flush(client)?;
        }

        let batch = mem::take(&mut lock(&self.shared.prints).messages);
        self.shared.drained.notify_all();
        for msg in &batch {
            proto::encode_print(&mut self.send_buf, &msg.info, &msg.text);
            self.flush(client)?;
        }

        if self.shared.client_focus.swap(false, Ordering::AcqRel) {
            proto::encode_request_focus(&mut self.send_buf);
            self.flush(client)?;
        }

        Ok(())
    }

    fn flush(&mut self, client: &ClientSocket) -> Result<(), NetError> {
        let result = client.write_all(&self.send_buf);
        self.send_buf.clear();
        result
    }

    fn on_payload(shared: &Shared, payload: &[u8]) {
        match proto::decode_client(payload) {
            Ok(ClientPacket::Command(command)) => {
                shared.log(Severity::Input, format!("> {command}"));
                lock(&shared.commands).push_back(command.to_owned());
            }
            Ok(ClientPacket::RequestFocus) => shared.host_focus.store(true, Ordering::Release),
            Err(e) => shared.log(Severity::Error, format!("Invalid payload: {e}")),
        }
    }
}

impl ListenerEvents for WorkerEvents {
    fn on_accepted(&mut self, _idx: usize, socket: &Arc<ClientSocket>) {
        if self.client.is_some() {
            // One client at a time.
            socket.close(CloseReason::User);
            return;
        }

        self.client = Some(socket.clone());
        self.parser.reset();

        let mut state = lock(&self.shared.state);
        state.connected = true;
        state.serial += 1;
        self.shared.client_focus.store(false, Ordering::Release);
        self.shared.host_focus.store(false, Ordering::Release);

        let mut prints = lock(&self.shared.prints);
        prints.messages.clear();
        prints.open = true;
        drop(prints);
        drop(state);

        debug!(peer = %socket.peer_addr(), "extcon client connected");
    }

    fn on_closed(&mut self, _idx: usize, socket: &Arc<ClientSocket>, reason: CloseReason) {
        if !self.client.as_ref().is_some_and(|c| Arc::ptr_eq(c, socket)) {
            return;
        }
        self.client = None;

        let mut state = lock(&self.shared.state);
        state.connected = false;
        let mut prints = lock(&self.shared.prints);
        prints.messages.clear();
        prints.open = false;
        drop(prints);
        drop(state);
        self.shared.drained.notify_all();

        self.shared.log(
            Severity::Notice,
            format!("Client disconnected {}: {reason}", socket.peer_addr()),
        );
    }

    fn on_ready_read(&mut self, _idx: usize, socket: &Arc<ClientSocket>) {
        let n = match socket.read(&mut self.read_buf) {
            Ok(n) => n,
            Err(e) => {
                self.shared.log(Severity::Error, format!("Read failed: {e}"));
                return;
            }
        };

        let shared = &self.shared;
        let data = &self.read_buf[..n];
        if let Err(e) = self.parser.parse_data(data, |payload| Self::on_payload(shared, payload)) {
            socket.close(CloseReason::User);
            shared.log(Severity::Error, format!("Received invalid data: {e}"));
        }
    }
}
