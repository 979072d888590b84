//! The console hub.
//!
//! [`ConsoleHub`] owns the item registry, the command queue and the message
//! history, and fans every printed message out to the registered
//! [`ConsoleReceiver`]s.
//!
//! Receivers that are not thread-safe are only ever called on the main
//! thread. Messages printed from other threads while such a receiver is
//! registered are deferred and delivered by
//! [`process_deferred_messages`](ConsoleHub::process_deferred_messages).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};

use super::concommand::{CommandArgs, ConCommand};
use super::message::{Message, MessageInfo, Severity};
use super::queue::CommandQueue;
use super::registry::{self, ConItem, ItemFilter, Registry};
use super::ring::RingBuffer;
use super::tokenizer::{TokenizedLine, tokenize};
use super::lock;

/// Maximum number of messages waiting for the main thread.
pub const MAX_DEFERRED_MESSAGES: usize = 4096;

/// Sink for console messages.
///
/// `print` is called with the hub's output lock held and must return
/// promptly. It must not print to the hub itself.
pub trait ConsoleReceiver: Send + Sync {
    /// Called when the receiver is added to a hub.
    fn on_add(&self, _hub: &Arc<ConsoleHub>) {}

    /// Called after the receiver was removed from a hub.
    fn on_remove(&self, _hub: &Arc<ConsoleHub>) {}

    /// Handle one message.
    fn print(&self, msg: &Message);

    /// Whether `print` may be called from any thread.
    fn is_thread_safe(&self) -> bool;

    /// Called on the printing thread before the output lock is taken. A
    /// receiver may block here to slow producers down.
    fn throttle(&self) {}
}

type Receivers = Arc<Vec<Arc<dyn ConsoleReceiver>>>;

struct Output {
    receivers: Receivers,
    all_thread_safe: bool,
    main_thread: ThreadId,
    deferred: VecDeque<Message>,
    dropped: usize,
}

impl Output {
    fn update_thread_safety(&mut self) {
        self.all_thread_safe = self.receivers.iter().all(|r| r.is_thread_safe());
    }

    fn deliver(&self, msg: &Message) {
        for receiver in self.receivers.iter() {
            receiver.print(msg);
        }
    }

    fn flush_deferred(&mut self) {
        if self.dropped > 0 {
            let warning = Message::new(
                MessageInfo::new(Severity::Warn).tag(env!("CARGO_PKG_NAME")),
                format!("{} deferred messages were dropped", self.dropped),
            );
            self.dropped = 0;
            self.deliver(&warning);
        }

        while let Some(msg) = self.deferred.pop_front() {
            self.deliver(&msg);
        }
    }
}

/// Central console state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use appfw::core::{ConVar, ConsoleHub};
///
/// let hub = ConsoleHub::new();
/// let run_app = Arc::new(ConVar::new("run_app", true, "Keep the main loop running"));
/// hub.registry().register_var(&run_app);
///
/// hub.command("run_app 0");
/// hub.drain_commands();
/// assert!(!run_app.get());
/// ```
pub struct ConsoleHub {
    registry: Arc<Registry>,
    queue: CommandQueue,
    ring: RingBuffer,
    output: Mutex<Output>,
    builtins: Mutex<Vec<Arc<ConCommand>>>,
    adopts_pending: bool,
}

impl ConsoleHub {
    /// Create a standalone hub. The calling thread becomes the main thread.
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// Create the hub that owns items declared with `ConVar::declare` and
    /// `ConCommand::declare`. Only one such hub may live at a time.
    pub(crate) fn with_pending() -> Arc<Self> {
        Self::build(true)
    }

    fn build(adopts_pending: bool) -> Arc<Self> {
        let hub = Arc::new_cyclic(|this: &Weak<ConsoleHub>| {
            let queue = CommandQueue::new();
            let this = this.clone();
            queue.set_dispatcher(move |line| {
                if let Some(hub) = this.upgrade() {
                    hub.dispatch(line);
                }
            });

            Self {
                registry: Registry::new(),
                queue,
                ring: RingBuffer::new(),
                output: Mutex::new(Output {
                    receivers: Arc::new(Vec::new()),
                    all_thread_safe: true,
                    main_thread: thread::current().id(),
                    deferred: VecDeque::new(),
                    dropped: 0,
                }),
                builtins: Mutex::new(Vec::new()),
                adopts_pending,
            }
        });

        hub.register_builtins();
        if adopts_pending {
            registry::adopt_pending(&hub.registry);
        }
        hub
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[inline]
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    #[inline]
    pub fn ring_buffer(&self) -> &RingBuffer {
        &self.ring
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Print a message to every receiver.
    pub fn print(&self, info: MessageInfo, text: impl Into<String>) {
        self.print_message(Message::new(info, text));
    }

    pub fn print_message(&self, msg: Message) {
        let receivers = lock(&self.output).receivers.clone();
        for receiver in receivers.iter() {
            receiver.throttle();
        }

        let mut out = lock(&self.output);
        self.ring.push(msg.clone());

        if out.all_thread_safe || out.main_thread == thread::current().id() {
            out.flush_deferred();
            out.deliver(&msg);
        } else {
            if out.deferred.len() >= MAX_DEFERRED_MESSAGES {
                out.deferred.pop_front();
                out.dropped += 1;
            }
            out.deferred.push_back(msg);
        }
    }

    /// Deliver messages printed from other threads. Must be called on the
    /// main thread; the caller becomes the main thread.
    pub fn process_deferred_messages(&self) {
        let mut out = lock(&self.output);
        out.main_thread = thread::current().id();
        out.flush_deferred();
    }

    /// Make the calling thread the main thread.
    pub fn set_main_thread(&self) {
        lock(&self.output).main_thread = thread::current().id();
    }

    pub fn is_main_thread(&self) -> bool {
        lock(&self.output).main_thread == thread::current().id()
    }

    /// Number of messages waiting for the main thread.
    pub fn deferred_count(&self) -> usize {
        lock(&self.output).deferred.len()
    }

    // -----------------------------------------------------------------------
    // Receivers
    // -----------------------------------------------------------------------

    pub fn add_receiver(self: &Arc<Self>, receiver: Arc<dyn ConsoleReceiver>) {
        {
            let out = lock(&self.output);
            let duplicate = out.receivers.iter().any(|r| same_receiver(r, &receiver));
            drop(out);
            crate::afw_assert_rel!(!duplicate, "receiver has already been added");
            if duplicate {
                return;
            }
        }

        receiver.on_add(self);

        let mut out = lock(&self.output);
        Arc::make_mut(&mut out.receivers).push(receiver);
        out.update_thread_safety();
    }

    /// Remove a receiver. Returns `false` if it was not added.
    pub fn remove_receiver(self: &Arc<Self>, receiver: &Arc<dyn ConsoleReceiver>) -> bool {
        let removed = {
            let mut out = lock(&self.output);
            let pos = out.receivers.iter().position(|r| same_receiver(r, receiver));
            let removed = pos.map(|i| Arc::make_mut(&mut out.receivers).remove(i));
            out.update_thread_safety();
            removed
        };

        match removed {
            Some(receiver) => {
                receiver.on_remove(self);
                true
            }
            None => false,
        }
    }

    /// Remove every receiver, most recently added first.
    pub fn remove_all_receivers(self: &Arc<Self>) {
        loop {
            let last = lock(&self.output).receivers.last().cloned();
            match last {
                Some(receiver) => {
                    self.remove_receiver(&receiver);
                }
                None => break,
            }
        }
    }

    pub fn receiver_count(&self) -> usize {
        lock(&self.output).receivers.len()
    }

    /// Send the message history to one receiver, oldest first.
    pub fn replay_ring_buffer_to(&self, receiver: &dyn ConsoleReceiver) {
        let _out = lock(&self.output);
        self.ring.for_each(|msg| receiver.print(msg));
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Queue `text` for execution on the main thread.
    pub fn command(&self, text: &str) {
        self.queue.append_parsed(text);
    }

    /// Queue one invocation.
    pub fn command_line(&self, line: TokenizedLine) {
        self.queue.append(line);
    }

    /// Execute `text` right away, bypassing the queue.
    pub fn command_now(&self, text: &str) {
        for line in tokenize(text) {
            self.dispatch(&line);
        }
    }

    /// Dispatch one queued invocation.
    pub fn step_once(&self) -> bool {
        self.queue.step_once()
    }

    /// Dispatch every queued invocation.
    pub fn drain_commands(&self) -> usize {
        self.queue.drain()
    }

    /// Execute one invocation.
    pub fn dispatch(&self, line: &TokenizedLine) {
        let Some(name) = line.name() else {
            return;
        };

        match self.registry.find(name, ItemFilter::All) {
            None => crate::con_error!(self, "Unknown command: {name}"),
            Some(ConItem::Var(var)) => match line.get(1) {
                None => {
                    crate::con_notice!(self, "{}", describe_var(&ConItem::Var(var.clone())));
                    crate::con_info!(self, "{}", var.description());
                }
                Some(value) => {
                    let result = var.set_from_string(value);
                    if !result.is_success() {
                        crate::con_error!(self, "Set cvar {} failed: {}.", var.name(), result.reason());
                    }
                }
            },
            Some(ConItem::Cmd(cmd)) => cmd.execute(&CommandArgs::new(line), self),
        }
    }

    fn print_item_info(&self, item: &ConItem) {
        crate::con_notice!(self, "{}", describe_var(item));
        crate::con_info!(self, "{}", item.description());
        crate::con_info!(self, "");
    }

    fn register_builtins(&self) {
        let list = ConCommand::new(
            "list",
            "Lists all available console items.\nOptional: add 'cvar' or 'cmd' to filter.",
            |args, hub| {
                let filter = match args.get(0) {
                    None | Some("all") => ItemFilter::All,
                    Some("cvar") => ItemFilter::Vars,
                    Some("cmd") => ItemFilter::Cmds,
                    Some(_) => {
                        crate::con_info!(hub, "Usage: list [cvar|cmd|all]");
                        return;
                    }
                };

                let items = hub.registry.items(filter);
                for item in &items {
                    hub.print_item_info(item);
                }
                let count = items.len();
                crate::con_info!(hub, "Total: {} item{}", count, if count == 1 { "" } else { "s" });
            },
        );

        let help = ConCommand::new("help", "Shows info about a command.", |args, hub| {
            let Some(name) = args.get(0) else {
                crate::con_info!(hub, "Usage: help <name>");
                return;
            };

            match hub.registry.find(name, ItemFilter::All) {
                Some(item) => hub.print_item_info(&item),
                None => crate::con_error!(hub, "Error: item \"{name}\" not found"),
            }
        });

        let lock_cvar = ConCommand::new("appfw_debug_lock_cvar", "Locks/unlocks a convar.", |args, hub| {
            let Some(name) = args.get(0) else {
                crate::con_info!(hub, "Usage: appfw_debug_lock_cvar <cvar name>");
                return;
            };

            let Some(var) = hub.registry.find_var(name) else {
                crate::con_error!(hub, "Error: cvar \"{name}\" not found");
                return;
            };

            var.set_locked(!var.is_locked());
            let state = if var.is_locked() { "locked" } else { "unlocked" };
            crate::con_info!(hub, "Cvar \"{name}\" is now {state}");
        });

        let mut builtins = lock(&self.builtins);
        for cmd in [list, help, lock_cvar] {
            self.registry.register_cmd(&cmd);
            builtins.push(cmd);
        }
    }
}

impl Drop for ConsoleHub {
    fn drop(&mut self) {
        // Built-ins go first so they are not handed to the next hub.
        let builtins = std::mem::take(self.builtins.get_mut().unwrap_or_else(|e| e.into_inner()));
        drop(builtins);

        if self.adopts_pending {
            registry::release_to_pending(&self.registry);
        }
    }
}

fn same_receiver(a: &Arc<dyn ConsoleReceiver>, b: &Arc<dyn ConsoleReceiver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// `name = "value" (type)`, with ` (locked)` for locked variables. Commands
/// show their name only.
fn describe_var(item: &ConItem) -> String {
    match item {
        ConItem::Var(var) => {
            let mut s = format!("{} = \"{}\" ({})", var.name(), var.get_string(), var.type_tag());
            if var.is_locked() {
                s.push_str(" (locked)");
            }
            s
        }
        ConItem::Cmd(cmd) => cmd.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::ConVar;

    struct Recorder {
        thread_safe: bool,
        seen: Mutex<Vec<String>>,
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    impl Recorder {
        fn new(thread_safe: bool) -> Arc<Self> {
            Arc::new(Self {
                thread_safe,
                seen: Mutex::new(Vec::new()),
                added: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ConsoleReceiver for Recorder {
        fn on_add(&self, _hub: &Arc<ConsoleHub>) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        fn on_remove(&self, _hub: &Arc<ConsoleHub>) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }

        fn print(&self, msg: &Message) {
            self.seen.lock().unwrap().push(msg.text.clone());
        }

        fn is_thread_safe(&self) -> bool {
            self.thread_safe
        }
    }

    fn info(hub: &ConsoleHub, text: &str) {
        hub.print(MessageInfo::new(Severity::Info), text);
    }

    fn texts(hub: &ConsoleHub) -> Vec<String> {
        hub.ring_buffer().to_vec().into_iter().map(|m| m.text).collect()
    }

    #[test]
    fn test_var_dispatch() {
        let hub = ConsoleHub::new();
        let run_app = Arc::new(ConVar::new("run_app", true, "Keep running"));
        hub.registry().register_var(&run_app);

        hub.dispatch(&TokenizedLine::new(["run_app", "0"]));
        assert!(!run_app.get());

        hub.ring_buffer().clear();
        hub.dispatch(&TokenizedLine::new(["run_app"]));
        assert!(!run_app.get());
        assert_eq!(texts(&hub), ["run_app = \"0\" (bool)", "Keep running"]);

        let severities: Vec<_> = hub.ring_buffer().to_vec().iter().map(|m| m.info.severity).collect();
        assert_eq!(severities, [Severity::Notice, Severity::Info]);
    }

    #[test]
    fn test_var_extra_tokens_ignored() {
        let hub = ConsoleHub::new();
        let fps = Arc::new(ConVar::new("fps_max", 60i32, ""));
        hub.registry().register_var(&fps);

        hub.command_now("fps_max 144 extra tokens");
        assert_eq!(fps.get(), 144);
    }

    #[test]
    fn test_dispatch_errors() {
        let hub = ConsoleHub::new();
        let fps = Arc::new(ConVar::new("fps_max", 60i32, "").validator(|_, new| *new > 0));
        hub.registry().register_var(&fps);

        hub.command_now("nope; fps_max abc; fps_max -5");
        fps.set_locked(true);
        hub.command_now("fps_max 30");

        assert_eq!(
            texts(&hub),
            [
                "Unknown command: nope",
                "Set cvar fps_max failed: invalid string value.",
                "Set cvar fps_max failed: value rejected by callback.",
                "Set cvar fps_max failed: cvar is locked.",
            ]
        );
        assert_eq!(fps.get(), 60);
    }

    #[test]
    fn test_command_queue_dispatch() {
        let hub = ConsoleHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let cmd = ConCommand::new("bump", "", move |args, _| {
            c.fetch_add(args.parse_or(0, 1), Ordering::SeqCst);
        });
        hub.registry().register_cmd(&cmd);

        hub.command("bump; bump 5");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(hub.step_once());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.drain_commands(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_deferred_ordering() {
        let hub = ConsoleHub::new();
        let a = Recorder::new(true);
        let b = Recorder::new(false);
        hub.add_receiver(a.clone());
        hub.add_receiver(b.clone());

        info(&hub, "m1");

        let worker = hub.clone();
        thread::spawn(move || info(&worker, "m2")).join().unwrap();
        assert_eq!(b.seen(), ["m1"]);
        assert_eq!(hub.deferred_count(), 1);

        info(&hub, "m3");
        hub.process_deferred_messages();

        assert_eq!(b.seen(), ["m1", "m2", "m3"]);
        assert_eq!(a.seen(), ["m1", "m2", "m3"]);
        assert_eq!(texts(&hub), ["m1", "m2", "m3"]);
    }

    #[test]
    fn test_per_thread_order() {
        let hub = ConsoleHub::new();
        let b = Recorder::new(false);
        hub.add_receiver(b.clone());

        let workers: Vec<_> = (0..3)
            .map(|t| {
                let hub = hub.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        info(&hub, &format!("{t}:{i}"));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        hub.process_deferred_messages();

        let seen = b.seen();
        assert_eq!(seen.len(), 150);
        for t in 0..3 {
            let mine: Vec<_> = seen.iter().filter(|s| s.starts_with(&format!("{t}:"))).cloned().collect();
            let expected: Vec<_> = (0..50).map(|i| format!("{t}:{i}")).collect();
            assert_eq!(mine, expected);
        }
    }

    #[test]
    fn test_thread_safe_receivers_skip_deferral() {
        let hub = ConsoleHub::new();
        let a = Recorder::new(true);
        hub.add_receiver(a.clone());

        let worker = hub.clone();
        thread::spawn(move || info(&worker, "direct")).join().unwrap();
        assert_eq!(a.seen(), ["direct"]);
        assert_eq!(hub.deferred_count(), 0);
    }

    #[test]
    fn test_deferred_overflow_warns() {
        let hub = ConsoleHub::new();
        let b = Recorder::new(false);
        hub.add_receiver(b.clone());

        let worker = hub.clone();
        thread::spawn(move || {
            for i in 0..MAX_DEFERRED_MESSAGES + 3 {
                info(&worker, &i.to_string());
            }
        })
        .join()
        .unwrap();

        assert_eq!(hub.deferred_count(), MAX_DEFERRED_MESSAGES);
        hub.process_deferred_messages();

        let seen = b.seen();
        assert_eq!(seen[0], "3 deferred messages were dropped");
        assert_eq!(seen[1], "3");
        assert_eq!(seen.len(), MAX_DEFERRED_MESSAGES + 1);
    }

    #[test]
    fn test_receiver_lifecycle() {
        let hub = ConsoleHub::new();
        let a = Recorder::new(true);
        let b = Recorder::new(false);
        let a_dyn: Arc<dyn ConsoleReceiver> = a.clone();

        hub.add_receiver(a_dyn.clone());
        hub.add_receiver(b.clone());
        assert_eq!(hub.receiver_count(), 2);
        assert_eq!(a.added.load(Ordering::SeqCst), 1);

        assert!(hub.remove_receiver(&a_dyn));
        assert!(!hub.remove_receiver(&a_dyn));
        assert_eq!(a.removed.load(Ordering::SeqCst), 1);

        hub.remove_all_receivers();
        assert_eq!(hub.receiver_count(), 0);
        assert_eq!(b.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replay_ring_buffer() {
        let hub = ConsoleHub::new();
        for i in 0..70 {
            info(&hub, &i.to_string());
        }

        let late = Recorder::new(true);
        hub.replay_ring_buffer_to(late.as_ref());
        let seen = late.seen();
        assert_eq!(seen.len(), 64);
        assert_eq!(seen.first().map(String::as_str), Some("6"));
        assert_eq!(seen.last().map(String::as_str), Some("69"));
    }

    #[test]
    fn test_builtin_list() {
        let hub = ConsoleHub::new();
        let a = Arc::new(ConVar::new("a_var", 1i32, "first"));
        hub.registry().register_var(&a);

        hub.command_now("list cvar");
        assert_eq!(texts(&hub), ["a_var = \"1\" (int)", "first", "", "Total: 1 item"]);

        hub.ring_buffer().clear();
        hub.command_now("list");
        let out = texts(&hub);
        assert_eq!(out.first().map(String::as_str), Some("a_var = \"1\" (int)"));
        assert_eq!(out.last().map(String::as_str), Some("Total: 4 items"));

        hub.ring_buffer().clear();
        hub.command_now("list bogus");
        assert_eq!(texts(&hub), ["Usage: list [cvar|cmd|all]"]);
    }

    #[test]
    fn test_builtin_help_and_lock() {
        let hub = ConsoleHub::new();
        let speed = Arc::new(ConVar::new("speed", 1.5f32, "Movement speed"));
        hub.registry().register_var(&speed);

        hub.command_now("appfw_debug_lock_cvar speed");
        assert!(speed.is_locked());
        hub.command_now("help speed; speed 3");
        hub.command_now("appfw_debug_lock_cvar speed; appfw_debug_lock_cvar missing");

        assert_eq!(
            texts(&hub),
            [
                "Cvar \"speed\" is now locked",
                "speed = \"1.5\" (float) (locked)",
                "Movement speed",
                "",
                "Set cvar speed failed: cvar is locked.",
                "Cvar \"speed\" is now unlocked",
                "Error: cvar \"missing\" not found",
            ]
        );
        assert!(!speed.is_locked());
    }
}
