//! Framework lifetime.
//!
//! [`initialize`] and [`shutdown`] are reference counted: the first
//! `initialize` creates the process-wide [`ConsoleHub`], moves every item
//! declared so far into its registry and attaches a [`StdConsole`]. The
//! last `shutdown` tears it down again and returns the declared items to
//! the pending set.
//!
//! ```no_run
//! use appfw::{InitOptions, TermInputMethod};
//!
//! let _appfw = appfw::init(InitOptions::new().args(std::env::args()).input_method(TermInputMethod::Enable))?;
//! appfw::con_notice!(appfw::console(), "ready");
//!
//! loop {
//!     appfw::main_loop_tick();
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! # Ok::<(), appfw::CommandLineError>(())
//! ```

use std::sync::{Arc, Mutex, RwLock};

use crate::command_line::CommandLine;
use crate::core::{ConsoleHub, lock, read, write};
use crate::error::CommandLineError;
use crate::terminal::{StdConsole, TermInputMethod, TerminalConfig};

/// Options for [`initialize`]. Only used by the first call.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InitOptions {
    args: Option<Vec<String>>,
    input_method: TermInputMethod,
    terminal: TerminalConfig,
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program arguments to parse, starting with the program name.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn input_method(mut self, method: TermInputMethod) -> Self {
        self.input_method = method;
        self
    }

    pub fn terminal(mut self, config: TerminalConfig) -> Self {
        self.terminal = config;
        self
    }
}

#[derive(Default)]
struct Library {
    init_count: u32,
    hub: Option<Arc<ConsoleHub>>,
    terminal: Option<Arc<StdConsole>>,
    command_line: Option<CommandLine>,
}

static LIB: Mutex<Library> = Mutex::new(Library {
    init_count: 0,
    hub: None,
    terminal: None,
    command_line: None,
});

// Read by the assertion hook and the log layer, which may run while `LIB`
// is held.
static CONSOLE: RwLock<Option<Arc<ConsoleHub>>> = RwLock::new(None);

pub fn is_initialized() -> bool {
    lock(&LIB).init_count > 0
}

/// Initialize the framework or add a reference to it.
///
/// Fails without initializing if the command line can not be parsed.
pub fn initialize(options: &InitOptions) -> Result<(), CommandLineError> {
    let mut lib = lock(&LIB);

    if lib.init_count == 0 {
        let command_line = options.args.as_ref().map(CommandLine::parse).transpose()?;

        let hub = ConsoleHub::with_pending();
        *write(&CONSOLE) = Some(hub.clone());

        let terminal = Arc::new(StdConsole::new(options.input_method, options.terminal.clone()));
        hub.add_receiver(terminal.clone());

        if let Some(command_line) = &command_line {
            crate::con_info!(hub, "Command line: {command_line}");
        }

        lib.hub = Some(hub);
        lib.terminal = Some(terminal);
        lib.command_line = command_line;
    }

    lib.init_count += 1;
    Ok(())
}

/// Drop a reference. The last one shuts the framework down. Calling it more
/// often than [`initialize`] is an assertion failure.
pub fn shutdown() {
    let mut lib = lock(&LIB);

    if lib.init_count == 0 {
        drop(lib);
        crate::afw_assert_rel!(false, "shutdown called more times than initialize");
        return;
    }

    lib.init_count -= 1;
    if lib.init_count > 0 {
        return;
    }

    let hub = lib.hub.take();
    let terminal = lib.terminal.take();
    lib.command_line = None;
    drop(lib);

    *write(&CONSOLE) = None;
    if let Some(hub) = hub {
        hub.remove_all_receivers();
        drop(terminal);
        drop(hub);
    }
}

/// Keeps the framework initialized while alive.
#[must_use = "the framework shuts down when the guard is dropped"]
#[derive(Debug)]
pub struct InitGuard(());

impl Drop for InitGuard {
    fn drop(&mut self) {
        shutdown();
    }
}

/// [`initialize`] and return a guard that calls [`shutdown`] on drop.
pub fn init(options: InitOptions) -> Result<InitGuard, CommandLineError> {
    initialize(&options)?;
    Ok(InitGuard(()))
}

/// The framework's hub, if initialized.
pub fn try_console() -> Option<Arc<ConsoleHub>> {
    read(&CONSOLE).clone()
}

/// The framework's hub.
///
/// # Panics
///
/// Panics if the framework is not initialized.
pub fn console() -> Arc<ConsoleHub> {
    match try_console() {
        Some(hub) => hub,
        None => panic!("appfw is not initialized"),
    }
}

/// The terminal receiver, if initialized.
pub fn terminal() -> Option<Arc<StdConsole>> {
    lock(&LIB).terminal.clone()
}

/// The command line given to the first [`initialize`], if any.
pub fn command_line() -> Option<CommandLine> {
    lock(&LIB).command_line.clone()
}

/// Main thread update: reads terminal input, runs one queued command and
/// delivers messages printed from other threads.
pub fn main_loop_tick() {
    let (hub, terminal) = {
        let lib = lock(&LIB);
        (lib.hub.clone(), lib.terminal.clone())
    };

    let Some(hub) = hub else {
        crate::afw_assert!(false, "main_loop_tick called before initialize");
        return;
    };

    if let Some(terminal) = terminal {
        terminal.tick();
    }
    hub.step_once();
    hub.process_deferred_messages();
}
