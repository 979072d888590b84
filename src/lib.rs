//! Console core for long-running programs.
//!
//! appfw provides:
//!
//! - **ConVar**: typed console variables with a lock flag and a validator
//! - **ConCommand**: named commands with handlers
//! - **ConsoleHub**: registry, command queue, message history and fan-out
//!   to receivers, with thread-origin ordering
//! - **StdConsole**: stdin/stdout receiver
//! - **ExtconHost**: remote console over TCP (unix)
//! - **ConsoleLayer**: `tracing` events printed to the console
//!
//! # Features
//!
//! - `bevy`: [`AppFwPlugin`] driving the main loop tick, plus a log layer hook
//! - `serde`: `Serialize`/`Deserialize` for configs and message types
//! - `full`: all of the above
//!
//! # Quick Start
//!
//! ```no_run
//! use appfw::prelude::*;
//!
//! fn main() -> Result<(), appfw::CommandLineError> {
//!     let run_app = ConVar::declare("run_app", true, "Keep the main loop running");
//!     let _quit = {
//!         let run_app = run_app.clone();
//!         ConCommand::declare("quit", "Quit the app", move |_, _| {
//!             let _ = run_app.set(false);
//!         })
//!     };
//!
//!     let _appfw = appfw::init(InitOptions::new().args(std::env::args()))?;
//!     con_notice!(appfw::console(), "Type 'quit' to exit");
//!
//!     while run_app.get() {
//!         appfw::main_loop_tick();
//!         std::thread::sleep(std::time::Duration::from_millis(16));
//!     }
//!     Ok(())
//! }
//! ```

#[macro_use]
mod macros;

pub mod command_line;
pub mod core;
pub mod dbg;
pub mod error;
pub mod init;
pub mod logging;
pub mod terminal;

#[cfg(unix)]
pub mod extcon;
#[cfg(unix)]
pub mod net;

#[cfg(feature = "bevy")]
pub mod plugin;

pub use command_line::CommandLine;
pub use core::{
    CommandArgs, ConCommand, ConItem, ConVar, ConVarDyn, ConVarValue, ConsoleHub, ConsoleReceiver, ItemFilter,
    Message, MessageInfo, MsgColor, Registry, Severity, TokenizedLine, VarSetResult, tokenize,
};
pub use error::{CommandLineError, FrameError, NetError, ProtocolError};
pub use init::{
    InitGuard, InitOptions, command_line as parsed_command_line, console, init, initialize, is_initialized,
    main_loop_tick, shutdown, try_console,
};
pub use logging::ConsoleLayer;
pub use terminal::{StdConsole, TermInputMethod, TerminalConfig};

#[cfg(unix)]
pub use extcon::{ExtconConfig, ExtconHost};

#[cfg(feature = "bevy")]
pub use plugin::AppFwPlugin;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::core::{
        CommandArgs, ConCommand, ConVar, ConVarValue, ConsoleHub, ConsoleReceiver, Message, MessageInfo, MsgColor,
        Severity, VarSetResult,
    };
    pub use crate::init::{InitOptions, console, init, main_loop_tick};
    pub use crate::terminal::TermInputMethod;
    pub use crate::{con_debug, con_error, con_fatal, con_info, con_notice, con_print, con_warn, con_wtf};

    #[cfg(unix)]
    pub use crate::extcon::{ExtconConfig, ExtconHost};

    #[cfg(feature = "bevy")]
    pub use crate::plugin::AppFwPlugin;
}
