//! Terminal receiver for headless programs and dedicated servers.
//!
//! [`StdConsole`] writes every message to stdout and, depending on its
//! [`TermInputMethod`], reads command lines from stdin on a background
//! thread.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use tracing::debug;

use crate::core::{ConsoleHub, ConsoleReceiver, Message, MessageInfo, MsgColor, Severity, lock};

/// How the terminal treats stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TermInputMethod {
    /// stdin is left to the application.
    Disable,
    /// stdin is read and the input thrown away.
    Ignore,
    /// stdin lines are executed as commands.
    #[default]
    Enable,
}

/// Configuration for terminal output.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TerminalConfig {
    /// Whether to use colored output (ANSI escape codes).
    pub colored: bool,
}

/// stdin/stdout console receiver.
///
/// The reader thread blocks in stdin and can not be joined. Once the
/// console is dropped the thread exits after it reads its next line.
pub struct StdConsole {
    input: TermInputMethod,
    config: TerminalConfig,
    lines: Option<Mutex<Receiver<String>>>,
    hub: Mutex<Weak<ConsoleHub>>,
}

impl StdConsole {
    pub fn new(input: TermInputMethod, config: TerminalConfig) -> Self {
        let lines = match input {
            TermInputMethod::Disable => None,
            TermInputMethod::Ignore => {
                spawn_stdin_reader(None);
                None
            }
            TermInputMethod::Enable => {
                let (sender, receiver) = mpsc::channel();
                spawn_stdin_reader(Some(sender)).then_some(Mutex::new(receiver))
            }
        };

        Self::with_lines(input, config, lines)
    }

    fn with_lines(input: TermInputMethod, config: TerminalConfig, lines: Option<Mutex<Receiver<String>>>) -> Self {
        Self {
            input,
            config,
            lines,
            hub: Mutex::new(Weak::new()),
        }
    }

    #[inline]
    pub fn input_method(&self) -> TermInputMethod {
        self.input
    }

    #[inline]
    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Main thread update. Queues at most one line read from stdin.
    pub fn tick(&self) {
        let Some(lines) = &self.lines else {
            return;
        };

        let line = match lock(lines).try_recv() {
            Ok(line) => line,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return,
        };

        let hub = lock(&self.hub).upgrade();
        if let Some(hub) = hub {
            hub.print(MessageInfo::new(Severity::Input).tag("stdin"), format!("> {line}"));
            hub.command(&line);
        }
    }

    fn render(&self, msg: &Message) -> String {
        if self.config.colored {
            let color = msg.info.effective_color();
            format!("{}{}{}", color.ansi(), msg.text, MsgColor::Default.ansi())
        } else {
            msg.text.clone()
        }
    }
}

impl ConsoleReceiver for StdConsole {
    fn on_add(&self, hub: &Arc<ConsoleHub>) {
        let mut current = lock(&self.hub);
        crate::afw_assert!(current.upgrade().is_none(), "terminal console is already added to a hub");
        *current = Arc::downgrade(hub);
    }

    fn on_remove(&self, _hub: &Arc<ConsoleHub>) {
        *lock(&self.hub) = Weak::new();
    }

    fn print(&self, msg: &Message) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", self.render(msg));
        let _ = out.flush();
    }

    fn is_thread_safe(&self) -> bool {
        true
    }
}

/// Start the stdin reader. Lines go to `sender` when given and are dropped
/// otherwise. Returns whether the thread was started.
fn spawn_stdin_reader(sender: Option<mpsc::Sender<String>>) -> bool {
    let spawned = thread::Builder::new().name("appfw-stdin".into()).spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if let Some(sender) = &sender {
                if sender.send(text.to_owned()).is_err() {
                    break;
                }
            }
        }
        debug!("stdin reader finished");
    });

    match spawned {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "failed to start stdin reader");
            false
        }
    }
}
