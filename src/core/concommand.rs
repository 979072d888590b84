//! Console command (ConCommand) implementation.
//!
//! ConCommands are named commands that execute functions when invoked.

use std::fmt;
use std::sync::{Arc, RwLock};

use super::hub::ConsoleHub;
use super::registry::{self, ConItem, ItemHeader};
use super::tokenizer::TokenizedLine;
use super::{read, write};

/// Arguments passed to a command handler.
///
/// Wraps the whole invocation; indices passed to [`get`](Self::get) skip the
/// command name.
#[derive(Debug, Clone, Copy)]
pub struct CommandArgs<'a> {
    line: &'a TokenizedLine,
}

impl<'a> CommandArgs<'a> {
    pub fn new(line: &'a TokenizedLine) -> Self {
        Self { line }
    }

    /// The command name as typed.
    #[inline]
    pub fn name(&self) -> &'a str {
        self.line.name().unwrap_or_default()
    }

    /// The full invocation, name included.
    #[inline]
    pub fn line(&self) -> &'a TokenizedLine {
        self.line
    }

    /// Get the number of arguments.
    #[inline]
    pub fn len(&self) -> usize {
        self.line.len().saturating_sub(1)
    }

    /// Check if there are no arguments.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get an argument by index.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.line.get(index + 1)
    }

    /// Get an argument or a default value.
    #[inline]
    pub fn get_or(&self, index: usize, default: &'a str) -> &'a str {
        self.get(index).unwrap_or(default)
    }

    /// Try to parse an argument as a specific type.
    pub fn parse<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.get(index).and_then(|s| s.parse().ok())
    }

    /// Parse an argument with a default value.
    pub fn parse_or<T: std::str::FromStr>(&self, index: usize, default: T) -> T {
        self.parse(index).unwrap_or(default)
    }

    /// Iterate over arguments.
    pub fn iter(&self) -> impl Iterator<Item = &'a str> {
        self.line.iter().skip(1)
    }

    /// Join all arguments with a separator.
    pub fn join(&self, separator: &str) -> String {
        self.join_from(0, separator)
    }

    /// Join arguments starting from an index.
    pub fn join_from(&self, start: usize, separator: &str) -> String {
        self.iter().skip(start).collect::<Vec<_>>().join(separator)
    }
}

impl std::ops::Index<usize> for CommandArgs<'_> {
    type Output = str;

    fn index(&self, index: usize) -> &Self::Output {
        &self.line[index + 1]
    }
}

/// Type alias for command handler functions.
///
/// Handlers receive the arguments and the hub that dispatched them. A
/// handler may print and may queue more commands.
pub type CommandHandler = dyn Fn(&CommandArgs<'_>, &ConsoleHub) + Send + Sync;

/// A console command.
///
/// # Examples
///
/// ```
/// use appfw::core::{ConCommand, ConsoleHub};
/// use appfw::con_info;
///
/// let hub = ConsoleHub::new();
/// let echo = ConCommand::new("echo", "Print text to console", |args, hub| {
///     con_info!(hub, "{}", args.join(" "));
/// });
/// hub.registry().register_cmd(&echo);
/// hub.command_now("echo hello world");
/// ```
pub struct ConCommand {
    header: ItemHeader,
    handler: RwLock<Option<Arc<CommandHandler>>>,
}

impl ConCommand {
    /// Create a command whose handler takes arguments.
    pub fn new<F>(name: impl Into<Box<str>>, description: impl Into<Box<str>>, handler: F) -> Arc<Self>
    where
        F: Fn(&CommandArgs<'_>, &ConsoleHub) + Send + Sync + 'static,
    {
        let cmd = Self::unbound(name, description);
        cmd.set_handler(handler);
        cmd
    }

    /// Create a command whose handler ignores its arguments.
    pub fn no_args<F>(name: impl Into<Box<str>>, description: impl Into<Box<str>>, handler: F) -> Arc<Self>
    where
        F: Fn(&ConsoleHub) + Send + Sync + 'static,
    {
        Self::new(name, description, move |_, hub| handler(hub))
    }

    /// Create a command without a handler. Executing it logs an error until
    /// [`set_handler`](Self::set_handler) is called.
    pub fn unbound(name: impl Into<Box<str>>, description: impl Into<Box<str>>) -> Arc<Self> {
        Arc::new(Self {
            header: ItemHeader::new(name.into(), description.into()),
            handler: RwLock::new(None),
        })
    }

    /// Create a command and register it with the process-wide console.
    pub fn declare<F>(name: impl Into<Box<str>>, description: impl Into<Box<str>>, handler: F) -> Arc<Self>
    where
        F: Fn(&CommandArgs<'_>, &ConsoleHub) + Send + Sync + 'static,
    {
        let cmd = Self::new(name, description, handler);
        registry::declare(ConItem::Cmd(cmd.clone()));
        cmd
    }

    /// Install or replace the handler.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&CommandArgs<'_>, &ConsoleHub) + Send + Sync + 'static,
    {
        *write(&self.handler) = Some(Arc::new(handler));
    }

    /// Remove the handler.
    pub fn clear_handler(&self) {
        *write(&self.handler) = None;
    }

    #[inline]
    pub fn has_handler(&self) -> bool {
        read(&self.handler).is_some()
    }

    /// Get the command name.
    #[inline]
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Get the description.
    #[inline]
    pub fn description(&self) -> &str {
        self.header.description()
    }

    pub(crate) fn header(&self) -> &ItemHeader {
        &self.header
    }

    /// Run the command.
    ///
    /// The handler lock is released before the handler runs, so a handler
    /// may replace itself.
    pub fn execute(&self, args: &CommandArgs<'_>, hub: &ConsoleHub) {
        let handler = read(&self.handler).clone();
        match handler {
            Some(handler) => handler(args, hub),
            None => crate::con_error!(hub, "Command {} has no handler", self.name()),
        }
    }
}

impl Drop for ConCommand {
    fn drop(&mut self) {
        self.header.detach();
    }
}

impl fmt::Debug for ConCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConCommand")
            .field("name", &self.name())
            .field("description", &self.description())
            .field("has_handler", &self.has_handler())
            .finish()
    }
}
