//! Console core.
//!
//! This module provides the fundamental building blocks:
//! - [`ConVar`] - Console variables with typed values, lock flag and validator
//! - [`ConCommand`] - Console commands with handlers
//! - [`Registry`] - Name-ordered store of console items
//! - [`tokenize`] - Command tokenizer
//! - [`CommandQueue`] - Pending invocations
//! - [`ConsoleHub`] - Ties the above together and fans messages out to
//!   [`ConsoleReceiver`]s

mod concommand;
mod convar;
mod hub;
mod message;
mod queue;
mod registry;
mod ring;
mod tokenizer;

pub use concommand::{CommandArgs, CommandHandler, ConCommand};
pub use convar::{ConVar, ConVarDyn, ConVarValue, VarSetResult};
pub use hub::{ConsoleHub, ConsoleReceiver, MAX_DEFERRED_MESSAGES};
pub use message::{Message, MessageInfo, MsgColor, Severity, UNKNOWN_TAG};
pub use queue::CommandQueue;
pub use registry::{ConItem, ItemFilter, ItemHeader, ItemKind, Registry, pending_names};
pub use ring::{RING_BUFFER_SIZE, RingBuffer};
pub use tokenizer::{TokenizedLine, lines_to_string, tokenize};

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Lock helpers. A poisoned lock is used as-is.

pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn read<T: ?Sized>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write<T: ?Sized>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}
