//! Assertion hook.
//!
//! All invariant checks in the crate end up in [`assertion_failed`]. It logs
//! the failure to the live console with [`Severity::Wtf`] and then asks the
//! installed policy what to do.

use std::sync::{Arc, RwLock};

use crate::core::{MessageInfo, Severity, read, write};

/// What to do after an assertion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertAction {
    /// Terminate the process.
    Abort,
    /// Log and keep going.
    Ignore,
    /// Stop in the debugger. Implemented as a panic so an attached debugger
    /// breaks on it and tests can observe it.
    Break,
}

/// Details of a failed assertion.
#[derive(Debug, Clone, Copy)]
pub struct AssertFailure<'a> {
    pub cond: &'a str,
    pub msg: &'a str,
    pub file: &'a str,
    pub line: u32,
}

type AssertCallback = dyn Fn(&AssertFailure<'_>) -> AssertAction + Send + Sync;

static ASSERT_CALLBACK: RwLock<Option<Arc<AssertCallback>>> = RwLock::new(None);

/// Install the assertion policy.
pub fn set_assert_callback<F>(callback: F)
where
    F: Fn(&AssertFailure<'_>) -> AssertAction + Send + Sync + 'static,
{
    *write(&ASSERT_CALLBACK) = Some(Arc::new(callback));
}

/// Restore the default policy.
pub fn reset_assert_callback() {
    *write(&ASSERT_CALLBACK) = None;
}

fn default_action(_: &AssertFailure<'_>) -> AssertAction {
    if cfg!(debug_assertions) {
        AssertAction::Break
    } else {
        AssertAction::Abort
    }
}

/// Report a failed assertion. Called by [`afw_assert!`](crate::afw_assert)
/// and [`afw_assert_rel!`](crate::afw_assert_rel).
pub fn assertion_failed(cond: &str, msg: &str, file: &str, line: u32) {
    let failure = AssertFailure {
        cond,
        msg,
        file,
        line,
    };

    if let Some(hub) = crate::init::try_console() {
        let info = || MessageInfo::new(Severity::Wtf).tag(env!("CARGO_PKG_NAME"));
        hub.print(info(), format!("Assertion failed: {cond}"));
        if !msg.is_empty() {
            hub.print(info(), format!("Reason: {msg}"));
        }
        hub.print(info(), format!("File: {file}:{line}"));
    }

    let callback = read(&ASSERT_CALLBACK).clone();

    let action = match callback {
        Some(cb) => cb(&failure),
        None => default_action(&failure),
    };

    match action {
        AssertAction::Abort => std::process::abort(),
        AssertAction::Ignore => {}
        AssertAction::Break => {
            if msg.is_empty() {
                panic!("assertion failed: {cond} ({file}:{line})");
            } else {
                panic!("assertion failed: {cond}: {msg} ({file}:{line})");
            }
        }
    }
}

/// Always-on assertion routed through [`assertion_failed`].
#[macro_export]
macro_rules! afw_assert_rel {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::dbg::assertion_failed(stringify!($cond), "", file!(), line!());
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::dbg::assertion_failed(
                stringify!($cond),
                &format!($($arg)+),
                file!(),
                line!(),
            );
        }
    };
}

/// Debug-only assertion routed through [`assertion_failed`].
#[macro_export]
macro_rules! afw_assert {
    ($($arg:tt)+) => {
        if cfg!(debug_assertions) {
            $crate::afw_assert_rel!($($arg)+);
        }
    };
}
