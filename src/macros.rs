//! Printing macros.
//!
//! Each macro takes the hub first and then `format!` arguments. The message
//! is tagged with the calling crate's package name.
//!
//! ```
//! use appfw::core::ConsoleHub;
//! use appfw::{con_info, con_warn};
//!
//! let hub = ConsoleHub::new();
//! con_info!(hub, "listening on port {}", 5666);
//! con_warn!(hub, "queue is {}% full", 90);
//! ```

/// Print with an explicit severity.
#[macro_export]
macro_rules! con_print {
    ($hub:expr, $severity:expr, $($arg:tt)+) => {
        $hub.print(
            $crate::core::MessageInfo::new($severity).tag(env!("CARGO_PKG_NAME")),
            format!($($arg)+),
        )
    };
}

#[macro_export]
macro_rules! con_wtf {
    ($hub:expr, $($arg:tt)+) => { $crate::con_print!($hub, $crate::core::Severity::Wtf, $($arg)+) };
}

#[macro_export]
macro_rules! con_fatal {
    ($hub:expr, $($arg:tt)+) => { $crate::con_print!($hub, $crate::core::Severity::Fatal, $($arg)+) };
}

#[macro_export]
macro_rules! con_error {
    ($hub:expr, $($arg:tt)+) => { $crate::con_print!($hub, $crate::core::Severity::Error, $($arg)+) };
}

#[macro_export]
macro_rules! con_warn {
    ($hub:expr, $($arg:tt)+) => { $crate::con_print!($hub, $crate::core::Severity::Warn, $($arg)+) };
}

#[macro_export]
macro_rules! con_notice {
    ($hub:expr, $($arg:tt)+) => { $crate::con_print!($hub, $crate::core::Severity::Notice, $($arg)+) };
}

#[macro_export]
macro_rules! con_info {
    ($hub:expr, $($arg:tt)+) => { $crate::con_print!($hub, $crate::core::Severity::Info, $($arg)+) };
}

#[macro_export]
macro_rules! con_debug {
    ($hub:expr, $($arg:tt)+) => { $crate::con_print!($hub, $crate::core::Severity::Debug, $($arg)+) };
}
