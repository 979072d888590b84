//! Error types for appfw

use std::io;

use thiserror::Error;

/// Network error.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("{context}: {source}")]
    Socket {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Operation timed out")]
    TimedOut,

    #[error("Connection aborted")]
    ConnectionAborted,

    #[error("Already listening")]
    AlreadyListening,

    #[error("Not listening")]
    NotListening,

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Listen socket failed (revents {0:#x})")]
    ListenSocketFailed(i16),
}

impl NetError {
    pub(crate) fn socket(context: &'static str, source: io::Error) -> Self {
        NetError::Socket { context, source }
    }

    /// Map the last OS error of a failed syscall.
    pub(crate) fn last_os(context: &'static str) -> Self {
        Self::socket(context, io::Error::last_os_error())
    }
}

/// Framing error. The stream can not be resynchronized after one of these;
/// the connection should be closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Invalid magic")]
    InvalidMagic,

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// External console payload error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Payload truncated")]
    Truncated,

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("Empty payload")]
    Empty,

    #[error("Invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u8 },
}

/// Command line error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandLineError {
    #[error("Argument '--{0}' is given more than once")]
    DuplicateArgument(String),

    #[error("Argument '--{name}' is not {expected}: {value:?}")]
    InvalidValue {
        name: String,
        value: String,
        expected: &'static str,
    },
}
