//! Console message types.
//!
//! Every line that goes through the hub is a [`Message`]: a [`MessageInfo`]
//! header (severity, color, timestamp, source tag) plus the text.

use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Severity {
    /// Something impossible happened (a bug).
    Wtf = 0,
    /// Most of the time unrecoverable.
    Fatal,
    /// Something went wrong.
    Error,
    /// Unexpected but not critical.
    Warn,
    /// Requires attention.
    Notice,
    /// Informational.
    #[default]
    Info,
    /// Diagnostic output.
    Debug,
    /// Echo of console input.
    Input,
}

impl Severity {
    /// All severities in wire order.
    pub const ALL: [Severity; 8] = [
        Severity::Wtf,
        Severity::Fatal,
        Severity::Error,
        Severity::Warn,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
        Severity::Input,
    ];

    /// Decode from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Color used when a message asks for [`MsgColor::Default`].
    pub const fn default_color(self) -> MsgColor {
        match self {
            Severity::Wtf | Severity::Fatal | Severity::Error => MsgColor::BrightRed,
            Severity::Warn => MsgColor::BrightYellow,
            Severity::Notice => MsgColor::White,
            Severity::Info => MsgColor::Grey,
            Severity::Debug => MsgColor::BrightBlue,
            Severity::Input => MsgColor::White,
        }
    }

    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Severity::Wtf => "wtf",
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
            Severity::Input => "input",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 4-bit message color, laid out as `0bIRGB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MsgColor {
    /// Use the severity's default color.
    #[default]
    Default = 0,
    Blue,
    Green,
    Cyan,
    Red,
    Purple,
    Yellow,
    Grey,
    Black,
    BrightBlue,
    BrightGreen,
    BrightCyan,
    BrightRed,
    BrightPurple,
    BrightYellow,
    White,
}

impl MsgColor {
    const ALL: [MsgColor; 16] = [
        MsgColor::Default,
        MsgColor::Blue,
        MsgColor::Green,
        MsgColor::Cyan,
        MsgColor::Red,
        MsgColor::Purple,
        MsgColor::Yellow,
        MsgColor::Grey,
        MsgColor::Black,
        MsgColor::BrightBlue,
        MsgColor::BrightGreen,
        MsgColor::BrightCyan,
        MsgColor::BrightRed,
        MsgColor::BrightPurple,
        MsgColor::BrightYellow,
        MsgColor::White,
    ];

    /// Decode from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// ANSI SGR escape for this color. `Default` resets.
    pub const fn ansi(self) -> &'static str {
        match self {
            MsgColor::Default => "\x1b[0m",
            MsgColor::Blue => "\x1b[34m",
            MsgColor::Green => "\x1b[32m",
            MsgColor::Cyan => "\x1b[36m",
            MsgColor::Red => "\x1b[31m",
            MsgColor::Purple => "\x1b[35m",
            MsgColor::Yellow => "\x1b[33m",
            MsgColor::Grey => "\x1b[37m",
            MsgColor::Black => "\x1b[90m",
            MsgColor::BrightBlue => "\x1b[94m",
            MsgColor::BrightGreen => "\x1b[92m",
            MsgColor::BrightCyan => "\x1b[96m",
            MsgColor::BrightRed => "\x1b[91m",
            MsgColor::BrightPurple => "\x1b[95m",
            MsgColor::BrightYellow => "\x1b[93m",
            MsgColor::White => "\x1b[97m",
        }
    }
}

/// Tag used when the source of a message is not known.
pub const UNKNOWN_TAG: &str = "< unknown >";

/// Header of a console message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageInfo {
    /// Severity.
    pub severity: Severity,
    /// Explicit color, or `Default` for the severity color.
    pub color: MsgColor,
    /// Creation time, unix seconds.
    pub time: i64,
    /// Short label of the originating module.
    pub tag: Cow<'static, str>,
}

impl MessageInfo {
    /// Create a header stamped with the current time.
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            color: MsgColor::Default,
            time: unix_now(),
            tag: Cow::Borrowed(UNKNOWN_TAG),
        }
    }

    /// Set the color.
    pub fn color(mut self, color: MsgColor) -> Self {
        self.color = color;
        self
    }

    /// Set the source tag.
    pub fn tag(mut self, tag: impl Into<Cow<'static, str>>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Override the timestamp.
    pub fn time(mut self, time: i64) -> Self {
        self.time = time;
        self
    }

    /// The color to actually render with.
    pub fn effective_color(&self) -> MsgColor {
        match self.color {
            MsgColor::Default => self.severity.default_color(),
            color => color,
        }
    }
}

impl Default for MessageInfo {
    fn default() -> Self {
        Self::new(Severity::Info)
    }
}

/// A console message: header and text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    pub info: MessageInfo,
    pub text: String,
}

impl Message {
    pub fn new(info: MessageInfo, text: impl Into<String>) -> Self {
        Self {
            info,
            text: text.into(),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
