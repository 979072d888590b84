//! Program arguments.
//!
//! | Form | Meaning |
//! |---|---|
//! | `--name value` | argument with a value |
//! | `--name` | flag (when the next argument starts with `-` or `+`, or there is none) |
//! | `-xyz` | short flags `x`, `y` and `z` |
//! | `+text` | console commands, run after init |
//! | `--` | everything after it is positional |
//! | anything else | positional |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::{ConsoleHub, TokenizedLine, tokenize};
use crate::error::CommandLineError;

/// Parsed command line.
///
/// ```
/// use appfw::CommandLine;
///
/// let cmd = CommandLine::parse(["server", "--port", "27015", "-v", "+map de_dust", "extra"])?;
/// assert_eq!(cmd.arg_int("port", 0)?, 27015);
/// assert!(cmd.is_flag_set("verbose", Some('v')));
/// assert_eq!(cmd.exec_commands()[0].as_slice(), ["map", "de_dust"]);
/// assert_eq!(cmd.positional(), ["extra"]);
/// # Ok::<(), appfw::CommandLineError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommandLine {
    program: String,
    raw: Vec<String>,
    flags: BTreeSet<String>,
    short_flags: BTreeSet<char>,
    args: BTreeMap<String, String>,
    exec: Vec<TokenizedLine>,
    positional: Vec<String>,
}

impl CommandLine {
    /// Parse `args`, the first item being the program name.
    pub fn parse<I, S>(args: I) -> Result<Self, CommandLineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = args.into_iter().map(Into::into);
        let mut cmd = CommandLine {
            program: iter.next().unwrap_or_default(),
            raw: iter.collect(),
            ..Default::default()
        };

        let raw = std::mem::take(&mut cmd.raw);
        let mut rest = raw.iter().peekable();
        let mut positional_only = false;

        while let Some(arg) = rest.next() {
            if positional_only {
                cmd.positional.push(arg.clone());
                continue;
            }

            if let Some(name) = arg.strip_prefix("--") {
                if name.is_empty() {
                    positional_only = true;
                    continue;
                }

                let value = rest.next_if(|next| !next.starts_with('-') && !next.starts_with('+'));
                match value {
                    Some(value) => {
                        if cmd.args.insert(name.to_owned(), value.clone()).is_some() {
                            return Err(CommandLineError::DuplicateArgument(name.to_owned()));
                        }
                    }
                    None => {
                        cmd.flags.insert(name.to_owned());
                    }
                }
            } else if let Some(letters) = arg.strip_prefix('-').filter(|l| !l.is_empty()) {
                cmd.short_flags.extend(letters.chars());
            } else if let Some(text) = arg.strip_prefix('+') {
                cmd.exec.extend(tokenize(text));
            } else {
                cmd.positional.push(arg.clone());
            }
        }

        cmd.raw = raw;
        Ok(cmd)
    }

    /// Parse the arguments of the current process.
    pub fn from_env() -> Result<Self, CommandLineError> {
        Self::parse(std::env::args())
    }

    /// Name the program was invoked with.
    #[inline]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether `--tag` or `-short` was given.
    pub fn is_flag_set(&self, tag: &str, short: Option<char>) -> bool {
        self.flags.contains(tag) || short.is_some_and(|c| self.short_flags.contains(&c))
    }

    /// Whether `--tag` was given with a value.
    pub fn has_value(&self, tag: &str) -> bool {
        self.args.contains_key(tag)
    }

    pub fn arg(&self, tag: &str) -> Option<&str> {
        self.args.get(tag).map(String::as_str)
    }

    pub fn arg_string(&self, tag: &str, default: &str) -> String {
        self.arg(tag).unwrap_or(default).to_owned()
    }

    pub fn arg_int(&self, tag: &str, default: i32) -> Result<i32, CommandLineError> {
        self.parse_arg(tag, default, "an integer")
    }

    pub fn arg_float(&self, tag: &str, default: f32) -> Result<f32, CommandLineError> {
        self.parse_arg(tag, default, "a number")
    }

    fn parse_arg<T: std::str::FromStr>(&self, tag: &str, default: T, expected: &'static str) -> Result<T, CommandLineError> {
        let Some(value) = self.arg(tag) else {
            return Ok(default);
        };
        value.trim().parse().map_err(|_| CommandLineError::InvalidValue {
            name: tag.to_owned(),
            value: value.to_owned(),
            expected,
        })
    }

    /// Arguments that are not options or commands.
    #[inline]
    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Commands given with `+`.
    #[inline]
    pub fn exec_commands(&self) -> &[TokenizedLine] {
        &self.exec
    }

    /// Queue the `+` commands on `hub`, executing the queue if `run_now`.
    pub fn exec(&self, hub: &ConsoleHub, run_now: bool) {
        for line in &self.exec {
            hub.command_line(line.clone());
        }
        if run_now {
            hub.drain_commands();
        }
    }
}

/// The arguments as given, quoting those that contain spaces.
impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.raw.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if arg.contains(' ') {
                write!(f, "\"{arg}\"")?;
            } else {
                f.write_str(arg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::ConVar;

    #[test]
    fn test_forms() {
        let cmd = CommandLine::parse([
            "app", "--name", "value", "--flag", "-ab", "+echo hi; quit", "pos", "--", "--not-a-flag", "+nope",
        ])
        .unwrap();

        assert_eq!(cmd.program(), "app");
        assert_eq!(cmd.arg("name"), Some("value"));
        assert!(cmd.is_flag_set("flag", None));
        assert!(!cmd.has_value("flag"));
        assert!(cmd.is_flag_set("other", Some('a')));
        assert!(cmd.is_flag_set("other", Some('b')));
        assert!(!cmd.is_flag_set("other", Some('c')));
        assert_eq!(cmd.exec_commands().len(), 2);
        assert_eq!(cmd.positional(), ["pos", "--not-a-flag", "+nope"]);
    }

    #[test]
    fn test_flag_before_option() {
        let cmd = CommandLine::parse(["app", "--verbose", "--port", "1", "--dev", "+quit"]).unwrap();
        assert!(cmd.is_flag_set("verbose", None));
        assert!(cmd.is_flag_set("dev", None));
        assert_eq!(cmd.arg_int("port", 0), Ok(1));
    }

    #[test]
    fn test_duplicate_value() {
        let err = CommandLine::parse(["app", "--port", "1", "--port", "2"]).unwrap_err();
        assert_eq!(err, CommandLineError::DuplicateArgument("port".into()));

        // Flags may repeat.
        assert!(CommandLine::parse(["app", "--v", "--v"]).is_ok());
    }

    #[test]
    fn test_typed_args() {
        let cmd = CommandLine::parse(["app", "--scale", "1.5", "--port", "abc"]).unwrap();
        assert_eq!(cmd.arg_float("scale", 0.0), Ok(1.5));
        assert_eq!(cmd.arg_float("missing", 2.0), Ok(2.0));
        assert_eq!(cmd.arg_string("missing", "x"), "x");
        assert!(matches!(
            cmd.arg_int("port", 0),
            Err(CommandLineError::InvalidValue { expected: "an integer", .. })
        ));
    }

    #[test]
    fn test_display_quotes_spaces() {
        let cmd = CommandLine::parse(["app", "+map big city", "-v"]).unwrap();
        assert_eq!(cmd.to_string(), "\"+map big city\" -v");
    }

    #[test]
    fn test_exec_on_hub() {
        let hub = ConsoleHub::new();
        let fps = Arc::new(ConVar::new("fps_max", 60, "Frame rate limit"));
        hub.registry().register_var(&fps);

        let cmd = CommandLine::parse(["app", "+fps_max 144"]).unwrap();
        cmd.exec(&hub, false);
        assert_eq!(fps.get(), 60);
        assert_eq!(hub.queue().count(), 1);

        hub.drain_commands();
        assert_eq!(fps.get(), 144);
    }
}
