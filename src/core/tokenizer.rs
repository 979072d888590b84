//! Console input tokenizer.
//!
//! Splits text into invocations (separated by `;` or newlines), each a list
//! of whitespace-separated arguments. No external dependencies.

use std::fmt;
use std::ops::Index;

/// One invocation: the target name followed by its arguments.
///
/// Lines produced by [`tokenize`] are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct TokenizedLine {
    args: Vec<String>,
}

impl TokenizedLine {
    /// Build a line from already split arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The invocation target (first token).
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Number of tokens including the name.
    #[inline]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Get a token by index (0 is the name).
    #[inline]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// All tokens.
    #[inline]
    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.args
    }

    /// Render as `"a" "b" "c"`, which tokenizes back to the same line.
    pub fn to_command_string(&self) -> String {
        let mut s = String::new();
        for (i, arg) in self.args.iter().enumerate() {
            if i != 0 {
                s.push(' ');
            }
            s.push('"');
            s.push_str(arg);
            s.push('"');
        }
        s
    }
}

impl From<Vec<String>> for TokenizedLine {
    fn from(args: Vec<String>) -> Self {
        Self { args }
    }
}

impl Index<usize> for TokenizedLine {
    type Output = str;

    fn index(&self, index: usize) -> &Self::Output {
        &self.args[index]
    }
}

impl fmt::Display for TokenizedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_string())
    }
}

/// Join lines into a single `;`-separated command string.
pub fn lines_to_string(lines: &[TokenizedLine]) -> String {
    let mut s = String::new();
    for line in lines {
        s.push_str(&line.to_command_string());
        s.push_str("; ");
    }
    s
}

#[inline]
fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

#[inline]
fn ends_line(c: char) -> bool {
    matches!(c, ';' | '\n')
}

fn push_arg(args: &mut Vec<String>, arg: &str) {
    if !arg.is_empty() {
        args.push(arg.to_string());
    }
}

fn finish_line(lines: &mut Vec<TokenizedLine>, args: &mut Vec<String>) {
    if !args.is_empty() {
        lines.push(TokenizedLine::from(std::mem::take(args)));
    }
}

/// Tokenize console input into invocations.
///
/// # Syntax
///
/// - Arguments are separated by spaces, tabs or carriage returns
/// - `"..."` quotes a single argument; the quotes are stripped and an
///   unterminated quote runs to the end of the input
/// - `;` and newline end the current invocation (not inside quotes)
/// - Empty arguments, empty quotes and empty invocations are dropped
/// - No escape sequences
///
/// # Examples
///
/// ```
/// use appfw::core::tokenize;
///
/// let lines = tokenize(r#"sv_name "my server"; run_app 0"#);
/// assert_eq!(lines.len(), 2);
/// assert_eq!(lines[0].as_slice(), ["sv_name", "my server"]);
/// assert_eq!(lines[1].as_slice(), ["run_app", "0"]);
/// ```
pub fn tokenize(input: &str) -> Vec<TokenizedLine> {
    let mut lines = Vec::new();
    let mut args = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            c if ends_line(c) => finish_line(&mut lines, &mut args),
            c if is_blank(c) => continue,

            '"' => {
                let content_start = start + 1;
                let mut end = input.len();

                for (i, ch) in chars.by_ref() {
                    if ch == '"' {
                        end = i;
                        break;
                    }
                }

                push_arg(&mut args, &input[content_start..end]);
            }

            _ => {
                let mut end = input.len();

                while let Some(&(i, ch)) = chars.peek() {
                    if is_blank(ch) || ends_line(ch) || ch == '"' {
                        end = i;
                        break;
                    }
                    chars.next();
                }

                push_arg(&mut args, &input[start..end]);
            }
        }
    }

    finish_line(&mut lines, &mut args);
    lines
}
