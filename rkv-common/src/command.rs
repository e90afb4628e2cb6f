//! # Command Definitions
//!
//! Purpose: Model a RESP request as an ordered list of arguments before it is
//! framed onto the wire.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: `Command::new("SET").arg(key).arg(value)` keeps call
//!    sites close to the textual command.
//! 2. **Typed Arguments**: Numbers stay numbers until encoding; `Null` is kept
//!    distinct so it can be framed as a null bulk string.
//! 3. **Binary-Safe**: Byte arguments are carried verbatim.

use std::fmt;

/// One argument of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Raw bytes (UTF-8 text or binary payload).
    Bytes(Vec<u8>),
    /// Signed integer, stringified at encode time.
    Int(i64),
    /// Floating point number, stringified at encode time.
    Float(f64),
    /// Absent value, encoded as a null bulk string.
    Null,
}

impl Arg {
    /// Renders the argument as the bytes written inside its bulk frame.
    ///
    /// Returns `None` for [`Arg::Null`].
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Arg::Bytes(data) => Some(data.clone()),
            Arg::Int(value) => Some(value.to_string().into_bytes()),
            Arg::Float(value) => Some(format_float(*value).into_bytes()),
            Arg::Null => None,
        }
    }
}

// Integral floats are written without a fractional part ("3" rather than "3.0")
// so they are accepted by integer commands on the server.
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else if value == f64::INFINITY {
        "+inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        value.to_string()
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Bytes(value.into_bytes())
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Bytes(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(value)
    }
}

macro_rules! impl_int_arg {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Int(value as i64)
                }
            }
        )*
    };
}

impl_int_arg!(i8, i16, i32, i64, u8, u16, u32, isize);

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Arg::Int(value),
            Err(_) => Arg::Bytes(value.to_string().into_bytes()),
        }
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::from(value as u64)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Arg::Null,
        }
    }
}

/// An ordered list of arguments; the first is the command name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    args: Vec<Arg>,
}

impl Command {
    /// Starts a command with its name as the first argument.
    pub fn new(name: impl Into<Arg>) -> Self {
        Command {
            args: vec![name.into()],
        }
    }

    /// Builds a command from an argument list. The list may be empty, in which
    /// case encoding fails with [`crate::ProtocolError::EmptyCommand`].
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Command {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument of the iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends one argument in place.
    pub fn push(&mut self, arg: impl Into<Arg>) {
        self.args.push(arg.into());
    }

    /// Returns the arguments in order.
    pub fn as_args(&self) -> &[Arg] {
        &self.args
    }

    /// Number of arguments including the command name.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when the command has no arguments and is therefore not encodable.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Command name as text, if the first argument is valid UTF-8.
    pub fn name(&self) -> Option<&str> {
        match self.args.first() {
            Some(Arg::Bytes(data)) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            match arg.to_bytes() {
                Some(data) => f.write_str(&String::from_utf8_lossy(&data))?,
                None => f.write_str("(nil)")?,
            }
        }
        Ok(())
    }
}

/// Commands queued to be written together and answered in order.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Queues a command, builder style.
    pub fn cmd(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Queues a command in place.
    pub fn add(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Queued commands in write order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromIterator<Command> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Pipeline {
            commands: iter.into_iter().collect(),
        }
    }
}
