//! # RESP2 Encoding and Streaming Decoding
//!
//! Purpose: Frame commands onto the wire and turn an arbitrary sequence of
//! inbound byte chunks back into typed reply trees.
//!
//! ## Design Principles
//! 1. **Resumable Parsing**: The decoder keeps its stack of open arrays between
//!    calls, so a reply split across TCP segments is completed on a later call.
//! 2. **Consume Only Complete Tokens**: Bytes are removed from the buffer only
//!    once the whole token (line or bulk payload plus CRLF) is present.
//! 3. **Binary-Safe**: Bulk payloads are split off the read buffer as `Bytes`
//!    without copying.
//! 4. **Fail Fast**: Malformed framing is a hard error; alignment cannot be
//!    recovered afterwards.
//!
//! ## Wire Format
//!
//! ```text
//! request : *<argc>\r\n ( $<len>\r\n <bytes>\r\n )+
//! replies : +<text>\r\n          simple string
//!           -<TAG> <message>\r\n error
//!           :<i64>\r\n           integer
//!           $<len>\r\n<bytes>\r\n bulk string ($-1 is null)
//!           *<n>\r\n <n replies>  array (*-1 is null, *0 is empty)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::{Arg, Command};
use crate::error::{ProtocolError, ProtocolResult};

/// Largest bulk string accepted by the decoder (matches the server default).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Longest header, simple string or error line accepted by the decoder.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Error reply split into its leading tag and the remaining message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Upper-case tag such as `ERR`, `WRONGTYPE` or `NOAUTH`.
    pub tag: String,
    /// Text after the first space.
    pub message: String,
}

impl ServerError {
    /// Splits an error line on its first space.
    ///
    /// A line without a space is all tag and carries an empty message.
    pub fn parse(line: &str) -> Self {
        match line.split_once(' ') {
            Some((tag, message)) => ServerError {
                tag: tag.to_string(),
                message: message.to_string(),
            },
            None => ServerError {
                tag: line.to_string(),
                message: String::new(),
            },
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.tag)
        } else {
            write!(f, "{} {}", self.tag, self.message)
        }
    }
}

/// Decoded reply value.
///
/// Null bulk strings and null arrays are distinct from their empty forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    /// +OK or +PONG style replies.
    SimpleString(String),
    /// -ERR ... replies.
    Error(ServerError),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    BulkString(Option<Bytes>),
    /// *... arrays, with None for null.
    Array(Option<Vec<ReplyValue>>),
}

impl ReplyValue {
    /// True for a null bulk string or a null array.
    pub fn is_null(&self) -> bool {
        matches!(self, ReplyValue::BulkString(None) | ReplyValue::Array(None))
    }

    /// Returns the server error carried by an error reply.
    pub fn as_error(&self) -> Option<&ServerError> {
        match self {
            ReplyValue::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the integer of an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ReplyValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the payload of a simple or non-null bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ReplyValue::SimpleString(text) => Some(text.as_bytes()),
            ReplyValue::BulkString(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Returns the payload of a simple or bulk string if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|data| std::str::from_utf8(data).ok())
    }

    /// Returns the elements of a non-null array.
    pub fn as_array(&self) -> Option<&[ReplyValue]> {
        match self {
            ReplyValue::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Consumes the value, returning the elements of a non-null array.
    pub fn into_array(self) -> Option<Vec<ReplyValue>> {
        match self {
            ReplyValue::Array(Some(items)) => Some(items),
            _ => None,
        }
    }
}

/// Encodes one command as a RESP2 array of bulk strings.
pub fn encode_command(command: &Command, out: &mut BytesMut) -> ProtocolResult<()> {
    if command.is_empty() {
        return Err(ProtocolError::EmptyCommand);
    }
    let args = command.as_args();
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        encode_arg(arg, out);
    }
    Ok(())
}

/// Encodes several commands back to back for pipelining.
///
/// Every command is validated first so a rejected pipeline leaves `out`
/// untouched.
pub fn encode_pipeline(commands: &[Command], out: &mut BytesMut) -> ProtocolResult<()> {
    if commands.is_empty() || commands.iter().any(Command::is_empty) {
        return Err(ProtocolError::EmptyCommand);
    }
    for command in commands {
        encode_command(command, out)?;
    }
    Ok(())
}

fn encode_arg(arg: &Arg, out: &mut BytesMut) {
    match arg {
        Arg::Bytes(data) => push_bulk(out, data),
        Arg::Null => out.put_slice(b"$-1\r\n"),
        other => {
            // Numbers are stringified into a small owned buffer.
            let data = other.to_bytes().unwrap_or_default();
            push_bulk(out, &data);
        }
    }
}

fn push_bulk(out: &mut BytesMut, data: &[u8]) {
    out.reserve(data.len() + 16);
    out.put_u8(b'$');
    push_usize(out, data.len());
    out.put_slice(b"\r\n");
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

/// Decodes every complete reply in `data`.
///
/// Fails with [`ProtocolError::Truncated`] when `data` ends inside a frame.
/// Use [`Decoder`] for input that arrives in pieces.
pub fn decode(data: &[u8]) -> ProtocolResult<Vec<ReplyValue>> {
    let mut buf = BytesMut::from(data);
    let mut decoder = Decoder::new();
    let mut replies = Vec::new();
    while let Some(reply) = decoder.decode(&mut buf)? {
        replies.push(reply);
    }
    if !buf.is_empty() || !decoder.is_idle() {
        return Err(ProtocolError::Truncated);
    }
    Ok(replies)
}

/// Array currently being filled.
#[derive(Debug)]
struct ArrayFrame {
    remaining: usize,
    items: Vec<ReplyValue>,
}

/// Streaming RESP2 reply decoder.
///
/// Feed it a growing read buffer; each call returns at most one top-level
/// reply and leaves unconsumed bytes in the buffer for the next call.
#[derive(Debug)]
pub struct Decoder {
    stack: Vec<ArrayFrame>,
    max_bulk_len: usize,
    max_depth: usize,
    max_line_len: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

impl Decoder {
    /// Creates a decoder with the default limits.
    pub fn new() -> Self {
        Decoder::with_limits(MAX_BULK_LEN, MAX_NESTING_DEPTH)
    }

    /// Creates a decoder with explicit bulk length and nesting limits.
    pub fn with_limits(max_bulk_len: usize, max_depth: usize) -> Self {
        Decoder {
            stack: Vec::new(),
            max_bulk_len,
            max_depth,
            max_line_len: MAX_LINE_LEN,
        }
    }

    /// Replaces the line length limit.
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// True when no array is partially decoded.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    /// Drops any partially decoded array.
    pub fn reset(&mut self) {
        self.stack.clear();
    }

    /// Decodes the next complete top-level reply from `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Elements of an array
    /// that are already complete are consumed and kept on the internal stack.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ProtocolResult<Option<ReplyValue>> {
        loop {
            let token = match next_token(buf, self.max_bulk_len, self.max_line_len)? {
                Some(token) => token,
                None => return Ok(None),
            };

            let value = match token {
                Token::Value(value) => value,
                Token::ArrayStart(len) => {
                    if self.stack.len() >= self.max_depth {
                        return Err(ProtocolError::NestingTooDeep(self.stack.len() + 1));
                    }
                    self.stack.push(ArrayFrame {
                        remaining: len,
                        items: Vec::with_capacity(len.min(1024)),
                    });
                    continue;
                }
            };

            if let Some(reply) = self.complete(value) {
                return Ok(Some(reply));
            }
        }
    }

    /// Attaches a finished element to the innermost open array, closing
    /// every array that becomes full. Returns the value once it is top-level.
    fn complete(&mut self, mut value: ReplyValue) -> Option<ReplyValue> {
        loop {
            let frame = match self.stack.last_mut() {
                Some(frame) => frame,
                None => return Some(value),
            };
            frame.items.push(value);
            frame.remaining -= 1;
            if frame.remaining > 0 {
                return None;
            }
            let items = match self.stack.pop() {
                Some(frame) => frame.items,
                None => return None,
            };
            value = ReplyValue::Array(Some(items));
        }
    }
}

enum Token {
    Value(ReplyValue),
    ArrayStart(usize),
}

/// Consumes one token from the front of `buf` if it is complete.
fn next_token(
    buf: &mut BytesMut,
    max_bulk_len: usize,
    max_line_len: usize,
) -> ProtocolResult<Option<Token>> {
    let Some(&prefix) = buf.first() else {
        return Ok(None);
    };
    if !matches!(prefix, b'+' | b'-' | b':' | b'$' | b'*') {
        return Err(ProtocolError::InvalidPrefix(prefix));
    }
    let Some(line_end) = find_line_end(&buf[1..], max_line_len)? else {
        return Ok(None);
    };
    // Offset of the first byte after the header line's CRLF.
    let header_len = 1 + line_end + 2;
    let line = &buf[1..1 + line_end];

    let token = match prefix {
        b'+' => Token::Value(ReplyValue::SimpleString(utf8_line(line)?)),
        b'-' => Token::Value(ReplyValue::Error(ServerError::parse(&utf8_line(line)?))),
        b':' => Token::Value(ReplyValue::Integer(parse_i64(line)?)),
        b'$' => {
            let len = parse_i64(line)?;
            if len == -1 {
                Token::Value(ReplyValue::BulkString(None))
            } else if len < 0 {
                return Err(ProtocolError::InvalidLength(len));
            } else {
                let len = len as usize;
                if len > max_bulk_len {
                    return Err(ProtocolError::BulkStringTooLong {
                        len,
                        max: max_bulk_len,
                    });
                }
                if buf.len() < header_len + len + 2 {
                    return Ok(None);
                }
                if &buf[header_len + len..header_len + len + 2] != b"\r\n" {
                    return Err(ProtocolError::MissingCrlf);
                }
                buf.advance(header_len);
                let data = buf.split_to(len).freeze();
                buf.advance(2);
                return Ok(Some(Token::Value(ReplyValue::BulkString(Some(data)))));
            }
        }
        _ => {
            let len = parse_i64(line)?;
            if len == -1 {
                Token::Value(ReplyValue::Array(None))
            } else if len < 0 {
                return Err(ProtocolError::InvalidLength(len));
            } else if len == 0 {
                Token::Value(ReplyValue::Array(Some(Vec::new())))
            } else {
                Token::ArrayStart(len as usize)
            }
        }
    };

    buf.advance(header_len);
    Ok(Some(token))
}

/// Finds the index of the `\r` terminating the first line.
///
/// Only the first `max_line_len + 2` bytes are scanned; a longer line is an
/// error rather than a reason to keep buffering.
fn find_line_end(data: &[u8], max_line_len: usize) -> ProtocolResult<Option<usize>> {
    let window = &data[..data.len().min(max_line_len + 2)];
    match window.iter().position(|&b| b == b'\n') {
        Some(0) => Err(ProtocolError::MissingCrlf),
        Some(idx) if window[idx - 1] == b'\r' => Ok(Some(idx - 1)),
        Some(_) => Err(ProtocolError::MissingCrlf),
        None if window.len() == max_line_len + 2 => {
            Err(ProtocolError::LineTooLong { max: max_line_len })
        }
        None => Ok(None),
    }
}

fn utf8_line(line: &[u8]) -> ProtocolResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

fn parse_i64(data: &[u8]) -> ProtocolResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger(String::from_utf8_lossy(data).into_owned()))
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Digits are written into a stack buffer to avoid a String per header.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
        buf[..len].reverse();
    }
    out.put_slice(&buf[..len]);
}
