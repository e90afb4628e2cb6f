//! Protocol error types.

/// Error raised while encoding a command or decoding a reply stream.
///
/// Every decode error is fatal to the byte stream it came from: once a frame
/// is malformed the position of the next frame boundary is unknown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A frame started with a byte that is not a RESP2 type marker.
    #[error("invalid prefix byte: {0:#04x}")]
    InvalidPrefix(u8),

    /// Integer or length field did not parse.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Negative length other than -1.
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Bulk string payload was not followed by CRLF.
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// Simple string or error line was not valid UTF-8.
    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    /// Bulk string exceeds the decoder limit.
    #[error("bulk string too long: {len} bytes exceeds {max} byte limit")]
    BulkStringTooLong { len: usize, max: usize },

    /// A line ran past the decoder limit without a CRLF.
    #[error("line too long: exceeds {max} byte limit")]
    LineTooLong { max: usize },

    /// Array nesting exceeds the decoder limit.
    #[error("nesting too deep: depth {0} exceeds limit")]
    NestingTooDeep(usize),

    /// Input ended in the middle of a frame.
    #[error("truncated frame")]
    Truncated,

    /// A reply arrived while no request was waiting for one.
    #[error("unsolicited reply")]
    UnsolicitedReply,

    /// A command without any argument cannot be encoded.
    #[error("empty command")]
    EmptyCommand,
}

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
