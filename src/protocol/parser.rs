//! Request Frame Parser
//!
//! Clients send every request as an array of bulk strings:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
//! ```
//!
//! Split on CRLF this is the array-size token followed by alternating
//! length tokens and payloads. The parser checks each length token against
//! its payload and keeps only the payloads, so a decoded `Frame` for the
//! request above is `["SET", "key", "value"]`.
//!
//! ## Incremental Parsing
//!
//! [`FrameParser::parse`] works on a buffer that may hold a partial frame:
//! - `Ok(Some((frame, consumed)))` - a full frame was parsed
//! - `Ok(None)` - the frame is incomplete, read more bytes
//! - `Err(FrameError)` - the bytes can never form a valid frame
//!
//! [`decode`] is the one-shot form for a buffer holding exactly one frame.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding a request frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// No bytes, or an array declaring zero elements
    #[error("empty frame")]
    Empty,

    /// A header started with something other than the expected prefix
    #[error("unexpected byte {found:#04x}, expected {expected:?}")]
    UnexpectedByte { expected: char, found: u8 },

    /// A size or length token was empty or not a number
    #[error("invalid length token: {0:?}")]
    InvalidLength(String),

    /// The declared layout does not match the bytes
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// The frame ended before the declared layout was complete
    #[error("incomplete frame")]
    Incomplete,

    /// Extra bytes followed a complete frame
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// A declared size exceeds the configured limits
    #[error("frame too large: {size} (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Maximum number of arguments in one request
pub const MAX_ARGS: usize = 1024;

/// Maximum size of a single argument (512 KB)
pub const MAX_BULK_SIZE: usize = 512 * 1024;

/// Maximum encoded size of a whole request, headers included (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Longest header line, prefix and CRLF included
pub const MAX_HEADER_LEN: usize = 32;

/// One decoded request: the command name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    parts: Vec<Bytes>,
}

impl Frame {
    /// Builds a frame from its payloads, name first.
    ///
    /// # Example
    /// ```
    /// use minikv::protocol::Frame;
    /// let frame = Frame::new(["GET", "name"]);
    /// assert_eq!(frame.encode(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    /// ```
    pub fn new<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// The command name as sent by the client. Empty for an empty frame.
    pub fn name(&self) -> &[u8] {
        self.parts.first().map(|name| &name[..]).unwrap_or_default()
    }

    /// Every payload after the command name.
    pub fn args(&self) -> &[Bytes] {
        self.parts.get(1..).unwrap_or_default()
    }

    /// Number of payloads, including the command name.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encodes the frame the way a client would send it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(prefix::ARRAY);
        buf.extend_from_slice(self.parts.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        for part in &self.parts {
            buf.push(prefix::BULK_STRING);
            buf.extend_from_slice(part.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(part);
            buf.extend_from_slice(CRLF);
        }
        buf
    }
}

/// Stateless parser for request frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameParser;

impl FrameParser {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to parse one frame from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> FrameResult<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let (count, mut consumed) = match read_header(buf, prefix::ARRAY)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if count == 0 {
            return Err(FrameError::Empty);
        }
        if count > MAX_ARGS {
            return Err(FrameError::TooLarge {
                size: count,
                max: MAX_ARGS,
            });
        }

        let mut parts = Vec::with_capacity(count);

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }

            match parse_bulk(&buf[consumed..], MAX_FRAME_SIZE - consumed)? {
                Some((part, used)) => {
                    parts.push(part);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((Frame { parts }, consumed)))
    }
}

/// Parses `$<len>\r\n<payload>\r\n`, failing if it would take more
/// than `budget` bytes.
fn parse_bulk(buf: &[u8], budget: usize) -> FrameResult<Option<(Bytes, usize)>> {
    let (length, data_start) = match read_header(buf, prefix::BULK_STRING)? {
        Some(header) => header,
        None => return Ok(None),
    };

    if length > MAX_BULK_SIZE {
        return Err(FrameError::TooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = data_start + length + 2;
    if total > budget {
        return Err(FrameError::TooLarge {
            size: MAX_FRAME_SIZE - budget + total,
            max: MAX_FRAME_SIZE,
        });
    }
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[data_start + length..total] != CRLF {
        return Err(FrameError::Malformed("payload length does not match"));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((data, total)))
}

/// Reads a `<prefix><number>\r\n` header, returning the number and the
/// bytes consumed.
fn read_header(buf: &[u8], expected: u8) -> FrameResult<Option<(usize, usize)>> {
    if buf[0] != expected {
        return Err(FrameError::UnexpectedByte {
            expected: expected as char,
            found: buf[0],
        });
    }

    let window = &buf[1..buf.len().min(MAX_HEADER_LEN)];
    let end = match find_crlf(window) {
        Some(pos) => pos,
        None if buf.len() >= MAX_HEADER_LEN => {
            return Err(FrameError::Malformed("header line too long"))
        }
        None => return Ok(None),
    };

    let token = &buf[1..1 + end];
    let text = std::str::from_utf8(token)
        .map_err(|_| FrameError::InvalidLength(String::from_utf8_lossy(token).into_owned()))?;

    let n: i64 = text
        .parse()
        .map_err(|_| FrameError::InvalidLength(text.to_string()))?;
    if n < 0 {
        return Err(FrameError::Malformed("negative length"));
    }

    Ok(Some((n as usize, 1 + end + 2)))
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a buffer that holds exactly one frame.
pub fn decode(frame: &[u8]) -> FrameResult<Frame> {
    if frame.is_empty() {
        return Err(FrameError::Empty);
    }

    match FrameParser::new().parse(frame)? {
        Some((decoded, consumed)) if consumed == frame.len() => Ok(decoded),
        Some((_, consumed)) => Err(FrameError::TrailingBytes(frame.len() - consumed)),
        None => Err(FrameError::Incomplete),
    }
}
