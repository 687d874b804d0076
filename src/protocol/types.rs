//! Reply Values and Wire Encoding
//!
//! Every reply the server sends is one of four shapes: a bulk string,
//! a sequence of bulk strings, the null bulk string, or an error.
//!
//! ## Wire Format
//!
//! Bulk String: `$5\r\nhello\r\n`
//! Null Bulk String: `$-1\r\n`
//! Array of Bulk Strings: `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`
//! Error (RESP2 dialect only): `-ERR wrong number of arguments\r\n`
//!
//! ## Dialects
//!
//! The legacy dialect reproduces what the reference client expects:
//! a one-element sequence goes out as a plain bulk string, and errors go
//! out as the bulk string `ERROR`. The RESP2 dialect always sends arrays
//! for sequences and uses the native `-` error line.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by the protocol
pub const CRLF: &[u8] = b"\r\n";

/// Protocol type prefixes
pub mod prefix {
    pub const ERROR: u8 = b'-';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Payload of an error reply in the legacy dialect.
pub const LEGACY_ERROR: &[u8] = b"ERROR";

/// Selects how the two ambiguous reply shapes are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// Single-element sequences collapse to a bulk string and errors are
    /// sent as the bulk string `ERROR`.
    #[default]
    Legacy,
    /// Sequences are always arrays and errors use the `-ERR` line.
    Resp2,
}

/// A reply produced by the command dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A single length-prefixed byte string.
    Bulk(Bytes),

    /// An ordered sequence of byte strings (ECHO).
    Sequence(Vec<Bytes>),

    /// The null bulk string, returned for missing keys.
    Null,

    /// A request-local failure. The message is only put on the wire in
    /// the RESP2 dialect.
    Error(String),
}

impl Reply {
    /// Creates a bulk string reply.
    ///
    /// # Example
    /// ```
    /// use minikv::protocol::{Dialect, Reply};
    /// let reply = Reply::bulk("hello");
    /// assert_eq!(reply.encode(Dialect::Legacy), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Creates a sequence reply.
    pub fn sequence(values: Vec<Bytes>) -> Self {
        Reply::Sequence(values)
    }

    /// Creates a null reply.
    pub fn null() -> Self {
        Reply::Null
    }

    /// Creates an error reply.
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    /// Reply for a successful SET
    pub fn ok() -> Self {
        Reply::Bulk(Bytes::from_static(b"OK"))
    }

    /// Reply for PING
    pub fn pong() -> Self {
        Reply::Bulk(Bytes::from_static(b"PONG"))
    }

    /// Encodes the reply into its wire representation.
    pub fn encode(&self, dialect: Dialect) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(dialect, &mut buf);
        buf
    }

    /// Encodes the reply into an existing buffer.
    pub fn encode_into(&self, dialect: Dialect, buf: &mut Vec<u8>) {
        match self {
            Reply::Bulk(data) => put_bulk(buf, data),
            Reply::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Reply::Sequence(values) if values.len() == 1 && dialect == Dialect::Legacy => {
                put_bulk(buf, &values[0]);
            }
            Reply::Sequence(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    put_bulk(buf, value);
                }
            }
            Reply::Error(msg) => match dialect {
                Dialect::Legacy => put_bulk(buf, LEGACY_ERROR),
                Dialect::Resp2 => {
                    buf.push(prefix::ERROR);
                    buf.extend_from_slice(b"ERR ");
                    // CR/LF would terminate the line early
                    buf.extend(msg.bytes().filter(|b| *b != b'\r' && *b != b'\n'));
                    buf.extend_from_slice(CRLF);
                }
            },
        }
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null)
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

fn put_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(prefix::BULK_STRING);
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Sequence(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}) \"{}\"", i + 1, String::from_utf8_lossy(v))?;
                }
                Ok(())
            }
            Reply::Null => write!(f, "(nil)"),
            Reply::Error(msg) => write!(f, "(error) {}", msg),
        }
    }
}
