//! Wire Protocol
//!
//! The codec between raw transport bytes and the dispatcher.
//!
//! ## Modules
//!
//! - `parser`: decodes length-prefixed request frames into a [`Frame`]
//! - `types`: the [`Reply`] enum and its wire encoding
//!
//! ## Example
//!
//! ```
//! use minikv::protocol::{decode, Dialect, Reply};
//!
//! let frame = decode(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(frame.name(), b"GET");
//!
//! let bytes = Reply::bulk("Ariz").encode(Dialect::Legacy);
//! assert_eq!(bytes, b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode, Frame, FrameError, FrameParser, FrameResult};
pub use types::{Dialect, Reply};
