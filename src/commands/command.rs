//! Command Parsing
//!
//! Turns a decoded [`Frame`] into a typed [`Command`], validating the
//! argument count and options. Names and the `PX` option are matched
//! case-insensitively.

use crate::protocol::Frame;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `PING` (arguments are ignored)
    Ping,
    /// `ECHO message [message ...]`
    Echo(Vec<Bytes>),
    /// `SET key value [PX milliseconds]`
    Set {
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
    },
    /// `GET key`
    Get { key: Bytes },
    /// `INFO` (arguments are ignored)
    Info,
}

/// Errors produced while turning a frame into a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command name is not one we serve. Fatal for the connection.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("invalid expire time '{0}'")]
    InvalidExpire(String),
}

impl CommandError {
    /// Returns true if the connection must be closed without a reply.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommandError::UnknownCommand(_))
    }
}

impl Command {
    /// Parses a frame into a command.
    pub fn parse(frame: &Frame) -> Result<Command, CommandError> {
        let name = String::from_utf8_lossy(frame.name()).to_ascii_uppercase();
        let args = frame.args();

        match name.as_str() {
            "PING" => Ok(Command::Ping),
            "ECHO" => parse_echo(args),
            "SET" => parse_set(args),
            "GET" => parse_get(args),
            "INFO" => Ok(Command::Info),
            _ => Err(CommandError::UnknownCommand(name)),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Echo(_) => "ECHO",
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Info => "INFO",
        }
    }
}

fn parse_echo(args: &[Bytes]) -> Result<Command, CommandError> {
    if args.is_empty() {
        return Err(CommandError::WrongArity("ECHO"));
    }
    Ok(Command::Echo(args.to_vec()))
}

fn parse_get(args: &[Bytes]) -> Result<Command, CommandError> {
    match args {
        [key] => Ok(Command::Get { key: key.clone() }),
        _ => Err(CommandError::WrongArity("GET")),
    }
}

fn parse_set(args: &[Bytes]) -> Result<Command, CommandError> {
    match args {
        [key, value] => Ok(Command::Set {
            key: key.clone(),
            value: value.clone(),
            ttl: None,
        }),
        // Only PX sets an expiry; any other option is ignored
        [key, value, option, amount] => {
            let ttl = if option.eq_ignore_ascii_case(b"PX") {
                Some(parse_millis(amount)?)
            } else {
                None
            };
            Ok(Command::Set {
                key: key.clone(),
                value: value.clone(),
                ttl,
            })
        }
        _ => Err(CommandError::WrongArity("SET")),
    }
}

/// Parses a PX amount. Fractional milliseconds are accepted.
fn parse_millis(raw: &[u8]) -> Result<Duration, CommandError> {
    let invalid = || CommandError::InvalidExpire(String::from_utf8_lossy(raw).into_owned());

    let ms: f64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(invalid)?;

    Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| invalid())
}
