//! Server Configuration
//!
//! Built from defaults and command-line flags.
//!
//! ```text
//! minikv [--host <HOST>] [--port <PORT>] [--resp2] [--sweep-interval <MS>]
//! ```

use crate::protocol::Dialect;
use crate::storage::ExpiryConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;
use thiserror::Error;

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Reply encoding
    pub dialect: Dialect,
    /// Background expiry sweeper settings
    pub expiry: ExpiryConfig,
}

/// What the binary should do after parsing its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum CliAction {
    Run(Config),
    Help,
    Version,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value:?}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dialect: Dialect::default(),
            expiry: ExpiryConfig::default(),
        }
    }
}

impl Config {
    /// Parses command-line arguments (without the program name).
    pub fn from_args<I, T>(args: I) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    config.host = value_for(&arg, args.next())?;
                }
                "--port" | "-p" => {
                    let value = value_for(&arg, args.next())?;
                    config.port = parse_value(&arg, value)?;
                }
                "--resp2" => config.dialect = Dialect::Resp2,
                "--sweep-interval" => {
                    let value = value_for(&arg, args.next())?;
                    let ms: u64 = parse_value(&arg, value.clone())?;
                    let interval = Duration::from_millis(ms);
                    if interval < config.expiry.min_interval {
                        return Err(ConfigError::InvalidValue { flag: arg, value });
                    }
                    config.expiry.base_interval = interval;
                }
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(CliAction::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

/// Usage text printed for `--help`.
pub fn help_text() -> String {
    format!(
        r#"
minikv {} - A minimal Redis-like key-value server

USAGE:
    minikv [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to bind to (default: {})
    -p, --port <PORT>           Port to listen on (default: {})
        --resp2                 Always send arrays for ECHO and native error replies
        --sweep-interval <MS>   Starting interval of the expiry sweeper, at least 10 (default: 100)
    -v, --version               Print version information
        --help                  Print this help message

LOGGING:
    Set RUST_LOG to control verbosity, e.g. RUST_LOG=minikv=debug
"#,
        crate::VERSION,
        DEFAULT_HOST,
        DEFAULT_PORT
    )
}
