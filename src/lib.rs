//! # minikv - A Minimal Redis-like Key-Value Server
//!
//! minikv is a single-node, in-memory key-value server that speaks a
//! subset of the Redis wire protocol over TCP. It serves five commands:
//! `PING`, `ECHO`, `SET` (with optional `PX` expiry), `GET` and `INFO`.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              minikv                               │
//! │                                                                   │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐            │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │            │
//! │  │ (server.rs) │    │  Handler    │    │  Handler    │            │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘            │
//! │                            │                  │                   │
//! │                            ▼                  ▼                   │
//! │                     ┌─────────────┐    ┌─────────────────────┐    │
//! │                     │ Frame Parser│    │        Store        │    │
//! │                     │ Reply codec │    │  Mutex<HashMap<..>> │    │
//! │                     └─────────────┘    └──────────▲──────────┘    │
//! │                                                   │               │
//! │                                        ┌──────────┴──────────┐    │
//! │                                        │    ExpirySweeper    │    │
//! │                                        │ (Background Task)   │    │
//! │                                        └─────────────────────┘    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use minikv::connection::ConnectionStats;
//! use minikv::protocol::Dialect;
//! use minikv::server::{bind_listener, serve};
//! use minikv::storage::{ExpiryConfig, ExpirySweeper, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let storage = Arc::new(Store::new());
//!     let _sweeper = ExpirySweeper::start(Arc::clone(&storage), ExpiryConfig::default());
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = bind_listener("127.0.0.1:6379").await?;
//!     serve(listener, storage, stats, Dialect::Legacy).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: request frame parser and reply encoder
//! - [`storage`]: the shared store with lazy and active expiry
//! - [`commands`]: command parsing and dispatch
//! - [`connection`]: per-client read/dispatch/reply loop
//! - [`server`]: listener setup and accept loop
//! - [`config`]: command-line configuration
//!
//! ## Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: a read that finds an expired key removes it and reports it missing
//! 2. **Active**: a background task periodically removes expired keys
//!
//! Neither path can remove a value written after the expired one.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::CommandHandler;
pub use config::{CliAction, Config, ConfigError};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{decode, Dialect, Frame, FrameError, Reply};
pub use storage::{ExpiryConfig, ExpirySweeper, Store};

/// The default port minikv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host minikv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of minikv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
