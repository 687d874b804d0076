//! Storage Module
//!
//! The in-memory key-value store and its background expiry sweeper.
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │              Store               │
//! │   Mutex<HashMap<Bytes, Entry>>   │
//! └──────────────────────────────────┘
//!                  ▲
//!                  │ cleanup_expired()
//!      ┌───────────┴───────────┐
//!      │     ExpirySweeper     │
//!      │ (Background Tokio Task)│
//!      └───────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use minikv::storage::Store;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let store = Store::new();
//!
//! store.set(Bytes::from("name"), Bytes::from("Ariz"), None);
//! assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! store.set(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Some(Duration::from_secs(3600)),
//! );
//! ```

pub mod expiry;
pub mod store;

pub use expiry::{ExpiryConfig, ExpirySweeper};
pub use store::{Entry, StorageStats, Store};
