//! Thread-Safe Key-Value Store with Expiry Support
//!
//! One `HashMap` behind one `Mutex`, shared by every connection task
//! through an `Arc`. Each operation takes the lock once, so a reader never
//! sees a half-replaced entry, and the expiry check on `get` and the
//! removal it triggers happen in the same critical section.
//!
//! ## Expiry
//!
//! Entries carry an absolute deadline. Reads treat anything past its
//! deadline as absent and remove it on the spot (lazy expiry). The
//! background sweeper in [`crate::storage::expiry`] reclaims entries that
//! are never read again (active expiry). Both only ever remove an entry
//! whose own deadline has passed, so an old TTL can never delete a value
//! written by a later SET.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry, expiring `ttl` from now if given.
    pub fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        Self { value, expires_at }
    }

    /// Checks if this entry has expired as of `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Snapshot of store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}

/// The shared key-value store.
///
/// # Example
///
/// ```
/// use minikv::storage::Store;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let store = Store::new();
///
/// store.set(Bytes::from("name"), Bytes::from("Ariz"), None);
/// assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
///
/// store.set(Bytes::from("session"), Bytes::from("abc123"), Some(Duration::from_secs(60)));
/// assert!(store.delete(b"session"));
/// ```
#[derive(Debug, Default)]
pub struct Store {
    data: Mutex<HashMap<Bytes, Entry>>,

    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the map. A panic in another task cannot leave an entry
    /// half-written, so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<Bytes, Entry>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the entry for `key`.
    ///
    /// Without a TTL the new entry never expires, even if the entry it
    /// replaces had one.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let entry = Entry::new(value, ttl);
        self.lock().insert(key, entry);
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired
    /// entry is removed before the lock is released.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.lock();
        match data.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => {}
        }

        data.remove(key);
        drop(data);
        self.expired_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Deletes a key.
    ///
    /// Returns `true` if the key was present. Deleting a missing key is
    /// not an error.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.lock().remove(key).is_some()
    }

    /// Number of entries currently held, including expired entries that
    /// have not been reclaimed yet.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Removes every entry whose deadline has passed.
    ///
    /// Called by the background expiry sweeper. Returns the number of
    /// entries removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();

        let cleaned = {
            let mut data = self.lock();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired_at(now));
            (before - data.len()) as u64
        };

        if cleaned > 0 {
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }
}
