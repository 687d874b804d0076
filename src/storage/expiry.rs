//! Background Expiry Sweeper
//!
//! Lazy expiry only reclaims a key when someone reads it. A key that
//! expires and is never read again would stay in memory forever, so this
//! task periodically removes expired entries ("active expiry").
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Sleeps for the current interval (default: 100ms)
//! 2. Removes every expired entry from the store
//! 3. Halves its interval when a large share of keys expired, doubles it
//!    when nothing did, staying between `min_interval` and `max_interval`

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryConfig {
    /// Starting interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// If this fraction of keys expired in one sweep, speed up
    pub speedup_threshold: f64,
}

impl ExpiryConfig {
    /// Bounds an interval to `[min_interval, max_interval]`.
    pub fn clamp(&self, interval: Duration) -> Duration {
        interval.max(self.min_interval).min(self.max_interval)
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// ```ignore
    /// let store = Arc::new(Store::new());
    /// let sweeper = ExpirySweeper::start(Arc::clone(&store), ExpiryConfig::default());
    ///
    /// // Dropping the handle stops the task
    /// drop(sweeper);
    /// ```
    pub fn start(store: Arc<Store>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(store, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    store: Arc<Store>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.clamp(config.base_interval);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = store.len();
        let expired = store.cleanup_expired();

        current_interval = next_interval(&config, current_interval, keys_before, expired);

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = store.len(),
                next_interval_ms = current_interval.as_millis() as u64,
                "Expired keys cleaned up"
            );
        } else {
            trace!(
                next_interval_ms = current_interval.as_millis() as u64,
                "Nothing to expire"
            );
        }
    }
}

/// Picks the next sweep interval from how much the last sweep removed.
fn next_interval(
    config: &ExpiryConfig,
    current: Duration,
    keys_before: usize,
    expired: u64,
) -> Duration {
    let next = if expired == 0 {
        current * 2
    } else if expired as f64 / keys_before.max(1) as f64 > config.speedup_threshold {
        current / 2
    } else {
        current
    };

    config.clamp(next)
}
