//! Per-endpoint minimum spacing between submissions.
//!
//! The limiter keeps one last-send timestamp per [`EndpointKey`]. A
//! caller may proceed once the interval has elapsed since the last
//! send, claiming the slot with a compare-and-set. Losers of the race
//! sleep until the next window and try again. Throttling is
//! cooperative: nothing stops a caller that skips [`RateLimiter::acquire`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use artgen_core::{EndpointConfig, EndpointKey};
use tokio::time::Instant;

/// Default minimum spacing between two submissions to one endpoint.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Slot value meaning "nothing sent yet".
const NEVER: u64 = u64::MAX;

pub struct RateLimiter {
    min_interval: Duration,
    /// Timestamps are stored as microseconds since this instant.
    epoch: Instant,
    slots: Mutex<HashMap<EndpointKey, Arc<AtomicU64>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            epoch: Instant::now(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request to `config` may be sent, then claim the slot.
    ///
    /// Returns how long the caller was held back.
    pub async fn acquire(&self, config: &EndpointConfig) -> Duration {
        let key = config.key();
        let slot = self.slot(&key);
        let interval = self.min_interval.as_micros() as u64;
        let started = Instant::now();
        let mut delayed = false;

        loop {
            let now = self.now_micros();
            let last = slot.load(Ordering::Acquire);
            let ready_at = if last == NEVER {
                0
            } else {
                last.saturating_add(interval)
            };

            if now >= ready_at {
                if slot
                    .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    if !delayed {
                        return Duration::ZERO;
                    }
                    let waited = started.elapsed();
                    tracing::debug!(
                        endpoint = %config.name,
                        waited_ms = waited.as_millis() as u64,
                        "Rate limit slot acquired after delay",
                    );
                    return waited;
                }
                // Another caller claimed this window; re-read the slot.
                continue;
            }

            delayed = true;
            tokio::time::sleep(Duration::from_micros(ready_at - now)).await;
        }
    }

    fn slot(&self, key: &EndpointKey) -> Arc<AtomicU64> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AtomicU64::new(NEVER)))
            .clone()
    }

    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}
