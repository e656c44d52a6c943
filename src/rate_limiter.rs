//! Request throttling using a token bucket
//!
//! One [`RateLimiter`] caps the request rate of the whole session; a second one caps
//! media downloads. Clones share the same bucket, so every channel worker draws from
//! the same budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Permits are tracked in milli-permits so fractional refills are not lost
const SCALE: u64 = 1_000;

/// Shared token-bucket limiter
///
/// - Tokens represent permitted operations (requests or downloads)
/// - Tokens refill at `per_second`, up to one second worth of burst
/// - Callers acquire a token before each operation and wait when the bucket is empty
///
/// A rate of 0 (or `None` at construction) means unlimited.
#[derive(Clone)]
pub struct RateLimiter {
    /// Permits per second (0 = unlimited)
    per_second: Arc<AtomicU64>,
    /// Available milli-permits
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since an arbitrary process-local epoch)
    last_refill: Arc<AtomicU64>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("per_second", &self.rate())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter allowing `per_second` operations per second (None = unlimited)
    ///
    /// ```
    /// use channel_dl::rate_limiter::RateLimiter;
    ///
    /// let requests = RateLimiter::new(Some(20));
    /// let unlimited = RateLimiter::new(None);
    /// assert_eq!(requests.rate(), Some(20));
    /// assert_eq!(unlimited.rate(), None);
    /// ```
    #[must_use]
    pub fn new(per_second: Option<u64>) -> Self {
        let rate = per_second.unwrap_or(0);
        Self {
            per_second: Arc::new(AtomicU64::new(rate)),
            tokens: Arc::new(AtomicU64::new(rate.saturating_mul(SCALE))),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Change the rate; takes effect for the next acquire
    pub fn set_rate(&self, per_second: Option<u64>) {
        let new_rate = per_second.unwrap_or(0);
        let old_rate = self.per_second.swap(new_rate, Ordering::SeqCst);
        if new_rate > old_rate {
            self.tokens
                .fetch_add((new_rate - old_rate).saturating_mul(SCALE), Ordering::SeqCst);
        }
    }

    /// Current rate (None = unlimited)
    pub fn rate(&self) -> Option<u64> {
        let rate = self.per_second.load(Ordering::Relaxed);
        if rate == 0 { None } else { Some(rate) }
    }

    /// Wait for one permit
    pub async fn acquire(&self) {
        self.acquire_n(1).await;
    }

    /// Wait for `permits` permits
    pub async fn acquire_n(&self, permits: u64) {
        if permits == 0 || self.per_second.load(Ordering::Relaxed) == 0 {
            return;
        }

        let mut remaining = permits.saturating_mul(SCALE);

        loop {
            let rate = self.per_second.load(Ordering::Relaxed);
            if rate == 0 {
                // Limit removed while waiting
                return;
            }

            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            let take = remaining.min(current);
            if take > 0 {
                if self
                    .tokens
                    .compare_exchange(current, current - take, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    remaining -= take;
                    if remaining == 0 {
                        return;
                    }
                }
                continue;
            }

            // Empty bucket. Sleep roughly until the missing tokens refill, capped so
            // rate changes are picked up promptly.
            let wait_ms = remaining.saturating_mul(1_000) / rate.saturating_mul(SCALE);
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(5, 100))).await;
        }
    }

    fn refill_tokens(&self) {
        let rate = self.per_second.load(Ordering::Relaxed);
        if rate == 0 {
            return;
        }

        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let capacity = rate.saturating_mul(SCALE);
        let to_add = (capacity as f64 * elapsed_secs) as u64;

        if to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let current = self.tokens.load(Ordering::SeqCst);
            self.tokens
                .store((current + to_add).min(capacity), Ordering::SeqCst);
        }
    }

    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}
