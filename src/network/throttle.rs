//! Login Attempt Throttle
//!
//! Counts failed authentication attempts per client address and locks the
//! address out for a fixed period once the configured threshold is hit.
//! A background sweep bounds memory held for abandoned addresses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Unlocked records older than this are swept.
pub const STALE_RECORD_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval between background sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Failed-attempt bookkeeping for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Failures since `first_attempt_at`.
    pub count: u32,
    /// When the current counting window began.
    pub first_attempt_at: Instant,
    /// When the address was locked, if it is.
    pub locked_at: Option<Instant>,
}

impl AttemptRecord {
    fn new(now: Instant) -> Self {
        Self {
            count: 1,
            first_attempt_at: now,
            locked_at: None,
        }
    }

    fn lock_active(&self, now: Instant, lock_duration: Duration) -> bool {
        self.locked_at
            .map(|at| now.duration_since(at) < lock_duration)
            .unwrap_or(false)
    }

    fn lock_expired(&self, now: Instant, lock_duration: Duration) -> bool {
        self.locked_at
            .map(|at| now.duration_since(at) >= lock_duration)
            .unwrap_or(false)
    }
}

/// Per-address brute-force throttle.
pub struct AttemptThrottle {
    records: RwLock<HashMap<String, AttemptRecord>>,
    max_attempts: u32,
    lock_duration: Duration,
}

impl AttemptThrottle {
    /// Create a throttle locking after `max_attempts` failures for `lock_duration`.
    pub fn new(max_attempts: u32, lock_duration: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            lock_duration,
        }
    }

    /// Configured threshold.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the address is currently locked out.
    pub async fn is_locked(&self, address: &str) -> bool {
        let records = self.records.read().await;
        records
            .get(address)
            .map(|r| r.lock_active(Instant::now(), self.lock_duration))
            .unwrap_or(false)
    }

    /// Record a failed attempt. Returns true if this attempt locked the address.
    pub async fn record_failed_attempt(&self, address: &str) -> bool {
        let now = Instant::now();
        let mut records = self.records.write().await;

        let record = match records.get_mut(address) {
            Some(record) => record,
            None => {
                records.insert(address.to_string(), AttemptRecord::new(now));
                return false;
            }
        };

        // A lapsed lock starts a fresh window
        if record.lock_expired(now, self.lock_duration) {
            *record = AttemptRecord::new(now);
            return false;
        }

        record.count = record.count.saturating_add(1);
        if record.count >= self.max_attempts && record.locked_at.is_none() {
            record.locked_at = Some(now);
            info!(address, attempts = record.count, "address locked out");
            return true;
        }

        false
    }

    /// Forget all failures for the address (successful login).
    pub async fn reset(&self, address: &str) {
        self.records.write().await.remove(address);
    }

    /// Attempts left before lockout.
    pub async fn remaining_attempts(&self, address: &str) -> u32 {
        let records = self.records.read().await;
        match records.get(address) {
            Some(record) => self.max_attempts.saturating_sub(record.count),
            None => self.max_attempts,
        }
    }

    /// Time left on the lock, zero if unlocked.
    pub async fn remaining_lock_time(&self, address: &str) -> Duration {
        let records = self.records.read().await;
        let Some(locked_at) = records.get(address).and_then(|r| r.locked_at) else {
            return Duration::ZERO;
        };
        self.lock_duration.saturating_sub(Instant::now().duration_since(locked_at))
    }

    /// Snapshot of the record for an address.
    pub async fn record(&self, address: &str) -> Option<AttemptRecord> {
        self.records.read().await.get(address).copied()
    }

    /// Number of tracked addresses.
    pub async fn tracked_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Drop stale unlocked records and records whose lock has lapsed.
    ///
    /// Returns the number of records removed. Active locks are never dropped.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let before = records.len();

        records.retain(|_, r| match r.locked_at {
            Some(_) => !r.lock_expired(now, self.lock_duration),
            None => now.duration_since(r.first_attempt_at) <= STALE_RECORD_AGE,
        });

        before - records.len()
    }

    /// Run the sweep every [`SWEEP_INTERVAL`] until shutdown.
    pub async fn run_sweep_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep().await;
                    if removed > 0 {
                        debug!(removed, "swept throttle records");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "203.0.113.7";
    const LOCK: Duration = Duration::from_secs(300);

    fn throttle() -> AttemptThrottle {
        AttemptThrottle::new(5, LOCK)
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_after_max_attempts() {
        let t = throttle();

        for _ in 0..4 {
            assert!(!t.record_failed_attempt(ADDR).await);
            assert!(!t.is_locked(ADDR).await);
        }
        assert_eq!(t.remaining_attempts(ADDR).await, 1);

        assert!(t.record_failed_attempt(ADDR).await);
        assert!(t.is_locked(ADDR).await);
        assert_eq!(t.remaining_attempts(ADDR).await, 0);
        assert_eq!(t.remaining_lock_time(ADDR).await, LOCK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_holds_until_duration_elapses() {
        let t = throttle();
        for _ in 0..5 {
            t.record_failed_attempt(ADDR).await;
        }

        tokio::time::advance(LOCK - Duration::from_secs(1)).await;
        assert!(t.is_locked(ADDR).await);
        assert_eq!(t.remaining_lock_time(ADDR).await, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!t.is_locked(ADDR).await);
        assert_eq!(t.remaining_lock_time(ADDR).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_while_locked_do_not_relock() {
        let t = throttle();
        for _ in 0..5 {
            t.record_failed_attempt(ADDR).await;
        }
        tokio::time::advance(Duration::from_secs(100)).await;

        assert!(!t.record_failed_attempt(ADDR).await);
        // Lock start is unchanged
        assert_eq!(t.remaining_lock_time(ADDR).await, Duration::from_secs(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_resets_window() {
        let t = throttle();
        for _ in 0..5 {
            t.record_failed_attempt(ADDR).await;
        }
        tokio::time::advance(LOCK).await;

        assert!(!t.record_failed_attempt(ADDR).await);
        let record = t.record(ADDR).await.unwrap();
        assert_eq!(record.count, 1);
        assert!(record.locked_at.is_none());
        assert_eq!(t.remaining_attempts(ADDR).await, 4);
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let t = throttle();
        for _ in 0..5 {
            t.record_failed_attempt(ADDR).await;
        }
        t.reset(ADDR).await;

        assert!(!t.is_locked(ADDR).await);
        assert!(!t.record_failed_attempt(ADDR).await);
        assert!(!t.is_locked(ADDR).await);
        assert_eq!(t.remaining_attempts(ADDR).await, 4);
    }

    #[tokio::test]
    async fn test_addresses_are_independent() {
        let t = throttle();
        for _ in 0..5 {
            t.record_failed_attempt(ADDR).await;
        }
        assert!(t.is_locked(ADDR).await);
        assert!(!t.is_locked("198.51.100.1").await);
        assert_eq!(t.remaining_attempts("198.51.100.1").await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_active_locks() {
        let t = throttle();
        for _ in 0..5 {
            t.record_failed_attempt(ADDR).await;
        }
        t.record_failed_attempt("198.51.100.1").await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(t.sweep().await, 0);
        assert_eq!(t.tracked_count().await, 2);

        // Lock lapses, unlocked record is still fresh
        tokio::time::advance(LOCK).await;
        assert_eq!(t.sweep().await, 1);
        assert!(t.record(ADDR).await.is_none());

        tokio::time::advance(STALE_RECORD_AGE).await;
        assert_eq!(t.sweep().await, 1);
        assert_eq!(t.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_lock_once() {
        let t = Arc::new(throttle());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let t = t.clone();
            handles.push(tokio::spawn(async move { t.record_failed_attempt(ADDR).await }));
        }

        let mut locks = 0;
        for h in handles {
            if h.await.unwrap() {
                locks += 1;
            }
        }
        assert_eq!(locks, 1);
        assert!(t.is_locked(ADDR).await);
    }
}
