//! Fixed-window request and violation counters.
//!
//! # Responsibilities
//! - Count requests per client key inside a 60 second window
//! - Track security violations per client IP
//! - Expose window snapshots for the admin API
//!
//! # Design Decisions
//! - Storage is behind `WindowStore` so a shared backend can replace the
//!   process-local map
//! - `get` followed by `set` is not atomic; a concurrent burst may overshoot a
//!   limit slightly
//! - Windows older than twice the window length are swept at most once per
//!   window length, on the first write after it rolls over

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

pub const WINDOW_MS: u64 = 60_000;

/// Requests per window for clients presenting an API key.
pub const API_KEY_LIMIT: u32 = 60;

/// Requests per window for anonymous clients, keyed by IP.
pub const ANONYMOUS_LIMIT: u32 = 30;

/// Violations per window before a client IP is refused outright.
pub const VIOLATION_THRESHOLD: u32 = 10;

/// Counter state for one client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub window_start_ms: u64,
    pub count: u32,
    pub blocked: bool,
}

/// Storage for counter windows.
pub trait WindowStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Window>;

    fn set(&self, key: &str, window: Window);

    /// Remove every window that started before `older_than_ms`.
    fn sweep(&self, older_than_ms: u64);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<(String, Window)>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<String, Window>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn get(&self, key: &str) -> Option<Window> {
        self.windows.get(key).map(|entry| *entry)
    }

    fn set(&self, key: &str, window: Window) {
        self.windows.insert(key.to_string(), window);
    }

    fn sweep(&self, older_than_ms: u64) {
        self.windows
            .retain(|_, window| window.window_start_ms >= older_than_ms);
    }

    fn len(&self) -> usize {
        self.windows.len()
    }

    fn snapshot(&self) -> Vec<(String, Window)> {
        let mut entries: Vec<(String, Window)> = self
            .windows
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window ends.
    pub reset_time_ms: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_time_ms.saturating_sub(now_ms).div_ceil(1000)
    }

    /// Reset instant as an RFC 3339 timestamp.
    pub fn reset_rfc3339(&self) -> String {
        i64::try_from(self.reset_time_ms)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default()
    }
}

pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Window counter over an injectable store.
#[derive(Clone)]
pub struct SlidingWindowCounter {
    store: Arc<dyn WindowStore>,
    window_ms: u64,
    last_sweep_ms: Arc<AtomicU64>,
}

impl SlidingWindowCounter {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self::with_window(store, WINDOW_MS)
    }

    pub fn with_window(store: Arc<dyn WindowStore>, window_ms: u64) -> Self {
        Self {
            store,
            window_ms,
            last_sweep_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn check(&self, key: &str, limit: u32) -> RateLimitDecision {
        self.check_at(key, limit, now_ms())
    }

    /// Count one request for `key` at `now_ms`.
    pub fn check_at(&self, key: &str, limit: u32, now_ms: u64) -> RateLimitDecision {
        let window = match self.current(key, now_ms) {
            Some(current) => {
                let count = current.count.saturating_add(1);
                Window {
                    window_start_ms: current.window_start_ms,
                    count,
                    blocked: count > limit,
                }
            }
            None => Window {
                window_start_ms: now_ms,
                count: 1,
                blocked: limit == 0,
            },
        };

        self.store.set(key, window);
        self.maybe_sweep(now_ms);

        RateLimitDecision {
            allowed: !window.blocked,
            limit,
            remaining: limit.saturating_sub(window.count),
            reset_time_ms: window.window_start_ms + self.window_ms,
        }
    }

    /// Sweep stale windows once per window length. Only the caller that wins
    /// the exchange pays for the scan.
    fn maybe_sweep(&self, now_ms: u64) {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.window_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.store.sweep(now_ms.saturating_sub(self.window_ms * 2));
        }
    }

    /// The unexpired window for `key`, without counting.
    pub fn current(&self, key: &str, now_ms: u64) -> Option<Window> {
        self.store
            .get(key)
            .filter(|w| now_ms.saturating_sub(w.window_start_ms) < self.window_ms)
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }
}

/// Per-IP budget of security violations.
#[derive(Clone)]
pub struct ViolationBudget {
    counter: SlidingWindowCounter,
    threshold: u32,
}

impl ViolationBudget {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self {
            counter: SlidingWindowCounter::new(store),
            threshold: VIOLATION_THRESHOLD,
        }
    }

    pub fn record(&self, ip: &str) {
        self.record_at(ip, now_ms());
    }

    pub fn record_at(&self, ip: &str, now_ms: u64) {
        let decision = self.counter.check_at(ip, self.threshold, now_ms);
        if decision.remaining == 0 {
            tracing::warn!(client = %ip, "Violation budget exhausted");
        }
    }

    pub fn is_exceeded(&self, ip: &str) -> bool {
        self.is_exceeded_at(ip, now_ms())
    }

    pub fn is_exceeded_at(&self, ip: &str, now_ms: u64) -> bool {
        self.counter
            .current(ip, now_ms)
            .is_some_and(|w| w.count >= self.threshold)
    }

    pub fn snapshot(&self) -> Vec<(String, Window)> {
        self.counter.store().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> SlidingWindowCounter {
        SlidingWindowCounter::new(Arc::new(InMemoryWindowStore::new()))
    }

    #[test]
    fn test_limit_then_block_then_reset() {
        let counter = counter();
        let start = 1_700_000_000_000;

        let mut last_remaining = u32::MAX;
        for i in 0..5 {
            let decision = counter.check_at("k", 5, start + i);
            assert!(decision.allowed);
            assert!(decision.remaining < last_remaining);
            last_remaining = decision.remaining;
        }
        assert_eq!(last_remaining, 0);

        let denied = counter.check_at("k", 5, start + 10);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_time_ms, start + WINDOW_MS);

        let fresh = counter.check_at("k", 5, start + WINDOW_MS);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
        assert_eq!(fresh.reset_time_ms, start + 2 * WINDOW_MS);
    }

    #[test]
    fn test_keys_are_independent() {
        let counter = counter();
        assert!(counter.check_at("a", 1, 1_000).allowed);
        assert!(!counter.check_at("a", 1, 1_001).allowed);
        assert!(counter.check_at("b", 1, 1_002).allowed);
    }

    #[test]
    fn test_sweep_on_write() {
        let store: Arc<dyn WindowStore> = Arc::new(InMemoryWindowStore::new());
        let counter = SlidingWindowCounter::new(store.clone());

        counter.check_at("old", 10, 0);
        counter.check_at("recent", 10, WINDOW_MS);
        assert_eq!(store.len(), 2);

        counter.check_at("new", 10, 2 * WINDOW_MS + 1);
        let keys: Vec<String> = store.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["new".to_string(), "recent".to_string()]);
    }

    #[test]
    fn test_sweep_runs_once_per_window() {
        let store: Arc<dyn WindowStore> = Arc::new(InMemoryWindowStore::new());
        let counter = SlidingWindowCounter::new(store.clone());
        let start = 10 * WINDOW_MS;

        counter.check_at("a", 10, start);
        store.set(
            "stale",
            Window {
                window_start_ms: 0,
                count: 1,
                blocked: false,
            },
        );

        // Still inside the window since the last sweep.
        counter.check_at("b", 10, start + 1);
        assert_eq!(store.len(), 3);

        counter.check_at("c", 10, start + WINDOW_MS);
        let keys: Vec<String> = store.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_decision_timing_helpers() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 30,
            remaining: 0,
            reset_time_ms: 1_700_000_060_000,
        };
        assert_eq!(decision.retry_after_secs(1_700_000_000_001), 60);
        assert_eq!(decision.retry_after_secs(1_700_000_070_000), 0);
        assert_eq!(decision.reset_rfc3339(), "2023-11-14T22:14:20.000Z");
    }

    #[test]
    fn test_violation_budget() {
        let budget = ViolationBudget::new(Arc::new(InMemoryWindowStore::new()));
        let now = 5_000_000;

        for i in 0..(VIOLATION_THRESHOLD - 1) as u64 {
            budget.record_at("203.0.113.9", now + i);
        }
        assert!(!budget.is_exceeded_at("203.0.113.9", now + 100));

        budget.record_at("203.0.113.9", now + 200);
        assert!(budget.is_exceeded_at("203.0.113.9", now + 300));
        assert!(!budget.is_exceeded_at("198.51.100.1", now + 300));
        assert!(!budget.is_exceeded_at("203.0.113.9", now + WINDOW_MS));
        assert_eq!(budget.snapshot().len(), 1);
    }
}
