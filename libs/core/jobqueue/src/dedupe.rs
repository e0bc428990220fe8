//! Duplicate suppression via bucketed dedupe keys.
//!
//! Callers derive a key from the job name and the current period bucket
//! (e.g., "paris-fetch-28435123" for a per-minute bucket) so repeated
//! enqueues inside one period collapse to a single job. Claimed keys are
//! garbage collected after a fixed retention; the worker drives a sweep
//! once a minute.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a claimed key suppresses duplicates.
const RETENTION: Duration = Duration::from_secs(300);

/// Guarded set of recently claimed dedupe keys.
pub struct DedupeSet {
    retention: Duration,
    claimed: Mutex<HashMap<String, Instant>>,
    suppressed_total: Mutex<u64>,
}

impl DedupeSet {
    pub fn new() -> Self {
        Self::with_retention(RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            retention,
            claimed: Mutex::new(HashMap::new()),
            suppressed_total: Mutex::new(0),
        }
    }

    /// Claim a key. Returns `false` (and counts a suppression) when the key
    /// was already claimed inside the retention window.
    pub fn try_claim(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut claimed = self.claimed.lock().unwrap();

        match claimed.get(key) {
            Some(at) if now.duration_since(*at) < self.retention => {
                *self.suppressed_total.lock().unwrap() += 1;
                false
            }
            _ => {
                claimed.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Derive the bucketed key for a job name and period.
    ///
    /// `now_ms` is the current epoch time in milliseconds; the bucket index
    /// is `floor(now / period)`.
    pub fn bucket_key(name: &str, now_ms: u64, period: Duration) -> String {
        let bucket = now_ms / period.as_millis().max(1) as u64;
        format!("{}-{}", name, bucket)
    }

    /// Drop keys older than the retention window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut claimed = self.claimed.lock().unwrap();
        claimed.retain(|_, at| now.duration_since(*at) < self.retention);
    }

    /// Number of keys currently claimed.
    pub fn len(&self) -> usize {
        self.claimed.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total suppressed enqueues since startup (observable via stats).
    pub fn suppressed_total(&self) -> u64 {
        *self.suppressed_total.lock().unwrap()
    }
}

impl Default for DedupeSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_then_suppress() {
        let set = DedupeSet::new();

        assert!(set.try_claim("paris-fetch-100"));
        assert!(!set.try_claim("paris-fetch-100"));
        assert!(!set.try_claim("paris-fetch-100"));
        assert_eq!(set.suppressed_total(), 2);
    }

    #[test]
    fn test_distinct_buckets_both_claim() {
        let set = DedupeSet::new();

        assert!(set.try_claim("paris-fetch-100"));
        assert!(set.try_claim("paris-fetch-101"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.suppressed_total(), 0);
    }

    #[test]
    fn test_bucket_key_stable_within_period() {
        let minute = Duration::from_secs(60);

        let a = DedupeSet::bucket_key("paris-fetch", 1_700_000_030_000, minute);
        let b = DedupeSet::bucket_key("paris-fetch", 1_700_000_059_999, minute);
        assert_eq!(a, b);

        let c = DedupeSet::bucket_key("paris-fetch", 1_700_000_060_000, minute);
        assert_ne!(a, c);
    }

    #[test]
    fn test_expired_key_can_reclaim() {
        let set = DedupeSet::with_retention(Duration::from_millis(10));

        assert!(set.try_claim("k"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(set.try_claim("k"));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let set = DedupeSet::with_retention(Duration::from_millis(10));

        set.try_claim("a");
        set.try_claim("b");
        assert_eq!(set.len(), 2);

        std::thread::sleep(Duration::from_millis(20));
        set.sweep();
        assert!(set.is_empty());
    }
}
