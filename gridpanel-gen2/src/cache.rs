//! Per-key time-window cache.
//!
//! Entries are valid while `now - created_at <= window`. A zero window
//! disables the cache entirely: gets miss, puts are dropped. Values are only
//! installed after a fully successful upstream operation, so a failed fetch
//! never refreshes an entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TimedCache<V> {
    window: Duration,
    entries: HashMap<String, (V, Instant)>,
}

impl<V: Clone> TimedCache<V> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        self.entries
            .get(key)
            .filter(|(_, created_at)| created_at.elapsed() <= self.window)
            .map(|(value, _)| value.clone())
    }

    pub fn put(&mut self, key: impl Into<String>, value: V) {
        if !self.is_enabled() {
            return;
        }
        self.entries.insert(key.into(), (value, Instant::now()));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_window() {
        let mut cache = TimedCache::new(Duration::from_secs(60));
        cache.put("status", 7);
        assert_eq!(cache.get("status"), Some(7));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn entry_expires_after_window() {
        let mut cache = TimedCache::new(Duration::from_millis(10));
        cache.put("status", 7);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get("status"), None);
    }

    #[test]
    fn zero_window_disables_everything() {
        let mut cache = TimedCache::new(Duration::ZERO);
        assert!(!cache.is_enabled());
        cache.put("status", 7);
        assert_eq!(cache.get("status"), None);
    }

    #[test]
    fn clear_drops_all_entries() {
        let mut cache = TimedCache::new(Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn put_refreshes_creation_time() {
        let mut cache = TimedCache::new(Duration::from_millis(50));
        cache.put("k", 1);
        std::thread::sleep(Duration::from_millis(30));
        cache.put("k", 2);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), Some(2));
    }
}
