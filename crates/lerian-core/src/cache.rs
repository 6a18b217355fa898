//! Single-slot cache with a time-to-live

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Holds one value until `ttl` elapses or it is invalidated.
///
/// Uses the tokio clock so paused-time tests can drive expiry.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value, if present and still fresh.
    pub fn get(&self) -> Option<T> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    pub fn set(&self, value: T) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((Instant::now(), value));
    }

    /// Drop the cached value.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// Alias of [`TtlCache::invalidate`] for callers resetting all state.
    pub fn clear(&self) {
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn value_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(120));
        cache.set(7);
        assert_eq!(cache.get(), Some(7));

        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(cache.get(), Some(7));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(), None);
    }

    #[tokio::test]
    async fn invalidate_empties_slot() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("report".to_string());
        cache.invalidate();
        assert_eq!(cache.get(), None);
        cache.set("again".to_string());
        cache.clear();
        assert_eq!(cache.get(), None);
    }
}
