//! Cached computation results and their freshness.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use super::keys::{Fingerprint, Tag};

/// Materialized result of a read computation.
#[derive(Debug, Clone)]
pub struct CacheEntry<P> {
    pub fingerprint: Fingerprint,
    pub payload: P,
    pub tags: BTreeSet<Tag>,
    pub computed_at: Instant,
    pub window: Duration,
}

impl<P> CacheEntry<P> {
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.computed_at) < self.window
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.computed_at)
    }
}

/// Outcome of an entry-table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<P> {
    Fresh(P),
    Stale(P),
    Miss,
}

impl<P> Lookup<P> {
    pub fn status(&self) -> CacheStatus {
        match self {
            Lookup::Fresh(_) => CacheStatus::Fresh,
            Lookup::Stale(_) => CacheStatus::Stale,
            Lookup::Miss => CacheStatus::Miss,
        }
    }

    pub fn payload(self) -> Option<P> {
        match self {
            Lookup::Fresh(payload) | Lookup::Stale(payload) => Some(payload),
            Lookup::Miss => None,
        }
    }
}

/// How a read was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    Fresh,
    Stale,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Fresh => "fresh",
            CacheStatus::Stale => "stale",
            CacheStatus::Miss => "miss",
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(window: Duration) -> CacheEntry<&'static str> {
        CacheEntry {
            fingerprint: Fingerprint::from("post-1"),
            payload: "v1",
            tags: BTreeSet::new(),
            computed_at: Instant::now(),
            window,
        }
    }

    #[test]
    fn fresh_until_window_elapses() {
        let entry = entry(Duration::from_secs(60));
        let start = entry.computed_at;

        assert!(entry.is_fresh_at(start));
        assert!(entry.is_fresh_at(start + Duration::from_secs(59)));
        assert!(!entry.is_fresh_at(start + Duration::from_secs(60)));
        assert_eq!(
            entry.age_at(start + Duration::from_secs(90)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn zero_window_is_immediately_stale() {
        let entry = entry(Duration::ZERO);
        assert!(!entry.is_fresh_at(entry.computed_at));
    }

    #[test]
    fn lookup_payload_and_status() {
        assert_eq!(Lookup::Fresh(1).status(), CacheStatus::Fresh);
        assert_eq!(Lookup::Stale(2).payload(), Some(2));
        assert_eq!(Lookup::<u8>::Miss.payload(), None);
    }
}
