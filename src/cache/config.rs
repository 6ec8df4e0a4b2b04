//! Cache configuration.
//!
//! Controls capacity, the default freshness window and miss-path waiting via
//! the `[cache]` section of `revalidate.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::profile::FreshnessProfile;

const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Cache configuration from `revalidate.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries before least-recently-used eviction.
    pub max_entries: usize,
    /// Freshness window applied when a caller does not pick one.
    pub default_profile: FreshnessProfile,
    /// Upper bound (ms) a miss-path read waits for its computation.
    pub wait_timeout_ms: u64,
    /// Drop recomputed values whose fingerprint was purged mid-flight.
    pub discard_superseded: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_profile: FreshnessProfile::Hours,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            discard_superseded: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            default_profile: settings.default_profile,
            wait_timeout_ms: settings.wait_timeout.as_millis() as u64,
            discard_superseded: settings.discard_superseded,
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Miss-path wait bound; `None` when disabled with zero.
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_ms > 0).then(|| Duration::from_millis(self.wait_timeout_ms))
    }

    pub fn default_window(&self) -> Duration {
        self.default_profile.window()
    }
}
