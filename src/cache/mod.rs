//! Tagged revalidating cache.
//!
//! Read results are stored under a [`Fingerprint`] together with a set of
//! [`Tag`]s and a freshness window:
//!
//! - **Fresh** entries are served directly.
//! - **Stale** entries are served immediately while one background task
//!   recomputes them.
//! - **Misses** block on a single shared computation per fingerprint.
//!
//! Mutations purge by tag or by fingerprint; the next read recomputes.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_entries = 10000
//! default_profile = "hours"
//! wait_timeout_ms = 10000
//! discard_superseded = true
//! ```

mod config;
mod coordinator;
mod entry;
mod error;
mod keys;
pub(crate) mod lock;
mod profile;
mod registry;
mod revalidating;
mod table;

pub use config::CacheConfig;
pub use coordinator::{Claim, Coordinator, FlightGuard, Waiter};
pub use entry::{CacheEntry, CacheStatus, Lookup};
pub use error::CacheError;
pub use keys::{Fingerprint, Tag, hash_value};
pub use profile::{FreshnessProfile, UnknownProfile};
pub use registry::TagIndex;
pub use revalidating::RevalidatingCache;
pub use table::{ConsistencyError, EntryTable};

pub(crate) use table::{METRIC_EVICT, METRIC_FRESH, METRIC_MISS, METRIC_STALE};
pub(crate) use revalidating::{
    METRIC_COMPUTE_MS, METRIC_PURGED, METRIC_REVALIDATE_FAILED, METRIC_SUPERSEDED,
};
