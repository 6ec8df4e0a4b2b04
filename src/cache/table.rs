//! Entry table: cached values keyed by fingerprint.
//!
//! Entries and the tag index live behind one mutex, so every write or removal
//! updates both directions of the index before any reader can observe the
//! entry. Capacity is bounded with LRU eviction.

use std::collections::{BTreeSet, HashSet};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::entry::{CacheEntry, Lookup};
use super::keys::{Fingerprint, Tag};
use super::lock::mutex_lock;
use super::registry::TagIndex;

const SOURCE: &str = "cache::table";

pub(crate) const METRIC_FRESH: &str = "revalidate_cache_fresh_total";
pub(crate) const METRIC_STALE: &str = "revalidate_cache_stale_total";
pub(crate) const METRIC_MISS: &str = "revalidate_cache_miss_total";
pub(crate) const METRIC_EVICT: &str = "revalidate_cache_evict_total";

struct TableState<P> {
    entries: LruCache<Fingerprint, CacheEntry<P>>,
    tags: TagIndex,
}

impl<P> TableState<P> {
    fn remove(&mut self, fingerprint: &Fingerprint) -> bool {
        self.tags.unregister(fingerprint);
        self.entries.pop(fingerprint).is_some()
    }
}

/// Entry and tag index disagree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("entry `{fingerprint}` carries tag `{tag}` which the index does not map back")]
    Unindexed { fingerprint: Fingerprint, tag: Tag },
    #[error("index maps `{fingerprint}` under `{tag}` but the entry does not carry it")]
    Phantom { fingerprint: Fingerprint, tag: Tag },
    #[error("index direction mismatch for `{fingerprint}` / `{tag}`")]
    Asymmetric { fingerprint: Fingerprint, tag: Tag },
}

/// Cache of computed values with a bidirectional tag index.
pub struct EntryTable<P> {
    state: Mutex<TableState<P>>,
}

impl<P> EntryTable<P>
where
    P: Clone,
{
    /// Create a new entry table with the configured capacity.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_capacity(config.max_entries_non_zero())
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(TableState {
                entries: LruCache::new(capacity),
                tags: TagIndex::new(),
            }),
        }
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Lookup<P> {
        self.lookup_at(fingerprint, Instant::now())
    }

    /// Classify the entry for `fingerprint` as of `now`.
    pub fn lookup_at(&self, fingerprint: &Fingerprint, now: Instant) -> Lookup<P> {
        let mut state = mutex_lock(&self.state, SOURCE, "lookup");
        let lookup = match state.entries.get(fingerprint) {
            Some(entry) if entry.is_fresh_at(now) => Lookup::Fresh(entry.payload.clone()),
            Some(entry) => Lookup::Stale(entry.payload.clone()),
            None => Lookup::Miss,
        };
        drop(state);

        let metric = match &lookup {
            Lookup::Fresh(_) => METRIC_FRESH,
            Lookup::Stale(_) => METRIC_STALE,
            Lookup::Miss => METRIC_MISS,
        };
        counter!(metric).increment(1);
        lookup
    }

    pub fn store<I>(&self, fingerprint: Fingerprint, payload: P, tags: I, window: Duration)
    where
        I: IntoIterator<Item = Tag>,
    {
        self.store_at(fingerprint, payload, tags, window, Instant::now());
    }

    /// Replace the entry for `fingerprint`, re-indexing its tags.
    ///
    /// Returns the fingerprint evicted to make room, if any.
    pub fn store_at<I>(
        &self,
        fingerprint: Fingerprint,
        payload: P,
        tags: I,
        window: Duration,
        computed_at: Instant,
    ) -> Option<Fingerprint>
    where
        I: IntoIterator<Item = Tag>,
    {
        let entry = CacheEntry {
            fingerprint,
            payload,
            tags: tags.into_iter().collect(),
            computed_at,
            window,
        };
        self.write(entry, || false).1
    }

    /// Store the entry unless `skip` returns true. `skip` runs inside the
    /// table's critical section, so a purge that lands concurrently either
    /// finds the entry and removes it or is seen by `skip`.
    ///
    /// Returns whether the entry was written.
    pub fn store_unless<I, F>(
        &self,
        fingerprint: Fingerprint,
        payload: P,
        tags: I,
        window: Duration,
        skip: F,
    ) -> bool
    where
        I: IntoIterator<Item = Tag>,
        F: FnOnce() -> bool,
    {
        let entry = CacheEntry {
            fingerprint,
            payload,
            tags: tags.into_iter().collect(),
            computed_at: Instant::now(),
            window,
        };
        self.write(entry, skip).0
    }

    fn write<F>(&self, entry: CacheEntry<P>, skip: F) -> (bool, Option<Fingerprint>)
    where
        F: FnOnce() -> bool,
    {
        let fingerprint = entry.fingerprint.clone();
        let mut state = mutex_lock(&self.state, SOURCE, "store");
        if skip() {
            return (false, None);
        }
        state.tags.register(&fingerprint, &entry.tags);

        let displaced = state.entries.push(fingerprint.clone(), entry);
        match displaced {
            Some((evicted, _)) if evicted != fingerprint => {
                state.tags.unregister(&evicted);
                drop(state);
                counter!(METRIC_EVICT).increment(1);
                debug!(fingerprint = %evicted, "evicted least recently used entry");
                (true, Some(evicted))
            }
            _ => (true, None),
        }
    }

    /// Delete an entry and its tag mappings. Returns whether one existed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        mutex_lock(&self.state, SOURCE, "remove").remove(fingerprint)
    }

    /// Remove every entry indexed under `tag`. Idempotent.
    pub fn invalidate_tag(&self, tag: &Tag) -> HashSet<Fingerprint> {
        let mut state = mutex_lock(&self.state, SOURCE, "invalidate_tag");
        let fingerprints = state.tags.fingerprints_for(tag);
        for fingerprint in &fingerprints {
            state.remove(fingerprint);
        }
        fingerprints
    }

    /// Remove one entry regardless of its tags. Idempotent.
    pub fn invalidate_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        self.remove(fingerprint)
    }

    /// Snapshot of the entry without touching recency.
    pub fn entry(&self, fingerprint: &Fingerprint) -> Option<CacheEntry<P>> {
        mutex_lock(&self.state, SOURCE, "entry")
            .entries
            .peek(fingerprint)
            .cloned()
    }

    pub fn tags_of(&self, fingerprint: &Fingerprint) -> BTreeSet<Tag> {
        mutex_lock(&self.state, SOURCE, "tags_of")
            .tags
            .tags_for(fingerprint)
    }

    pub fn fingerprints_for(&self, tag: &Tag) -> HashSet<Fingerprint> {
        mutex_lock(&self.state, SOURCE, "fingerprints_for")
            .tags
            .fingerprints_for(tag)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        state.entries.clear();
        state.tags.clear();
    }

    /// Verify that entries and the tag index agree in both directions.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        let state = mutex_lock(&self.state, SOURCE, "check_consistency");

        for (fingerprint, entry) in state.entries.iter() {
            let indexed = state.tags.tags_for(fingerprint);
            if let Some(tag) = entry.tags.difference(&indexed).next() {
                return Err(ConsistencyError::Unindexed {
                    fingerprint: fingerprint.clone(),
                    tag: tag.clone(),
                });
            }
            if let Some(tag) = indexed.difference(&entry.tags).next() {
                return Err(ConsistencyError::Phantom {
                    fingerprint: fingerprint.clone(),
                    tag: tag.clone(),
                });
            }
        }

        for (fingerprint, tag) in state.tags.pairs() {
            if !state.entries.contains(fingerprint) {
                return Err(ConsistencyError::Phantom {
                    fingerprint: fingerprint.clone(),
                    tag: tag.clone(),
                });
            }
        }

        match state.tags.find_asymmetry() {
            Some((fingerprint, tag)) => Err(ConsistencyError::Asymmetric { fingerprint, tag }),
            None => Ok(()),
        }
    }
}
