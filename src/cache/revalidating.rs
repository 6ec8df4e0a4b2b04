//! Stale-while-revalidate read path and purge entry points.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::config::CacheConfig;
use super::coordinator::{Claim, Coordinator, FlightGuard};
use super::entry::{CacheStatus, Lookup};
use super::error::CacheError;
use super::keys::{Fingerprint, Tag};
use super::table::EntryTable;

pub(crate) const METRIC_PURGED: &str = "revalidate_cache_purged_total";
pub(crate) const METRIC_REVALIDATE_FAILED: &str = "revalidate_cache_revalidate_failed_total";
pub(crate) const METRIC_SUPERSEDED: &str = "revalidate_cache_superseded_total";
pub(crate) const METRIC_COMPUTE_MS: &str = "revalidate_cache_compute_ms";

/// Tagged cache that serves stale values while refreshing them.
///
/// Cloning is cheap; clones share the same entries and in-flight state.
pub struct RevalidatingCache<P> {
    config: CacheConfig,
    table: Arc<EntryTable<P>>,
    coordinator: Coordinator<P>,
}

impl<P> Clone for RevalidatingCache<P> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            table: Arc::clone(&self.table),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<P> RevalidatingCache<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        let table = Arc::new(EntryTable::new(&config));
        Self {
            config,
            table,
            coordinator: Coordinator::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn table(&self) -> &EntryTable<P> {
        &self.table
    }

    /// Classify a fingerprint without triggering any computation.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Lookup<P> {
        self.table.lookup(fingerprint)
    }

    /// Number of recomputations that new reads can still join. Work
    /// superseded by a purge is no longer counted.
    pub fn in_flight(&self) -> usize {
        self.coordinator.in_flight()
    }

    /// Read `fingerprint`, computing it with `compute` when needed.
    ///
    /// Fresh entries return immediately. Stale entries return immediately and
    /// schedule one background refresh. Misses wait for a single shared
    /// computation, bounded by the configured wait timeout.
    pub async fn read<F, Fut, I, T>(
        &self,
        fingerprint: impl Into<Fingerprint>,
        compute: F,
        tags: I,
        window: Duration,
    ) -> Result<P, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<P, CacheError>> + Send + 'static,
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.read_with_status(fingerprint, compute, tags, window)
            .await
            .map(|(payload, _)| payload)
    }

    /// Same as [`read`](Self::read), also reporting how the read was served.
    #[instrument(skip_all, fields(fingerprint))]
    pub async fn read_with_status<F, Fut, I, T>(
        &self,
        fingerprint: impl Into<Fingerprint>,
        compute: F,
        tags: I,
        window: Duration,
    ) -> Result<(P, CacheStatus), CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<P, CacheError>> + Send + 'static,
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        let fingerprint = fingerprint.into();
        tracing::Span::current().record("fingerprint", tracing::field::display(&fingerprint));
        let tags: BTreeSet<Tag> = tags.into_iter().map(Into::into).collect();

        match self.table.lookup(&fingerprint) {
            Lookup::Fresh(payload) => {
                debug!(outcome = "fresh", "serving cached value");
                Ok((payload, CacheStatus::Fresh))
            }
            Lookup::Stale(payload) => {
                debug!(outcome = "stale", "serving stale value");
                self.revalidate_in_background(fingerprint, compute, tags, window);
                Ok((payload, CacheStatus::Stale))
            }
            Lookup::Miss => {
                debug!(outcome = "miss", "waiting for computation");
                let payload = self.compute_blocking(fingerprint, compute, tags, window).await?;
                Ok((payload, CacheStatus::Miss))
            }
        }
    }

    /// Remove every entry tagged `tag`. Idempotent.
    pub fn purge_by_tag(&self, tag: impl Into<Tag>) -> HashSet<Fingerprint> {
        let tag = tag.into();
        let superseded = self.coordinator.supersede_tag(&tag);
        let removed = self.table.invalidate_tag(&tag);

        counter!(METRIC_PURGED, "by" => "tag").increment(removed.len() as u64);
        info!(
            tag = %tag,
            removed = removed.len(),
            superseded,
            "Purged cache entries by tag"
        );
        removed
    }

    /// Remove one entry regardless of its tags. Idempotent.
    pub fn purge_by_fingerprint(&self, fingerprint: impl Into<Fingerprint>) -> bool {
        let fingerprint = fingerprint.into();
        let superseded = self.coordinator.supersede_fingerprint(&fingerprint);
        let removed = self.table.invalidate_fingerprint(&fingerprint);

        counter!(METRIC_PURGED, "by" => "fingerprint").increment(u64::from(removed));
        info!(
            fingerprint = %fingerprint,
            removed,
            superseded,
            "Purged cache entry by fingerprint"
        );
        removed
    }

    fn revalidate_in_background<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
        tags: BTreeSet<Tag>,
        window: Duration,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<P, CacheError>> + Send + 'static,
    {
        let guard = match self.coordinator.claim(&fingerprint, &tags) {
            Claim::Leader(guard) => guard,
            Claim::Follower(_) => {
                debug!(fingerprint = %fingerprint, "revalidation already in flight");
                return;
            }
        };

        let flight = Flight {
            table: Arc::clone(&self.table),
            guard,
            tags,
            window,
            discard_superseded: self.config.discard_superseded,
            background: true,
        };
        tokio::spawn(flight.run(compute));
    }

    async fn compute_blocking<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
        tags: BTreeSet<Tag>,
        window: Duration,
    ) -> Result<P, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<P, CacheError>> + Send + 'static,
    {
        let waiter = match self.coordinator.claim(&fingerprint, &tags) {
            Claim::Follower(waiter) => waiter,
            Claim::Leader(guard) => {
                // A flight may have landed between the lookup and the claim.
                let landed = self
                    .table
                    .entry(&fingerprint)
                    .filter(|entry| entry.is_fresh_at(Instant::now()));
                if let Some(entry) = landed {
                    guard.complete(Ok(entry.payload.clone()));
                    return Ok(entry.payload);
                }

                let waiter = guard.waiter();
                let flight = Flight {
                    table: Arc::clone(&self.table),
                    guard,
                    tags,
                    window,
                    discard_superseded: self.config.discard_superseded,
                    background: false,
                };
                tokio::spawn(flight.run(compute));
                waiter
            }
        };

        match self.config.wait_timeout() {
            Some(limit) => tokio::time::timeout(limit, waiter.wait())
                .await
                .map_err(|_| {
                    warn!(
                        fingerprint = %fingerprint,
                        waited_ms = limit.as_millis() as u64,
                        "Timed out waiting for cache computation"
                    );
                    CacheError::Timeout {
                        fingerprint: fingerprint.clone(),
                        waited: limit,
                    }
                })?,
            None => waiter.wait().await,
        }
    }
}

/// One claimed computation, run on its own task so a caller that gives up
/// waiting does not cancel it.
struct Flight<P> {
    table: Arc<EntryTable<P>>,
    guard: FlightGuard<P>,
    tags: BTreeSet<Tag>,
    window: Duration,
    discard_superseded: bool,
    background: bool,
}

impl<P> Flight<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn run<F, Fut>(self, compute: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P, CacheError>>,
    {
        let started_at = Instant::now();
        let outcome = compute().await;
        histogram!(
            METRIC_COMPUTE_MS,
            "path" => if self.background { "stale" } else { "miss" }
        )
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

        let fingerprint = self.guard.fingerprint().clone();
        match &outcome {
            Ok(payload) => self.persist(&fingerprint, payload),
            Err(error) if self.background => {
                counter!(METRIC_REVALIDATE_FAILED).increment(1);
                warn!(
                    fingerprint = %fingerprint,
                    error = %error,
                    "Background revalidation failed; keeping stale entry"
                );
            }
            Err(error) => {
                debug!(fingerprint = %fingerprint, error = %error, "computation failed");
            }
        }

        self.guard.complete(outcome);
    }

    fn persist(&self, fingerprint: &Fingerprint, payload: &P) {
        if !self.discard_superseded {
            self.table.store(
                fingerprint.clone(),
                payload.clone(),
                self.tags.iter().cloned(),
                self.window,
            );
            return;
        }

        // The purge marks the flight before it clears the table, so checking
        // under the table lock leaves no window where the result is visible.
        let written = self.table.store_unless(
            fingerprint.clone(),
            payload.clone(),
            self.tags.iter().cloned(),
            self.window,
            || self.guard.is_superseded(),
        );
        if !written {
            self.discard(fingerprint);
        }
    }

    fn discard(&self, fingerprint: &Fingerprint) {
        counter!(METRIC_SUPERSEDED).increment(1);
        debug!(
            fingerprint = %fingerprint,
            "Discarded result superseded by a purge"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn cache() -> RevalidatingCache<String> {
        RevalidatingCache::new(CacheConfig::default())
    }

    #[tokio::test]
    async fn miss_computes_and_caches() {
        let cache = cache();
        let (value, status) = cache
            .read_with_status(
                "post-1",
                || async { Ok("v1".to_string()) },
                ["posts", "post-1"],
                HOUR,
            )
            .await
            .expect("computed");

        assert_eq!(value, "v1");
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(
            cache.lookup(&Fingerprint::from("post-1")),
            Lookup::Fresh("v1".to_string())
        );
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn fresh_hit_skips_computation() {
        let cache = cache();
        cache
            .read("post-1", || async { Ok("v1".to_string()) }, ["posts"], HOUR)
            .await
            .expect("computed");

        let (value, status) = cache
            .read_with_status(
                "post-1",
                || async { Err(CacheError::computation("must not run")) },
                ["posts"],
                HOUR,
            )
            .await
            .expect("fresh hit");

        assert_eq!(value, "v1");
        assert_eq!(status, CacheStatus::Fresh);
    }

    #[tokio::test]
    async fn miss_failure_is_propagated_and_not_cached() {
        let cache = cache();
        let err = cache
            .read(
                "post-404",
                || async {
                    Err(CacheError::NotFound {
                        key: "post-404".to_string(),
                    })
                },
                ["posts"],
                HOUR,
            )
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(cache.lookup(&Fingerprint::from("post-404")), Lookup::Miss);
        assert_eq!(cache.table().check_consistency(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_read_returns_old_value_then_refreshes() {
        let cache = cache();
        let fp = Fingerprint::from("post-1");
        cache
            .read(fp.clone(), || async { Ok("v1".to_string()) }, ["posts", "post-1"], HOUR)
            .await
            .expect("v1");

        tokio::time::advance(HOUR).await;
        assert_eq!(cache.lookup(&fp), Lookup::Stale("v1".to_string()));

        let (value, status) = cache
            .read_with_status(fp.clone(), || async { Ok("v2".to_string()) }, ["posts", "post-1"], HOUR)
            .await
            .expect("stale");
        assert_eq!(value, "v1");
        assert_eq!(status, CacheStatus::Stale);

        while cache.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.lookup(&fp), Lookup::Fresh("v2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failure_keeps_entry_for_retry() {
        let cache = cache();
        let fp = Fingerprint::from("post-1");
        cache
            .read(fp.clone(), || async { Ok("v1".to_string()) }, ["posts"], HOUR)
            .await
            .expect("v1");
        tokio::time::advance(HOUR).await;

        let value = cache
            .read(fp.clone(), || async { Err(CacheError::computation("cms down")) }, ["posts"], HOUR)
            .await
            .expect("stale value survives failure");
        assert_eq!(value, "v1");

        while cache.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.lookup(&fp), Lookup::Stale("v1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reads_schedule_one_refresh() {
        let cache = cache();
        let fp = Fingerprint::from("post-1");
        cache
            .read(fp.clone(), || async { Ok("v1".to_string()) }, ["posts"], HOUR)
            .await
            .expect("v1");
        tokio::time::advance(HOUR).await;

        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            let value = cache
                .read(
                    fp.clone(),
                    move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok("v2".to_string())
                    },
                    ["posts"],
                    HOUR,
                )
                .await
                .expect("stale");
            assert_eq!(value, "v1");
        }

        while cache.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.lookup(&fp), Lookup::Fresh("v2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn miss_wait_times_out_but_computation_lands() {
        let cache = RevalidatingCache::new(CacheConfig {
            wait_timeout_ms: 100,
            ..Default::default()
        });
        let fp = Fingerprint::from("slow");

        let err = cache
            .read(
                fp.clone(),
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("late".to_string())
                },
                ["slow"],
                HOUR,
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CacheError::Timeout {
                fingerprint: fp.clone(),
                waited: Duration::from_millis(100),
            }
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.lookup(&fp), Lookup::Fresh("late".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_during_refresh_discards_result() {
        let cache = cache();
        let fp = Fingerprint::from("post-1");
        cache
            .read(fp.clone(), || async { Ok("v1".to_string()) }, ["posts"], HOUR)
            .await
            .expect("v1");
        tokio::time::advance(HOUR).await;

        cache
            .read(
                fp.clone(),
                || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok("v2-from-before-purge".to_string())
                },
                ["posts"],
                HOUR,
            )
            .await
            .expect("stale");

        assert_eq!(cache.purge_by_tag("posts"), HashSet::from([fp.clone()]));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.lookup(&fp), Lookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_during_refresh_is_last_write_wins_when_disabled() {
        let cache = RevalidatingCache::new(CacheConfig {
            discard_superseded: false,
            ..Default::default()
        });
        let fp = Fingerprint::from("post-1");
        cache
            .read(fp.clone(), || async { Ok("v1".to_string()) }, ["posts"], HOUR)
            .await
            .expect("v1");
        tokio::time::advance(HOUR).await;

        cache
            .read(
                fp.clone(),
                || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok("v2".to_string())
                },
                ["posts"],
                HOUR,
            )
            .await
            .expect("stale");
        cache.purge_by_fingerprint(fp.clone());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.lookup(&fp), Lookup::Fresh("v2".to_string()));
    }

    fn slow_read(
        cache: &RevalidatingCache<String>,
        value: &'static str,
    ) -> tokio::task::JoinHandle<Result<String, CacheError>> {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .read(
                    "post-1",
                    move || async move {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(value.to_string())
                    },
                    ["posts"],
                    HOUR,
                )
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn purge_during_miss_serves_waiters_without_caching() {
        let cache = cache();
        let fp = Fingerprint::from("post-1");
        let leader = slow_read(&cache, "before-purge");
        let follower = slow_read(&cache, "unused");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(cache.in_flight(), 1);
        assert!(cache.purge_by_tag("posts").is_empty());
        assert_eq!(cache.in_flight(), 0);

        assert_eq!(leader.await.expect("leader task"), Ok("before-purge".to_string()));
        assert_eq!(follower.await.expect("follower task"), Ok("before-purge".to_string()));
        assert_eq!(cache.lookup(&fp), Lookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn read_after_purge_does_not_join_superseded_miss() {
        let cache = cache();
        let fp = Fingerprint::from("post-1");
        let early = slow_read(&cache, "before-write");

        tokio::time::sleep(Duration::from_millis(500)).await;
        cache.purge_by_tag("posts");

        let (value, status) = cache
            .read_with_status(
                fp.clone(),
                || async { Ok("after-write".to_string()) },
                ["posts"],
                HOUR,
            )
            .await
            .expect("recomputed");
        assert_eq!((value.as_str(), status), ("after-write", CacheStatus::Miss));

        assert_eq!(early.await.expect("early task"), Ok("before-write".to_string()));
        assert_eq!(cache.lookup(&fp), Lookup::Fresh("after-write".to_string()));
        assert_eq!(cache.table().check_consistency(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn read_after_fingerprint_purge_starts_new_refresh() {
        let cache = cache();
        let fp = Fingerprint::from("post-1");
        cache
            .read(fp.clone(), || async { Ok("v1".to_string()) }, ["posts"], HOUR)
            .await
            .expect("v1");
        tokio::time::advance(HOUR).await;

        cache
            .read(
                fp.clone(),
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("v2-before-purge".to_string())
                },
                ["posts"],
                HOUR,
            )
            .await
            .expect("stale");
        assert!(cache.purge_by_fingerprint(fp.clone()));

        let value = cache
            .read(fp.clone(), || async { Ok("v3".to_string()) }, ["posts"], HOUR)
            .await
            .expect("recomputed");
        assert_eq!(value, "v3");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.lookup(&fp), Lookup::Fresh("v3".to_string()));
    }

    #[tokio::test]
    async fn purges_are_idempotent() {
        let cache = cache();
        cache
            .read("post-1", || async { Ok("v1".to_string()) }, ["posts"], HOUR)
            .await
            .expect("v1");

        assert!(cache.purge_by_fingerprint("post-1"));
        assert!(!cache.purge_by_fingerprint("post-1"));
        assert!(cache.purge_by_tag("posts").is_empty());
        assert!(cache.purge_by_tag("never-used").is_empty());
    }

    async fn explode() -> Result<String, CacheError> {
        panic!("computation panicked")
    }

    #[tokio::test]
    async fn panicking_computation_releases_waiters() {
        let cache = cache();
        let err = cache
            .read(
                "explodes",
                explode,
                Vec::<Tag>::new(),
                HOUR,
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CacheError::Abandoned {
                fingerprint: Fingerprint::from("explodes")
            }
        );
        assert_eq!(cache.in_flight(), 0);
    }
}
