use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::application::error::ContentError;
use crate::application::repos::{Record, Store};
use crate::cache::{
    CacheConfig, CacheError, CacheStatus, Fingerprint, Lookup, RevalidatingCache, Tag, hash_value,
};
use crate::domain::entities::Post;

pub const POSTS_TAG: &str = "posts";
pub const POST_LIST_TAG: &str = "post-list";
pub const DEFAULT_RECENT_LIMIT: usize = 20;
const ROUTE: &str = "/content-engine";
const SEED_VIEW_CEILING: u64 = 10_000;

/// Deterministic seed records `post-1..=post-{count}`.
pub fn seed_posts(count: usize) -> impl Iterator<Item = (String, Post)> {
    (1..=count).map(|index| {
        let post = Post::seeded(index, hash_value(&index) % SEED_VIEW_CEILING);
        (post.slug.clone(), post)
    })
}

/// Fingerprint of the detail view for `slug`.
pub fn post_fingerprint(slug: &str) -> Fingerprint {
    Fingerprint::new(format!("{ROUTE}/{slug}"))
}

/// Fingerprint of the recent-posts listing. The default listing lives at the
/// bare route; other limits carry the limit as a parameter.
pub fn listing_fingerprint(limit: usize) -> Fingerprint {
    if limit == DEFAULT_RECENT_LIMIT {
        return Fingerprint::from_route(ROUTE, std::iter::empty());
    }
    let limit = limit.to_string();
    Fingerprint::from_route(ROUTE, [("limit", limit.as_str())])
}

/// Read-heavy post service backed by a slow store.
#[derive(Clone)]
pub struct ContentEngine {
    store: Arc<dyn Store<Post>>,
    posts: RevalidatingCache<Record<Post>>,
    listings: RevalidatingCache<Vec<Record<Post>>>,
    window: Duration,
}

impl ContentEngine {
    pub fn new(store: Arc<dyn Store<Post>>, config: &CacheConfig) -> Self {
        Self {
            store,
            posts: RevalidatingCache::new(config.clone()),
            listings: RevalidatingCache::new(config.clone()),
            window: config.default_window(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn post_cache(&self) -> &RevalidatingCache<Record<Post>> {
        &self.posts
    }

    pub fn listing_cache(&self) -> &RevalidatingCache<Vec<Record<Post>>> {
        &self.listings
    }

    pub async fn get_post(&self, slug: &str) -> Result<Record<Post>, ContentError> {
        self.read_post(slug).await.map(|(record, _)| record)
    }

    /// Read a post and report whether it came from a fresh entry, a stale
    /// entry, or the store.
    pub async fn read_post(
        &self,
        slug: &str,
    ) -> Result<(Record<Post>, CacheStatus), ContentError> {
        let store = Arc::clone(&self.store);
        let key = slug.to_string();

        self.posts
            .read_with_status(
                post_fingerprint(slug),
                move || async move { store.get(&key).await.map_err(CacheError::from) },
                [Tag::from(POSTS_TAG), Tag::new(slug)],
                self.window,
            )
            .await
            .map_err(ContentError::from)
    }

    pub async fn recent_posts(&self, limit: usize) -> Result<Vec<Record<Post>>, ContentError> {
        let store = Arc::clone(&self.store);

        self.listings
            .read(
                listing_fingerprint(limit),
                move || async move { Ok(store.list(limit).await) },
                [POSTS_TAG, POST_LIST_TAG],
                self.window,
            )
            .await
            .map_err(ContentError::from)
    }

    /// Replace a post's content, then purge its detail view and the listings.
    pub async fn update_post(
        &self,
        slug: &str,
        content: impl Into<String>,
    ) -> Result<Record<Post>, ContentError> {
        let content = content.into();
        let record = self
            .store
            .update(slug, Box::new(move |post: &mut Post| post.content = content))
            .await
            .map_err(CacheError::from)?;

        self.posts.purge_by_fingerprint(post_fingerprint(slug));
        self.listings
            .purge_by_fingerprint(listing_fingerprint(DEFAULT_RECENT_LIMIT));
        self.listings.purge_by_tag(POST_LIST_TAG);

        info!(slug, "Post updated and purged");
        Ok(record)
    }

    /// Drop every cached post view.
    pub fn purge_posts(&self) -> usize {
        self.posts.purge_by_tag(POSTS_TAG).len() + self.listings.purge_by_tag(POSTS_TAG).len()
    }

    pub fn lookup_post(&self, slug: &str) -> Lookup<Record<Post>> {
        self.posts.lookup(&post_fingerprint(slug))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::infra::memory::MemoryStore;

    const HOUR: Duration = Duration::from_secs(3600);

    fn engine(posts: usize) -> (Arc<MemoryStore<Post>>, ContentEngine) {
        let store = Arc::new(MemoryStore::new());
        store.seed(seed_posts(posts));
        let engine = ContentEngine::new(store.clone(), &CacheConfig::default());
        (store, engine)
    }

    #[test]
    fn seeding_is_deterministic() {
        let first: Vec<_> = seed_posts(3).collect();
        let second: Vec<_> = seed_posts(3).collect();
        assert_eq!(first, second);
        assert_eq!(first[0].0, "post-1");
        assert!(first.iter().all(|(_, post)| post.views < SEED_VIEW_CEILING));
    }

    #[test]
    fn listing_fingerprints_include_non_default_limits() {
        assert_eq!(listing_fingerprint(DEFAULT_RECENT_LIMIT).as_str(), "/content-engine");
        assert_eq!(listing_fingerprint(5).as_str(), "/content-engine?limit=5");
        assert_eq!(post_fingerprint("post-3").as_str(), "/content-engine/post-3");
    }

    #[tokio::test]
    async fn get_post_reads_store_once() {
        let (store, engine) = engine(5);

        let (first, status) = engine.read_post("post-2").await.expect("post");
        assert_eq!(status, CacheStatus::Miss);
        let (second, status) = engine.read_post("post-2").await.expect("post");
        assert_eq!(status, CacheStatus::Fresh);

        assert_eq!(first, second);
        assert_eq!(store.reads(), 1);
        assert_eq!(
            engine.post_cache().table().tags_of(&post_fingerprint("post-2")),
            [Tag::from("post-2"), Tag::from(POSTS_TAG)]
                .into_iter()
                .collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test]
    async fn unknown_slug_is_not_found_and_not_cached() {
        let (store, engine) = engine(1);

        let err = engine.get_post("post-99").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(engine.lookup_post("post-99"), Lookup::Miss);

        engine.get_post("post-99").await.unwrap_err();
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn update_post_purges_detail_and_listing() {
        let (_, engine) = engine(3);
        engine.get_post("post-1").await.expect("post");
        engine.recent_posts(DEFAULT_RECENT_LIMIT).await.expect("listing");
        engine.recent_posts(2).await.expect("short listing");

        let updated = engine.update_post("post-1", "rewritten").await.expect("update");
        assert_eq!(updated.payload.content, "rewritten");

        assert_eq!(engine.lookup_post("post-1"), Lookup::Miss);
        assert_eq!(
            engine
                .listing_cache()
                .lookup(&listing_fingerprint(DEFAULT_RECENT_LIMIT)),
            Lookup::Miss
        );
        assert_eq!(engine.listing_cache().lookup(&listing_fingerprint(2)), Lookup::Miss);

        let reread = engine.get_post("post-1").await.expect("post");
        assert_eq!(reread.payload.content, "rewritten");
    }

    #[tokio::test(start_paused = true)]
    async fn update_during_slow_read_is_visible_to_next_read() {
        let store = Arc::new(
            MemoryStore::new().with_latency(Duration::from_secs(1), Duration::ZERO),
        );
        store.seed(seed_posts(1));
        let engine = ContentEngine::new(store.clone(), &CacheConfig::default());

        let in_flight = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.get_post("post-1").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        engine.update_post("post-1", "rewritten").await.expect("update");
        let (reread, status) = engine.read_post("post-1").await.expect("post");
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(reread.payload.content, "rewritten");

        let earlier = in_flight.await.expect("reader task").expect("post");
        assert_ne!(earlier.payload.content, "rewritten");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.lookup_post("post-1"), Lookup::Fresh(reread));
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn update_unknown_post_fails_without_purging() {
        let (_, engine) = engine(1);
        engine.get_post("post-1").await.expect("post");

        let err = engine.update_post("post-7", "nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(engine.lookup_post("post-1"), Lookup::Fresh(_)));
    }

    #[tokio::test]
    async fn recent_posts_respects_limit() {
        let (_, engine) = engine(30);
        let recent = engine.recent_posts(DEFAULT_RECENT_LIMIT).await.expect("listing");
        assert_eq!(recent.len(), DEFAULT_RECENT_LIMIT);
        assert_eq!(recent[0].key, "post-1");
    }

    #[tokio::test]
    async fn purge_posts_clears_every_view() {
        let (_, engine) = engine(3);
        engine.get_post("post-1").await.expect("post");
        engine.get_post("post-2").await.expect("post");
        engine.recent_posts(DEFAULT_RECENT_LIMIT).await.expect("listing");

        assert_eq!(engine.purge_posts(), 3);
        assert_eq!(engine.purge_posts(), 0);
        assert_eq!(engine.lookup_post("post-1"), Lookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_post_is_served_then_refreshed() {
        let (store, engine) = engine(1);
        let engine = engine.with_window(HOUR);
        engine.get_post("post-1").await.expect("post");

        store
            .update(
                "post-1",
                Box::new(|post: &mut Post| post.title = "Revised".to_string()),
            )
            .await
            .expect("update");
        tokio::time::advance(HOUR).await;

        let (stale, status) = engine.read_post("post-1").await.expect("stale");
        assert_eq!(status, CacheStatus::Stale);
        assert_ne!(stale.payload.title, "Revised");

        while engine.post_cache().in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        let (fresh, status) = engine.read_post("post-1").await.expect("fresh");
        assert_eq!(status, CacheStatus::Fresh);
        assert_eq!(fresh.payload.title, "Revised");
    }
}
