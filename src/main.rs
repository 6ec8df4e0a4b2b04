use std::{process, sync::Arc, time::Duration};

use futures::future::join_all;
use revalidate::{
    application::{
        dashboard::{DASHBOARD_KEY, ReactiveHub},
        error::AppError,
        posts::{ContentEngine, DEFAULT_RECENT_LIMIT, post_fingerprint, seed_posts},
        repos::Record,
    },
    cache::{CacheConfig, CacheStatus, FreshnessProfile},
    config,
    domain::{
        entities::{DashboardData, Post},
        types::ServerStatus,
    },
    infra::{error::InfraError, memory::MemoryStore, telemetry},
};
use tokio::time::Instant;
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.chain(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args.command.unwrap_or_default();

    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings.cache);
    info!(
        target = "revalidate::startup",
        max_entries = cache_config.max_entries,
        default_profile = %cache_config.default_profile,
        wait_timeout_ms = cache_config.wait_timeout_ms,
        discard_superseded = cache_config.discard_superseded,
        "Cache configured"
    );

    match command {
        config::Command::Demo(args) => run_demo(&settings, cache_config, args).await,
        config::Command::Dashboard(_) => run_dashboard(&settings, cache_config).await,
    }
}

async fn run_demo(
    settings: &config::Settings,
    cache_config: CacheConfig,
    args: config::DemoArgs,
) -> Result<(), AppError> {
    if settings.store.seed_posts == 0 {
        return Err(
            InfraError::configuration("store.seed_posts must be positive for the demo").into(),
        );
    }

    let store = Arc::new(
        MemoryStore::new()
            .with_latency(settings.store.read_latency, settings.store.write_latency)
            .with_list_latency(settings.store.list_latency),
    );
    store.seed(seed_posts(settings.store.seed_posts));
    let engine = ContentEngine::new(store.clone(), &cache_config);
    let slug = args.slug.as_str();

    info!(
        target = "revalidate::demo",
        posts = store.len(),
        read_latency_ms = settings.store.read_latency.as_millis() as u64,
        list_latency_ms = settings.store.list_latency.as_millis() as u64,
        "Store seeded"
    );

    // Cold then warm read.
    timed_read(&engine, slug).await?;
    timed_read(&engine, slug).await?;

    // Concurrent misses share one store read.
    engine.post_cache().purge_by_fingerprint(post_fingerprint(slug));
    let reads_before = store.reads();
    let started_at = Instant::now();
    let readers = args.readers.max(1);
    let results = join_all((0..readers).map(|_| engine.get_post(slug))).await;
    let failures = results.iter().filter(|result| result.is_err()).count();
    info!(
        target = "revalidate::demo",
        readers,
        failures,
        store_reads = store.reads() - reads_before,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Stampede collapsed"
    );

    // Short-lived entry goes stale and refreshes in the background.
    let short_lived = engine.clone().with_window(FreshnessProfile::Seconds.window());
    short_lived
        .post_cache()
        .purge_by_fingerprint(post_fingerprint(slug));
    timed_read(&short_lived, slug).await?;
    tokio::time::sleep(FreshnessProfile::Seconds.window() + Duration::from_millis(100)).await;
    timed_read(&short_lived, slug).await?;
    wait_for_revalidation(&short_lived).await;
    timed_read(&short_lived, slug).await?;

    // Writes purge, the next read goes back to the store.
    let updated = engine
        .update_post(slug, "Updated body content from the CMS webhook.")
        .await?;
    debug!(
        target = "revalidate::demo",
        record = %render(&updated),
        "Post updated"
    );
    timed_read(&engine, slug).await?;

    let recent = engine.recent_posts(DEFAULT_RECENT_LIMIT).await?;
    info!(
        target = "revalidate::demo",
        count = recent.len(),
        "Recent posts listed"
    );

    let purged = engine.purge_posts();
    info!(target = "revalidate::demo", purged, "Purged every post view");

    match engine.get_post("post-does-not-exist").await {
        Err(err) if err.is_not_found() => {
            info!(target = "revalidate::demo", error = %err, "Unknown slug not found");
        }
        Err(err) => return Err(err.into()),
        Ok(_) => return Err(AppError::unexpected("unknown slug resolved to a post")),
    }

    Ok(())
}

async fn run_dashboard(
    settings: &config::Settings,
    cache_config: CacheConfig,
) -> Result<(), AppError> {
    let store = Arc::new(MemoryStore::new().with_latency(
        settings.store.dashboard_read_latency,
        settings.store.dashboard_write_latency,
    ));
    store.seed([(DASHBOARD_KEY.to_string(), DashboardData::default())]);
    let hub = ReactiveHub::new(store.clone(), &cache_config);

    let started_at = Instant::now();
    let data = hub.dashboard().await?;
    info!(
        target = "revalidate::dashboard",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        total_views = data.total_views,
        "Dashboard loaded"
    );

    let views = hub.increment_views().await?;
    info!(target = "revalidate::dashboard", views, "Views incremented");

    let status = hub.update_status(ServerStatus::Degraded).await?;
    info!(target = "revalidate::dashboard", status = %status, "Status changed");

    let notification = hub.add_notification("Deploy finished").await?;
    info!(
        target = "revalidate::dashboard",
        id = %notification.id,
        "Notification posted"
    );

    if let Err(err) = hub.add_notification("   ").await {
        warn!(target = "revalidate::dashboard", error = %err, "Notification rejected");
    }

    let started_at = Instant::now();
    let data = hub.dashboard().await?;
    info!(
        target = "revalidate::dashboard",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        store_reads = store.reads(),
        dashboard = %render(&data),
        "Dashboard reloaded after purge"
    );

    Ok(())
}

async fn timed_read(engine: &ContentEngine, slug: &str) -> Result<Record<Post>, AppError> {
    let started_at = Instant::now();
    let (record, status) = engine.read_post(slug).await?;
    info!(
        target = "revalidate::demo",
        slug,
        status = %status,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Read post"
    );
    if status == CacheStatus::Stale {
        debug!(target = "revalidate::demo", slug, "Revalidation scheduled");
    }
    Ok(record)
}

async fn wait_for_revalidation(engine: &ContentEngine) {
    while engine.post_cache().in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn render<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("<unserializable: {err}>"))
}
