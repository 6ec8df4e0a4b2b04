//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::FreshnessProfile;

mod cli;

pub use cli::{CliArgs, Command, DashboardArgs, DemoArgs, Overrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "revalidate";
const ENV_PREFIX: &str = "REVALIDATE";
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READ_LATENCY_MS: u64 = 2_500;
const DEFAULT_LIST_LATENCY_MS: u64 = 500;
const DEFAULT_WRITE_LATENCY_MS: u64 = 300;
const DEFAULT_DASHBOARD_READ_LATENCY_MS: u64 = 300;
const DEFAULT_DASHBOARD_WRITE_LATENCY_MS: u64 = 150;
const DEFAULT_SEED_POSTS: usize = 1_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: NonZeroUsize,
    pub default_profile: FreshnessProfile,
    /// Zero means a miss waits for its computation without bound.
    pub wait_timeout: Duration,
    pub discard_superseded: bool,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Post detail reads.
    pub read_latency: Duration,
    /// Recent-posts listings.
    pub list_latency: Duration,
    pub write_latency: Duration,
    pub dashboard_read_latency: Duration,
    pub dashboard_write_latency: Duration,
    pub seed_posts: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Demo(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Dashboard(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&Overrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    store: RawStoreSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max_entries) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max_entries);
        }
        if let Some(profile) = overrides.cache_default_profile.as_ref() {
            self.cache.default_profile = Some(profile.clone());
        }
        if let Some(wait) = overrides.cache_wait_timeout_ms {
            self.cache.wait_timeout_ms = Some(wait);
        }
        if let Some(discard) = overrides.cache_discard_superseded {
            self.cache.discard_superseded = Some(discard);
        }
        if let Some(latency) = overrides.store_read_latency_ms {
            self.store.read_latency_ms = Some(latency);
        }
        if let Some(latency) = overrides.store_list_latency_ms {
            self.store.list_latency_ms = Some(latency);
        }
        if let Some(latency) = overrides.store_write_latency_ms {
            self.store.write_latency_ms = Some(latency);
        }
        if let Some(latency) = overrides.store_dashboard_read_latency_ms {
            self.store.dashboard_read_latency_ms = Some(latency);
        }
        if let Some(latency) = overrides.store_dashboard_write_latency_ms {
            self.store.dashboard_write_latency_ms = Some(latency);
        }
        if let Some(count) = overrides.store_seed_posts {
            self.store.seed_posts = Some(count);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            store,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            store: build_store_settings(store),
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries = NonZeroUsize::new(cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES))
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;

    let default_profile = match cache.default_profile {
        Some(profile) => FreshnessProfile::from_str(&profile)
            .map_err(|err| LoadError::invalid("cache.default_profile", err.to_string()))?,
        None => FreshnessProfile::Hours,
    };

    Ok(CacheSettings {
        max_entries,
        default_profile,
        wait_timeout: Duration::from_millis(
            cache.wait_timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS),
        ),
        discard_superseded: cache.discard_superseded.unwrap_or(true),
    })
}

fn build_store_settings(store: RawStoreSettings) -> StoreSettings {
    let millis = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

    StoreSettings {
        read_latency: millis(store.read_latency_ms, DEFAULT_READ_LATENCY_MS),
        list_latency: millis(store.list_latency_ms, DEFAULT_LIST_LATENCY_MS),
        write_latency: millis(store.write_latency_ms, DEFAULT_WRITE_LATENCY_MS),
        dashboard_read_latency: millis(
            store.dashboard_read_latency_ms,
            DEFAULT_DASHBOARD_READ_LATENCY_MS,
        ),
        dashboard_write_latency: millis(
            store.dashboard_write_latency_ms,
            DEFAULT_DASHBOARD_WRITE_LATENCY_MS,
        ),
        seed_posts: store.seed_posts.unwrap_or(DEFAULT_SEED_POSTS),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entries: Option<usize>,
    default_profile: Option<String>,
    wait_timeout_ms: Option<u64>,
    discard_superseded: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    read_latency_ms: Option<u64>,
    list_latency_ms: Option<u64>,
    write_latency_ms: Option<u64>,
    dashboard_read_latency_ms: Option<u64>,
    dashboard_write_latency_ms: Option<u64>,
    seed_posts: Option<usize>,
}

#[cfg(test)]
mod tests;
