use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the revalidate binary.
#[derive(Debug, Parser)]
#[command(name = "revalidate", version, about = "Tagged revalidating cache demo")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "REVALIDATE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Drive the content engine: cold reads, stampede, stale refresh, purge.
    Demo(DemoArgs),
    /// Drive the reactive dashboard hub through its mutations.
    Dashboard(DashboardArgs),
}

impl Default for Command {
    fn default() -> Self {
        Self::Demo(DemoArgs::default())
    }
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Number of simultaneous readers used for the stampede scenario.
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(usize))]
    pub readers: usize,

    /// Slug read and updated by the scenarios.
    #[arg(long, default_value = "post-1", value_name = "SLUG")]
    pub slug: String,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            overrides: Overrides::default(),
            readers: 8,
            slug: "post-1".to_string(),
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct DashboardArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the maximum number of cached entries.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<usize>,

    /// Override the default freshness profile (seconds|minutes|hours|days|weeks|max).
    #[arg(long = "cache-default-profile", value_name = "PROFILE")]
    pub cache_default_profile: Option<String>,

    /// Override how long a miss waits for its computation; 0 waits forever.
    #[arg(long = "cache-wait-timeout-ms", value_name = "MS")]
    pub cache_wait_timeout_ms: Option<u64>,

    /// Discard recomputed values whose fingerprint was purged mid-flight.
    #[arg(
        long = "cache-discard-superseded",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_discard_superseded: Option<bool>,

    /// Override the simulated post read latency.
    #[arg(long = "store-read-latency-ms", value_name = "MS")]
    pub store_read_latency_ms: Option<u64>,

    /// Override the simulated recent-posts listing latency.
    #[arg(long = "store-list-latency-ms", value_name = "MS")]
    pub store_list_latency_ms: Option<u64>,

    /// Override the simulated post write latency.
    #[arg(long = "store-write-latency-ms", value_name = "MS")]
    pub store_write_latency_ms: Option<u64>,

    /// Override the simulated dashboard read latency.
    #[arg(long = "store-dashboard-read-latency-ms", value_name = "MS")]
    pub store_dashboard_read_latency_ms: Option<u64>,

    /// Override the simulated dashboard write latency.
    #[arg(long = "store-dashboard-write-latency-ms", value_name = "MS")]
    pub store_dashboard_write_latency_ms: Option<u64>,

    /// Override the number of seeded posts.
    #[arg(long = "store-seed-posts", value_name = "COUNT")]
    pub store_seed_posts: Option<usize>,
}
