use super::*;

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.cache.max_entries.get(), DEFAULT_MAX_ENTRIES);
    assert_eq!(settings.cache.default_profile, FreshnessProfile::Hours);
    assert_eq!(settings.cache.wait_timeout, Duration::from_secs(10));
    assert!(settings.cache.discard_superseded);
    assert_eq!(settings.store.read_latency, Duration::from_millis(2_500));
    assert_eq!(settings.store.list_latency, Duration::from_millis(500));
    assert_eq!(settings.store.dashboard_read_latency, Duration::from_millis(300));
    assert_eq!(settings.store.dashboard_write_latency, Duration::from_millis(150));
    assert_eq!(settings.store.seed_posts, DEFAULT_SEED_POSTS);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(500);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        cache_max_entries: Some(64),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.max_entries.get(), 64);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_max_entries_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(0);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.max_entries",
            ..
        }
    ));
}

#[test]
fn unknown_profile_names_the_key() {
    let mut raw = RawSettings::default();
    raw.cache.default_profile = Some("fortnightly".to_string());

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(err.to_string().contains("cache.default_profile"));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn profile_override_is_case_insensitive() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&Overrides {
        cache_default_profile: Some("Minutes".to_string()),
        cache_wait_timeout_ms: Some(0),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.default_profile, FreshnessProfile::Minutes);
    assert_eq!(settings.cache.wait_timeout, Duration::ZERO);
}

#[test]
fn cache_settings_convert_to_library_config() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let config = crate::cache::CacheConfig::from(&settings.cache);

    assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);
    assert_eq!(config.wait_timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
    assert!(config.discard_superseded);
}

#[test]
fn default_to_demo_command() {
    let args = CliArgs::parse_from(["revalidate"]);
    let command = args.command.unwrap_or_default();
    assert!(matches!(command, Command::Demo(_)));
}

#[test]
fn parse_demo_arguments() {
    let args = CliArgs::parse_from([
        "revalidate",
        "demo",
        "--readers",
        "16",
        "--slug",
        "post-7",
        "--store-read-latency-ms",
        "10",
    ]);

    match args.command.expect("demo command") {
        Command::Demo(demo) => {
            assert_eq!(demo.readers, 16);
            assert_eq!(demo.slug, "post-7");
            assert_eq!(demo.overrides.store_read_latency_ms, Some(10));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_dashboard_overrides() {
    let args = CliArgs::parse_from([
        "revalidate",
        "dashboard",
        "--log-json",
        "true",
        "--cache-discard-superseded",
        "false",
    ]);

    match args.command.expect("dashboard command") {
        Command::Dashboard(dashboard) => {
            assert_eq!(dashboard.overrides.log_json, Some(true));
            assert_eq!(dashboard.overrides.cache_discard_superseded, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn store_latencies_are_configured_per_view() {
    let mut raw = RawSettings::default();
    raw.store.read_latency_ms = Some(1_000);
    let overrides = Overrides {
        store_list_latency_ms: Some(40),
        store_dashboard_read_latency_ms: Some(20),
        store_dashboard_write_latency_ms: Some(10),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.store.read_latency, Duration::from_secs(1));
    assert_eq!(settings.store.list_latency, Duration::from_millis(40));
    assert_eq!(settings.store.write_latency, Duration::from_millis(300));
    assert_eq!(settings.store.dashboard_read_latency, Duration::from_millis(20));
    assert_eq!(settings.store.dashboard_write_latency, Duration::from_millis(10));
}
