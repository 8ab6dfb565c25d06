use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["motorway"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "motorway",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--store-url",
        "redis://cache:6379",
        "--catalog-path",
        "/srv/catalog.json",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.store.store_url.as_deref(),
                Some("redis://cache:6379")
            );
            assert_eq!(
                serve.overrides.catalog.catalog_path.as_deref(),
                Some(std::path::Path::new("/srv/catalog.json"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_reindex_arguments() {
    let args = CliArgs::parse_from([
        "motorway",
        "reindex",
        "--store-url",
        "redis://example",
        "--store-enabled=false",
    ]);

    match args.command.expect("reindex command") {
        Command::Reindex(reindex) => {
            assert_eq!(
                reindex.store.store_url.as_deref(),
                Some("redis://example")
            );
            assert_eq!(reindex.store.store_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_cache_cli_arguments() {
    let args = CliArgs::parse_from([
        "motorway",
        "serve",
        "--cache-enabled=false",
        "--cache-key-version",
        "v3",
        "--cache-wait-attempts",
        "4",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.cache_enabled, Some(false));
            assert_eq!(serve.overrides.cache_key_version.as_deref(), Some("v3"));
            assert_eq!(serve.overrides.cache_wait_attempts, Some(4));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn cache_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.key_version, "v2");
    assert_eq!(settings.cache.api_root, "/api");
    assert_eq!(settings.cache.lock_ttl, Duration::from_secs(10));
    assert_eq!(settings.cache.wait_interval, Duration::from_millis(100));
    assert_eq!(settings.cache.wait_attempts, 1);
    assert_eq!(settings.cache.revalidate_timeout, Duration::from_secs(30));
    assert_eq!(settings.cache.body_limit_bytes.get(), 1_048_576);
    assert_eq!(settings.cache.health_min_samples, 100);
}

#[test]
fn cache_settings_can_be_overridden_via_cli() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_enabled: Some(false),
        cache_key_version: Some("v3".to_string()),
        cache_wait_attempts: Some(0),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.key_version, "v3");
    assert_eq!(settings.cache.wait_attempts, 0);
    assert_eq!(settings.cache.lock_ttl, Duration::from_secs(10));
}

#[test]
fn key_version_rejects_separator() {
    let mut raw = RawSettings::default();
    raw.cache.key_version = Some("v2:x".to_string());

    let err = Settings::from_raw(raw).expect_err("separator in version");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.key_version",
            ..
        }
    ));
}

#[test]
fn hit_rate_threshold_must_be_a_ratio() {
    let mut raw = RawSettings::default();
    raw.cache.health_min_hit_rate = Some(1.5);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn search_defaults_and_limits() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(settings.search.refresh_interval, Duration::from_secs(1800));
    assert_eq!(settings.search.default_limit.get(), 10);
    assert_eq!(settings.search.max_limit.get(), 50);

    let mut raw = RawSettings::default();
    raw.search.default_limit = Some(60);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.search.refresh_interval_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn store_url_is_trimmed_and_blank_means_unset() {
    let mut raw = RawSettings::default();
    raw.store.url = Some("  ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.store.url.is_none());
    assert!(settings.store.enabled);

    let mut raw = RawSettings::default();
    raw.apply_reindex_overrides(&ReindexArgs {
        store: StoreOverride {
            store_url: Some(" redis://example ".to_string()),
            store_enabled: None,
        },
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.store.url.as_deref(), Some("redis://example"));
}

#[test]
fn public_base_url_follows_public_listener() {
    let mut raw = RawSettings::default();
    raw.server.host = Some("0.0.0.0".to_string());
    raw.server.public_port = Some(8080);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.server.public_base_url, "http://127.0.0.1:8080");

    let mut raw = RawSettings::default();
    raw.server.public_base_url = Some("not a url".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn zero_port_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.admin_port = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero port");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "server.admin_port",
            ..
        }
    ));
}
