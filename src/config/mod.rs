//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;
#[cfg(test)]
mod tests;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CatalogOverride, CliArgs, Command, ReindexArgs, ServeArgs, ServeOverrides, StoreOverride,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "motorway";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORE_POOL_SIZE: u32 = 16;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CACHE_KEY_VERSION: &str = "v2";
const DEFAULT_CACHE_API_ROOT: &str = "/api";
const DEFAULT_CACHE_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_CACHE_WAIT_INTERVAL_MS: u64 = 100;
const DEFAULT_CACHE_WAIT_ATTEMPTS: u32 = 1;
const DEFAULT_CACHE_REVALIDATE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_BODY_LIMIT_BYTES: usize = 1024 * 1024;
const DEFAULT_CACHE_HEALTH_MIN_HIT_RATE: f64 = 0.5;
const DEFAULT_CACHE_HEALTH_MIN_SAMPLES: u64 = 100;
const DEFAULT_SEARCH_REFRESH_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_SEARCH_PREFIX_SCAN_LIMIT: usize = 50;
const DEFAULT_SEARCH_DEFAULT_LIMIT: usize = 10;
const DEFAULT_SEARCH_MAX_LIMIT: usize = 50;
const DEFAULT_CATALOG_PATH: &str = "data/catalog.json";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    /// Where this process reaches its own public listener.
    pub public_base_url: String,
    pub graceful_shutdown: Duration,
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
pub struct StoreSettings {
    pub url: Option<String>,
    pub enabled: bool,
    pub pool_size: NonZeroU32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub key_version: String,
    pub api_root: String,
    pub lock_ttl: Duration,
    pub wait_interval: Duration,
    pub wait_attempts: u32,
    pub revalidate_timeout: Duration,
    pub body_limit_bytes: NonZeroUsize,
    pub health_min_hit_rate: f64,
    pub health_min_samples: u64,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub refresh_interval: Duration,
    pub prefix_scan_limit: NonZeroUsize,
    pub default_limit: NonZeroUsize,
    pub max_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub path: PathBuf,
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

    builder = builder.add_source(Environment::with_prefix("MOTORWAY").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Reindex(args)) => raw.apply_reindex_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    search: RawSearchSettings,
    catalog: RawCatalogSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(url) = overrides.public_base_url.as_ref() {
            self.server.public_base_url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(size) = overrides.store_pool_size {
            self.store.pool_size = Some(size);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(version) = overrides.cache_key_version.as_ref() {
            self.cache.key_version = Some(version.clone());
        }
        if let Some(attempts) = overrides.cache_wait_attempts {
            self.cache.wait_attempts = Some(attempts);
        }
        if let Some(seconds) = overrides.search_refresh_interval_seconds {
            self.search.refresh_interval_seconds = Some(seconds);
        }

        self.apply_store_override(&overrides.store);
        self.apply_catalog_override(&overrides.catalog);
    }

    fn apply_reindex_overrides(&mut self, args: &ReindexArgs) {
        if let Some(level) = args.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        self.apply_store_override(&args.store);
        self.apply_catalog_override(&args.catalog);
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.store_enabled {
            self.store.enabled = Some(enabled);
        }
    }

    fn apply_catalog_override(&mut self, overrides: &CatalogOverride) {
        if let Some(path) = overrides.catalog_path.as_ref() {
            self.catalog.path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            search,
            catalog,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let cache = build_cache_settings(cache)?;
        let search = build_search_settings(search)?;
        let catalog = build_catalog_settings(catalog)?;

        Ok(Self {
            server,
            logging,
            store,
            cache,
            search,
            catalog,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let public_base_url = match server.public_base_url {
        Some(url) => {
            url::Url::parse(&url).map_err(|err| {
                LoadError::invalid("server.public_base_url", format!("failed to parse: {err}"))
            })?;
            url
        }
        None => default_base_url(public_addr),
    };

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        public_base_url,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

/// Loopback URL of the public listener; unspecified binds are reached on localhost.
fn default_base_url(addr: SocketAddr) -> String {
    let mut addr = addr;
    if addr.ip().is_unspecified() {
        addr.set_ip(if addr.is_ipv4() {
            std::net::Ipv4Addr::LOCALHOST.into()
        } else {
            std::net::Ipv6Addr::LOCALHOST.into()
        });
    }
    format!("http://{addr}")
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

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let url = store.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let pool_size = non_zero_u32(
        store.pool_size.unwrap_or(DEFAULT_STORE_POOL_SIZE).into(),
        "store.pool_size",
    )?;

    let timeout_ms = store.timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "store.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(StoreSettings {
        url,
        enabled: store.enabled.unwrap_or(true),
        pool_size,
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let key_version = cache
        .key_version
        .unwrap_or_else(|| DEFAULT_CACHE_KEY_VERSION.to_string());
    if key_version.is_empty() || key_version.contains(':') {
        return Err(LoadError::invalid(
            "cache.key_version",
            "must be non-empty and must not contain `:`",
        ));
    }

    let api_root = cache
        .api_root
        .unwrap_or_else(|| DEFAULT_CACHE_API_ROOT.to_string());
    if !api_root.starts_with('/') {
        return Err(LoadError::invalid("cache.api_root", "must start with `/`"));
    }

    let lock_ttl_secs = cache.lock_ttl_secs.unwrap_or(DEFAULT_CACHE_LOCK_TTL_SECS);
    if lock_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.lock_ttl_secs",
            "must be greater than zero",
        ));
    }

    let revalidate_secs = cache
        .revalidate_timeout_secs
        .unwrap_or(DEFAULT_CACHE_REVALIDATE_TIMEOUT_SECS);
    if revalidate_secs == 0 {
        return Err(LoadError::invalid(
            "cache.revalidate_timeout_secs",
            "must be greater than zero",
        ));
    }

    let body_limit_bytes = non_zero_usize(
        cache
            .body_limit_bytes
            .unwrap_or(DEFAULT_CACHE_BODY_LIMIT_BYTES),
        "cache.body_limit_bytes",
    )?;

    let health_min_hit_rate = cache
        .health_min_hit_rate
        .unwrap_or(DEFAULT_CACHE_HEALTH_MIN_HIT_RATE);
    if !(0.0..=1.0).contains(&health_min_hit_rate) {
        return Err(LoadError::invalid(
            "cache.health_min_hit_rate",
            "must be between 0 and 1",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        key_version,
        api_root,
        lock_ttl: Duration::from_secs(lock_ttl_secs),
        wait_interval: Duration::from_millis(
            cache
                .wait_interval_ms
                .unwrap_or(DEFAULT_CACHE_WAIT_INTERVAL_MS),
        ),
        wait_attempts: cache.wait_attempts.unwrap_or(DEFAULT_CACHE_WAIT_ATTEMPTS),
        revalidate_timeout: Duration::from_secs(revalidate_secs),
        body_limit_bytes,
        health_min_hit_rate,
        health_min_samples: cache
            .health_min_samples
            .unwrap_or(DEFAULT_CACHE_HEALTH_MIN_SAMPLES),
    })
}

fn build_search_settings(search: RawSearchSettings) -> Result<SearchSettings, LoadError> {
    let refresh_secs = search
        .refresh_interval_seconds
        .unwrap_or(DEFAULT_SEARCH_REFRESH_INTERVAL_SECS);
    if refresh_secs == 0 {
        return Err(LoadError::invalid(
            "search.refresh_interval_seconds",
            "must be greater than zero",
        ));
    }

    let prefix_scan_limit = non_zero_usize(
        search
            .prefix_scan_limit
            .unwrap_or(DEFAULT_SEARCH_PREFIX_SCAN_LIMIT),
        "search.prefix_scan_limit",
    )?;
    let default_limit = non_zero_usize(
        search.default_limit.unwrap_or(DEFAULT_SEARCH_DEFAULT_LIMIT),
        "search.default_limit",
    )?;
    let max_limit = non_zero_usize(
        search.max_limit.unwrap_or(DEFAULT_SEARCH_MAX_LIMIT),
        "search.max_limit",
    )?;
    if default_limit > max_limit {
        return Err(LoadError::invalid(
            "search.default_limit",
            "must not exceed search.max_limit",
        ));
    }

    Ok(SearchSettings {
        refresh_interval: Duration::from_secs(refresh_secs),
        prefix_scan_limit,
        default_limit,
        max_limit,
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let path = catalog
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid("catalog.path", "path must not be empty"));
    }
    Ok(CatalogSettings { path })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    public_base_url: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    url: Option<String>,
    enabled: Option<bool>,
    pool_size: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    key_version: Option<String>,
    api_root: Option<String>,
    lock_ttl_secs: Option<u64>,
    wait_interval_ms: Option<u64>,
    wait_attempts: Option<u32>,
    revalidate_timeout_secs: Option<u64>,
    body_limit_bytes: Option<usize>,
    health_min_hit_rate: Option<f64>,
    health_min_samples: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSearchSettings {
    refresh_interval_seconds: Option<u64>,
    prefix_scan_limit: Option<usize>,
    default_limit: Option<usize>,
    max_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    path: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
