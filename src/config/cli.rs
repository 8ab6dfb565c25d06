use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the Motorway binary.
#[derive(Debug, Parser)]
#[command(
    name = "motorway",
    version,
    about = "Caching and search front for the car catalog API"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MOTORWAY_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and administrative HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Build the search index once into the shared store and exit.
    #[command(name = "reindex")]
    Reindex(ReindexArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverride {
    /// Override the shared store URL (redis://...).
    #[arg(long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,

    /// Enable or disable the shared store.
    #[arg(
        long = "store-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub store_enabled: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CatalogOverride {
    /// Override the catalog document path.
    #[arg(long = "catalog-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverride,

    #[command(flatten)]
    pub catalog: CatalogOverride,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the base URL background revalidation requests are sent to.
    #[arg(long = "server-public-base-url", value_name = "URL")]
    pub public_base_url: Option<String>,

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

    /// Override the shared store pool size.
    #[arg(long = "store-pool-size", value_name = "COUNT")]
    pub store_pool_size: Option<u32>,

    /// Enable the response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the response key format version.
    #[arg(long = "cache-key-version", value_name = "VERSION")]
    pub cache_key_version: Option<String>,

    /// Override how often a waiting request re-checks for a refill.
    #[arg(long = "cache-wait-attempts", value_name = "COUNT")]
    pub cache_wait_attempts: Option<u32>,

    /// Override the search index refresh interval.
    #[arg(long = "search-refresh-interval-seconds", value_name = "SECONDS")]
    pub search_refresh_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReindexArgs {
    #[command(flatten)]
    pub store: StoreOverride,

    #[command(flatten)]
    pub catalog: CatalogOverride,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}
