//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::store::pool::PoolConfig;

const LOCAL_CONFIG_BASENAME: &str = "proxy-cache";
const ENV_PREFIX: &str = "PROXY_CACHE";
const DEFAULT_CACHE_TIMEOUT_SECS: u64 = 360;
const DEFAULT_STORE_ADDRESS: &str = "127.0.0.1:6379";
const DEFAULT_STORE_CAPACITY: usize = 16;
const DEFAULT_STORE_MAX_IDLE: usize = 8;
const DEFAULT_STORE_IDLE_TIMEOUT_SECS: u64 = 240;
const DEFAULT_STORE_WAIT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_KEY_PREFIX: &str = "proxy-cache:";
const DEFAULT_REVALIDATION_TIMEOUT_MS: u64 = 10_000;

/// Command-line arguments for the `proxy-cache` binary.
#[derive(Debug, Parser)]
#[command(
    name = "proxy-cache",
    version,
    about = "Inspect and exercise the shared HTTP response cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PROXY_CACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the cached entry for a URI.
    Get { uri: String },
    /// Fetch a URI through the cache: serve, revalidate, or fetch and store.
    Fetch { uri: String },
    /// Remove the cached entry for a URI.
    Delete { uri: String },
    /// Remove entries that have been idle for at least the given age.
    Clear {
        #[arg(long = "idle-seconds", value_name = "SECONDS", default_value_t = 3600)]
        idle_seconds: u64,
    },
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the store address (`host:port` or a `redis://` URL).
    #[arg(long = "store-address", value_name = "ADDR")]
    pub store_address: Option<String>,

    /// Override the default freshness lifetime in seconds.
    #[arg(long = "cache-timeout", value_name = "SECONDS")]
    pub cache_timeout: Option<u64>,

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
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub revalidation: RevalidationSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Freshness lifetime for responses without explicit cache directives.
    pub cache_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub address: String,
    pub password: Option<String>,
    pub capacity: usize,
    pub max_idle: usize,
    pub idle_timeout: Duration,
    pub wait_timeout: Duration,
    pub key_prefix: String,
}

impl StoreSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.capacity,
            max_idle: self.max_idle,
            idle_timeout: self.idle_timeout,
            wait_timeout: self.wait_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevalidationSettings {
    pub timeout: Duration,
    /// Explicit egress proxy; `None` defers to the proxy environment variables.
    pub upstream_proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
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
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    store: RawStoreSettings,
    revalidation: RawRevalidationSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    cache_timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    address: Option<String>,
    password: Option<String>,
    capacity: Option<usize>,
    max_idle: Option<usize>,
    idle_timeout_seconds: Option<u64>,
    wait_timeout_ms: Option<u64>,
    key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRevalidationSettings {
    timeout_ms: Option<u64>,
    upstream_proxy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(address) = overrides.store_address.as_ref() {
            self.store.address = Some(address.clone());
        }
        if let Some(seconds) = overrides.cache_timeout {
            self.server.cache_timeout = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let capacity = raw.store.capacity.unwrap_or(DEFAULT_STORE_CAPACITY);
        if capacity == 0 {
            return Err(LoadError::invalid("store.capacity", "must be at least 1"));
        }
        let max_idle = raw.store.max_idle.unwrap_or(DEFAULT_STORE_MAX_IDLE);
        if max_idle > capacity {
            return Err(LoadError::invalid(
                "store.max_idle",
                format!("{max_idle} exceeds store.capacity ({capacity})"),
            ));
        }

        let address = non_empty(raw.store.address).unwrap_or_else(|| DEFAULT_STORE_ADDRESS.into());

        let level = match raw.logging.level.as_deref() {
            Some(level) => LevelFilter::from_str(level)
                .map_err(|e| LoadError::invalid("logging.level", e.to_string()))?,
            None => LevelFilter::INFO,
        };
        let format = if raw.logging.json.unwrap_or(false) {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };

        Ok(Self {
            server: ServerSettings {
                cache_timeout: Duration::from_secs(
                    raw.server.cache_timeout.unwrap_or(DEFAULT_CACHE_TIMEOUT_SECS),
                ),
            },
            store: StoreSettings {
                address,
                password: non_empty(raw.store.password),
                capacity,
                max_idle,
                idle_timeout: Duration::from_secs(
                    raw.store
                        .idle_timeout_seconds
                        .unwrap_or(DEFAULT_STORE_IDLE_TIMEOUT_SECS),
                ),
                wait_timeout: Duration::from_millis(
                    raw.store
                        .wait_timeout_ms
                        .unwrap_or(DEFAULT_STORE_WAIT_TIMEOUT_MS),
                ),
                key_prefix: raw
                    .store
                    .key_prefix
                    .unwrap_or_else(|| DEFAULT_KEY_PREFIX.into()),
            },
            revalidation: RevalidationSettings {
                timeout: Duration::from_millis(
                    raw.revalidation
                        .timeout_ms
                        .unwrap_or(DEFAULT_REVALIDATION_TIMEOUT_MS),
                ),
                upstream_proxy: non_empty(raw.revalidation.upstream_proxy),
            },
            logging: LoggingSettings { level, format },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
