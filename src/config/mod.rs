//! Configuration layer: typed settings with layered precedence (file → env → CLI).
//!
//! The `[filter]` table is passed through untouched as the property mapping of
//! the runtime configuration; the remaining tables configure the process.

mod cli;

use std::{
    collections::HashMap, net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::runtime_config::RuntimeConfigBuilder;

pub use cli::{CliArgs, Command, DigestArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fascio";
const ENV_PREFIX: &str = "FASCIO";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_RESOURCES_ROOT: &str = "resources";
const DEFAULT_MODEL_FILE: &str = "config/groups.toml";
const DEFAULT_PREFIX: &str = "/wro";
const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub resources: ResourceSettings,
    pub cache: CacheSettings,
    pub filter: FilterSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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
pub struct ResourceSettings {
    pub root: PathBuf,
    pub model_file: PathBuf,
    /// Normalized URL prefix: leading `/`, no trailing `/`.
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity: NonZeroUsize,
}

/// Filter properties plus the typed overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct FilterSettings {
    pub properties: HashMap<String, String>,
    pub overrides: FilterOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOverrides {
    pub cache_update_period: Option<u64>,
    pub model_update_period: Option<u64>,
    pub encoding: Option<String>,
    pub management_id: Option<String>,
}

impl FilterSettings {
    /// A runtime configuration builder seeded with the properties, with the
    /// command-line overrides applied on top.
    pub fn runtime_config_builder(&self) -> RuntimeConfigBuilder {
        let mut builder = RuntimeConfigBuilder::new().properties(self.properties.clone());
        if let Some(seconds) = self.overrides.cache_update_period {
            builder = builder.cache_update_period(seconds);
        }
        if let Some(seconds) = self.overrides.model_update_period {
            builder = builder.model_update_period(seconds);
        }
        if let Some(encoding) = self.overrides.encoding.as_ref() {
            builder = builder.encoding(Some(encoding.clone()));
        }
        if let Some(id) = self.overrides.management_id.as_ref() {
            builder = builder.management_id(Some(id.clone()));
        }
        builder
    }
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
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Digest(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    resources: RawResourceSettings,
    cache: RawCacheSettings,
    filter: HashMap<String, String>,
    #[serde(skip)]
    filter_overrides: FilterOverrides,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(root) = overrides.resources_root.as_ref() {
            self.resources.root = Some(root.clone());
        }
        if let Some(path) = overrides.resources_model_file.as_ref() {
            self.resources.model_file = Some(path.clone());
        }
        if let Some(prefix) = overrides.resources_prefix.as_ref() {
            self.resources.prefix = Some(prefix.clone());
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }

        self.filter_overrides = FilterOverrides {
            cache_update_period: overrides.cache_update_period,
            model_update_period: overrides.model_update_period,
            encoding: overrides.encoding.clone(),
            management_id: overrides.management_id.clone(),
        };
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            resources,
            cache,
            filter,
            filter_overrides,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let resources = build_resource_settings(resources)?;
        let cache = build_cache_settings(cache)?;
        let filter = build_filter_settings(filter, filter_overrides);

        Ok(Self {
            server,
            logging,
            resources,
            cache,
            filter,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

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
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_resource_settings(resources: RawResourceSettings) -> Result<ResourceSettings, LoadError> {
    let root = resources
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCES_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "resources.root",
            "path must not be empty",
        ));
    }

    let model_file = resources
        .model_file
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_FILE));
    if model_file.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "resources.model_file",
            "path must not be empty",
        ));
    }

    let prefix = normalize_prefix(resources.prefix.as_deref().unwrap_or(DEFAULT_PREFIX))
        .map_err(|reason| LoadError::invalid("resources.prefix", reason))?;

    Ok(ResourceSettings {
        root,
        model_file,
        prefix,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    let capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.capacity", "must be greater than zero"))?;
    Ok(CacheSettings { capacity })
}

/// Property keys are hyphenated; `_` is accepted so that the keys can be set
/// through environment variables.
fn build_filter_settings(
    filter: HashMap<String, String>,
    overrides: FilterOverrides,
) -> FilterSettings {
    let properties = filter
        .into_iter()
        .map(|(key, value)| (key.trim().to_ascii_lowercase().replace('_', "-"), value))
        .collect();
    FilterSettings {
        properties,
        overrides,
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
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
struct RawResourceSettings {
    root: Option<PathBuf>,
    model_file: Option<PathBuf>,
    prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    capacity: Option<usize>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn normalize_prefix(prefix: &str) -> Result<String, String> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err("prefix must name at least one path segment".to_string());
    }
    if trimmed.contains(['?', '#', ' ']) {
        return Err(format!("prefix `{prefix}` contains reserved characters"));
    }
    Ok(format!("/{trimmed}"))
}
