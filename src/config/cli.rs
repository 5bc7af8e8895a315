use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::fingerprint::FingerprintAlgorithm;

/// Command-line arguments for the fascio binary.
#[derive(Debug, Parser)]
#[command(name = "fascio", version, about = "Request-time JS/CSS bundler")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FASCIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve bundled resources over HTTP.
    Serve(Box<ServeArgs>),
    /// Print the fingerprint of one or more files.
    Digest(DigestArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the directory resources are read from.
    #[arg(long = "resources-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub resources_root: Option<PathBuf>,

    /// Override the group model file.
    #[arg(long = "resources-model-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub resources_model_file: Option<PathBuf>,

    /// Override the URL prefix served by the bundler.
    #[arg(long = "resources-prefix", value_name = "PREFIX")]
    pub resources_prefix: Option<String>,

    /// Override the processed-artifact cache capacity.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<usize>,

    /// Seconds between cache flushes; beats `filter.cache-update-period`.
    #[arg(long = "cache-update-period", value_name = "SECONDS")]
    pub cache_update_period: Option<u64>,

    /// Seconds between group model reloads; beats `filter.model-update-period`.
    #[arg(long = "model-update-period", value_name = "SECONDS")]
    pub model_update_period: Option<u64>,

    /// Output charset; beats `filter.encoding`.
    #[arg(long = "encoding", value_name = "CHARSET")]
    pub encoding: Option<String>,

    /// Management identifier; beats `filter.management-id`.
    #[arg(long = "management-id", value_name = "ID")]
    pub management_id: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct DigestArgs {
    /// Fingerprint algorithm (md5|sha1|crc32|sha256).
    #[arg(long, short = 'a', default_value = "crc32", value_name = "ALGORITHM")]
    pub algorithm: FingerprintAlgorithm,

    /// Files to fingerprint.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath, required = true)]
    pub files: Vec<PathBuf>,
}
