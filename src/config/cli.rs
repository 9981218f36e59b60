use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the pinfall binary.
#[derive(Debug, Parser)]
#[command(name = "pinfall", version, about = "Bowling association website server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PINFALL_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP server and the scheduled refresh worker.
    Serve(Box<ServeArgs>),
    /// Fetch and republish one document, then exit.
    Refresh(RefreshArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SharedOverrides {
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

    /// Override the object storage directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the document source base URL.
    #[arg(long = "source-base-url", value_name = "URL")]
    pub source_base_url: Option<String>,

    /// Override the Redis URL used for the cache.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub shared: SharedOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Enable or disable cached document reads.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the scheduled refresh cron expression (seconds first).
    #[arg(long = "jobs-refresh-schedule", value_name = "CRON")]
    pub jobs_refresh_schedule: Option<String>,

    /// Override how many refresh jobs run at once.
    #[arg(long = "jobs-refresh-concurrency", value_name = "COUNT")]
    pub jobs_refresh_concurrency: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct RefreshArgs {
    #[command(flatten)]
    pub overrides: SharedOverrides,

    /// Identifier of the document to refresh.
    #[arg(value_name = "DOCUMENT")]
    pub document: String,
}
