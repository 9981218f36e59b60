//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashSet,
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::documents::{DEFAULT_CONTENT_TTL, default_documents};
use crate::application::jobs::{DEFAULT_REFRESH_SCHEDULE, refresh_schedule};
use crate::application::refresh::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_STATE_TTL};
use crate::cache::DEFAULT_TTL;
use crate::domain::documents::{DocumentId, WebsiteDocument};
use crate::infra::source::DEFAULT_SOURCE_TIMEOUT;

mod cli;

pub use cli::{CliArgs, Command, RefreshArgs, ServeArgs, ServeOverrides, SharedOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pinfall";
const ENV_PREFIX: &str = "PINFALL";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORAGE_DIR: &str = "storage";
const DEFAULT_SOURCE_BASE_URL: &str = "http://127.0.0.1:8090/documents/";
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 1024;
const DEFAULT_REFRESH_CONCURRENCY: usize = 2;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_CONTAINER: &str = "documents";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub source: SourceSettings,
    pub jobs: JobsSettings,
    pub documents: Vec<WebsiteDocument>,
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
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl: Duration,
    pub memory_entry_limit: NonZeroUsize,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    /// Seconds-first cron expression, already checked to parse.
    pub refresh_schedule: String,
    pub refresh_concurrency: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
    pub channel_capacity: NonZeroUsize,
    pub state_ttl: Duration,
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
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Refresh(args)) => raw.apply_shared_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
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
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    storage: RawStorageSettings,
    source: RawSourceSettings,
    jobs: RawJobsSettings,
    documents: Option<Vec<RawDocument>>,
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
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(schedule) = overrides.jobs_refresh_schedule.as_ref() {
            self.jobs.refresh_schedule = Some(schedule.clone());
        }
        if let Some(value) = overrides.jobs_refresh_concurrency {
            self.jobs.refresh_concurrency = Some(value);
        }

        self.apply_shared_overrides(&overrides.shared);
    }

    fn apply_shared_overrides(&mut self, overrides: &SharedOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(url) = overrides.source_base_url.as_ref() {
            self.source.base_url = Some(url.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            storage,
            source,
            jobs,
            documents,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            storage: build_storage_settings(storage)?,
            source: build_source_settings(source)?,
            jobs: build_jobs_settings(jobs)?,
            documents: build_documents(documents)?,
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
    let graceful_shutdown = positive_seconds(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl = match cache.default_ttl_seconds {
        Some(seconds) => positive_seconds(seconds, "cache.default_ttl_seconds")?,
        None => DEFAULT_TTL,
    };
    let memory_entry_limit = non_zero_usize(
        cache
            .memory_entry_limit
            .unwrap_or(DEFAULT_MEMORY_ENTRY_LIMIT),
        "cache.memory_entry_limit",
    )?;
    let redis_url = non_blank(cache.redis_url);
    if let Some(url) = redis_url.as_deref() {
        Url::parse(url)
            .map_err(|err| LoadError::invalid("cache.redis_url", format!("invalid url: {err}")))?;
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_ttl,
        memory_entry_limit,
        redis_url,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }
    Ok(StorageSettings { directory })
}

fn build_source_settings(source: RawSourceSettings) -> Result<SourceSettings, LoadError> {
    let base_url =
        non_blank(source.base_url).unwrap_or_else(|| DEFAULT_SOURCE_BASE_URL.to_string());
    let parsed = Url::parse(&base_url)
        .map_err(|err| LoadError::invalid("source.base_url", format!("invalid url: {err}")))?;
    if parsed.cannot_be_a_base() {
        return Err(LoadError::invalid(
            "source.base_url",
            "url must be able to carry a path",
        ));
    }

    let timeout = match source.timeout_seconds {
        Some(seconds) => positive_seconds(seconds, "source.timeout_seconds")?,
        None => DEFAULT_SOURCE_TIMEOUT,
    };

    Ok(SourceSettings { base_url, timeout })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let schedule = non_blank(jobs.refresh_schedule)
        .unwrap_or_else(|| DEFAULT_REFRESH_SCHEDULE.to_string());
    refresh_schedule(&schedule)
        .map_err(|err| LoadError::invalid("jobs.refresh_schedule", err.reason))?;

    let state_ttl = match jobs.state_ttl_seconds {
        Some(seconds) => positive_seconds(seconds, "jobs.state_ttl_seconds")?,
        None => DEFAULT_STATE_TTL,
    };

    Ok(JobsSettings {
        refresh_schedule: schedule,
        refresh_concurrency: non_zero_usize(
            jobs.refresh_concurrency
                .unwrap_or(DEFAULT_REFRESH_CONCURRENCY),
            "jobs.refresh_concurrency",
        )?,
        queue_capacity: non_zero_usize(
            jobs.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            "jobs.queue_capacity",
        )?,
        channel_capacity: non_zero_usize(
            jobs.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            "jobs.channel_capacity",
        )?,
        state_ttl,
    })
}

fn build_documents(raw: Option<Vec<RawDocument>>) -> Result<Vec<WebsiteDocument>, LoadError> {
    let Some(raw) = raw else {
        return Ok(default_documents());
    };
    if raw.is_empty() {
        return Err(LoadError::invalid(
            "documents",
            "at least one document must be configured",
        ));
    }

    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(raw.len());
    for entry in raw {
        let id = DocumentId::parse(&entry.id)
            .map_err(|err| LoadError::invalid("documents.id", err.to_string()))?;
        if !seen.insert(id.clone()) {
            return Err(LoadError::invalid(
                "documents.id",
                format!("`{id}` is configured more than once"),
            ));
        }

        let title = non_blank(entry.title).unwrap_or_else(|| id.to_string());
        let source_name = non_blank(entry.source_name).unwrap_or_else(|| title.clone());
        let content_ttl = match entry.content_ttl_seconds {
            Some(seconds) => positive_seconds(seconds, "documents.content_ttl_seconds")?,
            None => DEFAULT_CONTENT_TTL,
        };

        documents.push(WebsiteDocument {
            container: non_blank(entry.container).unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            blob_name: non_blank(entry.blob_name).unwrap_or_else(|| format!("{id}.html")),
            id,
            title,
            source_name,
            content_ttl,
        });
    }
    Ok(documents)
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
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<u64>,
    memory_entry_limit: Option<usize>,
    redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourceSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    refresh_schedule: Option<String>,
    refresh_concurrency: Option<usize>,
    queue_capacity: Option<usize>,
    channel_capacity: Option<usize>,
    state_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDocument {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    blob_name: Option<String>,
    #[serde(default)]
    content_ttl_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests;
