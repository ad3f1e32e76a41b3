//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CliArgs, Command, CommentArgs, FeedArgs, NotificationsArgs, Overrides, ReactionArgs,
    ReportArgs, TargetArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "devlog";
const ENV_PREFIX: &str = "DEVLOG";
const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_API_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 500;
const DEFAULT_POST_STALE_SECS: u64 = 60;
const DEFAULT_LIST_STALE_SECS: u64 = 30;
const DEFAULT_COMMENTS_STALE_SECS: u64 = 30;
const DEFAULT_NOTIFICATIONS_STALE_SECS: u64 = 15;
const DEFAULT_NOTIFICATION_POLL_SECS: u64 = 30;

/// Fully-resolved client settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: Url,
    pub session_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_entries: NonZeroUsize,
    pub post_stale: Duration,
    pub list_stale: Duration,
    pub comments_stale: Duration,
    pub notifications_stale: Duration,
    pub notification_poll: Duration,
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
    raw.apply_overrides(&cli.overrides);

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
    api: RawApiSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = overrides.api_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(token) = overrides.session_token.as_ref() {
            self.api.session_token = Some(token.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(seconds) = overrides.notification_poll_seconds {
            self.cache.notification_poll_seconds = Some(seconds);
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
        let RawSettings {
            api,
            cache,
            logging,
        } = raw;

        let api = build_api_settings(api)?;
        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            api,
            cache,
            logging,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("api.base_url", format!("invalid url `{raw_url}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            "scheme must be http or https",
        ));
    }

    let session_token = api.session_token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let timeout_secs = api.timeout_seconds.unwrap_or(DEFAULT_API_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "api.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ApiSettings {
        base_url,
        session_token,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries = NonZeroUsize::new(cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES))
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;

    let poll_secs = cache
        .notification_poll_seconds
        .unwrap_or(DEFAULT_NOTIFICATION_POLL_SECS);
    if poll_secs == 0 {
        return Err(LoadError::invalid(
            "cache.notification_poll_seconds",
            "must be greater than zero",
        ));
    }

    // A zero threshold is allowed: every read then revalidates in the background.
    let seconds = |value: Option<u64>, default: u64| Duration::from_secs(value.unwrap_or(default));

    Ok(CacheSettings {
        max_entries,
        post_stale: seconds(cache.post_stale_seconds, DEFAULT_POST_STALE_SECS),
        list_stale: seconds(cache.list_stale_seconds, DEFAULT_LIST_STALE_SECS),
        comments_stale: seconds(cache.comments_stale_seconds, DEFAULT_COMMENTS_STALE_SECS),
        notifications_stale: seconds(
            cache.notifications_stale_seconds,
            DEFAULT_NOTIFICATIONS_STALE_SECS,
        ),
        notification_poll: Duration::from_secs(poll_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    session_token: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entries: Option<usize>,
    post_stale_seconds: Option<u64>,
    list_stale_seconds: Option<u64>,
    comments_stale_seconds: Option<u64>,
    notifications_stale_seconds: Option<u64>,
    notification_poll_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[cfg(test)]
mod tests;
