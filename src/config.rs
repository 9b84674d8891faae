use crate::logging::LogFormat;
use config::{Config, ConfigError, Environment};
use nutype::nutype;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = ":8080";
const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_COLLECTOR_URL: &str = "http://llm-collector.llm-system.svc.cluster.local:8081/events";
const DEFAULT_EVENT_QUEUE_SIZE: i64 = 10_000;
const DEFAULT_EVENT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CAPTURE_BYTES: i64 = 256 * 1024;
const DEFAULT_COLLECTOR_PORT: &str = "8081";

/// Environment keys, lowercased the way the `config` crate stores them
mod keys {
    pub const LISTEN_ADDR: &str = "listen_addr";
    pub const UPSTREAM_BASE_URL: &str = "upstream_openai_base_url";
    pub const UPSTREAM_API_KEY: &str = "upstream_openai_api_key";
    pub const COLLECTOR_URL: &str = "collector_url";
    pub const EVENT_QUEUE_SIZE: &str = "event_queue_size";
    pub const EVENT_FLUSH_TIMEOUT: &str = "event_flush_timeout";
    pub const HTTP_CLIENT_TIMEOUT: &str = "http_client_timeout";
    pub const CAPTURE_BYTES: &str = "metering_capture_bytes";
    pub const LOG_FORMAT: &str = "log_format";
    pub const PORT: &str = "port";
    pub const EVENT_LOG_PATH: &str = "event_log_path";
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("UPSTREAM_OPENAI_API_KEY is required")]
    MissingUpstreamKey,

    #[error("failed to read environment: {0}")]
    Source(#[from] ConfigError),
}

/// Credential the proxy presents to the upstream in place of the caller's
#[nutype(sanitize(trim), validate(not_empty), derive(Clone, PartialEq, Eq, AsRef))]
pub struct UpstreamApiKey(String);

impl fmt::Debug for UpstreamApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpstreamApiKey(<redacted>)")
    }
}

/// Pending metering events held before new ones are dropped
#[nutype(
    sanitize(with = |capacity: usize| capacity.max(1)),
    derive(Clone, Copy, Debug, Display, PartialEq, Eq, AsRef)
)]
pub struct QueueCapacity(usize);

/// Bytes of a buffered response body kept for usage extraction
#[nutype(derive(Clone, Copy, Debug, Display, PartialEq, Eq, AsRef))]
pub struct CaptureLimit(usize);

/// Immutable proxy configuration, built once at startup
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub listen_addr: String,
    pub upstream_base_url: String,
    pub upstream_api_key: UpstreamApiKey,
    pub collector_url: String,
    pub event_queue_size: QueueCapacity,
    pub event_flush_interval: Duration,
    pub http_client_timeout: Duration,
    pub capture_bytes: CaptureLimit,
    pub log_format: LogFormat,
}

impl ProxySettings {
    /// Load from the process environment
    pub fn new() -> Result<Self, SettingsError> {
        Self::from_source(Environment::default())
    }

    /// Load from an explicit environment source (tests inject a map here)
    pub fn from_source(environment: Environment) -> Result<Self, SettingsError> {
        let env = EnvValues::load(environment)?;

        let upstream_api_key = UpstreamApiKey::try_new(env.string_or(keys::UPSTREAM_API_KEY, ""))
            .map_err(|_| SettingsError::MissingUpstreamKey)?;

        let queue_size = env.int_or(keys::EVENT_QUEUE_SIZE, DEFAULT_EVENT_QUEUE_SIZE);
        let capture_bytes = env.int_or(keys::CAPTURE_BYTES, DEFAULT_CAPTURE_BYTES);

        Ok(Self {
            listen_addr: normalize_listen_addr(&env.string_or(keys::LISTEN_ADDR, DEFAULT_LISTEN_ADDR)),
            upstream_base_url: env.string_or(keys::UPSTREAM_BASE_URL, DEFAULT_UPSTREAM_BASE_URL),
            upstream_api_key,
            collector_url: env.string_or(keys::COLLECTOR_URL, DEFAULT_COLLECTOR_URL),
            event_queue_size: QueueCapacity::new(usize::try_from(queue_size).unwrap_or(0)),
            event_flush_interval: env
                .duration_or(keys::EVENT_FLUSH_TIMEOUT, DEFAULT_EVENT_FLUSH_INTERVAL),
            http_client_timeout: env
                .duration_or(keys::HTTP_CLIENT_TIMEOUT, DEFAULT_HTTP_CLIENT_TIMEOUT),
            capture_bytes: CaptureLimit::new(usize::try_from(capture_bytes).unwrap_or(0)),
            log_format: env.log_format(),
        })
    }

    /// Upstream chat-completions endpoint
    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}{}",
            self.upstream_base_url.trim_end_matches('/'),
            crate::proxy::headers::paths::CHAT_COMPLETIONS
        )
    }
}

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub listen_addr: String,
    pub event_log_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl CollectorSettings {
    pub fn new() -> Result<Self, SettingsError> {
        Self::from_source(Environment::default())
    }

    pub fn from_source(environment: Environment) -> Result<Self, SettingsError> {
        let env = EnvValues::load(environment)?;
        let port = env.string_or(keys::PORT, DEFAULT_COLLECTOR_PORT);

        Ok(Self {
            listen_addr: normalize_listen_addr(&format!(":{port}")),
            event_log_path: env.string(keys::EVENT_LOG_PATH).map(PathBuf::from),
            log_format: env.log_format(),
        })
    }
}

/// Expand Go-style `:port` into an all-interfaces bind address
pub fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Raw environment lookups with trim-and-default semantics
struct EnvValues(Config);

impl EnvValues {
    fn load(environment: Environment) -> Result<Self, ConfigError> {
        Ok(Self(Config::builder().add_source(environment).build()?))
    }

    fn string(&self, key: &str) -> Option<String> {
        self.0
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn int_or(&self, key: &str, default: i64) -> i64 {
        self.string(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    fn duration_or(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|value| go_parse_duration::parse_duration(&value).ok())
            .and_then(|nanos| u64::try_from(nanos).ok())
            .filter(|nanos| *nanos > 0)
            .map(Duration::from_nanos)
            .unwrap_or(default)
    }

    fn log_format(&self) -> LogFormat {
        self.string(keys::LOG_FORMAT)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}
