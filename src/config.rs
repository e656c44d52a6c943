//! Configuration types for channel-dl

use crate::backend::Credentials;
use crate::error::{Error, Result};
use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the API id
pub const ENV_API_ID: &str = "TG_API_ID";
/// Environment variable holding the API hash
pub const ENV_API_HASH: &str = "TG_API_HASH";
/// Environment variable holding the account phone number
pub const ENV_PHONE: &str = "phone";
/// Environment variable holding a pre-supplied login code
pub const ENV_LOGIN_CODE: &str = "TG_LOGIN_CODE";
/// Environment variable overriding the gateway base URL
pub const ENV_BASE_URL: &str = "TG_API_BASE_URL";

/// Remote service connection settings and credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Gateway base URL (default: "http://127.0.0.1:8081")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Application id issued by the service
    #[serde(default)]
    pub api_id: Option<i32>,

    /// Application hash issued by the service
    #[serde(default)]
    pub api_hash: Option<String>,

    /// Account phone number used for login
    #[serde(default)]
    pub phone: Option<String>,

    /// Login code, if known up front (otherwise prompted on stdin)
    #[serde(default)]
    pub login_code: Option<String>,

    /// File used to persist the session token between runs (None = never persist)
    #[serde(default = "default_session_file")]
    pub session_file: Option<PathBuf>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_id: None,
            api_hash: None,
            phone: None,
            login_code: None,
            session_file: default_session_file(),
            request_timeout: default_request_timeout(),
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_id", &self.api_id)
            .field("api_hash", &self.api_hash.as_ref().map(|_| "<redacted>"))
            .field("phone", &self.phone.as_ref().map(|_| "<redacted>"))
            .field("login_code", &self.login_code.as_ref().map(|_| "<redacted>"))
            .field("session_file", &self.session_file)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Scrape behavior (caps, paging, media kinds, concurrency)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Maximum messages read per channel (default: 10000)
    #[serde(default = "default_max_messages")]
    pub max_messages_per_channel: usize,

    /// Messages requested per history page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Attachment kinds that are downloaded (default: photos only)
    #[serde(default = "default_media_kinds")]
    pub media_kinds: Vec<MediaKind>,

    /// Channels scraped concurrently (default: 1)
    #[serde(default = "default_max_concurrent_channels")]
    pub max_concurrent_channels: usize,

    /// Overall run deadline (None = no deadline)
    #[serde(default, with = "optional_duration_serde")]
    pub run_timeout: Option<Duration>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_messages_per_channel: default_max_messages(),
            page_size: default_page_size(),
            media_kinds: default_media_kinds(),
            max_concurrent_channels: default_max_concurrent_channels(),
            run_timeout: None,
        }
    }
}

/// Output locations and durability
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// CSV output file (default: "data/telegram_data.csv")
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Directory receiving downloaded media (default: "photos")
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Append to an existing output file instead of truncating it (default: false)
    #[serde(default)]
    pub append: bool,

    /// fsync the output after every row (default: true)
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            media_dir: default_media_dir(),
            append: false,
            sync_writes: true,
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Client-side throttling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second across the whole session (None = unlimited, default: 20)
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: Option<u64>,

    /// Media downloads per second (None = unlimited, default: 5)
    #[serde(default = "default_media_downloads_per_second")]
    pub media_downloads_per_second: Option<u64>,

    /// Service-imposed waits at or below this are slept through (default: 60 seconds)
    #[serde(default = "default_flood_sleep_threshold", with = "duration_serde")]
    pub flood_sleep_threshold: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            media_downloads_per_second: default_media_downloads_per_second(),
            flood_sleep_threshold: default_flood_sleep_threshold(),
        }
    }
}

/// Main configuration for a scrape run
///
/// Scrape and output settings are flattened so the TOML file keeps them at the top
/// level next to `channels`:
///
/// ```toml
/// channels = ["@DoctorsET", "@lobelia4cosmetics"]
/// max_messages_per_channel = 500
/// media_dir = "photos"
///
/// [service]
/// base_url = "http://127.0.0.1:8081"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Channel references to scrape, in order
    #[serde(default)]
    pub channels: Vec<String>,

    /// Remote service settings and credentials
    #[serde(default)]
    pub service: ServiceConfig,

    /// Scrape behavior
    #[serde(flatten)]
    pub scrape: ScrapeConfig,

    /// Output locations
    #[serde(flatten)]
    pub output: OutputConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Client-side throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            message: format!("invalid TOML: {}", e),
            key: None,
        })
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config {
                message: format!("failed to read {}: {}", path.display(), e),
                key: None,
            }),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(id) = lookup(ENV_API_ID) {
            let parsed = id.trim().parse::<i32>().map_err(|_| Error::Config {
                message: format!("{} must be an integer", ENV_API_ID),
                key: Some("service.api_id".to_string()),
            })?;
            self.service.api_id = Some(parsed);
        }
        if let Some(hash) = lookup(ENV_API_HASH) {
            self.service.api_hash = Some(hash);
        }
        if let Some(phone) = lookup(ENV_PHONE) {
            self.service.phone = Some(phone);
        }
        if let Some(code) = lookup(ENV_LOGIN_CODE) {
            self.service.login_code = Some(code);
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.service.base_url = url;
        }
        Ok(())
    }

    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.channels.iter().all(|c| c.trim().is_empty()) {
            return Err(config_error("at least one channel is required", "channels"));
        }
        if self.scrape.max_messages_per_channel == 0 {
            return Err(config_error(
                "must be greater than zero",
                "max_messages_per_channel",
            ));
        }
        if self.scrape.page_size == 0 {
            return Err(config_error("must be greater than zero", "page_size"));
        }
        if self.scrape.max_concurrent_channels == 0 {
            return Err(config_error(
                "must be greater than zero",
                "max_concurrent_channels",
            ));
        }
        if self.output.output_path.as_os_str().is_empty() {
            return Err(config_error("must not be empty", "output_path"));
        }
        if self.output.media_dir.as_os_str().is_empty() {
            return Err(config_error("must not be empty", "media_dir"));
        }
        url::Url::parse(&self.service.base_url)
            .map_err(|e| config_error(&format!("invalid URL: {}", e), "service.base_url"))?;
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(config_error(
                "must be a finite number of at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }

    /// Credentials assembled from the service section.
    pub fn credentials(&self) -> Result<Credentials> {
        let api_id = self
            .service
            .api_id
            .ok_or_else(|| config_error("api_id is required", "service.api_id"))?;
        let api_hash = self
            .service
            .api_hash
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| config_error("api_hash is required", "service.api_hash"))?;
        let phone = self
            .service
            .phone
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| config_error("phone is required", "service.phone"))?;
        Ok(Credentials {
            api_id,
            api_hash,
            phone,
        })
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: format!("{}: {}", key, message),
        key: Some(key.to_string()),
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_session_file() -> Option<PathBuf> {
    Some(PathBuf::from("scraping_session.json"))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_messages() -> usize {
    10_000
}

fn default_page_size() -> usize {
    100
}

fn default_media_kinds() -> Vec<MediaKind> {
    vec![MediaKind::Photo]
}

fn default_max_concurrent_channels() -> usize {
    1
}

fn default_output_path() -> PathBuf {
    PathBuf::from("data").join("telegram_data.csv")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("photos")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_requests_per_second() -> Option<u64> {
    Some(20)
}

fn default_media_downloads_per_second() -> Option<u64> {
    Some(5)
}

fn default_flood_sleep_threshold() -> Duration {
    Duration::from_secs(60)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
