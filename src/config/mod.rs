use crate::fingerprint::DEFAULT_BOOKMAKERS;
use redis::{ConnectionInfo, IntoConnectionInfo};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid redis url: {0}")]
    RedisUrl(#[from] redis::RedisError),
    #[error("invalid value for {0}: {1}")]
    InvalidEnv(String, String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub odds: OddsConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Overrides any password in the url - loaded from env REDIS_PASSWORD
    #[serde(default)]
    pub password: Option<String>,
    /// Key namespace. Empty keeps the bare `match.*` / `{hash}:*` keys.
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Published note listing the matches to watch - env MATCH_SOURCE_URL
    #[serde(default)]
    pub url: String,
    /// Seconds between note polls.
    #[serde(default = "default_source_interval")]
    pub poll_interval_secs: u64,
    /// Attempts per note fetch before the cycle is abandoned.
    #[serde(default = "default_source_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_source_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,
    /// Seconds the producer idles after a failed cycle.
    #[serde(default = "default_producer_restart_secs")]
    pub restart_delay_secs: u64,
    /// Watch-list used when a match line names no bookmakers.
    #[serde(default = "default_bookmakers")]
    pub default_bookmakers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OddsConfig {
    #[serde(default = "default_odds_base_url")]
    pub base_url: String,
    /// e.g. socks5h://127.0.0.1:9050 - env ODDS_PROXY_URL
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default = "default_odds_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_odds_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_odds_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,
    /// Random pause before every odds request, `[min, max)` milliseconds.
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Bot token - loaded from env TELEGRAM_TOKEN
    #[serde(default)]
    pub token: String,
    /// Always notified, even before anyone has messaged the bot.
    #[serde(default)]
    pub default_chat_id: Option<i64>,
    #[serde(default = "default_telegram_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrently polled matches.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Pause between two polls of the same match.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Matches older than this are retired unresolved.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// How often monitoring is re-scanned for unclaimed matches.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    /// Move orphaned inflight matches back to monitoring on startup.
    /// Only safe with a single engine per namespace.
    #[serde(default = "default_true")]
    pub reclaim_inflight_on_start: bool,
    #[serde(default = "default_restart_base_ms")]
    pub restart_base_ms: u64,
    #[serde(default = "default_restart_max_secs")]
    pub restart_max_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}
fn default_source_interval() -> u64 {
    60
}
fn default_source_attempts() -> u32 {
    3
}
fn default_source_retry_delay_ms() -> u64 {
    3_000
}
fn default_producer_restart_secs() -> u64 {
    3
}
fn default_bookmakers() -> Vec<String> {
    DEFAULT_BOOKMAKERS.iter().map(|b| b.to_string()).collect()
}
fn default_odds_base_url() -> String {
    "https://www.betexplorer.com".to_string()
}
fn default_odds_timeout() -> u64 {
    480
}
fn default_odds_attempts() -> u32 {
    200
}
fn default_odds_retry_delay_ms() -> u64 {
    500
}
fn default_jitter_min_ms() -> u64 {
    100
}
fn default_jitter_max_ms() -> u64 {
    1_100
}
fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_telegram_timeout() -> u64 {
    30
}
fn default_capacity() -> usize {
    1_000
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_stale_after_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_status_interval() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_restart_base_ms() -> u64 {
    1_000
}
fn default_restart_max_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            password: None,
            prefix: String::new(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            poll_interval_secs: default_source_interval(),
            fetch_attempts: default_source_attempts(),
            fetch_retry_delay_ms: default_source_retry_delay_ms(),
            restart_delay_secs: default_producer_restart_secs(),
            default_bookmakers: default_bookmakers(),
        }
    }
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            base_url: default_odds_base_url(),
            proxy_url: None,
            request_timeout_secs: default_odds_timeout(),
            fetch_attempts: default_odds_attempts(),
            fetch_retry_delay_ms: default_odds_retry_delay_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: default_telegram_api_url(),
            token: String::new(),
            default_chat_id: None,
            request_timeout_secs: default_telegram_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval(),
            status_interval_secs: default_status_interval(),
            reclaim_inflight_on_start: true,
            restart_base_ms: default_restart_base_ms(),
            restart_max_secs: default_restart_max_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RedisConfig {
    /// Connection info with the configured password applied.
    pub fn connection_info(&self) -> Result<ConnectionInfo, ConfigError> {
        let mut info = self.url.as_str().into_connection_info()?;
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            info.redis.password = Some(password.clone());
        }
        Ok(info)
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load a default config with env-only settings (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Override settings from environment variables (never store secrets in
    /// the config file). `lookup` is `std::env::var` outside of tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.redis.password = Some(password);
        }
        if let Some(prefix) = lookup("REDIS_PREFIX") {
            self.redis.prefix = prefix;
        }
        if let Some(url) = lookup("MATCH_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(url) = lookup("ODDS_BASE_URL") {
            self.odds.base_url = url;
        }
        if let Some(proxy) = lookup("ODDS_PROXY_URL") {
            self.odds.proxy_url = Some(proxy).filter(|p| !p.is_empty());
        }
        if let Some(token) = lookup("TELEGRAM_TOKEN") {
            self.telegram.token = token;
        }
        if let Some(raw) = lookup("TELEGRAM_DEFAULT_CHAT_ID") {
            let id = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidEnv("TELEGRAM_DEFAULT_CHAT_ID".into(), raw))?;
            self.telegram.default_chat_id = Some(id);
        }
        if let Some(raw) = lookup("BETWATCH_CAPACITY") {
            self.engine.capacity = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidEnv("BETWATCH_CAPACITY".into(), raw))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.capacity == 0 {
            return Err(ConfigError::Invalid("engine.capacity must be > 0".into()));
        }
        if self.engine.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.odds.jitter_max_ms < self.odds.jitter_min_ms {
            return Err(ConfigError::Invalid(
                "odds.jitter_max_ms is below odds.jitter_min_ms".into(),
            ));
        }
        if self.source.default_bookmakers.iter().all(|b| b.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "source.default_bookmakers is empty".into(),
            ));
        }
        Ok(())
    }

    pub fn has_telegram(&self) -> bool {
        !self.telegram.token.is_empty()
    }
}
