use gatehouse_auth::AuthConfig;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// OAuth2 session gateway configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Upstream API configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Static assets configuration
    #[serde(default)]
    pub assets: AssetsConfig,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// The session gateway configuration is invalid.
    #[error("auth config error: {0}")]
    Auth(#[from] gatehouse_auth::ConfigError),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Server validations
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue("server.port must be > 0".into()));
        }
        if self.server.body_limit_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "server.body_limit_bytes must be > 0".into(),
            ));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        // Proxy validation
        self.proxy.target_url()?;
        if self.proxy.flush_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "proxy.flush_interval must be > 0".into(),
            ));
        }
        if self.proxy.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("proxy.chunk_size must be > 0".into()));
        }
        // Cache validation
        if self.cache.enabled {
            if self.cache.ttl.as_secs() == 0 {
                return Err(ConfigError::InvalidValue("cache.ttl must be >= 1s".into()));
            }
            if self.cache.max_bytes == 0 || self.cache.max_entry_bytes == 0 {
                return Err(ConfigError::InvalidValue(
                    "cache.max_bytes and cache.max_entry_bytes must be > 0".into(),
                ));
            }
            if self.cache.redis.enabled && self.cache.redis.url.is_empty() {
                return Err(ConfigError::Missing("cache.redis.url".into()));
            }
        }
        // Auth validation
        self.auth.validate()?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size, in bytes. Larger requests get `413`; a
    /// streamed upload without `Content-Length` is cut off at the limit.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Upstream API the gateway forwards to.
///
/// The path of `target` doubles as the mount prefix: with
/// `target = "http://api:9000/api"` every request under `/api/` is proxied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base URL of the upstream API.
    pub target: String,

    /// How long the upstream may take to send response headers.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Interval at which relayed event streams are flushed to the client.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Read size used when relaying event streams.
    pub chunk_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            timeout: Duration::from_secs(30),
            flush_interval: Duration::from_millis(100),
            chunk_size: 8192,
        }
    }
}

impl ProxyConfig {
    /// Parses `target` as an absolute http(s) URL.
    pub fn target_url(&self) -> Result<Url, ConfigError> {
        if self.target.is_empty() {
            return Err(ConfigError::Missing("proxy.target".into()));
        }
        let url = Url::parse(&self.target).map_err(|e| {
            ConfigError::InvalidValue(format!("proxy.target '{}': {e}", self.target))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "proxy.target '{}' must be an http(s) URL with a host",
                self.target
            )));
        }
        Ok(url)
    }

    /// Path prefix under which requests are proxied, always ending in `/`.
    pub fn mount_prefix(&self) -> Result<String, ConfigError> {
        let url = self.target_url()?;
        let path = url.path();
        Ok(if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        })
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Put the response cache in front of the proxy.
    pub enabled: bool,

    /// Bucket width and entry lifetime.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Memory ceiling of the local tier, in bytes.
    pub max_bytes: u64,

    /// Largest body that is loaded into the cache, in bytes.
    pub max_entry_bytes: usize,

    /// Add `Cache-Control: max-age=<ttl>, private` to successful responses.
    pub cache_control: bool,

    /// Redis peer tier
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(60),
            max_bytes: 64 * 1024 * 1024, // 64 MiB
            max_entry_bytes: 8 * 1024 * 1024,
            cache_control: true,
            redis: RedisConfig::default(),
        }
    }
}

/// Redis peer tier shared by all gateway instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Coordinate cache loads through Redis. Without it, or when it is
    /// unreachable, loads are coalesced per instance only.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// `redis://host:port[/db]`
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout, in milliseconds.
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Lifetime of the cluster-wide load lock. A crashed loader blocks the
    /// key for at most this long.
    #[serde(default = "default_redis_lock_ttl", with = "humantime_serde")]
    pub lock_ttl: Duration,

    /// How often a waiting peer checks for the value being loaded elsewhere.
    #[serde(default = "default_redis_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_lock_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_redis_poll_interval() -> Duration {
    Duration::from_millis(50)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            lock_ttl: default_redis_lock_ttl(),
            poll_interval: default_redis_poll_interval(),
        }
    }
}

/// Static assets served for paths outside the proxy and auth surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssetsConfig {
    /// Directory to serve; unmatched paths return 404 when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("gatehouse.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., GATEHOUSE__PROXY__TARGET=http://api:9000/api
        builder = builder.add_source(
            Environment::with_prefix("GATEHOUSE")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.oauth.scopes"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, ConfigError> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
