//! Proxy configuration
//!
//! Built once at startup and shared read-only by every session. Sources, in
//! increasing precedence: defaults, an optional TOML file, environment
//! variables, then command line flags (applied by the binary).
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PROXY_LISTEN | 127.0.0.1:9000 | Address the proxy accepts workers on |
//! | PROXY_UPSTREAM | 127.0.0.1:6379 | Real Redis address |
//! | PROXY_AUTH | (unset) | Shared secret for AUTH emulation and replay |
//! | PROXY_FRAMING | read-timeout | `read-timeout` or `resp` |
//! | PROXY_MAX_SESSIONS | (unset) | Cap on concurrent client sessions |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9000";
pub const DEFAULT_UPSTREAM: &str = "127.0.0.1:6379";
/// Same as Redis' own `proto-max-bulk-len`.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 512 * 1024 * 1024;

/// Error raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// How the end of a request or reply is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingMode {
    /// Client requests end on a short read; upstream replies end when a read
    /// times out with no new data.
    #[default]
    ReadTimeout,
    /// Read until the buffer holds complete RESP values.
    Resp,
}

impl std::str::FromStr for FramingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read-timeout" | "timeout" => Ok(FramingMode::ReadTimeout),
            "resp" => Ok(FramingMode::Resp),
            other => Err(ConfigError::Invalid(format!("unknown framing mode {:?}", other))),
        }
    }
}

/// Blocking-point deadlines for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Client read deadline before the session is dropped as idle
    #[serde(with = "duration_millis")]
    pub client_idle: Duration,
    /// Upstream connect deadline
    #[serde(with = "duration_millis")]
    pub upstream_dial: Duration,
    /// Upstream read deadline, doubling as the end-of-reply signal in
    /// [`FramingMode::ReadTimeout`]
    #[serde(with = "duration_millis")]
    pub upstream_read: Duration,
    /// First-byte wait for a blocking pop with no timeout (`BLPOP key 0`),
    /// and the stall limit inside a [`FramingMode::Resp`] reply. Other
    /// commands get `upstream_read` for their first byte, or the pop timeout
    /// plus `upstream_read` for a timed blocking pop.
    #[serde(with = "duration_millis")]
    pub upstream_reply: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            client_idle: Duration::from_secs(30),
            upstream_dial: Duration::from_millis(50),
            upstream_read: Duration::from_millis(250),
            upstream_reply: Duration::from_secs(30),
        }
    }
}

/// Everything a session needs to know. Never mutated after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// host:port of the real Redis
    pub upstream_address: String,
    /// Shared secret for offline AUTH and transparent re-authentication
    pub auth_secret: Option<String>,
    pub timeouts: TimeoutConfig,
    /// Number of raw client messages kept per session for diagnostics
    pub history_capacity: usize,
    /// Read size used when assembling client requests
    pub chunk_size: usize,
    pub framing: FramingMode,
    /// Largest client request buffered before the session is dropped
    pub max_request_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            upstream_address: DEFAULT_UPSTREAM.to_string(),
            auth_secret: None,
            timeouts: TimeoutConfig::default(),
            history_capacity: 5,
            chunk_size: 256,
            framing: FramingMode::default(),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl ProxyConfig {
    pub fn new(upstream_address: impl Into<String>, auth_secret: Option<String>) -> Self {
        ProxyConfig {
            upstream_address: upstream_address.into(),
            auth_secret,
            ..ProxyConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_address.trim().is_empty() {
            return Err(ConfigError::Invalid("upstream address is empty".to_string()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history capacity must be > 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk size must be > 0".to_string()));
        }
        if self.max_request_size < self.chunk_size {
            return Err(ConfigError::Invalid(
                "max request size must be at least the chunk size".to_string(),
            ));
        }
        Ok(())
    }
}

/// Acceptor settings plus the session config it hands to every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    /// Upper bound on concurrently running sessions (None = unbounded)
    pub max_sessions: Option<usize>,
    pub proxy: ProxyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_address: DEFAULT_LISTEN.to_string(),
            max_sessions: None,
            proxy: ProxyConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Overlay `PROXY_*` environment variables onto this config.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(listen) = std::env::var("PROXY_LISTEN") {
            self.listen_address = listen;
        }
        if let Ok(upstream) = std::env::var("PROXY_UPSTREAM") {
            self.proxy.upstream_address = upstream;
        }
        if let Ok(secret) = std::env::var("PROXY_AUTH") {
            self.proxy.auth_secret = Some(secret).filter(|s| !s.is_empty());
        }
        if let Ok(framing) = std::env::var("PROXY_FRAMING") {
            self.proxy.framing = framing.parse()?;
        }
        if let Ok(max) = std::env::var("PROXY_MAX_SESSIONS") {
            let max = max
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PROXY_MAX_SESSIONS={:?}", max)))?;
            self.max_sessions = Some(max);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_address.trim().is_empty() {
            return Err(ConfigError::Invalid("listen address is empty".to_string()));
        }
        if self.max_sessions == Some(0) {
            return Err(ConfigError::Invalid("max_sessions must be > 0".to_string()));
        }
        self.proxy.validate()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
