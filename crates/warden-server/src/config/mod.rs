// crates/warden-server/src/config/mod.rs
// Configuration: defaults -> optional TOML file -> WARDEN_* environment

pub mod env;
pub mod file;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use env::apply_env;
pub use file::load_file;

/// PostgreSQL connection and pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub sslmode: String,
    pub pool_max_open: u32,
    pub pool_max_idle: u32,
    #[serde(with = "humantime_serde")]
    pub pool_max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            name: "warden".into(),
            user: "warden".into(),
            password: String::new(),
            sslmode: "prefer".into(),
            pool_max_open: 16,
            pool_max_idle: 4,
            pool_max_lifetime: Duration::from_secs(30 * 60),
        }
    }
}

impl DbConfig {
    /// Connection URL. Contains the password; log the config only through
    /// [`Config::redacted`].
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.sslmode
        )
    }
}

/// Redis connection settings (cache + rate limiting).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub tls: bool,
    pub pool_size: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6379,
            password: None,
            tls: false,
            pool_size: 8,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        match &self.password {
            Some(p) => format!("{}://:{}@{}:{}/", scheme, p, self.host, self.port),
            None => format!("{}://{}:{}/", scheme, self.host, self.port),
        }
    }
}

/// API keys and JWT settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer key presented by MCP clients.
    pub mcp_api_key: String,
    /// Bearer key presented by IDE plugins and the web UI.
    pub ide_api_key: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    #[serde(with = "humantime_serde")]
    pub jwt_expiry: Duration,
    #[serde(with = "humantime_serde")]
    pub jwt_rotation: Duration,
    /// Clock skew tolerance for JWT validation.
    #[serde(with = "humantime_serde")]
    pub jwt_clock_skew: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mcp_api_key: String::new(),
            ide_api_key: String::new(),
            jwt_secret: String::new(),
            jwt_issuer: "warden".into(),
            jwt_expiry: Duration::from_secs(60 * 60),
            jwt_rotation: Duration::from_secs(24 * 60 * 60),
            jwt_clock_skew: Duration::from_secs(60),
        }
    }
}

/// Per-principal rate-limit budgets (requests per window).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub mcp: u32,
    pub ide: u32,
    pub session: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Multiplier applied to the budget within a fresh window, the
    /// documented sliding-window approximation.
    pub burst_factor: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mcp: 1000,
            ide: 500,
            session: 100,
            window: Duration::from_secs(60),
            burst_factor: 1.5,
        }
    }
}

/// Circuit breaker tuning, shared by all named breakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub trip_threshold: u32,
    /// Base open duration; doubles per consecutive open, jittered, capped.
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,
    /// Probes admitted in half-open state.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 5,
            open_duration: Duration::from_secs(5),
            half_open_probes: 1,
        }
    }
}

/// Regex compiler and evaluator limits (ReDoS protection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Maximum regex source length in bytes.
    pub max_source: usize,
    /// Maximum wall-clock compile time in milliseconds.
    pub max_compile_ms: u64,
    /// Per-input evaluation deadline in milliseconds.
    pub max_eval_ms: u64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            max_source: 1024,
            max_compile_ms: 50,
            max_eval_ms: 100,
        }
    }
}

/// TTLs for the shared cache keyspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    #[serde(with = "humantime_serde")]
    pub rules: Duration,
    #[serde(with = "humantime_serde")]
    pub docs: Duration,
    #[serde(with = "humantime_serde")]
    pub search: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            rules: Duration::from_secs(5 * 60),
            docs: Duration::from_secs(10 * 60),
            search: Duration::from_secs(60),
        }
    }
}

/// The full server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mcp_port: u16,
    pub web_port: u16,
    /// Absolute base URL advertised in the SSE `endpoint` event.
    pub mcp_public_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    pub db: DbConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub cache_ttl: CacheTtlConfig,
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub session_cleanup_interval: Duration,
    pub breaker: BreakerConfig,
    pub pattern: PatternConfig,
    pub three_strikes_limit: u32,
    pub log_level: String,
    pub enable_metrics: bool,
    pub enable_audit_logging: bool,
    pub enable_cache: bool,
    /// Outbound SSE queue depth per session.
    pub sse_queue_depth: usize,
    /// Bounded audit channel capacity.
    pub audit_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mcp_port: 8787,
            web_port: 8788,
            mcp_public_url: "http://127.0.0.1:8787".into(),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            db: DbConfig::default(),
            redis: RedisConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache_ttl: CacheTtlConfig::default(),
            session_ttl: Duration::from_secs(60 * 60),
            session_cleanup_interval: Duration::from_secs(60),
            breaker: BreakerConfig::default(),
            pattern: PatternConfig::default(),
            three_strikes_limit: 3,
            log_level: "info".into(),
            enable_metrics: true,
            enable_audit_logging: true,
            enable_cache: true,
            sse_queue_depth: 64,
            audit_buffer: 1024,
        }
    }
}

/// Configuration validation result.
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report.
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }
        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }
        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// An API key must be long and drawn from more than one character class.
fn key_is_strong(key: &str) -> bool {
    if key.len() < 32 {
        return false;
    }
    let has_alpha = key.chars().any(|c| c.is_ascii_alphabetic());
    let has_other = key.chars().any(|c| !c.is_ascii_alphabetic());
    has_alpha && has_other
}

impl Config {
    /// Load configuration: defaults, then the optional TOML file, then
    /// `WARDEN_*` environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => file::load_file(p)?,
            None => file::load_default_file()?,
        };
        env::apply_env(&mut config)?;
        Ok(config)
    }

    /// Validate the configuration. Errors block startup; warnings are
    /// logged and ignored.
    pub fn validate(&self) -> ConfigValidation {
        let mut v = ConfigValidation::default();

        for (label, key) in [
            ("mcp_api_key", &self.auth.mcp_api_key),
            ("ide_api_key", &self.auth.ide_api_key),
        ] {
            if key.is_empty() {
                v.add_error(format!("{} is not set", label));
            } else if !key_is_strong(key) {
                v.add_error(format!(
                    "{} must be at least 32 characters and mix character classes",
                    label
                ));
            }
        }

        if self.auth.jwt_secret.len() < 32 {
            v.add_error("jwt_secret must be at least 32 bytes");
        }

        if self.mcp_port == self.web_port {
            v.add_error("mcp_port and web_port must differ");
        }

        if self.mcp_public_url.is_empty()
            || !(self.mcp_public_url.starts_with("http://")
                || self.mcp_public_url.starts_with("https://"))
        {
            v.add_error("mcp_public_url must be an absolute http(s) URL");
        }

        for (label, d) in [
            ("request_timeout", self.request_timeout),
            ("shutdown_timeout", self.shutdown_timeout),
            ("session_ttl", self.session_ttl),
            ("session_cleanup_interval", self.session_cleanup_interval),
            ("rate_limit.window", self.rate_limit.window),
        ] {
            if d.is_zero() {
                v.add_error(format!("{} must be non-zero", label));
            }
        }

        if self.pattern.max_source == 0 || self.pattern.max_eval_ms == 0 {
            v.add_error("pattern limits must be non-zero");
        }

        if self.three_strikes_limit == 0 {
            v.add_error("three_strikes_limit must be at least 1");
        }

        if self.db.password.is_empty() {
            v.add_warning("db.password is empty; relying on peer authentication");
        }
        if !self.enable_cache {
            v.add_warning("cache disabled; rule lookups go to the database every time");
        }

        v
    }

    /// A copy safe to debug-log: secrets replaced with placeholders.
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        let redact = |s: &mut String| {
            if !s.is_empty() {
                *s = "<redacted>".into();
            }
        };
        redact(&mut c.db.password);
        if let Some(p) = c.redis.password.as_mut() {
            *p = "<redacted>".into();
        }
        redact(&mut c.auth.mcp_api_key);
        redact(&mut c.auth.ide_api_key);
        redact(&mut c.auth.jwt_secret);
        c
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.mcp_api_key = "mcp-key-0123456789-0123456789-abcdef".into();
    config.auth.ide_api_key = "ide-key-0123456789-0123456789-abcdef".into();
    config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".into();
    config
}
