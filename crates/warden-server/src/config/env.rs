// crates/warden-server/src/config/env.rs
// WARDEN_* environment overrides - single source of truth for env vars

use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use super::Config;

/// Apply `WARDEN_*` environment overrides on top of `config`.
pub fn apply_env(config: &mut Config) -> Result<()> {
    apply_from(config, |name| {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    })
}

/// Testable core of [`apply_env`]: `lookup` resolves a variable name.
pub fn apply_from(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        raw.parse::<T>()
            .map_err(|e| anyhow!("invalid {}={:?}: {}", name, raw, e))
    }

    fn parse_duration(name: &str, raw: &str) -> Result<Duration> {
        humantime::parse_duration(raw)
            .with_context(|| format!("invalid {}={:?} (expected e.g. \"30s\", \"5m\")", name, raw))
    }

    fn parse_bool(name: &str, raw: &str) -> Result<bool> {
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid {}={:?} (expected a boolean)", name, raw)),
        }
    }

    macro_rules! set {
        ($name:literal, $field:expr, str) => {
            if let Some(raw) = lookup($name) {
                $field = raw;
            }
        };
        ($name:literal, $field:expr, opt_str) => {
            if let Some(raw) = lookup($name) {
                $field = Some(raw);
            }
        };
        ($name:literal, $field:expr, duration) => {
            if let Some(raw) = lookup($name) {
                $field = parse_duration($name, &raw)?;
            }
        };
        ($name:literal, $field:expr, bool) => {
            if let Some(raw) = lookup($name) {
                $field = parse_bool($name, &raw)?;
            }
        };
        ($name:literal, $field:expr, $ty:ty) => {
            if let Some(raw) = lookup($name) {
                $field = parse::<$ty>($name, &raw)?;
            }
        };
    }

    set!("WARDEN_MCP_PORT", config.mcp_port, u16);
    set!("WARDEN_WEB_PORT", config.web_port, u16);
    set!("WARDEN_MCP_PUBLIC_URL", config.mcp_public_url, str);
    set!("WARDEN_REQUEST_TIMEOUT", config.request_timeout, duration);
    set!("WARDEN_SHUTDOWN_TIMEOUT", config.shutdown_timeout, duration);
    set!("WARDEN_HEARTBEAT_INTERVAL", config.heartbeat_interval, duration);

    set!("WARDEN_DB_HOST", config.db.host, str);
    set!("WARDEN_DB_PORT", config.db.port, u16);
    set!("WARDEN_DB_NAME", config.db.name, str);
    set!("WARDEN_DB_USER", config.db.user, str);
    set!("WARDEN_DB_PASSWORD", config.db.password, str);
    set!("WARDEN_DB_SSLMODE", config.db.sslmode, str);
    set!("WARDEN_DB_POOL_MAX_OPEN", config.db.pool_max_open, u32);
    set!("WARDEN_DB_POOL_MAX_IDLE", config.db.pool_max_idle, u32);
    set!("WARDEN_DB_POOL_MAX_LIFETIME", config.db.pool_max_lifetime, duration);

    set!("WARDEN_REDIS_HOST", config.redis.host, str);
    set!("WARDEN_REDIS_PORT", config.redis.port, u16);
    set!("WARDEN_REDIS_PASSWORD", config.redis.password, opt_str);
    set!("WARDEN_REDIS_TLS", config.redis.tls, bool);
    set!("WARDEN_REDIS_POOL_SIZE", config.redis.pool_size, u32);

    set!("WARDEN_MCP_API_KEY", config.auth.mcp_api_key, str);
    set!("WARDEN_IDE_API_KEY", config.auth.ide_api_key, str);
    set!("WARDEN_JWT_SECRET", config.auth.jwt_secret, str);
    set!("WARDEN_JWT_ISSUER", config.auth.jwt_issuer, str);
    set!("WARDEN_JWT_EXPIRY", config.auth.jwt_expiry, duration);
    set!("WARDEN_JWT_ROTATION", config.auth.jwt_rotation, duration);
    set!("WARDEN_JWT_CLOCK_SKEW", config.auth.jwt_clock_skew, duration);

    set!("WARDEN_RATE_LIMIT_MCP", config.rate_limit.mcp, u32);
    set!("WARDEN_RATE_LIMIT_IDE", config.rate_limit.ide, u32);
    set!("WARDEN_RATE_LIMIT_SESSION", config.rate_limit.session, u32);
    set!("WARDEN_RATE_LIMIT_WINDOW", config.rate_limit.window, duration);
    set!("WARDEN_RATE_LIMIT_BURST_FACTOR", config.rate_limit.burst_factor, f64);

    set!("WARDEN_CACHE_TTL_RULES", config.cache_ttl.rules, duration);
    set!("WARDEN_CACHE_TTL_DOCS", config.cache_ttl.docs, duration);
    set!("WARDEN_CACHE_TTL_SEARCH", config.cache_ttl.search, duration);

    set!("WARDEN_SESSION_TTL", config.session_ttl, duration);
    set!(
        "WARDEN_SESSION_CLEANUP_INTERVAL",
        config.session_cleanup_interval,
        duration
    );

    set!("WARDEN_BREAKER_TRIP_THRESHOLD", config.breaker.trip_threshold, u32);
    set!("WARDEN_BREAKER_OPEN_DURATION", config.breaker.open_duration, duration);
    set!(
        "WARDEN_BREAKER_HALF_OPEN_PROBES",
        config.breaker.half_open_probes,
        u32
    );

    set!("WARDEN_PATTERN_MAX_SOURCE", config.pattern.max_source, usize);
    set!("WARDEN_PATTERN_MAX_COMPILE_MS", config.pattern.max_compile_ms, u64);
    set!("WARDEN_PATTERN_MAX_EVAL_MS", config.pattern.max_eval_ms, u64);

    set!("WARDEN_THREE_STRIKES_LIMIT", config.three_strikes_limit, u32);
    set!("WARDEN_LOG_LEVEL", config.log_level, str);
    set!("WARDEN_ENABLE_METRICS", config.enable_metrics, bool);
    set!("WARDEN_ENABLE_AUDIT_LOGGING", config.enable_audit_logging, bool);
    set!("WARDEN_ENABLE_CACHE", config.enable_cache, bool);
    set!("WARDEN_SSE_QUEUE_DEPTH", config.sse_queue_depth, usize);
    set!("WARDEN_AUDIT_BUFFER", config.audit_buffer, usize);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(map: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = Config::default();
        let vars = HashMap::from([
            ("WARDEN_MCP_PORT", "9100"),
            ("WARDEN_DB_HOST", "pg.internal"),
            ("WARDEN_SESSION_TTL", "90m"),
            ("WARDEN_ENABLE_CACHE", "off"),
            ("WARDEN_RATE_LIMIT_MCP", "2000"),
        ]);

        apply_from(&mut config, lookup_from(&vars)).expect("apply");
        assert_eq!(config.mcp_port, 9100);
        assert_eq!(config.db.host, "pg.internal");
        assert_eq!(config.session_ttl, Duration::from_secs(90 * 60));
        assert!(!config.enable_cache);
        assert_eq!(config.rate_limit.mcp, 2000);
    }

    #[test]
    fn test_invalid_duration_is_error() {
        let mut config = Config::default();
        let vars = HashMap::from([("WARDEN_SESSION_TTL", "ninety minutes or so")]);
        let err = apply_from(&mut config, lookup_from(&vars)).unwrap_err();
        assert!(err.to_string().contains("WARDEN_SESSION_TTL"));
    }

    #[test]
    fn test_invalid_bool_is_error() {
        let mut config = Config::default();
        let vars = HashMap::from([("WARDEN_ENABLE_METRICS", "maybe")]);
        assert!(apply_from(&mut config, lookup_from(&vars)).is_err());
    }

    #[test]
    fn test_unset_leaves_defaults() {
        let mut config = Config::default();
        apply_from(&mut config, |_| None).expect("apply");
        assert_eq!(config.mcp_port, 8787);
    }
}
