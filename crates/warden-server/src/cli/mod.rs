// crates/warden-server/src/cli/mod.rs
// Command-line surface and server wiring

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::rate_limit::{CounterBackend, MemoryCounter, RedisCounter};
use crate::auth::{Authenticator, RateLimiter};
use crate::cache::{CacheHandle, MemoryCache, RedisCache};
use crate::config::Config;
use crate::db;
use crate::engine::ValidationEngine;
use crate::observability::{AuditHandle, metrics, spawn_audit_pipeline};
use crate::resilience::Resilience;
use crate::rules::RuleCatalog;
use crate::session::SessionManager;
use crate::session::manager::spawn_sweeper;
use crate::stores::Stores;
use crate::stores::memory::MemoryStores;
use crate::web::{AppState, mcp_router, web_router};

#[derive(Parser)]
#[command(name = "warden", version, about = "Policy guardrails for AI coding agents")]
pub struct Cli {
    /// Path to a TOML config file (default: ./warden.toml, then
    /// ~/.warden/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP and management servers
    Serve {
        /// Use in-memory stores and cache instead of PostgreSQL/Redis
        /// (development and tests only; state dies with the process)
        #[arg(long)]
        ephemeral: bool,
    },
    /// Configuration utilities
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets redacted
    Show,
    /// Validate the configuration and exit non-zero on errors
    Check,
}

pub fn run_config_show(config: &Config) -> anyhow::Result<()> {
    let redacted = config.redacted();
    println!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}

pub fn run_config_check(config: &Config) -> anyhow::Result<()> {
    let validation = config.validate();
    println!("{}", validation.report());
    if !validation.is_valid() {
        bail!("configuration is invalid");
    }
    Ok(())
}

/// Wire every component and serve until a shutdown signal.
pub async fn run_server(config: Config, ephemeral: bool) -> anyhow::Result<()> {
    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!("config: {}", warning);
    }
    if !validation.is_valid() {
        bail!("invalid configuration:\n{}", validation.report());
    }

    if config.enable_metrics {
        metrics::init_metrics();
    }

    let shutdown = CancellationToken::new();
    let resilience = Resilience::new(&config);

    // Stores: PostgreSQL, or in-memory for ephemeral runs.
    let (stores, db_pool): (Stores, Option<sqlx::PgPool>) = if ephemeral {
        tracing::warn!("ephemeral mode: state is in-memory and dies with the process");
        (MemoryStores::new().bundle(), None)
    } else {
        let pool = db::connect_lazy(&config.db).context("failed to configure database pool")?;
        (db::pg_stores(pool.clone()), Some(pool))
    };

    // Redis backs both the shared cache and the rate limiter. Startup
    // survives Redis being down: caching disables itself and rate
    // limiting degrades to an in-process counter.
    let redis = if ephemeral {
        None
    } else {
        match RedisCache::connect(&config.redis).await {
            Ok(redis) => Some(redis),
            Err(e) => {
                tracing::warn!("redis unavailable at startup: {}", e);
                None
            }
        }
    };
    let counter: Arc<dyn CounterBackend> = match &redis {
        Some(redis) => Arc::new(RedisCounter::new(redis.manager())),
        None => Arc::new(MemoryCounter::default()),
    };
    let cache = match (redis, config.enable_cache, ephemeral) {
        (_, _, true) => CacheHandle::new(Arc::new(MemoryCache::default())),
        (Some(redis), true, _) => CacheHandle::new(Arc::new(redis)),
        _ => CacheHandle::disabled(),
    };

    let audit = if config.enable_audit_logging {
        spawn_audit_pipeline(stores.audit.clone(), config.audit_buffer, shutdown.clone())
    } else {
        AuditHandle::disabled()
    };

    let catalog = Arc::new(RuleCatalog::new(
        stores.clone(),
        resilience.clone(),
        cache.clone(),
        config.pattern.clone(),
        &config.cache_ttl,
    ));
    let engine = Arc::new(ValidationEngine::new(
        stores.clone(),
        catalog.clone(),
        resilience.clone(),
        config.three_strikes_limit,
    ));

    let sessions = Arc::new(SessionManager::new(&config));
    spawn_sweeper(
        sessions.clone(),
        stores.clone(),
        cache.clone(),
        config.session_cleanup_interval,
        shutdown.clone(),
    );

    let auth = Arc::new(Authenticator::new(&config.auth));
    let limiter = Arc::new(RateLimiter::new(
        counter,
        resilience.clone(),
        config.rate_limit.clone(),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        stores,
        engine,
        catalog,
        sessions: sessions.clone(),
        auth,
        limiter,
        audit,
        resilience,
        cache,
        shutdown: shutdown.clone(),
        db_pool,
        started_at: Instant::now(),
    };

    let mcp_listener = TcpListener::bind(("0.0.0.0", config.mcp_port))
        .await
        .with_context(|| format!("failed to bind MCP port {}", config.mcp_port))?;
    let web_listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("failed to bind web port {}", config.web_port))?;
    tracing::info!(
        mcp_port = config.mcp_port,
        web_port = config.web_port,
        "warden listening"
    );

    // Signal handling: stop admitting sessions, then cancel. Streams see
    // the token, emit `event: shutdown`, and drain.
    {
        let shutdown = shutdown.clone();
        let sessions = sessions.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received; draining");
            sessions.stop_accepting();
            shutdown.cancel();
        });
    }

    let mcp_server = {
        let token = shutdown.clone();
        let state = state.clone();
        async move {
            axum::serve(mcp_listener, mcp_router(state))
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }
    };
    let web_server = {
        let token = shutdown.clone();
        let state = state.clone();
        async move {
            axum::serve(web_listener, web_router(state))
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }
    };

    let servers = async { tokio::try_join!(mcp_server, web_server) };
    tokio::pin!(servers);

    let drain_deadline = {
        let shutdown = shutdown.clone();
        let timeout = config.shutdown_timeout;
        async move {
            shutdown.cancelled().await;
            tokio::time::sleep(timeout).await;
        }
    };

    tokio::select! {
        result = &mut servers => {
            result.context("server error")?;
        }
        _ = drain_deadline => {
            tracing::warn!(
                timeout = ?config.shutdown_timeout,
                "shutdown timeout exceeded; closing remaining sessions"
            );
        }
    }

    for session in sessions.all() {
        session.close();
    }
    tracing::info!("warden stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to install SIGQUIT handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
        _ = sigquit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
