// crates/warden-server/src/db/pool.rs
// Connection pool construction

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DbConfig;
use crate::error::Result;

/// Acquire timeout kept short: the circuit breaker, not the pool, decides
/// how long callers wait on a struggling database.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a lazily-connecting pool from config.
///
/// Lazy connection lets the server boot while the database is down; the
/// first query fails into the breaker instead of aborting startup.
pub fn connect_lazy(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_max_open)
        .min_connections(config.pool_max_idle)
        .max_lifetime(config.pool_max_lifetime)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(&config.url())?;
    Ok(pool)
}
