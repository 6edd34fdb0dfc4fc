// crates/warden-server/src/db/mod.rs
// PostgreSQL implementations of the repository ports

mod audit;
mod failures;
pub mod pool;
mod projects;
mod rules;
mod working_set;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;

pub use audit::PgAuditStore;
pub use failures::PgFailureStore;
pub use pool::connect_lazy;
pub use projects::PgProjectStore;
pub use rules::PgRuleStore;
pub use working_set::{PgFileReadStore, PgHaltEventStore, PgScopeStore, PgTaskAttemptStore};

use crate::error::{Result, WardenError};
use crate::stores::Stores;

/// Serialize a serde-renamed enum to its database text form.
pub(crate) fn to_db_enum<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        other => {
            // Every persisted enum serializes to a string; anything else is
            // a programming error caught in tests.
            tracing::error!(?other, "non-string enum serialization");
            String::new()
        }
    }
}

/// Parse a database text column back into a serde-renamed enum.
pub(crate) fn from_db_enum<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| WardenError::Internal(format!("unexpected enum value {:?}: {}", raw, e)))
}

/// Build the full store bundle over one connection pool.
pub fn pg_stores(pool: PgPool) -> Stores {
    Stores {
        rules: Arc::new(PgRuleStore::new(pool.clone())),
        projects: Arc::new(PgProjectStore::new(pool.clone())),
        failures: Arc::new(PgFailureStore::new(pool.clone())),
        file_reads: Arc::new(PgFileReadStore::new(pool.clone())),
        attempts: Arc::new(PgTaskAttemptStore::new(pool.clone())),
        halts: Arc::new(PgHaltEventStore::new(pool.clone())),
        scope: Arc::new(PgScopeStore::new(pool.clone())),
        audit: Arc::new(PgAuditStore::new(pool)),
    }
}

/// Cheap connectivity probe used by `/health/ready`.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{RuleCategory, Severity};

    #[test]
    fn test_enum_text_roundtrip() {
        assert_eq!(to_db_enum(&Severity::Error), "error");
        assert_eq!(to_db_enum(&RuleCategory::FileEdit), "file_edit");
        let sev: Severity = from_db_enum("warning").unwrap();
        assert_eq!(sev, Severity::Warning);
        let cat: RuleCategory = from_db_enum("file_edit").unwrap();
        assert_eq!(cat, RuleCategory::FileEdit);
    }

    #[test]
    fn test_unknown_enum_value_is_internal_error() {
        let err = from_db_enum::<Severity>("catastrophic").unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
