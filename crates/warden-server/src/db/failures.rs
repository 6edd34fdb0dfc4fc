// crates/warden-server/src/db/failures.rs
// failure_registry table access

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use warden_types::FailureEntry;

use super::from_db_enum;
use crate::error::Result;
use crate::stores::FailureStore;

pub struct PgFailureStore {
    pool: PgPool,
}

impl PgFailureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailureStore for PgFailureStore {
    async fn list_active(&self, project: Option<&str>) -> Result<Vec<FailureEntry>> {
        // Unscoped entries (project_slug IS NULL) apply to every project.
        let rows = sqlx::query(
            "SELECT failure_id, category, severity, error_message, root_cause, \
                    affected_files, regression_pattern, status, project_slug \
             FROM failure_registry \
             WHERE status = 'active' \
               AND (project_slug IS NULL OR project_slug = $1)",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(FailureEntry {
                    failure_id: row.try_get("failure_id")?,
                    category: row.try_get("category")?,
                    severity: from_db_enum(row.try_get::<String, _>("severity")?.as_str())?,
                    error_message: row.try_get("error_message")?,
                    root_cause: row.try_get("root_cause")?,
                    affected_files: row.try_get("affected_files")?,
                    regression_pattern: row.try_get("regression_pattern")?,
                    status: from_db_enum(row.try_get::<String, _>("status")?.as_str())?,
                    project_slug: row.try_get("project_slug")?,
                })
            })
            .collect()
    }
}
