// crates/warden-server/src/db/working_set.rs
// Per-session transient state: file reads, task attempts, halts, scope.
// All rows here are purged when the session ends.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;
use warden_types::{
    AttemptResolution, ErrorCategory, FileChange, HaltEvent, HaltResolution, ScopeDefinition,
};

use super::{from_db_enum, to_db_enum};
use crate::error::Result;
use crate::stores::{FileReadStore, HaltEventStore, ScopeStore, TaskAttemptStore};

pub struct PgFileReadStore {
    pool: PgPool,
}

impl PgFileReadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileReadStore for PgFileReadStore {
    async fn record_read(
        &self,
        session_id: &str,
        file_path: &str,
        content_hash: Option<&str>,
    ) -> Result<bool> {
        // Unique on (session_id, file_path): conflict means repeat read.
        let result = sqlx::query(
            "INSERT INTO file_reads (session_id, file_path, read_at, content_hash) \
             VALUES ($1, $2, now(), $3) \
             ON CONFLICT (session_id, file_path) DO NOTHING",
        )
        .bind(session_id)
        .bind(file_path)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_read(&self, session_id: &str, file_path: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM file_reads WHERE session_id = $1 AND file_path = $2",
        )
        .bind(session_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_reads WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PgTaskAttemptStore {
    pool: PgPool,
}

impl PgTaskAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskAttemptStore for PgTaskAttemptStore {
    async fn next_attempt(
        &self,
        session_id: &str,
        task_id: &str,
        error_category: Option<ErrorCategory>,
        error_message: Option<&str>,
    ) -> Result<u32> {
        // Single statement keeps attempt_number monotonic under
        // concurrent recorders for the same (session, task).
        let row = sqlx::query(
            "INSERT INTO task_attempts \
             (session_id, task_id, attempt_number, attempted_at, error_category, error_message, resolution) \
             SELECT $1, $2, COALESCE(MAX(attempt_number), 0) + 1, now(), $3, $4, 'pending' \
             FROM task_attempts WHERE session_id = $1 AND task_id = $2 \
             RETURNING attempt_number",
        )
        .bind(session_id)
        .bind(task_id)
        .bind(error_category.map(|c| to_db_enum(&c)))
        .bind(error_message)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i32, _>("attempt_number")? as u32)
    }

    async fn pending_attempts(&self, session_id: &str, task_id: &str) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(attempt_number), 0) AS n FROM task_attempts \
             WHERE session_id = $1 AND task_id = $2 AND resolution = 'pending'",
        )
        .bind(session_id)
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i32, _>("n")? as u32)
    }

    async fn mark_resolution(
        &self,
        session_id: &str,
        task_id: Option<&str>,
        resolution: AttemptResolution,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE task_attempts SET resolution = $3 \
             WHERE session_id = $1 AND ($2::text IS NULL OR task_id = $2) \
               AND resolution = 'pending'",
        )
        .bind(session_id)
        .bind(task_id)
        .bind(to_db_enum(&resolution))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM task_attempts WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PgHaltEventStore {
    pool: PgPool,
}

impl PgHaltEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn halt_from_row(row: &sqlx::postgres::PgRow) -> Result<HaltEvent> {
    Ok(HaltEvent {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        halt_type: from_db_enum(row.try_get::<String, _>("halt_type")?.as_str())?,
        severity: from_db_enum(row.try_get::<String, _>("severity")?.as_str())?,
        triggered_at: row.try_get("triggered_at")?,
        acknowledged: row.try_get("acknowledged")?,
        resolution: from_db_enum(row.try_get::<String, _>("resolution")?.as_str())?,
        context_data: row.try_get("context_data")?,
    })
}

const HALT_COLUMNS: &str =
    "id, session_id, halt_type, severity, triggered_at, acknowledged, resolution, context_data";

#[async_trait]
impl HaltEventStore for PgHaltEventStore {
    async fn open(&self, halt: &HaltEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO halt_events \
             (id, session_id, halt_type, severity, triggered_at, acknowledged, resolution, context_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(halt.id)
        .bind(&halt.session_id)
        .bind(to_db_enum(&halt.halt_type))
        .bind(to_db_enum(&halt.severity))
        .bind(halt.triggered_at)
        .bind(halt.acknowledged)
        .bind(to_db_enum(&halt.resolution))
        .bind(&halt.context_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_critical(&self, session_id: &str) -> Result<Option<HaltEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {HALT_COLUMNS} FROM halt_events \
             WHERE session_id = $1 AND severity = 'critical' AND resolution = 'pending' \
             ORDER BY triggered_at LIMIT 1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(halt_from_row).transpose()
    }

    async fn acknowledge(&self, halt_id: Uuid, resolution: HaltResolution) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE halt_events SET resolution = $2, acknowledged = TRUE \
             WHERE id = $1 AND resolution = 'pending'",
        )
        .bind(halt_id)
        .bind(to_db_enum(&resolution))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, halt_id: Uuid) -> Result<Option<HaltEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {HALT_COLUMNS} FROM halt_events WHERE id = $1"
        ))
        .bind(halt_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(halt_from_row).transpose()
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM halt_events WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PgScopeStore {
    pool: PgPool,
}

impl PgScopeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScopeStore for PgScopeStore {
    async fn set_scope(&self, scope: &ScopeDefinition) -> Result<()> {
        // One current scope per session; a new declaration replaces it.
        sqlx::query(
            "INSERT INTO scope_definitions \
             (session_id, task_id, scope_description, scope_boundaries, affected_files, declared_at) \
             VALUES ($1, $2, $3, $4, $5, now()) \
             ON CONFLICT (session_id) DO UPDATE SET \
               task_id = EXCLUDED.task_id, \
               scope_description = EXCLUDED.scope_description, \
               scope_boundaries = EXCLUDED.scope_boundaries, \
               affected_files = EXCLUDED.affected_files, \
               declared_at = EXCLUDED.declared_at",
        )
        .bind(&scope.session_id)
        .bind(&scope.task_id)
        .bind(&scope.scope_description)
        .bind(&scope.scope_boundaries)
        .bind(&scope.affected_files)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_scope(&self, session_id: &str) -> Result<Option<ScopeDefinition>> {
        let row = sqlx::query(
            "SELECT session_id, task_id, scope_description, scope_boundaries, affected_files \
             FROM scope_definitions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(ScopeDefinition {
            session_id: row.try_get("session_id")?,
            task_id: row.try_get("task_id")?,
            scope_description: row.try_get("scope_description")?,
            scope_boundaries: row.try_get("scope_boundaries")?,
            affected_files: row.try_get("affected_files")?,
        }))
    }

    async fn record_change(&self, change: &FileChange) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_changes \
             (session_id, file_path, change_type, lines_added, lines_removed, is_within_scope, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(&change.session_id)
        .bind(&change.file_path)
        .bind(to_db_enum(&change.change_type))
        .bind(change.lines_added as i32)
        .bind(change.lines_removed as i32)
        .bind(change.is_within_scope)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session_changes(&self, session_id: &str) -> Result<Vec<FileChange>> {
        let rows = sqlx::query(
            "SELECT session_id, file_path, change_type, lines_added, lines_removed, is_within_scope \
             FROM file_changes WHERE session_id = $1 ORDER BY recorded_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(FileChange {
                    session_id: row.try_get("session_id")?,
                    file_path: row.try_get("file_path")?,
                    change_type: from_db_enum(row.try_get::<String, _>("change_type")?.as_str())?,
                    lines_added: row.try_get::<i32, _>("lines_added")? as u32,
                    lines_removed: row.try_get::<i32, _>("lines_removed")? as u32,
                    is_within_scope: row.try_get("is_within_scope")?,
                })
            })
            .collect()
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scope_definitions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM file_changes WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
