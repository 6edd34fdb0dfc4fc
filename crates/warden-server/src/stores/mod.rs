// crates/warden-server/src/stores/mod.rs
// Repository ports: the typed contracts the core requires from storage.
// PostgreSQL implementations live in `db`; `memory` provides in-process
// implementations for tests and embedded runs.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;
use warden_types::{
    AttemptResolution, AuditEvent, ErrorCategory, FailureEntry, FileChange, HaltEvent,
    HaltResolution, PreventionRule, Project, RuleCategory, ScopeDefinition,
};

use crate::error::Result;

/// Prevention rule persistence.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All enabled rules, optionally filtered by category.
    async fn list_enabled(&self, category: Option<RuleCategory>) -> Result<Vec<PreventionRule>>;

    /// Look up a rule by its stable short code. Disabled rules remain
    /// queryable.
    async fn get_by_rule_id(&self, rule_id: &str) -> Result<Option<PreventionRule>>;

    /// Insert or replace a rule. Callers go through
    /// [`crate::rules::RuleCatalog::upsert_rule`] so the compiled-pattern
    /// and project caches are invalidated together with the write.
    async fn upsert(&self, rule: &PreventionRule) -> Result<()>;

    /// Delete a rule; returns whether it existed.
    async fn delete(&self, rule_id: &str) -> Result<bool>;
}

/// Project persistence.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Project>>;

    /// The project's active rules, resolved to full rule records in the
    /// project's declared order. References to deleted rules are absent
    /// from the result; the caller logs the skip.
    async fn get_active_rules(&self, slug: &str) -> Result<Vec<PreventionRule>>;
}

/// Failure registry reads.
#[async_trait]
pub trait FailureStore: Send + Sync {
    /// Active entries, globally or scoped to a project (entries with no
    /// project_slug apply everywhere).
    async fn list_active(&self, project: Option<&str>) -> Result<Vec<FailureEntry>>;
}

/// Read-before-edit bookkeeping. `record_read` is idempotent per
/// `(session, path)`.
#[async_trait]
pub trait FileReadStore: Send + Sync {
    /// Record a read; returns `true` when this was the first read of the
    /// path within the session.
    async fn record_read(
        &self,
        session_id: &str,
        file_path: &str,
        content_hash: Option<&str>,
    ) -> Result<bool>;

    async fn has_read(&self, session_id: &str, file_path: &str) -> Result<bool>;

    /// Drop all read records for an ended session.
    async fn purge_session(&self, session_id: &str) -> Result<()>;
}

/// Three-strikes accounting.
#[async_trait]
pub trait TaskAttemptStore: Send + Sync {
    /// Record the next attempt for `(session, task)` and return its
    /// monotonic attempt number (starting at 1).
    async fn next_attempt(
        &self,
        session_id: &str,
        task_id: &str,
        error_category: Option<ErrorCategory>,
        error_message: Option<&str>,
    ) -> Result<u32>;

    /// Highest attempt number still pending for `(session, task)`, or 0.
    async fn pending_attempts(&self, session_id: &str, task_id: &str) -> Result<u32>;

    /// Resolve attempts: for one task, or for every task of the session
    /// when `task_id` is `None`.
    async fn mark_resolution(
        &self,
        session_id: &str,
        task_id: Option<&str>,
        resolution: AttemptResolution,
    ) -> Result<()>;

    async fn purge_session(&self, session_id: &str) -> Result<()>;
}

/// Halt event persistence.
#[async_trait]
pub trait HaltEventStore: Send + Sync {
    async fn open(&self, halt: &HaltEvent) -> Result<()>;

    /// The oldest critical halt still pending for the session, if any.
    async fn pending_critical(&self, session_id: &str) -> Result<Option<HaltEvent>>;

    /// Acknowledge a halt with the given resolution; returns whether the
    /// halt existed and was pending.
    async fn acknowledge(&self, halt_id: Uuid, resolution: HaltResolution) -> Result<bool>;

    async fn get(&self, halt_id: Uuid) -> Result<Option<HaltEvent>>;

    async fn purge_session(&self, session_id: &str) -> Result<()>;
}

/// Scope definitions and recorded file changes.
#[async_trait]
pub trait ScopeStore: Send + Sync {
    /// Replace the session's current scope definition.
    async fn set_scope(&self, scope: &ScopeDefinition) -> Result<()>;

    async fn current_scope(&self, session_id: &str) -> Result<Option<ScopeDefinition>>;

    async fn record_change(&self, change: &FileChange) -> Result<()>;

    /// Changes recorded for the session, oldest first.
    async fn session_changes(&self, session_id: &str) -> Result<Vec<FileChange>>;

    async fn purge_session(&self, session_id: &str) -> Result<()>;
}

/// Durable audit sink. The request path never calls this directly; the
/// audit pipeline batches into it from its drainer task.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, events: &[AuditEvent]) -> Result<()>;
}

/// The bundle of ports handed to the engine and transport.
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub failures: Arc<dyn FailureStore>,
    pub file_reads: Arc<dyn FileReadStore>,
    pub attempts: Arc<dyn TaskAttemptStore>,
    pub halts: Arc<dyn HaltEventStore>,
    pub scope: Arc<dyn ScopeStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    /// Purge every piece of transient session state. Used by the session
    /// sweeper and by explicit session shutdown.
    pub async fn purge_session(&self, session_id: &str) -> Result<()> {
        self.file_reads.purge_session(session_id).await?;
        self.attempts.purge_session(session_id).await?;
        self.halts.purge_session(session_id).await?;
        self.scope.purge_session(session_id).await?;
        Ok(())
    }
}
