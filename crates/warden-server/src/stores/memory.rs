// crates/warden-server/src/stores/memory.rs
// In-memory store implementations. Integration tests run the full engine
// and transport against these; they also back `warden serve --ephemeral`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use warden_types::{
    AttemptResolution, AuditEvent, ErrorCategory, FailureEntry, FailureStatus, FileChange,
    FileReadRecord, HaltEvent, HaltResolution, HaltSeverity, PreventionRule, Project,
    RuleCategory, ScopeDefinition, TaskAttempt,
};

use super::{
    AuditStore, FailureStore, FileReadStore, HaltEventStore, ProjectStore, RuleStore, ScopeStore,
    Stores, TaskAttemptStore,
};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<HashMap<String, PreventionRule>>,
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_enabled(&self, category: Option<RuleCategory>) -> Result<Vec<PreventionRule>> {
        let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = rules
            .values()
            .filter(|r| r.enabled && category.is_none_or(|c| r.category == c))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        Ok(out)
    }

    async fn get_by_rule_id(&self, rule_id: &str) -> Result<Option<PreventionRule>> {
        let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rules.get(rule_id).cloned())
    }

    async fn upsert(&self, rule: &PreventionRule) -> Result<()> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules.insert(rule.rule_id.clone(), rule.clone());
        Ok(())
    }

    async fn delete(&self, rule_id: &str) -> Result<bool> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rules.remove(rule_id).is_some())
    }
}

#[derive(Default)]
pub struct MemoryProjectStore {
    projects: Mutex<HashMap<String, Project>>,
    /// Backing rule store used to resolve active_rules references.
    rules: Option<Arc<MemoryRuleStore>>,
}

impl MemoryProjectStore {
    pub fn with_rules(rules: Arc<MemoryRuleStore>) -> Self {
        Self {
            projects: Mutex::new(HashMap::new()),
            rules: Some(rules),
        }
    }

    pub fn insert(&self, project: Project) {
        let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        projects.insert(project.slug.clone(), project);
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(projects.get(slug).cloned())
    }

    async fn get_active_rules(&self, slug: &str) -> Result<Vec<PreventionRule>> {
        let active: Vec<String> = {
            let projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
            match projects.get(slug) {
                Some(p) => p.active_rules.clone(),
                None => return Ok(Vec::new()),
            }
        };
        let Some(rules) = &self.rules else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(active.len());
        for rule_id in &active {
            if let Some(rule) = rules.get_by_rule_id(rule_id).await?
                && rule.enabled
            {
                out.push(rule);
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryFailureStore {
    entries: Mutex<Vec<FailureEntry>>,
}

impl MemoryFailureStore {
    pub fn insert(&self, entry: FailureEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }
}

#[async_trait]
impl FailureStore for MemoryFailureStore {
    async fn list_active(&self, project: Option<&str>) -> Result<Vec<FailureEntry>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|e| e.status == FailureStatus::Active)
            .filter(|e| match (&e.project_slug, project) {
                (None, _) => true,
                (Some(scope), Some(p)) => scope == p,
                (Some(_), None) => false,
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryFileReadStore {
    reads: Mutex<HashMap<(String, String), FileReadRecord>>,
}

#[async_trait]
impl FileReadStore for MemoryFileReadStore {
    async fn record_read(
        &self,
        session_id: &str,
        file_path: &str,
        content_hash: Option<&str>,
    ) -> Result<bool> {
        let mut reads = self.reads.lock().unwrap_or_else(|e| e.into_inner());
        let key = (session_id.to_string(), file_path.to_string());
        if reads.contains_key(&key) {
            return Ok(false);
        }
        reads.insert(
            key,
            FileReadRecord {
                session_id: session_id.to_string(),
                file_path: file_path.to_string(),
                read_at: Utc::now(),
                content_hash: content_hash.map(String::from),
            },
        );
        Ok(true)
    }

    async fn has_read(&self, session_id: &str, file_path: &str) -> Result<bool> {
        let reads = self.reads.lock().unwrap_or_else(|e| e.into_inner());
        Ok(reads.contains_key(&(session_id.to_string(), file_path.to_string())))
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        let mut reads = self.reads.lock().unwrap_or_else(|e| e.into_inner());
        reads.retain(|(s, _), _| s != session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTaskAttemptStore {
    attempts: Mutex<Vec<TaskAttempt>>,
}

#[async_trait]
impl TaskAttemptStore for MemoryTaskAttemptStore {
    async fn next_attempt(
        &self,
        session_id: &str,
        task_id: &str,
        error_category: Option<ErrorCategory>,
        error_message: Option<&str>,
    ) -> Result<u32> {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let number = attempts
            .iter()
            .filter(|a| a.session_id == session_id && a.task_id.as_deref() == Some(task_id))
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0)
            + 1;
        attempts.push(TaskAttempt {
            session_id: session_id.to_string(),
            task_id: Some(task_id.to_string()),
            attempt_number: number,
            attempted_at: Utc::now(),
            error_message: error_message.map(String::from),
            error_category,
            resolution: AttemptResolution::Pending,
        });
        Ok(number)
    }

    async fn pending_attempts(&self, session_id: &str, task_id: &str) -> Result<u32> {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(attempts
            .iter()
            .filter(|a| {
                a.session_id == session_id
                    && a.task_id.as_deref() == Some(task_id)
                    && a.resolution == AttemptResolution::Pending
            })
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0))
    }

    async fn mark_resolution(
        &self,
        session_id: &str,
        task_id: Option<&str>,
        resolution: AttemptResolution,
    ) -> Result<()> {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        for attempt in attempts.iter_mut() {
            if attempt.session_id == session_id
                && task_id.is_none_or(|t| attempt.task_id.as_deref() == Some(t))
                && attempt.resolution == AttemptResolution::Pending
            {
                attempt.resolution = resolution;
            }
        }
        Ok(())
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.retain(|a| a.session_id != session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHaltEventStore {
    halts: Mutex<Vec<HaltEvent>>,
}

#[async_trait]
impl HaltEventStore for MemoryHaltEventStore {
    async fn open(&self, halt: &HaltEvent) -> Result<()> {
        let mut halts = self.halts.lock().unwrap_or_else(|e| e.into_inner());
        halts.push(halt.clone());
        Ok(())
    }

    async fn pending_critical(&self, session_id: &str) -> Result<Option<HaltEvent>> {
        let halts = self.halts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(halts
            .iter()
            .filter(|h| {
                h.session_id == session_id
                    && h.severity == HaltSeverity::Critical
                    && h.resolution == HaltResolution::Pending
            })
            .min_by_key(|h| h.triggered_at)
            .cloned())
    }

    async fn acknowledge(&self, halt_id: Uuid, resolution: HaltResolution) -> Result<bool> {
        let mut halts = self.halts.lock().unwrap_or_else(|e| e.into_inner());
        for halt in halts.iter_mut() {
            if halt.id == halt_id && halt.resolution == HaltResolution::Pending {
                halt.resolution = resolution;
                halt.acknowledged = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get(&self, halt_id: Uuid) -> Result<Option<HaltEvent>> {
        let halts = self.halts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(halts.iter().find(|h| h.id == halt_id).cloned())
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        let mut halts = self.halts.lock().unwrap_or_else(|e| e.into_inner());
        halts.retain(|h| h.session_id != session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryScopeStore {
    scopes: Mutex<HashMap<String, ScopeDefinition>>,
    changes: Mutex<Vec<FileChange>>,
}

#[async_trait]
impl ScopeStore for MemoryScopeStore {
    async fn set_scope(&self, scope: &ScopeDefinition) -> Result<()> {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes.insert(scope.session_id.clone(), scope.clone());
        Ok(())
    }

    async fn current_scope(&self, session_id: &str) -> Result<Option<ScopeDefinition>> {
        let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(scopes.get(session_id).cloned())
    }

    async fn record_change(&self, change: &FileChange) -> Result<()> {
        let mut changes = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        changes.push(change.clone());
        Ok(())
    }

    async fn session_changes(&self, session_id: &str) -> Result<Vec<FileChange>> {
        let changes = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(changes
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn purge_session(&self, session_id: &str) -> Result<()> {
        self.scopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        self.changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|c| c.session_id != session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAuditStore {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditStore {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, events: &[AuditEvent]) -> Result<()> {
        let mut stored = self.events.lock().unwrap_or_else(|e| e.into_inner());
        stored.extend_from_slice(events);
        Ok(())
    }
}

/// The full in-memory bundle, with handles kept for test seeding.
pub struct MemoryStores {
    pub rules: Arc<MemoryRuleStore>,
    pub projects: Arc<MemoryProjectStore>,
    pub failures: Arc<MemoryFailureStore>,
    pub file_reads: Arc<MemoryFileReadStore>,
    pub attempts: Arc<MemoryTaskAttemptStore>,
    pub halts: Arc<MemoryHaltEventStore>,
    pub scope: Arc<MemoryScopeStore>,
    pub audit: Arc<MemoryAuditStore>,
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStores {
    pub fn new() -> Self {
        let rules = Arc::new(MemoryRuleStore::default());
        Self {
            projects: Arc::new(MemoryProjectStore::with_rules(rules.clone())),
            rules,
            failures: Arc::new(MemoryFailureStore::default()),
            file_reads: Arc::new(MemoryFileReadStore::default()),
            attempts: Arc::new(MemoryTaskAttemptStore::default()),
            halts: Arc::new(MemoryHaltEventStore::default()),
            scope: Arc::new(MemoryScopeStore::default()),
            audit: Arc::new(MemoryAuditStore::default()),
        }
    }

    pub fn bundle(&self) -> Stores {
        Stores {
            rules: self.rules.clone(),
            projects: self.projects.clone(),
            failures: self.failures.clone(),
            file_reads: self.file_reads.clone(),
            attempts: self.attempts.clone(),
            halts: self.halts.clone(),
            scope: self.scope.clone(),
            audit: self.audit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn rule(id: &str, category: RuleCategory, enabled: bool) -> PreventionRule {
        PreventionRule {
            rule_id: id.to_string(),
            name: id.to_string(),
            pattern: "x".into(),
            flags: String::new(),
            pattern_hash: "h".into(),
            message: "m".into(),
            severity: warden_types::Severity::Error,
            enabled,
            category,
            suggestion: None,
        }
    }

    #[tokio::test]
    async fn test_record_read_idempotent() {
        let store = MemoryFileReadStore::default();
        assert!(store.record_read("s1", "src/a.rs", None).await.unwrap());
        assert!(!store.record_read("s1", "src/a.rs", None).await.unwrap());
        assert!(store.has_read("s1", "src/a.rs").await.unwrap());
        assert!(!store.has_read("s2", "src/a.rs").await.unwrap());
    }

    #[tokio::test]
    async fn test_attempt_numbers_monotonic() {
        let store = MemoryTaskAttemptStore::default();
        assert_eq!(store.next_attempt("s1", "T1", None, None).await.unwrap(), 1);
        assert_eq!(store.next_attempt("s1", "T1", None, None).await.unwrap(), 2);
        assert_eq!(store.next_attempt("s1", "T2", None, None).await.unwrap(), 1);
        assert_eq!(store.pending_attempts("s1", "T1").await.unwrap(), 2);

        store
            .mark_resolution("s1", Some("T1"), AttemptResolution::Resolved)
            .await
            .unwrap();
        assert_eq!(store.pending_attempts("s1", "T1").await.unwrap(), 0);
        assert_eq!(store.pending_attempts("s1", "T2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_critical_halt() {
        let store = MemoryHaltEventStore::default();
        let halt = HaltEvent {
            id: Uuid::new_v4(),
            session_id: "s1".into(),
            halt_type: warden_types::HaltType::Uncertainty,
            severity: HaltSeverity::Critical,
            triggered_at: Utc::now(),
            acknowledged: false,
            resolution: HaltResolution::Pending,
            context_data: Value::Null,
        };
        store.open(&halt).await.unwrap();
        assert!(store.pending_critical("s1").await.unwrap().is_some());

        assert!(
            store
                .acknowledge(halt.id, HaltResolution::Resolved)
                .await
                .unwrap()
        );
        assert!(store.pending_critical("s1").await.unwrap().is_none());
        // Second acknowledge is a no-op
        assert!(
            !store
                .acknowledge(halt.id, HaltResolution::Dismissed)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_active_rules_skip_disabled_and_missing() {
        let stores = MemoryStores::new();
        stores
            .rules
            .upsert(&rule("A-001", RuleCategory::Bash, true))
            .await
            .unwrap();
        stores
            .rules
            .upsert(&rule("A-002", RuleCategory::Bash, false))
            .await
            .unwrap();
        stores.projects.insert(Project {
            id: Uuid::new_v4(),
            slug: "p".into(),
            name: "P".into(),
            guardrail_context: String::new(),
            active_rules: vec!["A-001".into(), "A-002".into(), "GONE-999".into()],
            metadata: Value::Null,
        });

        let active = stores.projects.get_active_rules("p").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].rule_id, "A-001");
    }

    #[tokio::test]
    async fn test_purge_session_clears_working_set() {
        let stores = MemoryStores::new();
        let bundle = stores.bundle();
        bundle.file_reads.record_read("s1", "a", None).await.unwrap();
        bundle.attempts.next_attempt("s1", "T", None, None).await.unwrap();
        bundle
            .scope
            .set_scope(&ScopeDefinition {
                session_id: "s1".into(),
                task_id: None,
                scope_description: "d".into(),
                scope_boundaries: String::new(),
                affected_files: vec!["src/**".into()],
            })
            .await
            .unwrap();

        bundle.purge_session("s1").await.unwrap();
        assert!(!bundle.file_reads.has_read("s1", "a").await.unwrap());
        assert_eq!(bundle.attempts.pending_attempts("s1", "T").await.unwrap(), 0);
        assert!(bundle.scope.current_scope("s1").await.unwrap().is_none());
    }
}
