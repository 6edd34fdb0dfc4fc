// crates/warden-types/src/lib.rs

//! Shared data contracts between the Warden server and its clients.
//!
//! This crate provides the core domain model for:
//! - **Prevention rules**: stored, compiled, regex-based policies
//! - **Projects**: per-project rule scoping and guardrail context
//! - **Session working set**: file reads, task attempts, halts, scope
//! - **Validation results**: the wire shape every guardrail tool returns
//! - **Audit events**: the append-only trail behind every validation
//!
//! These types are pure serde contracts with no native-only dependencies,
//! so UI and IDE-plugin clients can share them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ===================================================
// RULES
// ===================================================

/// Violation severity, ordered so that `Error > Warning > Info`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Tool category a rule applies to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Bash,
    Git,
    FileEdit,
    General,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Bash => "bash",
            RuleCategory::Git => "git",
            RuleCategory::FileEdit => "file_edit",
            RuleCategory::General => "general",
        }
    }
}

/// A stored prevention rule. `pattern_hash` is the SHA-256 of
/// `pattern + '\n' + flags` and keys the compiled-pattern cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreventionRule {
    /// Stable short code, unique (e.g. `PREVENT-GIT-001`).
    pub rule_id: String,
    pub name: String,
    /// Regex source. Must compile under the engine's limits.
    pub pattern: String,
    /// Regex flags (e.g. `i`); hashed together with the pattern.
    #[serde(default)]
    pub flags: String,
    pub pattern_hash: String,
    /// Message shown to the agent when the rule matches.
    pub message: String,
    pub severity: Severity,
    pub enabled: bool,
    pub category: RuleCategory,
    /// Optional remediation hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

// ===================================================
// PROJECTS
// ===================================================

/// A project scopes rules and guardrail context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    /// Unique, non-empty slug used in tool calls and cache keys.
    pub slug: String,
    pub name: String,
    /// Markdown guardrail context returned by `guardrail_get_context`.
    #[serde(default)]
    pub guardrail_context: String,
    /// Ordered set of rule_ids active for this project. Entries referring
    /// to deleted rules are skipped at evaluation time.
    #[serde(default)]
    pub active_rules: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

// ===================================================
// SESSION WORKING SET
// ===================================================

/// A read recorded for read-before-edit. Idempotent on
/// `(session_id, file_path)` within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReadRecord {
    pub session_id: String,
    pub file_path: String,
    pub read_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Syntax,
    Runtime,
    Logic,
    Timeout,
    Other,
}

/// Resolution state of a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttemptResolution {
    Pending,
    Resolved,
    Escalated,
    Abandoned,
}

/// One recorded attempt at a task. `attempt_number` is monotonic per
/// `(session_id, task_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub attempt_number: u32,
    pub attempted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    pub resolution: AttemptResolution,
}

/// Class of condition that raised a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HaltType {
    CodeSafety,
    Scope,
    Environment,
    Execution,
    Security,
    Uncertainty,
}

/// Halt severity. A `Critical` halt with `Pending` resolution blocks all
/// validation for the session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum HaltSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Resolution state of a halt event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HaltResolution {
    Pending,
    Resolved,
    Escalated,
    Dismissed,
}

/// An explicit blocking condition on a session, acknowledged by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltEvent {
    pub id: Uuid,
    pub session_id: String,
    pub halt_type: HaltType,
    pub severity: HaltSeverity,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolution: HaltResolution,
    #[serde(default)]
    pub context_data: Value,
}

impl HaltEvent {
    /// Whether this halt blocks validation for its session.
    pub fn is_blocking(&self) -> bool {
        self.severity == HaltSeverity::Critical && self.resolution == HaltResolution::Pending
    }
}

/// The session's declared scope of work. `affected_files` entries are glob
/// patterns; exact paths are degenerate globs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeDefinition {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub scope_description: String,
    #[serde(default)]
    pub scope_boundaries: String,
    pub affected_files: Vec<String>,
}

/// Kind of change applied to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Addition,
    Modification,
    Deletion,
}

/// A recorded file change. `is_within_scope` is derived by the engine from
/// the session's latest scope definition, never supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub session_id: String,
    pub file_path: String,
    pub change_type: ChangeType,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub is_within_scope: bool,
}

// ===================================================
// FAILURE REGISTRY
// ===================================================

/// Lifecycle of a failure registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    Active,
    Resolved,
    Deprecated,
}

/// A post-mortem record. An `Active` entry with a non-empty
/// `regression_pattern` behaves like a project-scoped prevention rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub failure_id: Uuid,
    pub category: String,
    pub severity: Severity,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regression_pattern: Option<String>,
    pub status: FailureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_slug: Option<String>,
}

// ===================================================
// VALIDATION RESULTS
// ===================================================

/// Stable violation codes carried on the wire.
pub mod violation_codes {
    pub const RULE_VIOLATION: &str = "rule_violation";
    pub const REGRESSION_PATTERN: &str = "regression_pattern";
    pub const SECRET_DETECTED: &str = "secret_detected";
    pub const READ_BEFORE_EDIT: &str = "read_before_edit";
    pub const SCOPE_VIOLATION: &str = "scope_violation";
    pub const MUST_ESCALATE: &str = "must_escalate";
    pub const HALT_ACTIVE: &str = "halt_active";
    pub const TEST_PROD_MIX: &str = "test_prod_mix";
    pub const MISSING_SCOPE: &str = "missing_scope";
}

/// One policy violation inside a [`ValidationResult`].
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Violation {
    /// Stable machine-readable code (see [`violation_codes`]).
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Violation {
    pub fn new(code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            rule_id: None,
            severity,
            message: message.into(),
            file_path: None,
            line: None,
            column: None,
            suggestion: None,
        }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// The result object every guardrail tool returns.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
}

impl ValidationResult {
    /// A passing result with no violations.
    pub fn ok() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
            advisory: None,
        }
    }

    /// Build a result from collected violations. The result is valid only
    /// when no violation carries `Severity::Error`; warnings and info
    /// annotate a passing result.
    pub fn from_violations(mut violations: Vec<Violation>) -> Self {
        // Stable presentation order: severity desc, then rule_id asc.
        violations.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        let valid = !violations.iter().any(|v| v.severity == Severity::Error);
        Self {
            valid,
            violations,
            advisory: None,
        }
    }

    pub fn with_advisory(mut self, advisory: impl Into<String>) -> Self {
        self.advisory = Some(advisory.into());
        self
    }
}

// ===================================================
// SESSION MODE
// ===================================================

/// Validation mode of a session.
///
/// ```text
/// ACTIVE --three_strikes--> MUST_ESCALATE --halt_ack--> ACTIVE
///   |                                          ^
///   +--critical_halt_raised--> HALTED ---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Active,
    MustEscalate,
    Halted,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Active => "active",
            SessionMode::MustEscalate => "must_escalate",
            SessionMode::Halted => "halted",
        }
    }
}

// ===================================================
// AUDIT
// ===================================================

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Denied,
    Failure,
}

/// One append-only audit record. The ingestion pipeline never blocks a
/// request path; overflow is dropped and counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: Severity,
    /// SHA-256 hash prefix of the presented API key, never the key itself.
    pub actor: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub status: AuditStatus,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub client_ip: String,
    pub request_id: String,
    pub correlation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================
    // Severity / ordering tests
    // ============================================================================

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"error\"");
        let s: Severity = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(s, Severity::Warning);
    }

    #[test]
    fn test_rule_category_roundtrip() {
        let json = serde_json::to_string(&RuleCategory::FileEdit).unwrap();
        assert_eq!(json, "\"file_edit\"");
        let back: RuleCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RuleCategory::FileEdit);
    }

    // ============================================================================
    // ValidationResult tests
    // ============================================================================

    #[test]
    fn test_result_valid_with_warnings_only() {
        let result = ValidationResult::from_violations(vec![Violation::new(
            violation_codes::TEST_PROD_MIX,
            Severity::Warning,
            "mixing",
        )]);
        assert!(result.valid);
        assert_eq!(result.violations.len(), 1);
    }

    #[test]
    fn test_result_invalid_with_error() {
        let result = ValidationResult::from_violations(vec![
            Violation::new(violation_codes::RULE_VIOLATION, Severity::Info, "note"),
            Violation::new(violation_codes::RULE_VIOLATION, Severity::Error, "bad"),
        ]);
        assert!(!result.valid);
        // Errors sort first
        assert_eq!(result.violations[0].severity, Severity::Error);
    }

    #[test]
    fn test_result_tiebreak_by_rule_id() {
        let result = ValidationResult::from_violations(vec![
            Violation::new("rule_violation", Severity::Error, "b").with_rule("B-002"),
            Violation::new("rule_violation", Severity::Error, "a").with_rule("A-001"),
        ]);
        assert_eq!(result.violations[0].rule_id.as_deref(), Some("A-001"));
    }

    // ============================================================================
    // Halt tests
    // ============================================================================

    #[test]
    fn test_halt_blocking() {
        let mut halt = HaltEvent {
            id: Uuid::new_v4(),
            session_id: "s".into(),
            halt_type: HaltType::Security,
            severity: HaltSeverity::Critical,
            triggered_at: Utc::now(),
            acknowledged: false,
            resolution: HaltResolution::Pending,
            context_data: Value::Null,
        };
        assert!(halt.is_blocking());
        halt.resolution = HaltResolution::Resolved;
        assert!(!halt.is_blocking());
        halt.resolution = HaltResolution::Pending;
        halt.severity = HaltSeverity::High;
        assert!(!halt.is_blocking());
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let json = r#"{
            "rule_id": "PREVENT-GIT-001",
            "name": "no force push",
            "pattern": "git\\s+push\\s+--force",
            "pattern_hash": "abc",
            "message": "don't",
            "severity": "error",
            "enabled": true,
            "category": "git"
        }"#;
        let rule: PreventionRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.flags, "");
        assert!(rule.suggestion.is_none());
    }
}
