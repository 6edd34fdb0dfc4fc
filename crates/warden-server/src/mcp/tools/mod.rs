// crates/warden-server/src/mcp/tools/mod.rs
// The guardrail tool surface. Every tool validates its arguments against
// the declared schema, returns a ValidationResult, and emits exactly one
// audit event.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;
use warden_types::{
    AuditStatus, ErrorCategory, HaltResolution, HaltSeverity, HaltType, ScopeDefinition,
    ValidationResult,
};

use crate::engine::ValidationCtx;
use crate::error::{Precondition, Result, WardenError};
use crate::observability::AuditContext;
use crate::session::{ProjectBinding, RequestMeta, Session};
use crate::stores::ProjectStore;
use crate::web::state::AppState;

// Request types for tools with parameters

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct InitSessionRequest {
    #[schemars(description = "Project slug to bind this session to")]
    pub project_slug: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ValidateBashRequest {
    #[schemars(description = "The bash command to validate")]
    pub command: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ValidateFileEditRequest {
    #[schemars(description = "Path of the file being edited")]
    pub file_path: String,
    #[schemars(description = "Current content, if the file exists")]
    pub old_content: Option<String>,
    #[schemars(description = "Content after the edit")]
    pub new_content: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ValidateGitRequest {
    #[schemars(description = "The git command to validate")]
    pub command: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PreWorkCheckRequest {
    #[schemars(description = "Files the upcoming work will touch")]
    pub affected_files: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TestProdSeparationRequest {
    #[schemars(description = "Path to classify")]
    pub file_path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RecordAttemptRequest {
    #[schemars(description = "Task the attempt belongs to")]
    pub task_id: String,
    #[schemars(description = "Failure class: syntax/runtime/logic/timeout/other")]
    pub error_category: Option<ErrorCategory>,
    #[schemars(description = "Error message of the failed attempt")]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RecordFileReadRequest {
    #[schemars(description = "Path that was read")]
    pub file_path: String,
    #[schemars(description = "Optional content hash at read time")]
    pub content_hash: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeclareScopeRequest {
    #[schemars(description = "What this work is about")]
    pub scope_description: String,
    #[schemars(description = "Explicit boundaries of the work")]
    pub scope_boundaries: Option<String>,
    #[schemars(description = "Glob patterns (or exact paths) the work may touch")]
    pub affected_files: Vec<String>,
    #[schemars(description = "Task this scope belongs to")]
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RaiseHaltRequest {
    #[schemars(description = "code_safety/scope/environment/execution/security/uncertainty")]
    pub halt_type: HaltType,
    #[schemars(description = "low/medium/high/critical")]
    pub severity: HaltSeverity,
    #[schemars(description = "Free-form context for the operator")]
    pub context: Option<Value>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ResolveHaltRequest {
    #[schemars(description = "Halt event id (UUID)")]
    pub halt_id: String,
    #[schemars(description = "resolved/escalated/dismissed")]
    pub resolution: HaltResolution,
}

struct ToolDef {
    name: &'static str,
    description: &'static str,
    schema: fn() -> Value,
}

fn schema_of<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

const TOOLS: &[ToolDef] = &[
    ToolDef {
        name: "guardrail_init_session",
        description: "Bind this session to a project and load its active rules and guardrail context. Call once at session start.",
        schema: schema_of::<InitSessionRequest>,
    },
    ToolDef {
        name: "guardrail_validate_bash",
        description: "Validate a bash command against the project's prevention rules.",
        schema: schema_of::<ValidateBashRequest>,
    },
    ToolDef {
        name: "guardrail_validate_file_edit",
        description: "Validate a file edit: read-before-edit, scope, secrets scan, pattern rules.",
        schema: schema_of::<ValidateFileEditRequest>,
    },
    ToolDef {
        name: "guardrail_validate_git_operation",
        description: "Validate a git operation, including force-push protection.",
        schema: schema_of::<ValidateGitRequest>,
    },
    ToolDef {
        name: "guardrail_pre_work_check",
        description: "Composite gate before starting work: reads recorded for each affected file, an active scope, no pending critical halts.",
        schema: schema_of::<PreWorkCheckRequest>,
    },
    ToolDef {
        name: "guardrail_check_test_prod_separation",
        description: "Classify a path as production/test/infrastructure and flag disallowed mixing in this session.",
        schema: schema_of::<TestProdSeparationRequest>,
    },
    ToolDef {
        name: "guardrail_record_attempt",
        description: "Record a failed attempt at a task (three-strikes accounting).",
        schema: schema_of::<RecordAttemptRequest>,
    },
    ToolDef {
        name: "guardrail_record_file_read",
        description: "Record that a file was read in this session (required before editing it).",
        schema: schema_of::<RecordFileReadRequest>,
    },
    ToolDef {
        name: "guardrail_declare_scope",
        description: "Declare the scope of upcoming work; edits outside it are denied.",
        schema: schema_of::<DeclareScopeRequest>,
    },
    ToolDef {
        name: "guardrail_raise_halt",
        description: "Raise a halt event. A critical halt blocks all validation until resolved.",
        schema: schema_of::<RaiseHaltRequest>,
    },
    ToolDef {
        name: "guardrail_resolve_halt",
        description: "Acknowledge a halt event with a resolution; also clears a pending escalation.",
        schema: schema_of::<ResolveHaltRequest>,
    },
    ToolDef {
        name: "guardrail_get_context",
        description: "Return the merged guardrail context for the bound project.",
        schema: empty_schema,
    },
];

/// Tool schemas for `tools/list`.
pub fn definitions() -> Vec<Value> {
    TOOLS
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": (t.schema)(),
            })
        })
        .collect()
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| WardenError::InvalidInput(format!("invalid arguments: {e}")))
}

/// MCP CallToolResult wrapping a validation verdict.
fn verdict(result: &ValidationResult) -> Value {
    let text =
        serde_json::to_string_pretty(result).unwrap_or_else(|_| "validation result".to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": result,
    })
}

fn text_result(text: String, structured: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured,
    })
}

/// Context a bound session must provide before validating.
fn validation_ctx(session: &Arc<Session>) -> Result<ValidationCtx> {
    let slug = session.project_slug().ok_or_else(|| {
        WardenError::precondition(
            Precondition::SessionNotInitialized,
            "call guardrail_init_session first",
        )
    })?;
    Ok(ValidationCtx {
        session_id: session.id.clone(),
        project_slug: slug,
        cancel: session.cancel.clone(),
    })
}

fn audit_ctx(session: &Arc<Session>, meta: &RequestMeta) -> AuditContext {
    AuditContext {
        actor: meta.actor.clone(),
        client_ip: meta.client_ip.clone(),
        request_id: meta.request_id.clone(),
        correlation_id: meta.correlation_id.clone(),
    }
}

fn audit_status(outcome: &Result<Value>) -> AuditStatus {
    match outcome {
        Ok(value) => {
            let valid = value
                .pointer("/structuredContent/valid")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if valid {
                AuditStatus::Success
            } else {
                AuditStatus::Denied
            }
        }
        Err(_) => AuditStatus::Failure,
    }
}

/// Invoke a named tool. Exactly one audit event is emitted per call,
/// success or failure.
pub async fn call(
    state: &AppState,
    session: &Arc<Session>,
    meta: &RequestMeta,
    name: &str,
    arguments: Value,
) -> Result<Value> {
    let outcome = dispatch(state, session, meta, name, arguments).await;

    let audit = audit_ctx(session, meta);
    let details = match &outcome {
        Ok(value) => value
            .pointer("/structuredContent")
            .map(|sc| json!({ "session_id": session.id, "outcome": sc }))
            .unwrap_or_else(|| json!({ "session_id": session.id })),
        Err(e) => json!({ "session_id": session.id, "error": e.kind() }),
    };
    let mut event = audit.event("tool_call", name, audit_status(&outcome), details);
    event.resource = session.project_slug();
    state.audit.emit(event);

    outcome
}

async fn dispatch(
    state: &AppState,
    session: &Arc<Session>,
    _meta: &RequestMeta,
    name: &str,
    arguments: Value,
) -> Result<Value> {
    match name {
        "guardrail_init_session" => {
            let req: InitSessionRequest = parse_args(arguments)?;
            init_session(state, session, req).await
        }
        "guardrail_validate_bash" => {
            let req: ValidateBashRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let result = state.engine.validate_bash(&ctx, &req.command).await?;
            Ok(verdict(&result))
        }
        "guardrail_validate_file_edit" => {
            let req: ValidateFileEditRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let result = state
                .engine
                .validate_file_edit(
                    &ctx,
                    &req.file_path,
                    req.old_content.as_deref(),
                    &req.new_content,
                )
                .await?;
            Ok(verdict(&result))
        }
        "guardrail_validate_git_operation" => {
            let req: ValidateGitRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let result = state.engine.validate_git(&ctx, &req.command).await?;
            Ok(verdict(&result))
        }
        "guardrail_pre_work_check" => {
            let req: PreWorkCheckRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let result = state.engine.pre_work_check(&ctx, &req.affected_files).await?;
            Ok(verdict(&result))
        }
        "guardrail_check_test_prod_separation" => {
            let req: TestProdSeparationRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let (_class, result) = state
                .engine
                .check_test_prod_separation(&ctx, &req.file_path)
                .await?;
            Ok(verdict(&result))
        }
        "guardrail_record_attempt" => {
            let req: RecordAttemptRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let (attempt, result) = state
                .engine
                .record_attempt(
                    &ctx,
                    &req.task_id,
                    req.error_category,
                    req.error_message.as_deref(),
                )
                .await?;
            let mut value = verdict(&result);
            value["structuredContent"]["attempt_number"] = json!(attempt);
            Ok(value)
        }
        "guardrail_record_file_read" => {
            let req: RecordFileReadRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let first_read = state
                .engine
                .record_file_read(&ctx, &req.file_path, req.content_hash.as_deref())
                .await?;
            Ok(text_result(
                format!(
                    "{} {}",
                    req.file_path,
                    if first_read { "recorded" } else { "already recorded" }
                ),
                json!({ "valid": true, "violations": [], "first_read": first_read }),
            ))
        }
        "guardrail_declare_scope" => {
            let req: DeclareScopeRequest = parse_args(arguments)?;
            if req.scope_description.trim().is_empty() {
                return Err(WardenError::InvalidInput("scope_description is required".into()));
            }
            let ctx = validation_ctx(session)?;
            state
                .engine
                .declare_scope(
                    &ctx,
                    ScopeDefinition {
                        session_id: ctx.session_id.clone(),
                        task_id: req.task_id,
                        scope_description: req.scope_description,
                        scope_boundaries: req.scope_boundaries.unwrap_or_default(),
                        affected_files: req.affected_files.clone(),
                    },
                )
                .await?;
            Ok(text_result(
                format!("scope set: {} pattern(s)", req.affected_files.len()),
                json!({ "valid": true, "violations": [] }),
            ))
        }
        "guardrail_raise_halt" => {
            let req: RaiseHaltRequest = parse_args(arguments)?;
            let ctx = validation_ctx(session)?;
            let halt = state
                .engine
                .raise_halt(
                    &ctx,
                    req.halt_type,
                    req.severity,
                    req.context.unwrap_or(Value::Null),
                )
                .await?;
            Ok(text_result(
                format!("halt {} raised ({:?}, {:?})", halt.id, halt.halt_type, halt.severity),
                json!({ "valid": true, "violations": [], "halt_id": halt.id }),
            ))
        }
        "guardrail_resolve_halt" => {
            let req: ResolveHaltRequest = parse_args(arguments)?;
            if req.resolution == HaltResolution::Pending {
                return Err(WardenError::InvalidInput(
                    "resolution must be resolved, escalated, or dismissed".into(),
                ));
            }
            let halt_id = Uuid::parse_str(&req.halt_id)
                .map_err(|e| WardenError::InvalidInput(format!("invalid halt_id: {e}")))?;
            let ctx = validation_ctx(session)?;
            let acknowledged = state
                .engine
                .resolve_halt(&ctx, halt_id, req.resolution)
                .await?;
            if !acknowledged {
                return Err(WardenError::NotFound(format!(
                    "no pending halt {}",
                    req.halt_id
                )));
            }
            Ok(text_result(
                format!("halt {} acknowledged", req.halt_id),
                json!({ "valid": true, "violations": [], "halt_id": req.halt_id }),
            ))
        }
        "guardrail_get_context" => {
            let ctx = validation_ctx(session)?;
            get_context(state, session, ctx).await
        }
        other => Err(WardenError::NotFound(format!("unknown tool {other:?}"))),
    }
}

async fn init_session(
    state: &AppState,
    session: &Arc<Session>,
    req: InitSessionRequest,
) -> Result<Value> {
    let stores = state.stores.clone();
    let slug = req.project_slug.clone();
    let project = state
        .resilience
        .db
        .read(&session.cancel, || {
            let stores = stores.clone();
            let slug = slug.clone();
            async move { stores.projects.get_by_slug(&slug).await }
        })
        .await?
        .ok_or_else(|| WardenError::NotFound(format!("no project with slug {slug:?}")))?;

    session
        .bind_project(ProjectBinding {
            slug: project.slug.clone(),
            guardrail_context: project.guardrail_context.clone(),
        })
        .map_err(|bound| {
            WardenError::precondition(
                Precondition::SessionConflict,
                format!("session already bound to project {bound:?}"),
            )
        })?;

    // Warm the rule cache so the first validation doesn't pay the load.
    let rules = state
        .catalog
        .active_rules(&session.cancel, &project.slug)
        .await?;
    if rules.len() < project.active_rules.len() {
        tracing::warn!(
            slug = %project.slug,
            declared = project.active_rules.len(),
            resolved = rules.len(),
            "project references missing or disabled rules; skipping them"
        );
    }

    let token = state.auth.issue_session_token(&session.id)?;
    Ok(text_result(
        format!(
            "session bound to {} ({} active rules)",
            project.slug,
            rules.len()
        ),
        json!({
            "valid": true,
            "violations": [],
            "session_id": session.id,
            "project_slug": project.slug,
            "active_rules": rules.len(),
            "mode": "active",
            "session_token": token,
        }),
    ))
}

async fn get_context(
    state: &AppState,
    session: &Arc<Session>,
    ctx: ValidationCtx,
) -> Result<Value> {
    let guardrail_context = session
        .project
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .map(|p| p.guardrail_context.clone())
        .unwrap_or_default();

    let rules = state
        .catalog
        .active_rules(&ctx.cancel, &ctx.project_slug)
        .await?;
    let mode = state.engine.session_mode(&ctx).await?;

    let mut text = guardrail_context.clone();
    if !rules.is_empty() {
        text.push_str("\n\n## Active rules\n");
        for rule in &rules {
            text.push_str(&format!("- {}: {}\n", rule.rule_id, rule.name));
        }
    }

    Ok(text_result(
        text,
        json!({
            "valid": true,
            "violations": [],
            "project_slug": ctx.project_slug,
            "mode": mode,
            "guardrail_context": guardrail_context,
            "active_rules": rules.iter().map(|r| r.rule_id.clone()).collect::<Vec<_>>(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_cover_the_surface() {
        let defs = definitions();
        let names: Vec<_> = defs
            .iter()
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect();
        for required in [
            "guardrail_init_session",
            "guardrail_validate_bash",
            "guardrail_validate_file_edit",
            "guardrail_validate_git_operation",
            "guardrail_pre_work_check",
            "guardrail_check_test_prod_separation",
            "guardrail_record_attempt",
            "guardrail_get_context",
        ] {
            assert!(names.contains(&required.to_string()), "missing {required}");
        }
        for def in &defs {
            assert!(def["inputSchema"].is_object(), "{} lacks schema", def["name"]);
            assert!(!def["description"].as_str().unwrap_or_default().is_empty());
        }
    }

    #[test]
    fn test_parse_args_rejects_wrong_shape() {
        let err =
            parse_args::<ValidateBashRequest>(json!({"cmd": "ls"})).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_verdict_shape() {
        let result = ValidationResult::ok();
        let value = verdict(&result);
        assert_eq!(value["structuredContent"]["valid"], json!(true));
        assert_eq!(value["content"][0]["type"], json!("text"));
    }
}
