// crates/warden-server/src/mcp/resources.rs
// Read-only documentation resources exposed over MCP

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::{Precondition, Result, WardenError};
use crate::session::Session;
use crate::web::state::AppState;

const CONTEXT_URI: &str = "warden://context";
const RULES_URI: &str = "warden://rules";

/// `resources/list` result.
pub fn list() -> Value {
    json!({
        "resources": [
            {
                "uri": CONTEXT_URI,
                "name": "Guardrail context",
                "description": "Markdown guardrail context of the bound project",
                "mimeType": "text/markdown",
            },
            {
                "uri": RULES_URI,
                "name": "Active rules",
                "description": "Active prevention rules of the bound project",
                "mimeType": "application/json",
            },
        ]
    })
}

/// `resources/read` result for one of the known URIs.
pub async fn read(state: &AppState, session: &Arc<Session>, uri: &str) -> Result<Value> {
    let slug = session.project_slug().ok_or_else(|| {
        WardenError::precondition(
            Precondition::SessionNotInitialized,
            "call guardrail_init_session first",
        )
    })?;

    match uri {
        CONTEXT_URI => {
            let text = session
                .project
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .map(|p| p.guardrail_context.clone())
                .unwrap_or_default();
            Ok(json!({
                "contents": [{ "uri": uri, "mimeType": "text/markdown", "text": text }]
            }))
        }
        RULES_URI => {
            let rules = state.catalog.active_rules(&session.cancel, &slug).await?;
            let text = serde_json::to_string_pretty(&rules)?;
            Ok(json!({
                "contents": [{ "uri": uri, "mimeType": "application/json", "text": text }]
            }))
        }
        other => Err(WardenError::NotFound(format!("unknown resource {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_has_both_resources() {
        let value = list();
        let uris: Vec<_> = value["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["uri"].as_str().unwrap())
            .collect();
        assert_eq!(uris, vec![CONTEXT_URI, RULES_URI]);
    }
}
