// crates/warden-server/src/db/projects.rs
// projects table access

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use warden_types::{PreventionRule, Project};

use super::rules::rule_from_row;
use crate::error::Result;
use crate::stores::ProjectStore;

pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, slug, name, guardrail_context, active_rules, metadata \
             FROM projects WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(Project {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            name: row.try_get("name")?,
            guardrail_context: row.try_get("guardrail_context")?,
            active_rules: row.try_get("active_rules")?,
            metadata: row.try_get("metadata")?,
        }))
    }

    async fn get_active_rules(&self, slug: &str) -> Result<Vec<PreventionRule>> {
        // unnest WITH ORDINALITY preserves the project's declared rule
        // order; references to deleted rules drop out of the join.
        let rows = sqlx::query(
            "SELECT r.rule_id, r.name, r.pattern, r.flags, r.pattern_hash, r.message, \
                    r.severity, r.enabled, r.category, r.suggestion \
             FROM projects p \
             CROSS JOIN LATERAL unnest(p.active_rules) WITH ORDINALITY AS ar(rule_id, ord) \
             JOIN prevention_rules r ON r.rule_id = ar.rule_id \
             WHERE p.slug = $1 AND r.enabled \
             ORDER BY ar.ord",
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }
}
