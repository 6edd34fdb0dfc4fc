// crates/warden-server/src/db/rules.rs
// prevention_rules table access

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use warden_types::{PreventionRule, RuleCategory};

use super::{from_db_enum, to_db_enum};
use crate::error::Result;
use crate::stores::RuleStore;

pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn rule_from_row(row: &PgRow) -> Result<PreventionRule> {
    Ok(PreventionRule {
        rule_id: row.try_get("rule_id")?,
        name: row.try_get("name")?,
        pattern: row.try_get("pattern")?,
        flags: row.try_get("flags")?,
        pattern_hash: row.try_get("pattern_hash")?,
        message: row.try_get("message")?,
        severity: from_db_enum(row.try_get::<String, _>("severity")?.as_str())?,
        enabled: row.try_get("enabled")?,
        category: from_db_enum(row.try_get::<String, _>("category")?.as_str())?,
        suggestion: row.try_get("suggestion")?,
    })
}

const RULE_COLUMNS: &str = "rule_id, name, pattern, flags, pattern_hash, message, \
                            severity, enabled, category, suggestion";

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn list_enabled(&self, category: Option<RuleCategory>) -> Result<Vec<PreventionRule>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM prevention_rules \
             WHERE enabled AND ($1::text IS NULL OR category = $1) \
             ORDER BY rule_id"
        ))
        .bind(category.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn get_by_rule_id(&self, rule_id: &str) -> Result<Option<PreventionRule>> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM prevention_rules WHERE rule_id = $1"
        ))
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    async fn upsert(&self, rule: &PreventionRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO prevention_rules \
             (rule_id, name, pattern, flags, pattern_hash, message, severity, enabled, category, suggestion) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (rule_id) DO UPDATE SET \
               name = EXCLUDED.name, pattern = EXCLUDED.pattern, flags = EXCLUDED.flags, \
               pattern_hash = EXCLUDED.pattern_hash, message = EXCLUDED.message, \
               severity = EXCLUDED.severity, enabled = EXCLUDED.enabled, \
               category = EXCLUDED.category, suggestion = EXCLUDED.suggestion",
        )
        .bind(&rule.rule_id)
        .bind(&rule.name)
        .bind(&rule.pattern)
        .bind(&rule.flags)
        .bind(&rule.pattern_hash)
        .bind(&rule.message)
        .bind(to_db_enum(&rule.severity))
        .bind(rule.enabled)
        .bind(to_db_enum(&rule.category))
        .bind(&rule.suggestion)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, rule_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM prevention_rules WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
