// crates/warden-server/src/db/audit.rs
// audit_events table access (append-only)

use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};
use warden_types::AuditEvent;

use super::to_db_enum;
use crate::error::Result;
use crate::stores::AuditStore;

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, events: &[AuditEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new(
            "INSERT INTO audit_events \
             (event_id, timestamp, event_type, severity, actor, action, resource, \
              status, details, client_ip, request_id, correlation_id) ",
        );
        builder.push_values(events, |mut b, event| {
            b.push_bind(event.event_id)
                .push_bind(event.timestamp)
                .push_bind(&event.event_type)
                .push_bind(to_db_enum(&event.severity))
                .push_bind(&event.actor)
                .push_bind(&event.action)
                .push_bind(&event.resource)
                .push_bind(to_db_enum(&event.status))
                .push_bind(&event.details)
                .push_bind(&event.client_ip)
                .push_bind(&event.request_id)
                .push_bind(&event.correlation_id);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
