// crates/warden-server/src/observability/audit.rs
// Asynchronous audit pipeline: bounded channel, single drainer, batched
// writes. The request path never blocks on audit durability.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_types::{AuditEvent, AuditStatus, Severity};

use super::metrics;
use crate::stores::AuditStore;

/// Events per batched write.
const BATCH_SIZE: usize = 32;
/// Flush interval for partial batches.
const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Cheap, cloneable producer half of the audit pipeline.
#[derive(Clone)]
pub struct AuditHandle {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditHandle {
    /// A handle that discards everything (enable_audit_logging = false).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit one event. Never blocks: a full channel drops the event and
    /// increments `warden_audit_dropped_total`.
    pub fn emit(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else { return };
        metrics::record_audit_emitted();
        if let Err(e) = tx.try_send(event) {
            metrics::record_audit_dropped();
            tracing::debug!("audit event dropped: {}", e);
        }
    }
}

/// Builder for audit events with the request-scoped fields filled in.
#[derive(Clone)]
pub struct AuditContext {
    pub actor: String,
    pub client_ip: String,
    pub request_id: String,
    pub correlation_id: String,
}

impl AuditContext {
    pub fn event(
        &self,
        event_type: &str,
        action: &str,
        status: AuditStatus,
        details: Value,
    ) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            severity: match status {
                AuditStatus::Success => Severity::Info,
                AuditStatus::Denied => Severity::Warning,
                AuditStatus::Failure => Severity::Error,
            },
            actor: self.actor.clone(),
            action: action.to_string(),
            resource: None,
            status,
            details,
            client_ip: self.client_ip.clone(),
            request_id: self.request_id.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Spawn the drainer and return the producer handle. The drainer restarts
/// itself after a panic; per-request event order is preserved because
/// there is exactly one drainer.
pub fn spawn_audit_pipeline(
    store: Arc<dyn AuditStore>,
    buffer: usize,
    cancel: CancellationToken,
) -> AuditHandle {
    let (tx, rx) = mpsc::channel::<AuditEvent>(buffer.max(1));
    let rx = Arc::new(Mutex::new(rx));

    tokio::spawn(async move {
        loop {
            let store = store.clone();
            let rx = rx.clone();
            let drain_cancel = cancel.clone();
            let worker = tokio::spawn(drain_loop(store, rx, drain_cancel));
            match worker.await {
                Ok(()) => break,
                Err(e) => {
                    metrics::record_panic("audit_drainer");
                    tracing::error!("audit drainer panicked, restarting: {}", e);
                }
            }
        }
    });

    AuditHandle { tx: Some(tx) }
}

async fn drain_loop(
    store: Arc<dyn AuditStore>,
    rx: Arc<Mutex<mpsc::Receiver<AuditEvent>>>,
    cancel: CancellationToken,
) {
    let mut rx = rx.lock().await;
    let mut batch: Vec<AuditEvent> = Vec::with_capacity(BATCH_SIZE);
    let mut flush = tokio::time::interval(FLUSH_INTERVAL);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    batch.push(event);
                    if batch.len() >= BATCH_SIZE {
                        write_batch(&store, &mut batch).await;
                    }
                }
                None => {
                    write_batch(&store, &mut batch).await;
                    return;
                }
            },
            _ = flush.tick() => {
                write_batch(&store, &mut batch).await;
            }
            _ = cancel.cancelled() => {
                // Final drain of whatever is already queued.
                while let Ok(event) = rx.try_recv() {
                    batch.push(event);
                }
                write_batch(&store, &mut batch).await;
                return;
            }
        }
    }
}

async fn write_batch(store: &Arc<dyn AuditStore>, batch: &mut Vec<AuditEvent>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = store.append(batch).await {
        for _ in batch.iter() {
            metrics::record_audit_dropped();
        }
        tracing::warn!(count = batch.len(), "audit batch write failed: {}", e);
    }
    batch.clear();
}
