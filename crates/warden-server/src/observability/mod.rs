// crates/warden-server/src/observability/mod.rs
// Metrics and the asynchronous audit pipeline

pub mod audit;
pub mod metrics;

pub use audit::{AuditContext, AuditHandle, spawn_audit_pipeline};
