// crates/warden-server/src/session/mod.rs
// Session model: one authenticated, transport-bound MCP conversation

pub mod manager;
pub mod queue;

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use manager::SessionManager;
pub use queue::{OutboundFrame, OutboundQueue, PushError};

/// Project binding established by `guardrail_init_session`.
#[derive(Debug, Clone)]
pub struct ProjectBinding {
    pub slug: String,
    pub guardrail_context: String,
}

/// Request-scoped metadata carried from the POST endpoint to the
/// dispatcher and into audit events.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    pub correlation_id: String,
    pub client_ip: String,
    pub actor: String,
}

/// One JSON-RPC message accepted for a session, awaiting dispatch.
#[derive(Debug)]
pub struct InboundMessage {
    pub payload: serde_json::Value,
    pub meta: RequestMeta,
}

/// Server-side session state. The dispatcher task is the sole mutator of
/// the working set; shard locks in the manager only guard map membership.
pub struct Session {
    pub id: String,
    /// SHA-256 prefix of the authenticating key.
    pub principal: String,
    created: Instant,
    /// Expiry instant; advanced on activity.
    deadline: Mutex<Instant>,
    ttl: Duration,
    pub project: RwLock<Option<ProjectBinding>>,
    pub outbound: Arc<OutboundQueue>,
    pub inbound: mpsc::Sender<InboundMessage>,
    /// Cancelled when the session ends, stopping writer and dispatcher.
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(
        id: String,
        principal: String,
        ttl: Duration,
        queue_depth: usize,
        inbound_depth: usize,
    ) -> (Arc<Self>, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_depth.max(1));
        let session = Arc::new(Self {
            id,
            principal,
            created: Instant::now(),
            deadline: Mutex::new(Instant::now() + ttl),
            ttl,
            project: RwLock::new(None),
            outbound: Arc::new(OutboundQueue::new(queue_depth)),
            inbound: inbound_tx,
            cancel: CancellationToken::new(),
        });
        (session, inbound_rx)
    }

    /// Advance the expiry deadline on any activity.
    pub fn touch(&self) {
        let mut deadline = self.deadline.lock().unwrap_or_else(|e| e.into_inner());
        *deadline = Instant::now() + self.ttl;
    }

    pub fn is_expired(&self) -> bool {
        let deadline = self.deadline.lock().unwrap_or_else(|e| e.into_inner());
        Instant::now() > *deadline
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn project_slug(&self) -> Option<String> {
        self.project
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|p| p.slug.clone())
    }

    /// Bind the session to a project. Fails closed when already bound to a
    /// different project.
    pub fn bind_project(&self, binding: ProjectBinding) -> Result<(), String> {
        let mut project = self.project.write().unwrap_or_else(|e| e.into_inner());
        match project.as_ref() {
            Some(existing) if existing.slug != binding.slug => Err(existing.slug.clone()),
            _ => {
                *project = Some(binding);
                Ok(())
            }
        }
    }

    /// Terminal teardown: stop the writer and dispatcher, drain the queue.
    pub fn close(&self) {
        self.cancel.cancel();
        self.outbound.close();
    }
}
