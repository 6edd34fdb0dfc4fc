// crates/warden-server/src/session/manager.rs
// Sharded session map and the expiry sweeper

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, Session};
use crate::cache::CacheHandle;
use crate::config::Config;
use crate::error::{Result, WardenError};
use crate::observability::metrics;
use crate::stores::Stores;

const SHARD_COUNT: usize = 16;
/// Depth of each session's inbound (pre-dispatch) queue.
const INBOUND_DEPTH: usize = 64;

/// 128 bits from a cryptographic RNG, hex-encoded.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Sharded map of live sessions. Shard locks are held only for map
/// membership operations, never across I/O.
pub struct SessionManager {
    shards: Vec<Mutex<HashMap<String, Arc<Session>>>>,
    ttl: Duration,
    queue_depth: usize,
    accepting: AtomicBool,
}

impl SessionManager {
    pub fn new(config: &Config) -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            ttl: config.session_ttl,
            queue_depth: config.sse_queue_depth,
            accepting: AtomicBool::new(true),
        }
    }

    fn shard(&self, session_id: &str) -> &Mutex<HashMap<String, Arc<Session>>> {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Allocate a session for a new SSE stream.
    pub fn create(&self, principal: &str) -> Result<(Arc<Session>, mpsc::Receiver<InboundMessage>)> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(WardenError::DependencyUnavailable {
                dependency: "server shutting down",
            });
        }
        let id = generate_session_id();
        let (session, inbound_rx) = Session::new(
            id.clone(),
            principal.to_string(),
            self.ttl,
            self.queue_depth,
            INBOUND_DEPTH,
        );
        self.shard(&id)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, session.clone());
        metrics::session_opened();
        Ok((session, inbound_rx))
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.shard(session_id)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Remove and close a session. Returns it if it was present.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self
            .shard(session_id)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(session) = &removed {
            session.close();
            metrics::session_closed();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live session (shutdown broadcast).
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.shards
            .iter()
            .flat_map(|s| {
                s.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Stop admitting new sessions (graceful shutdown).
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// One sweep: collect expired sessions under brief shard locks, then
    /// tear each down outside any lock.
    pub async fn sweep(&self, stores: &Stores, cache: &CacheHandle) -> usize {
        let mut expired = Vec::new();
        for shard in &self.shards {
            let map = shard.lock().unwrap_or_else(|e| e.into_inner());
            for session in map.values() {
                if session.is_expired() {
                    expired.push(session.id.clone());
                }
            }
        }

        let count = expired.len();
        for id in expired {
            self.teardown(&id, stores, cache).await;
        }
        count
    }

    /// Close a session and purge its non-durable state everywhere.
    pub async fn teardown(&self, session_id: &str, stores: &Stores, cache: &CacheHandle) {
        if self.remove(session_id).is_none() {
            return;
        }
        tracing::debug!(session_id, "session torn down");
        if let Err(e) = stores.purge_session(session_id).await {
            tracing::warn!(session_id, "failed to purge session state: {}", e);
        }
        cache.del_prefix(&format!("session:{session_id}:")).await;
        cache
            .del_prefix(&format!("ratelimit:session:{session_id}"))
            .await;
    }
}

/// Spawn the long-running sweeper. It recovers from panics (logged and
/// counted) and restarts itself; cancellation stops it for good.
pub fn spawn_sweeper(
    manager: Arc<SessionManager>,
    stores: Stores,
    cache: CacheHandle,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let manager = manager.clone();
            let stores = stores.clone();
            let cache = cache.clone();
            let sweep_cancel = cancel.clone();
            let worker = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let swept = manager.sweep(&stores, &cache).await;
                            if swept > 0 {
                                tracing::info!(swept, "expired sessions cleaned up");
                            }
                        }
                        _ = sweep_cancel.cancelled() => return,
                    }
                }
            });
            match worker.await {
                Ok(()) => break,
                Err(e) => {
                    metrics::record_panic("session_sweeper");
                    tracing::error!("session sweeper panicked, restarting: {}", e);
                }
            }
        }
    });
}
