//! MCP sessions and their lifecycle
//!
//! A [`Session`] pairs one protocol server with one transport and the three
//! capability registries bound to that server. The [`SessionManager`] owns all
//! live sessions, enforces the session ceiling and reaps idle sessions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::TransportError;
use super::registry::CapabilityRegistries;
use super::server::McpServer;
use super::transport::Transport;
use crate::auth::Caller;
use crate::config::McpSettings;
use crate::server::metrics;

pub struct Session {
    id: String,
    pub server: Arc<McpServer>,
    pub transport: Arc<dyn Transport>,
    registries: Mutex<CapabilityRegistries>,
    caller: Option<Caller>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(
        id: String,
        server: Arc<McpServer>,
        transport: Arc<dyn Transport>,
        registries: CapabilityRegistries,
        caller: Option<Caller>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            server,
            transport,
            registries: Mutex::new(registries),
            caller,
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The capability registries bound to this session's server.
    pub fn registries(&self) -> MutexGuard<'_, CapabilityRegistries> {
        self.registries.lock()
    }

    /// Caller authenticated on the request that created the session.
    pub fn caller(&self) -> Option<&Caller> {
        self.caller.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn update_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(crate) fn set_last_activity(&self, at: Instant) {
        *self.last_activity.lock() = at;
    }

    pub fn idle_time_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Close transport and server. The server is closed even when the
    /// transport fails to close.
    pub async fn close(&self) -> Result<(), TransportError> {
        let transport = self.transport.close().await;
        self.server.close().await;
        transport
    }
}

/// Outcome of [`SessionManager::close_all_sessions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseSummary {
    pub errored_session_messages: Vec<String>,
    pub has_errors: bool,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, Arc<Session>>,
    /// Slots held by admissions whose session is not initialized yet.
    reserved: usize,
}

pub struct SessionManager {
    table: Mutex<SessionTable>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(SessionTable::default()),
            max_sessions,
            idle_timeout,
        }
    }

    pub fn from_settings(settings: &McpSettings) -> Self {
        Self::new(
            settings.max_sessions,
            Duration::from_millis(settings.session_idle_timeout_ms),
        )
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.table.lock().sessions.get(id).cloned()
    }

    pub fn set(&self, id: impl Into<String>, session: Arc<Session>) {
        let mut table = self.table.lock();
        table.sessions.insert(id.into(), session);
        metrics::set_active_sessions(table.sessions.len());
    }

    pub fn size(&self) -> usize {
        self.table.lock().sessions.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.table.lock().sessions.keys().cloned().collect()
    }

    /// Live sessions plus pending admissions against the ceiling.
    pub fn has_reached_max_sessions(&self) -> bool {
        let table = self.table.lock();
        table.sessions.len() + table.reserved >= self.max_sessions
    }

    /// Reserve a slot for a new session, or `None` at capacity.
    pub fn try_admit(self: &Arc<Self>) -> Option<Admission> {
        let mut table = self.table.lock();
        if table.sessions.len() + table.reserved >= self.max_sessions {
            return None;
        }
        table.reserved += 1;
        Some(Admission {
            manager: Arc::clone(self),
            active: true,
        })
    }

    /// Remove a session from the map without closing it.
    pub fn detach(&self, id: &str) -> Option<Arc<Session>> {
        let mut table = self.table.lock();
        let removed = table.sessions.remove(id);
        metrics::set_active_sessions(table.sessions.len());
        removed
    }

    /// Remove and close a session. Unknown ids are a no-op. Close failures are
    /// logged and never keep the session in the map.
    pub async fn delete(&self, id: &str) -> bool {
        let Some(session) = self.detach(id) else {
            return false;
        };
        if let Err(e) = session.close().await {
            error!(session_id = %id, "Failed to close MCP session: {}", e);
        }
        info!(session_id = %id, "MCP session deleted");
        true
    }

    /// Called when a transport reports its session closed.
    pub fn handle_transport_closed(&self, id: &str) {
        if let Some(session) = self.detach(id) {
            info!(session_id = %id, "MCP session closed by transport");
            tokio::spawn(async move {
                session.server.close().await;
            });
        }
    }

    pub fn cleanup_idle_sessions(&self) -> Vec<String> {
        self.cleanup_idle_sessions_at(Instant::now())
    }

    /// Remove every session idle for at least the idle timeout as of `now`.
    /// Closing runs in the background; the map entry is gone immediately.
    pub fn cleanup_idle_sessions_at(&self, now: Instant) -> Vec<String> {
        let reaped: Vec<Arc<Session>> = {
            let mut table = self.table.lock();
            let idle: Vec<String> = table
                .sessions
                .iter()
                .filter(|(_, session)| session.idle_time_at(now) >= self.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            let reaped: Vec<Arc<Session>> = idle
                .iter()
                .filter_map(|id| table.sessions.remove(id))
                .collect();
            metrics::set_active_sessions(table.sessions.len());
            reaped
        };

        let ids: Vec<String> = reaped.iter().map(|s| s.id().to_string()).collect();
        for session in reaped {
            tokio::spawn(async move {
                if let Err(e) = session.close().await {
                    warn!(session_id = %session.id(), "Failed to close idle MCP session: {}", e);
                }
            });
        }

        if !ids.is_empty() {
            metrics::record_sessions_reaped(ids.len());
            info!("Reaped {} idle MCP sessions: {:?}", ids.len(), ids);
        }
        ids
    }

    /// Close every session concurrently and clear the map, whatever the
    /// individual outcomes. Sessions admitted while closes are in flight are
    /// closed in a further round; the map is only cleared once nothing is
    /// left unclosed.
    pub async fn close_all_sessions(&self) -> CloseSummary {
        let mut closed: HashSet<String> = HashSet::new();
        let mut errored_session_messages: Vec<String> = Vec::new();

        loop {
            let pending: Vec<Arc<Session>> = {
                let mut table = self.table.lock();
                let pending: Vec<Arc<Session>> = table
                    .sessions
                    .values()
                    .filter(|session| !closed.contains(session.id()))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    table.sessions.clear();
                    metrics::set_active_sessions(0);
                    break;
                }
                pending
            };

            let results = join_all(pending.iter().map(|session| async move {
                session
                    .close()
                    .await
                    .map_err(|e| format!("Session {}: {}", session.id(), e))
            }))
            .await;

            closed.extend(pending.iter().map(|session| session.id().to_string()));
            errored_session_messages.extend(results.into_iter().filter_map(Result::err));
        }

        info!(
            "Closed {} MCP sessions ({} with errors)",
            closed.len(),
            errored_session_messages.len()
        );
        CloseSummary {
            has_errors: !errored_session_messages.is_empty(),
            errored_session_messages,
        }
    }

    /// Run the idle sweep every `interval` while the manager is alive.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<SessionManager> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let reaped = manager.cleanup_idle_sessions();
                debug!("Idle sweep done, {} sessions reaped", reaped.len());
            }
        })
    }
}

/// A reserved session slot. Dropping it without completing releases the slot.
pub struct Admission {
    manager: Arc<SessionManager>,
    active: bool,
}

impl Admission {
    /// Turn the reservation into a live session.
    pub fn complete(mut self, session: Arc<Session>) {
        let mut table = self.manager.table.lock();
        table.reserved = table.reserved.saturating_sub(1);
        table
            .sessions
            .insert(session.id().to_string(), session);
        metrics::set_active_sessions(table.sessions.len());
        metrics::record_session_created();
        self.active = false;
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.active {
            let mut table = self.manager.table.lock();
            table.reserved = table.reserved.saturating_sub(1);
        }
    }
}
