//! Session registry with busy tracking and idle eviction.
//!
//! The [`SessionManager`] owns every live [`Session`], keyed by a
//! server-assigned UUID. It hands out exactly one [`BusyGuard`] per session
//! at a time, so two requests can never run concurrent exchanges on the same
//! conversation, and a background sweeper evicts sessions that have sat idle
//! past the configured timeout. Busy sessions are never swept.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::process::AgentCli;
use crate::session::{Session, SessionOptions};

/// How often the background sweeper scans for expired idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A session shared between the registry and request handlers.
pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("session not found")]
    NotFound,

    #[error("session is already processing a message")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Busy,
}

/// Registry entry wrapping one session with its bookkeeping.
struct ManagedSession {
    session: SharedSession,
    /// Agent-assigned conversation id, mirrored here so listing sessions
    /// never has to lock a session that is mid-exchange.
    cli_session_id: Option<String>,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl ManagedSession {
    fn snapshot(&self, id: Uuid) -> SessionSnapshot {
        SessionSnapshot {
            session_id: id,
            cli_session_id: self.cli_session_id.clone(),
            status: self.status,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Serializable view of a registry entry for API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub cli_session_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

// ── Manager ───────────────────────────────────────────────────────

/// Thread-safe session registry, shared across all request handlers.
///
/// Lock discipline: the registry lock is only ever held for map lookups and
/// bookkeeping writes, never across an `.await`. Process teardown happens
/// after the relevant entry has already been removed from the map.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<Uuid, ManagedSession>>>,
    agent: AgentCli,
    session_timeout: Duration,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(agent: AgentCli, session_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            agent,
            session_timeout,
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Register a fresh session and return its snapshot.
    pub fn create(&self, options: SessionOptions) -> SessionSnapshot {
        let id = Uuid::new_v4();
        let session = Session::new(self.agent.clone(), options);
        let snapshot = self.insert(id, session, None);
        tracing::info!(session_id = %id, "Session created");
        snapshot
    }

    /// Register a session bound to an existing agent conversation, so its
    /// first exchange continues where that conversation left off.
    pub fn resume(&self, cli_session_id: String, options: SessionOptions) -> SessionSnapshot {
        let id = Uuid::new_v4();
        let session = Session::resume(self.agent.clone(), cli_session_id.clone(), options);
        let snapshot = self.insert(id, session, Some(cli_session_id.clone()));
        tracing::info!(session_id = %id, cli_session_id = %cli_session_id, "Session resumed");
        snapshot
    }

    fn insert(&self, id: Uuid, session: Session, cli_session_id: Option<String>) -> SessionSnapshot {
        let now = Utc::now();
        let entry = ManagedSession {
            session: Arc::new(tokio::sync::Mutex::new(session)),
            cli_session_id,
            status: SessionStatus::Idle,
            created_at: now,
            last_activity: now,
        };
        let snapshot = entry.snapshot(id);
        let mut sessions = self
            .sessions
            .write()
            .expect("session registry lock poisoned");
        sessions.insert(id, entry);
        snapshot
    }

    /// Look up one session, refreshing its activity clock.
    pub fn snapshot(&self, id: Uuid) -> Option<SessionSnapshot> {
        let mut sessions = self
            .sessions
            .write()
            .expect("session registry lock poisoned");
        let entry = sessions.get_mut(&id)?;
        entry.last_activity = Utc::now();
        Some(entry.snapshot(id))
    }

    /// Snapshots of all live sessions. Listing does not count as activity.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self
            .sessions
            .read()
            .expect("session registry lock poisoned");
        let mut all: Vec<_> = sessions
            .iter()
            .map(|(&id, entry)| entry.snapshot(id))
            .collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    /// Record the agent-assigned conversation id once an `init` event has
    /// been observed for this session.
    pub fn set_cli_session_id(&self, id: Uuid, cli_session_id: impl Into<String>) {
        let mut sessions = self
            .sessions
            .write()
            .expect("session registry lock poisoned");
        if let Some(entry) = sessions.get_mut(&id) {
            entry.cli_session_id = Some(cli_session_id.into());
        }
    }

    /// Atomically claim a session for one exchange.
    ///
    /// The busy check and the busy flip happen under one write lock, so two
    /// racing requests cannot both claim the same session. The returned
    /// guard restores the idle status when dropped.
    pub fn begin_exchange(&self, id: Uuid) -> Result<(SharedSession, BusyGuard), ManagerError> {
        let mut sessions = self
            .sessions
            .write()
            .expect("session registry lock poisoned");
        let entry = sessions.get_mut(&id).ok_or(ManagerError::NotFound)?;
        if entry.status == SessionStatus::Busy {
            return Err(ManagerError::Busy);
        }
        entry.status = SessionStatus::Busy;
        entry.last_activity = Utc::now();
        Ok((
            Arc::clone(&entry.session),
            BusyGuard {
                sessions: Arc::clone(&self.sessions),
                id,
            },
        ))
    }

    /// Remove a session and terminate any in-flight process. Returns false
    /// if the id was unknown.
    pub async fn close(&self, id: Uuid) -> bool {
        let entry = {
            let mut sessions = self
                .sessions
                .write()
                .expect("session registry lock poisoned");
            sessions.remove(&id)
        };
        match entry {
            Some(entry) => {
                entry.session.lock().await.close().await;
                tracing::info!(session_id = %id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Evict every idle session whose last activity is older than the
    /// timeout. Busy sessions are left alone no matter how old they are.
    /// Returns the ids that were closed.
    pub async fn sweep_once(&self) -> Vec<Uuid> {
        let timeout_ms = self.session_timeout.as_millis() as i64;
        let removed: Vec<(Uuid, ManagedSession)> = {
            let mut sessions = self
                .sessions
                .write()
                .expect("session registry lock poisoned");
            let now = Utc::now();
            let expired: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, entry)| {
                    entry.status == SessionStatus::Idle
                        && now
                            .signed_duration_since(entry.last_activity)
                            .num_milliseconds()
                            > timeout_ms
                })
                .map(|(&id, _)| id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let mut closed = Vec::with_capacity(removed.len());
        for (id, entry) in removed {
            entry.session.lock().await.close().await;
            tracing::info!(session_id = %id, "Evicted idle session");
            closed.push(id);
        }
        closed
    }

    /// Spawn the periodic idle sweep. Call once at startup.
    pub fn start_sweeper(&self) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let closed = manager.sweep_once().await;
                if !closed.is_empty() {
                    tracing::debug!(count = closed.len(), "Idle sweep finished");
                }
            }
        });
        *self.sweeper.lock().expect("sweeper handle lock poisoned") = Some(handle);
    }

    /// Stop the sweeper and close every session.
    pub async fn shutdown(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .expect("sweeper handle lock poisoned")
            .take()
        {
            handle.abort();
        }

        let entries: Vec<(Uuid, ManagedSession)> = {
            let mut sessions = self
                .sessions
                .write()
                .expect("session registry lock poisoned");
            sessions.drain().collect()
        };
        let count = entries.len();
        for (_, entry) in entries {
            entry.session.lock().await.close().await;
        }
        if count > 0 {
            tracing::info!(count, "Closed all sessions on shutdown");
        }
    }
}

// ── Busy guard ────────────────────────────────────────────────────

/// Marks one session busy for the lifetime of one exchange.
///
/// Dropping the guard restores the idle status and refreshes the activity
/// clock, so completion, errors, and client disconnects all release the
/// session the same way. The drop runs synchronously; a follow-up request
/// racing the drop either sees the busy flag or the freed session, never a
/// stuck one.
pub struct BusyGuard {
    sessions: Arc<RwLock<HashMap<Uuid, ManagedSession>>>,
    id: Uuid,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut sessions = self
            .sessions
            .write()
            .expect("session registry lock poisoned");
        // The entry may have been closed or swept mid-exchange.
        if let Some(entry) = sessions.get_mut(&self.id) {
            entry.status = SessionStatus::Idle;
            entry.last_activity = Utc::now();
        }
    }
}
