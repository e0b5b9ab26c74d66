//! Session Management
//!
//! Opaque, fixed-lifetime login sessions for the web console.
//! Sessions are never renewed; a session lives exactly `session_duration`
//! from creation and is then refused even if not yet swept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Interval between scheduled sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Minimum spacing between opportunistic sweeps triggered by lookup misses.
pub const MISS_SWEEP_SPACING: Duration = Duration::from_secs(60);

/// Opaque session token.
pub type SessionId = String;

/// A login session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Token handed to the client.
    pub id: SessionId,
    /// Subject the session belongs to.
    pub subject_id: String,
    /// Admin privileges.
    pub is_privileged: bool,
    /// Creation time.
    pub created_at: Instant,
    /// Expiry time (fixed at creation).
    pub expires_at: Instant,
}

impl Session {
    /// Whether the session has expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// In-memory session store.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    session_duration: Duration,
    last_miss_sweep: Mutex<Option<Instant>>,
}

impl SessionStore {
    /// Create a store issuing sessions valid for `session_duration`.
    pub fn new(session_duration: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_duration,
            last_miss_sweep: Mutex::new(None),
        }
    }

    /// Lifetime of newly created sessions.
    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Create a session and return its token.
    pub async fn create(&self, subject_id: &str, is_privileged: bool) -> SessionId {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();

        let session = Session {
            id: id.clone(),
            subject_id: subject_id.to_string(),
            is_privileged,
            created_at: now,
            expires_at: now + self.session_duration,
        };

        self.sessions.write().await.insert(id.clone(), session);
        debug!(subject_id, is_privileged, "session created");
        id
    }

    /// Look up a live session. Expired sessions are never returned.
    pub async fn lookup(&self, id: &str) -> Option<Session> {
        let now = Instant::now();
        let found = {
            let sessions = self.sessions.read().await;
            sessions.get(id).filter(|s| !s.is_expired_at(now)).cloned()
        };

        if found.is_none() {
            self.sweep_after_miss(now).await;
        }
        found
    }

    /// Remove a session. Idempotent.
    pub async fn delete(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Remove every expired session. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        before - sessions.len()
    }

    /// Number of stored sessions (including expired, unswept ones).
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn sweep_after_miss(&self, now: Instant) {
        {
            let mut last = self.last_miss_sweep.lock().await;
            if matches!(*last, Some(at) if now.duration_since(at) < MISS_SWEEP_SPACING) {
                return;
            }
            *last = Some(now);
        }
        self.sweep_expired().await;
    }

    /// Run the sweep every [`SWEEP_INTERVAL`] until shutdown.
    pub async fn run_sweep_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep_expired().await;
                    if removed > 0 {
                        info!(removed, "swept expired sessions");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}
