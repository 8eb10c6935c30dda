//! Session transport manager
//!
//! Owns every live session: creation on `initialize`, lookup and ordering of
//! later requests, the optional server push channel with its heartbeat, and
//! teardown on delete, idle expiry, or shutdown.

pub mod heartbeat;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::{mpsc, OwnedMutexGuard},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;

pub const PUSH_CHANNEL_CAPACITY: usize = 16;
const MAX_REAPER_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0}")]
    BadRequest(String),
    #[error("session not found or already closed")]
    InvalidSession,
    #[error("a stream is already open for this session")]
    StreamAlreadyOpen,
    #[error("server is shutting down")]
    ShuttingDown,
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::BadRequest(message) => AppError::bad_request("session_required", message),
            SessionError::InvalidSession => AppError::InvalidSession,
            SessionError::StreamAlreadyOpen => {
                AppError::conflict(SessionError::StreamAlreadyOpen.to_string())
            }
            SessionError::ShuttingDown => AppError::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    /// `None` disables idle expiry.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(1800)),
        }
    }
}

struct PushChannel {
    generation: u64,
    cancel: CancellationToken,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    last_activity: Mutex<Instant>,
    push: Mutex<Option<PushChannel>>,
    next_generation: AtomicU64,
    request_order: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
    heartbeats_sent: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Session {
    fn new(parent: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Created),
            last_activity: Mutex::new(Instant::now()),
            push: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            request_order: Arc::new(tokio::sync::Mutex::new(())),
            cancel: parent.child_token(),
            heartbeats_sent: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub fn has_live_stream(&self) -> bool {
        lock(&self.push).is_some()
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    /// True while some request holds this session's lease.
    pub fn is_busy(&self) -> bool {
        self.request_order.try_lock().is_err()
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn mark_active(&self) {
        let mut state = lock(&self.state);
        if *state == SessionState::Created {
            *state = SessionState::Active;
            debug!(session_id = %self.id, "session active");
        }
    }

    /// Clears the push slot if it still belongs to `generation` and cancels
    /// its token. Only the caller that takes the slot cancels.
    fn release_stream(&self, generation: u64) {
        let released = {
            let mut push = lock(&self.push);
            match push.as_ref() {
                Some(channel) if channel.generation == generation => push.take(),
                _ => None,
            }
        };
        if let Some(channel) = released {
            channel.cancel.cancel();
            debug!(session_id = %self.id, generation, "push channel released");
        }
    }

    fn shut(&self) {
        *lock(&self.state) = SessionState::Closed;
        let released = lock(&self.push).take();
        if let Some(channel) = released {
            channel.cancel.cancel();
        }
        self.cancel.cancel();
    }
}

/// Exclusive turn for one request on a session.
///
/// Holding the lease keeps later requests on the same session queued behind
/// this one in arrival order. Dropping it hands the turn to the next request.
pub struct SessionLease {
    session: Arc<Session>,
    _turn: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Records a successful request, moving a fresh session to ACTIVE.
    pub fn complete(self) {
        self.session.mark_active();
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.session.touch();
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    settings: SessionSettings,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            settings,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Token cancelled once `close` runs; drives listener shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Creates a session for an `initialize` request.
    pub fn handle_initial(&self, payload: &Value) -> Result<Arc<Session>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::ShuttingDown);
        }
        let is_initialize = payload
            .as_object()
            .and_then(|object| object.get("method"))
            .and_then(Value::as_str)
            == Some("initialize");
        if !is_initialize {
            return Err(SessionError::BadRequest(
                "a session must be established with an initialize request".to_string(),
            ));
        }

        let session = Arc::new(Session::new(self.shutdown.clone()));
        {
            // `close` flips the flag before draining under this lock.
            let mut sessions = lock(&self.sessions);
            if self.is_closed() {
                return Err(SessionError::ShuttingDown);
            }
            sessions.insert(session.id.clone(), Arc::clone(&session));
        }
        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Resolves a session for a follow-up request and waits for its turn.
    pub async fn handle_subsequent(&self, session_id: &str) -> Result<SessionLease, SessionError> {
        let session = self.live_session(session_id)?;
        session.touch();

        let turn = Arc::clone(&session.request_order).lock_owned().await;
        if session.is_closed() {
            return Err(SessionError::InvalidSession);
        }

        Ok(SessionLease {
            session,
            _turn: turn,
        })
    }

    /// Opens the push channel for `session_id` and starts its heartbeat.
    pub fn open_stream(&self, session_id: &str) -> Result<mpsc::Receiver<Value>, SessionError> {
        let session = self.live_session(session_id)?;
        let (sender, receiver) = mpsc::channel(PUSH_CHANNEL_CAPACITY);

        let (generation, cancel) = {
            let mut push = lock(&session.push);
            if push.is_some() {
                return Err(SessionError::StreamAlreadyOpen);
            }
            let generation = session.next_generation.fetch_add(1, Ordering::Relaxed);
            let cancel = session.cancel.child_token();
            *push = Some(PushChannel {
                generation,
                cancel: cancel.clone(),
            });
            (generation, cancel)
        };
        session.touch();

        let weak = Arc::downgrade(&session);
        let interval = self.settings.heartbeat_interval;
        tokio::spawn(async move {
            let outcome = heartbeat::run_heartbeat(weak.clone(), sender, interval, cancel).await;
            if let Some(session) = weak.upgrade() {
                session.release_stream(generation);
                debug!(session_id = %session.id, ?outcome, "heartbeat stopped");
            }
        });

        info!(session_id = %session.id, generation, "push channel opened");
        Ok(receiver)
    }

    pub fn terminate(&self, session_id: &str) -> Result<(), SessionError> {
        let session = lock(&self.sessions)
            .remove(session_id)
            .ok_or(SessionError::InvalidSession)?;
        session.shut();
        info!(session_id = %session.id, "session terminated");
        Ok(())
    }

    /// Closes every session and signals the listener to stop. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = lock(&self.sessions).drain().map(|(_, session)| session).collect::<Vec<_>>();
        for session in &drained {
            session.shut();
        }
        self.shutdown.cancel();
        info!(sessions = drained.len(), "session manager closed");
    }

    /// Closes sessions idle for at least the configured timeout. Sessions
    /// with a live push channel or an in-flight request are kept. Returns how
    /// many were closed.
    pub fn expire_idle(&self, now: Instant) -> usize {
        let Some(timeout) = self.settings.idle_timeout else {
            return 0;
        };

        let expired = {
            let mut sessions = lock(&self.sessions);
            let ids = sessions
                .values()
                .filter(|session| {
                    !session.has_live_stream()
                        && !session.is_busy()
                        && now.saturating_duration_since(session.last_activity()) >= timeout
                })
                .map(|session| session.id.clone())
                .collect::<Vec<_>>();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id))
                .collect::<Vec<_>>()
        };

        for session in &expired {
            session.shut();
            info!(session_id = %session.id, "idle session expired");
        }
        expired.len()
    }

    /// Spawns the periodic idle sweep. Returns `None` when expiry is disabled.
    pub fn spawn_idle_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let timeout = self.settings.idle_timeout?;
        let period = (timeout / 2).clamp(Duration::from_secs(1), MAX_REAPER_PERIOD);
        let manager = Arc::clone(self);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = manager.expire_idle(Instant::now());
                        if expired > 0 {
                            debug!(expired, "idle sweep finished");
                        }
                    }
                }
            }
        }))
    }

    fn live_session(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.get(session_id)
            .filter(|session| !session.is_closed())
            .ok_or(SessionError::InvalidSession)
    }
}
