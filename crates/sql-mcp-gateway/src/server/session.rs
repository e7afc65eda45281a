//! SSE session tracking.
//!
//! A session groups the streams opened with one bearer token so a
//! `notifications/cancelled` sent on one POST can abort a call running on
//! another. Each stream owns the tasks it spawned; the session only holds
//! abort handles, keyed by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::AbortHandle;

use super::dispatch::Credentials;

/// One logical client connection.
pub struct Session {
    /// Random id for log correlation.
    pub id: String,
    credentials: Credentials,
    in_flight: Mutex<HashMap<String, (u64, Option<AbortHandle>)>>,
    next_ticket: AtomicU64,
}

impl Session {
    fn new(credentials: Credentials) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            credentials,
            in_flight: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Reserve a request id. Returns `None` if the id is already in flight.
    ///
    /// The returned ticket is passed back to [`Session::attach`] and
    /// [`Session::finish`] so a late completion cannot clear a newer request
    /// that reused the id.
    pub fn reserve(&self, key: &str) -> Option<u64> {
        let mut in_flight = self.lock();
        if in_flight.contains_key(key) {
            return None;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(key.to_string(), (ticket, None));
        Some(ticket)
    }

    /// Record the abort handle of a reserved request.
    pub fn attach(&self, key: &str, ticket: u64, handle: AbortHandle) {
        match self.lock().get_mut(key) {
            Some(entry) if entry.0 == ticket => entry.1 = Some(handle),
            // Cancelled between reserve and spawn.
            _ => handle.abort(),
        }
    }

    /// Forget a completed request.
    pub fn finish(&self, key: &str, ticket: u64) {
        let mut in_flight = self.lock();
        if in_flight.get(key).is_some_and(|(t, _)| *t == ticket) {
            in_flight.remove(key);
        }
    }

    /// Abort an in-flight request. Returns whether one was found.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some((_, handle)) => {
                if let Some(handle) = handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Number of requests still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, Option<AbortHandle>)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("credentials", &self.credentials)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Registry of live sessions and open streams.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    open_streams: AtomicUsize,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stream. Streams with the same bearer token share a session;
    /// every other stream gets its own.
    pub fn open(self: &Arc<Self>, credentials: Credentials) -> StreamGuard {
        let session = match &credentials {
            Credentials::Bearer(token) => {
                let mut sessions = self.lock();
                Arc::clone(
                    sessions
                        .entry(token.clone())
                        .or_insert_with(|| Arc::new(Session::new(credentials.clone()))),
                )
            }
            _ => Arc::new(Session::new(credentials)),
        };

        let open = self.open_streams.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(session_id = %session.id, open_streams = open, "Stream opened");

        StreamGuard { session, manager: Arc::clone(self), owned: Vec::new() }
    }

    /// Number of open streams.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Number of distinct sessions with a shared registry entry.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a stream counted while it is open.
///
/// Dropping the guard (client disconnect or stream end) releases the session
/// once no other stream uses it.
pub struct StreamGuard {
    session: Arc<Session>,
    manager: Arc<SessionManager>,
    /// Requests reserved by this stream and not yet finished.
    owned: Vec<(String, u64)>,
}

impl StreamGuard {
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Reserve a request id on behalf of this stream.
    pub fn reserve(&mut self, key: &str) -> Option<u64> {
        let ticket = self.session.reserve(key)?;
        self.owned.push((key.to_string(), ticket));
        Some(ticket)
    }

    /// Release a request this stream finished.
    pub fn finish(&mut self, key: &str, ticket: u64) {
        self.session.finish(key, ticket);
        self.owned.retain(|(k, t)| !(k == key && *t == ticket));
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // Tasks of a dropped stream are aborted with its JoinSet; free their ids.
        for (key, ticket) in self.owned.drain(..) {
            self.session.finish(&key, ticket);
        }
        self.manager.open_streams.fetch_sub(1, Ordering::SeqCst);

        if let Credentials::Bearer(token) = &self.session.credentials {
            let mut sessions = self.manager.lock();
            // The registry holds one reference and this guard another.
            let registered = sessions.get(token).is_some_and(|s| Arc::ptr_eq(s, &self.session));
            if registered && Arc::strong_count(&self.session) <= 2 {
                sessions.remove(token);
            }
        }
        tracing::debug!(session_id = %self.session.id, "Stream closed");
    }
}

impl std::fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGuard").field("session", &self.session.id).finish()
    }
}
