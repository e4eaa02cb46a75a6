//! Explicit session ownership.
//!
//! [`SessionController`] is the single owner of the bearer credential and
//! cached user. It is passed to whatever needs it (API client, channel
//! auth, CLI) instead of being read from ambient storage, and it exposes
//! an idempotent [`end_session`](SessionController::end_session) so that a
//! burst of concurrent 401 responses tears the session down exactly once.

use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::models::User;

/// Broadcast capacity for session lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Bearer credential plus the cached user it belongs to.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub user: Option<User>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The user logged out.
    Logout,
    /// The server rejected the credential (HTTP 401).
    Expired,
}

/// Lifecycle notifications. Front ends react to `Ended` by sending the
/// user back to the login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started,
    Ended { reason: SessionEndReason },
}

/// Persistence seam for the session.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, CoreError>;
    fn save(&self, session: &Session) -> Result<(), CoreError>;
    fn clear(&self) -> Result<(), CoreError>;
}

/// Non-persistent store, used by tests and one-shot tools.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Option<Session>>,
}

impl MemoryStore {
    pub fn with_session(session: Session) -> Self {
        Self {
            inner: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<Session>, CoreError> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, session: &Session) -> Result<(), CoreError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CoreError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Process-wide owner of the current session.
pub struct SessionController {
    current: RwLock<Option<Session>>,
    store: Box<dyn SessionStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Create a controller, restoring any session the store already holds.
    pub fn restore(store: Box<dyn SessionStore>) -> Self {
        let current = match store.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load stored session, starting signed out");
                None
            }
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(current),
            store,
            events,
        }
    }

    /// A signed-out controller backed by a [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::restore(Box::new(MemoryStore::default()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Install a new session and persist it.
    pub fn start(&self, session: Session) -> Result<(), CoreError> {
        self.store.save(&session)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        let _ = self.events.send(SessionEvent::Started);
        tracing::info!("Session started");
        Ok(())
    }

    /// Replace the cached user without touching the token.
    pub fn set_user(&self, user: User) -> Result<(), CoreError> {
        let updated = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(session) => {
                    session.user = Some(user);
                    session.clone()
                }
                None => return Err(CoreError::Unauthorized("no active session".into())),
            }
        };
        self.store.save(&updated)
    }

    pub fn token(&self) -> Option<String> {
        self.read(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.read(|s| s.user.clone()).flatten()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|_| ()).is_some()
    }

    /// End the current session.
    ///
    /// Only the first call after a [`start`](Self::start) clears the store
    /// and emits [`SessionEvent::Ended`]; every other call returns `false`.
    pub fn end_session(&self, reason: SessionEndReason) -> bool {
        let taken = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_none() {
            return false;
        }
        self.finish(reason);
        true
    }

    /// End the session only if it still holds `token`.
    ///
    /// A 401 for a request sent with an older credential must not tear down
    /// a session that was started after it.
    pub fn expire_token(&self, token: &str) -> bool {
        let taken = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if guard.as_ref().is_some_and(|s| s.token == token) {
                guard.take()
            } else {
                None
            }
        };
        if taken.is_none() {
            return false;
        }
        self.finish(SessionEndReason::Expired);
        true
    }

    fn finish(&self, reason: SessionEndReason) {
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear stored session");
        }
        tracing::info!(?reason, "Session ended");
        let _ = self.events.send(SessionEvent::Ended { reason });
    }

    fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> Option<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }
}
