//! Remote session capabilities and the session lifecycle manager.
//!
//! The batch engine never touches the remote application directly; it drives
//! a [`RemoteSession`] handle obtained from a [`SessionOpener`]. The handle
//! is a narrow capability surface (navigation, location, rendered-content
//! reads, a structured-query fallback, and the conversational protocol)
//! implemented over HTTP in [`http`] and by scripted mocks in tests.
//!
//! [`SessionManager`] owns the only live session. It opens lazily, counts
//! successful items, rotates the session once the per-window quota is
//! reached, and discards a session the moment it lands on the remote
//! authentication surface.

pub mod http;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::auth::Credentials;

/// Default maximum successful items per session window.
pub const DEFAULT_SESSION_QUOTA: u32 = 8;

/// Location fragments that identify the remote authentication surface.
///
/// `current_location` matching one of these is the sole signal of session
/// invalidity; unattended re-authentication is out of scope.
const AUTH_SURFACE_MARKERS: [&str; 4] = ["/signin", "/login", "accounts.", "/sso/"];

/// Returns true when `location` points at a login/sign-in surface.
#[must_use]
pub fn is_auth_surface(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    AUTH_SURFACE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Errors raised by session capabilities and the lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session landed on the authentication surface.
    #[error("session expired: landed on authentication surface at {location}")]
    Expired {
        /// Location that triggered the detection.
        location: String,
    },

    /// Navigation to a target failed.
    #[error("navigation to {target} failed: {message}")]
    Navigation {
        /// The navigation target.
        target: String,
        /// Capability-provided failure description.
        message: String,
    },

    /// Any other remote-protocol fault.
    #[error("remote session error: {message}")]
    Protocol {
        /// Capability-provided failure description.
        message: String,
    },
}

impl SessionError {
    /// Creates a navigation error.
    #[must_use]
    pub fn navigation(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// A candidate structural query for the rendered-content reader.
///
/// Queries are tried in the order supplied; the first one producing
/// non-empty text wins.
#[derive(Debug, Clone)]
pub struct ContentQuery {
    /// Short name used in logs to show which query matched.
    pub name: String,
    /// Query pattern interpreted by the session implementation.
    pub pattern: String,
}

impl ContentQuery {
    /// Creates a content query.
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// One authenticated, stateful connection to the remote application.
///
/// Methods with default bodies are optional capabilities: a surface without
/// a conversational interface simply reports "nothing in progress" and
/// yields no response.
///
/// # Object Safety
///
/// Uses `async_trait` so the manager can own `Box<dyn RemoteSession>`.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Navigates to `target`.
    async fn navigate(&mut self, target: &str) -> Result<(), SessionError>;

    /// Returns the current location identifier (final URL after redirects).
    async fn current_location(&self) -> Result<String, SessionError>;

    /// Closes the session; the handle must not be used afterwards.
    async fn close(&mut self) -> Result<(), SessionError>;

    /// Returns the first non-empty text matched by `queries`, preserving
    /// their priority order.
    async fn first_matching_text(
        &self,
        queries: &[ContentQuery],
    ) -> Result<Option<String>, SessionError>;

    /// Reports whether the current surface has reached a stable,
    /// interactable state.
    async fn is_settled(&self) -> Result<bool, SessionError> {
        Ok(true)
    }

    /// Issues the structured-query fallback for `slug`; `Ok(None)` when the
    /// remote has no record for it.
    async fn structured_record(&self, _slug: &str) -> Result<Option<String>, SessionError> {
        Ok(None)
    }

    /// Submits a prompt to the conversational surface.
    async fn submit_prompt(&mut self, _prompt: &str) -> Result<(), SessionError> {
        Err(SessionError::protocol(
            "this session has no conversational surface",
        ))
    }

    /// Reports whether a generation-in-progress indicator is present.
    /// Absence of the indicator means "already done", never an error.
    async fn generation_in_progress(&self) -> Result<bool, SessionError> {
        Ok(false)
    }

    /// Reads the latest response block in full.
    async fn latest_response(&self) -> Result<String, SessionError> {
        Err(SessionError::protocol(
            "this session has no conversational surface",
        ))
    }

    /// Activates the sources disclosure control, if present, and returns the
    /// raw disclosed entries (one text block per source).
    async fn disclosed_sources(&mut self) -> Result<Vec<String>, SessionError> {
        Ok(Vec::new())
    }

    /// Captures a diagnostic snapshot of the current rendered state.
    async fn snapshot(&self) -> Result<String, SessionError> {
        Ok(String::new())
    }
}

/// Opens authenticated sessions from persisted credentials.
#[async_trait]
pub trait SessionOpener: Send + Sync {
    /// Opens a new session.
    async fn open(&self, credentials: &Credentials) -> Result<Box<dyn RemoteSession>, SessionError>;
}

struct ActiveSession {
    session: Box<dyn RemoteSession>,
    completed: u32,
}

/// Owns the single live session and its quota-bounded lifecycle.
///
/// State machine: `Closed → Opening → Open → {Open, Rotating, Invalid} →
/// Closed`. Rotation happens transparently inside [`acquire`]; invalidation
/// is driven by the caller via [`invalidate`] when an item observes a
/// logged-out surface mid-flight.
///
/// [`acquire`]: SessionManager::acquire
/// [`invalidate`]: SessionManager::invalidate
pub struct SessionManager {
    opener: Box<dyn SessionOpener>,
    credentials: Credentials,
    quota: u32,
    active: Option<ActiveSession>,
    opened: u32,
}

impl SessionManager {
    /// Creates a manager with the given per-window quota (minimum 1).
    #[must_use]
    pub fn new(opener: Box<dyn SessionOpener>, credentials: Credentials, quota: u32) -> Self {
        Self {
            opener,
            credentials,
            quota: quota.max(1),
            active: None,
            opened: 0,
        }
    }

    /// Returns true when the active session has used up its quota.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.completed >= self.quota)
    }

    /// Total sessions opened so far (monotonic across rotations).
    #[must_use]
    pub fn sessions_opened(&self) -> u32 {
        self.opened
    }

    /// Returns a handle to an open session, rotating or opening as needed.
    ///
    /// The borrow ends when the caller finishes the item; the caller must
    /// then report the outcome through [`release`](SessionManager::release)
    /// and must not retain the handle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Expired`] when a freshly opened session lands
    /// on the authentication surface (fatal to the run), or any opener error.
    pub async fn acquire(&mut self) -> Result<&mut dyn RemoteSession, SessionError> {
        if self.is_exhausted() {
            info!(
                quota = self.quota,
                session = self.opened,
                "session window exhausted; rotating"
            );
            self.close_active().await;
        }
        if self.active.is_none() {
            self.open().await?;
        }
        match self.active.as_mut() {
            Some(active) => Ok(active.session.as_mut()),
            None => Err(SessionError::protocol("no session after open")),
        }
    }

    /// Reports the outcome of the item processed on the borrowed handle.
    ///
    /// Only successful items consume quota: a failed item performed no
    /// meaningful remote mutation, so its window slot is not spent.
    pub fn release(&mut self, item_succeeded: bool) {
        if item_succeeded
            && let Some(active) = self.active.as_mut()
        {
            active.completed += 1;
            debug!(
                completed = active.completed,
                quota = self.quota,
                "item counted against session window"
            );
        }
    }

    /// Discards the active session after it was observed logged-out
    /// mid-item. The next [`acquire`](SessionManager::acquire) opens fresh.
    pub async fn invalidate(&mut self) {
        warn!("session invalid mid-run; discarding");
        self.close_active().await;
    }

    /// Closes the active session, if any (end of run).
    pub async fn shutdown(&mut self) {
        self.close_active().await;
    }

    async fn open(&mut self) -> Result<(), SessionError> {
        debug!("opening session");
        let mut session = self.opener.open(&self.credentials).await?;

        // Post-open landing check: a login surface here means the persisted
        // credentials are no longer valid, which only the operator can fix.
        let location = session.current_location().await?;
        if is_auth_surface(&location) {
            let _ = session.close().await;
            return Err(SessionError::Expired { location });
        }

        self.opened += 1;
        info!(session = self.opened, "session open and authenticated");
        self.active = Some(ActiveSession {
            session,
            completed: 0,
        });
        Ok(())
    }

    async fn close_active(&mut self) {
        if let Some(mut active) = self.active.take()
            && let Err(error) = active.session.close().await
        {
            warn!(error = %error, "error closing session; discarding anyway");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("quota", &self.quota)
            .field("opened", &self.opened)
            .field("active", &self.active.is_some())
            .finish()
    }
}
