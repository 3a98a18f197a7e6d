//! Persisted workspace credentials.
//!
//! The batch engine never drives the remote login UI; it consumes cookies
//! captured out-of-band (browser export in Netscape format), stored
//! encrypted at rest, and loaded into the HTTP session's cookie jar.

mod cookies;
mod storage;

use std::sync::Arc;

use reqwest::cookie::Jar;

pub use cookies::{CookieError, SessionCookie, parse_netscape_cookies};
pub use storage::{CredentialStore, StorageError};

/// Opaque credential bundle handed to [`crate::session::SessionOpener::open`].
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    cookies: Vec<SessionCookie>,
}

impl Credentials {
    /// Wraps a parsed cookie set.
    #[must_use]
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        Self { cookies }
    }

    /// Returns true when no cookies are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Returns the number of cookies held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Borrows the underlying cookies (for persistence).
    #[must_use]
    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }

    /// Builds a reqwest cookie jar holding these credentials.
    #[must_use]
    pub fn cookie_jar(&self) -> Arc<Jar> {
        let jar = Jar::default();
        for cookie in &self.cookies {
            let host = cookie.domain.trim_start_matches('.');
            if host.is_empty() {
                continue;
            }
            let scope = format!("https://{host}/");
            if let Ok(url) = scope.parse::<url::Url>() {
                jar.add_cookie_str(&cookie.header_string(), &url);
            }
        }
        Arc::new(jar)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_jar_skips_blank_domains() {
        let cookies = vec![
            SessionCookie::new(String::new(), false, "/".into(), true, 0, "a".into(), "1".into()),
            SessionCookie::new(
                ".workspace.example".into(),
                true,
                "/".into(),
                true,
                0,
                "sid".into(),
                "secret".into(),
            ),
        ];
        let credentials = Credentials::new(cookies);
        assert_eq!(credentials.len(), 2);
        // Jar construction must not panic on the blank-domain entry.
        let _jar = credentials.cookie_jar();
    }

    #[test]
    fn test_credentials_default_is_empty() {
        assert!(Credentials::default().is_empty());
    }
}
