//! HTTP-backed implementation of the remote session capabilities.
//!
//! This is the one module that knows how the remote workspace is actually
//! reached: cookie-authenticated GET/POST exchanges, redirect-following
//! navigation whose final URL doubles as the location identifier, structural
//! queries as regex over the rendered markup, and a small JSON protocol for
//! the conversational surface. Everything above this module treats those as
//! opaque capabilities.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::auth::Credentials;

use super::{ContentQuery, RemoteSession, SessionError, SessionOpener};

/// Request timeout for individual exchanges.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum redirects followed during navigation (login bounces included).
const MAX_REDIRECTS: usize = 10;

const USER_AGENT: &str = concat!("notepilot/", env!("CARGO_PKG_VERSION"));

// Narrow JSON protocol of the conversational surface.
const SOURCE_RECORD_PATH: &str = "api/source";
const CHAT_SUBMIT_PATH: &str = "api/chat";
const CHAT_STATUS_PATH: &str = "api/chat/status";
const CHAT_LATEST_PATH: &str = "api/chat/latest";
const CHAT_SOURCES_PATH: &str = "api/chat/sources";

static SCRIPT_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]+>"));

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

#[derive(Debug, Deserialize)]
struct SourceRecord {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatStatus {
    generating: bool,
}

#[derive(Debug, Deserialize)]
struct ChatLatest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatSources {
    entries: Vec<String>,
}

/// Opens cookie-authenticated HTTP sessions against one workspace base URL.
#[derive(Debug, Clone)]
pub struct HttpSessionOpener {
    base_url: String,
}

impl HttpSessionOpener {
    /// Creates an opener for the given workspace base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SessionOpener for HttpSessionOpener {
    async fn open(&self, credentials: &Credentials) -> Result<Box<dyn RemoteSession>, SessionError> {
        let client = Client::builder()
            .cookie_provider(credentials.cookie_jar())
            .redirect(Policy::limited(MAX_REDIRECTS))
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| SessionError::protocol(format!("failed to build HTTP client: {e}")))?;

        let mut session = HttpSession {
            client,
            base_url: self.base_url.clone(),
            location: self.base_url.clone(),
            body: String::new(),
        };
        // Land on the workspace home so the manager can verify the session
        // was not bounced to a login surface.
        let home = self.base_url.clone();
        session.navigate(&home).await?;
        Ok(Box::new(session))
    }
}

/// One live HTTP session: a cookie-holding client plus the last rendered
/// surface (final location and body).
pub struct HttpSession {
    client: Client,
    base_url: String,
    location: String,
    body: String,
}

impl HttpSession {
    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| SessionError::protocol(format!("invalid base URL: {e}")))?;
        base.join(path)
            .map_err(|e| SessionError::protocol(format!("invalid endpoint path {path}: {e}")))
    }

    fn absolute_target(&self, target: &str) -> Result<Url, SessionError> {
        if target.starts_with("http://") || target.starts_with("https://") {
            return Url::parse(target)
                .map_err(|e| SessionError::navigation(target, format!("invalid target URL: {e}")));
        }
        self.endpoint(target)
            .map_err(|_| SessionError::navigation(target, "target does not resolve against base"))
    }
}

#[async_trait]
impl RemoteSession for HttpSession {
    async fn navigate(&mut self, target: &str) -> Result<(), SessionError> {
        let url = self.absolute_target(target)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::navigation(target, e.to_string()))?;

        // The final URL after redirects is the location identifier; a bounce
        // to the login surface is detected by the caller, not here.
        self.location = response.url().to_string();
        let status = response.status();
        self.body = response
            .text()
            .await
            .map_err(|e| SessionError::navigation(target, e.to_string()))?;

        if status.is_server_error() || status == StatusCode::NOT_FOUND {
            return Err(SessionError::navigation(
                target,
                format!("HTTP {status} fetching surface"),
            ));
        }
        debug!(target, location = %self.location, bytes = self.body.len(), "navigated");
        Ok(())
    }

    async fn current_location(&self) -> Result<String, SessionError> {
        Ok(self.location.clone())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        // Nothing to tear down remotely; dropping the client ends the window.
        self.body.clear();
        debug!("session closed");
        Ok(())
    }

    async fn first_matching_text(
        &self,
        queries: &[ContentQuery],
    ) -> Result<Option<String>, SessionError> {
        for query in queries {
            let regex = match Regex::new(&query.pattern) {
                Ok(regex) => regex,
                Err(error) => {
                    warn!(query = %query.name, error = %error, "skipping invalid content query");
                    continue;
                }
            };
            let Some(captures) = regex.captures(&self.body) else {
                continue;
            };
            let fragment = captures
                .get(1)
                .or_else(|| captures.get(0))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let text = strip_markup(fragment);
            if !text.is_empty() {
                debug!(query = %query.name, chars = text.len(), "content query matched");
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    async fn is_settled(&self) -> Result<bool, SessionError> {
        Ok(!self.body.is_empty())
    }

    async fn structured_record(&self, slug: &str) -> Result<Option<String>, SessionError> {
        let url = self.endpoint(&format!("{SOURCE_RECORD_PATH}/{slug}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::protocol(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SessionError::protocol(format!(
                "structured query for {slug} returned HTTP {}",
                response.status()
            )));
        }
        let record: SourceRecord = response
            .json()
            .await
            .map_err(|e| SessionError::protocol(format!("malformed structured record: {e}")))?;
        Ok(Some(record.content))
    }

    async fn submit_prompt(&mut self, prompt: &str) -> Result<(), SessionError> {
        let url = self.endpoint(CHAT_SUBMIT_PATH)?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SessionError::protocol(format!(
                "prompt submission returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn generation_in_progress(&self) -> Result<bool, SessionError> {
        let url = self.endpoint(CHAT_STATUS_PATH)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        // No status surface at all means nothing is in progress.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let status: ChatStatus = response
            .json()
            .await
            .map_err(|e| SessionError::protocol(format!("malformed chat status: {e}")))?;
        Ok(status.generating)
    }

    async fn latest_response(&self) -> Result<String, SessionError> {
        let url = self.endpoint(CHAT_LATEST_PATH)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(String::new());
        }
        let latest: ChatLatest = response
            .json()
            .await
            .map_err(|e| SessionError::protocol(format!("malformed chat response: {e}")))?;
        Ok(latest.text)
    }

    async fn disclosed_sources(&mut self) -> Result<Vec<String>, SessionError> {
        let url = self.endpoint(CHAT_SOURCES_PATH)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::protocol(e.to_string()))?;
        // No disclosure control for this response.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let sources: ChatSources = response
            .json()
            .await
            .map_err(|e| SessionError::protocol(format!("malformed sources listing: {e}")))?;
        Ok(sources.entries)
    }

    async fn snapshot(&self) -> Result<String, SessionError> {
        Ok(self.body.clone())
    }
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("base_url", &self.base_url)
            .field("location", &self.location)
            .field("body_bytes", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Reduces a rendered markup fragment to its text content.
fn strip_markup(fragment: &str) -> String {
    let without_blocks = SCRIPT_BLOCK_RE.replace_all(fragment, "");
    let without_tags = TAG_RE.replace_all(&without_blocks, "");
    decode_entities(&without_tags)
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
