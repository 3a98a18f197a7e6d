//! Structured-query fallback extraction.

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::item::Item;
use crate::session::{RemoteSession, SessionError};

use super::ExtractionStrategy;

/// Falls back to a single structured request/response exchange, keyed by a
/// slug derived from the session's current location.
///
/// Used when the rendered surface yields nothing; the structured record
/// endpoint is stable across layout drift.
#[derive(Debug, Default)]
pub struct StructuredQueryStrategy;

impl StructuredQueryStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExtractionStrategy for StructuredQueryStrategy {
    fn name(&self) -> &'static str {
        "structured-query"
    }

    async fn extract(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
    ) -> Result<Option<String>, SessionError> {
        let location = session.current_location().await?;
        let Some(slug) = slug_from_location(&location) else {
            debug!(identity = %item.identity, location = %location, "no slug in location");
            return Ok(None);
        };
        session.structured_record(&slug).await
    }
}

/// Derives the record slug from a location: the last non-empty path segment,
/// percent-decoded.
fn slug_from_location(location: &str) -> Option<String> {
    let segment = match Url::parse(location) {
        Ok(url) => url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .next_back()?
            .to_string(),
        // Non-URL location identifiers still carry a final segment.
        Err(_) => location
            .trim_end_matches('/')
            .rsplit('/')
            .next()?
            .to_string(),
    };
    let decoded = urlencoding::decode(&segment)
        .map(|cow| cow.into_owned())
        .unwrap_or(segment);
    let decoded = decoded.trim();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.to_string())
    }
}
