//! Direct extraction from the rendered surface.

use async_trait::async_trait;

use crate::item::Item;
use crate::session::{ContentQuery, RemoteSession, SessionError};

use super::ExtractionStrategy;

/// Reads the rendered document panel through candidate structural queries.
///
/// The query list is ordered most-specific first; the session's
/// rendered-content reader preserves that priority when matching.
pub struct RenderedContentStrategy {
    queries: Vec<ContentQuery>,
}

impl RenderedContentStrategy {
    /// Creates a strategy with custom queries.
    #[must_use]
    pub fn new(queries: Vec<ContentQuery>) -> Self {
        Self { queries }
    }
}

impl Default for RenderedContentStrategy {
    /// Default queries for the workspace's source viewer, most specific
    /// first: the source panel itself, the main content region, then any
    /// preformatted block.
    fn default() -> Self {
        Self::new(vec![
            ContentQuery::new(
                "source-panel",
                r"(?is)<article[^>]*>(.*?)</article>",
            ),
            ContentQuery::new("main-region", r"(?is)<main[^>]*>(.*?)</main>"),
            ContentQuery::new("preformatted", r"(?is)<pre[^>]*>(.*?)</pre>"),
        ])
    }
}

impl std::fmt::Debug for RenderedContentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.queries.iter().map(|q| q.name.as_str()).collect();
        f.debug_struct("RenderedContentStrategy")
            .field("queries", &names)
            .finish()
    }
}

#[async_trait]
impl ExtractionStrategy for RenderedContentStrategy {
    fn name(&self) -> &'static str {
        "rendered"
    }

    async fn extract(
        &self,
        _item: &Item,
        session: &mut dyn RemoteSession,
    ) -> Result<Option<String>, SessionError> {
        session.first_matching_text(&self.queries).await
    }
}
