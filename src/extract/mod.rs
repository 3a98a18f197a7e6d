//! Extraction strategy chain with priority-ordered fallback.
//!
//! Remote rendering surfaces are heterogeneous and drift over time; instead
//! of pinning one extraction path, the chain tries strategies in a fixed
//! priority order and short-circuits on the first that produces non-trivial
//! output. A strategy "succeeding" structurally but returning placeholder
//! content is guarded against by a minimum-length threshold.
//!
//! # Architecture
//!
//! - [`ExtractionStrategy`] - Async trait individual strategies implement
//! - [`ExtractionChain`] - Ordered collection with the fallback loop
//! - [`RenderedContentStrategy`] - Reads the rendered surface directly
//! - [`StructuredQueryStrategy`] - Falls back to a structured record fetch

mod rendered;
mod structured;

pub use rendered::RenderedContentStrategy;
pub use structured::StructuredQueryStrategy;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::item::Item;
use crate::session::{RemoteSession, SessionError};

/// Minimum trimmed length for extracted output to count as non-trivial.
///
/// Guards against strategies that match structurally but return placeholder
/// or empty content.
pub const MIN_CONTENT_LEN: usize = 40;

/// A successful extraction: the winning strategy and its raw output.
///
/// Transient; exists only within one item's processing.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Name of the strategy that produced the text.
    pub strategy: &'static str,
    /// Raw extracted text (post-processing happens in the pipeline).
    pub text: String,
}

/// Trait that all extraction strategies implement.
///
/// # Object Safety
///
/// Uses `async_trait` to support dynamic dispatch via
/// `Box<dyn ExtractionStrategy>` in the chain.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Returns the strategy's name (e.g. "rendered", "structured-query").
    fn name(&self) -> &'static str;

    /// Attempts to extract content for `item` through `session`.
    ///
    /// `Ok(None)` means "this strategy found nothing"; the chain moves on.
    async fn extract(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
    ) -> Result<Option<String>, SessionError>;
}

/// Priority-ordered strategy collection with the fallback loop.
///
/// Strategies run in registration order; the first whose trimmed output
/// exceeds the threshold wins. Strategy errors are logged and fall through
/// to the next strategy, so only total failure surfaces to the pipeline.
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_len: usize,
}

impl ExtractionChain {
    /// Creates an empty chain with the default threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            min_len: MIN_CONTENT_LEN,
        }
    }

    /// Overrides the non-trivial-length threshold.
    #[must_use]
    pub fn with_min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len;
        self
    }

    /// Registers a strategy at the end of the priority order.
    pub fn register(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        debug!(name = strategy.name(), "registering extraction strategy");
        self.strategies.push(strategy);
    }

    /// Returns the number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true when no strategies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Runs the chain for `item`, returning the first non-trivial output.
    pub async fn extract(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
    ) -> Option<Extraction> {
        for strategy in &self.strategies {
            debug!(strategy = strategy.name(), identity = %item.identity, "trying strategy");
            match strategy.extract(item, &mut *session).await {
                Ok(Some(text)) => {
                    let trimmed = text.trim();
                    if trimmed.len() >= self.min_len {
                        debug!(
                            strategy = strategy.name(),
                            chars = trimmed.len(),
                            "extraction succeeded"
                        );
                        return Some(Extraction {
                            strategy: strategy.name(),
                            text: trimmed.to_string(),
                        });
                    }
                    debug!(
                        strategy = strategy.name(),
                        chars = trimmed.len(),
                        "output below threshold; trying next strategy"
                    );
                }
                Ok(None) => {
                    debug!(strategy = strategy.name(), "strategy found nothing");
                }
                Err(error) => {
                    warn!(
                        strategy = strategy.name(),
                        identity = %item.identity,
                        error = %error,
                        "strategy errored; trying next"
                    );
                }
            }
        }
        None
    }
}

impl Default for ExtractionChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtractionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("ExtractionChain")
            .field("strategies", &names)
            .field("min_len", &self.min_len)
            .finish()
    }
}

/// Builds the default chain: rendered content first, structured query as
/// fallback.
#[must_use]
pub fn build_default_chain() -> ExtractionChain {
    let mut chain = ExtractionChain::new();
    chain.register(Box::new(RenderedContentStrategy::default()));
    chain.register(Box::new(StructuredQueryStrategy::new()));
    chain
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::ContentQuery;

    // ==================== Mocks ====================

    struct StubSession;

    #[async_trait]
    impl RemoteSession for StubSession {
        async fn navigate(&mut self, _target: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn current_location(&self) -> Result<String, SessionError> {
            Ok("https://workspace.example/w/1".to_string())
        }

        async fn close(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn first_matching_text(
            &self,
            _queries: &[ContentQuery],
        ) -> Result<Option<String>, SessionError> {
            Ok(None)
        }
    }

    enum MockBehavior {
        Text(&'static str),
        Nothing,
        Error,
    }

    struct MockStrategy {
        mock_name: &'static str,
        behavior: MockBehavior,
    }

    #[async_trait]
    impl ExtractionStrategy for MockStrategy {
        fn name(&self) -> &'static str {
            self.mock_name
        }

        async fn extract(
            &self,
            _item: &Item,
            _session: &mut dyn RemoteSession,
        ) -> Result<Option<String>, SessionError> {
            match &self.behavior {
                MockBehavior::Text(text) => Ok(Some((*text).to_string())),
                MockBehavior::Nothing => Ok(None),
                MockBehavior::Error => Err(SessionError::protocol("mock failure")),
            }
        }
    }

    fn chain_of(strategies: Vec<MockStrategy>) -> ExtractionChain {
        let mut chain = ExtractionChain::new().with_min_len(10);
        for strategy in strategies {
            chain.register(Box::new(strategy));
        }
        chain
    }

    fn item() -> Item {
        Item::document("guide", "https://workspace.example/w/1/source/guide", 0)
    }

    // ==================== Chain Tests ====================

    #[tokio::test]
    async fn test_chain_short_circuits_on_first_success() {
        let chain = chain_of(vec![
            MockStrategy {
                mock_name: "first",
                behavior: MockBehavior::Text("long enough content here"),
            },
            MockStrategy {
                mock_name: "second",
                behavior: MockBehavior::Text("should never be reached!!"),
            },
        ]);

        let result = chain.extract(&item(), &mut StubSession).await.unwrap();
        assert_eq!(result.strategy, "first");
        assert_eq!(result.text, "long enough content here");
    }

    #[tokio::test]
    async fn test_chain_falls_through_trivial_output() {
        let chain = chain_of(vec![
            MockStrategy {
                mock_name: "placeholder",
                behavior: MockBehavior::Text("  ok  "),
            },
            MockStrategy {
                mock_name: "real",
                behavior: MockBehavior::Text("an actual body of content"),
            },
        ]);

        let result = chain.extract(&item(), &mut StubSession).await.unwrap();
        assert_eq!(result.strategy, "real");
    }

    #[tokio::test]
    async fn test_chain_falls_through_errors() {
        let chain = chain_of(vec![
            MockStrategy {
                mock_name: "broken",
                behavior: MockBehavior::Error,
            },
            MockStrategy {
                mock_name: "fallback",
                behavior: MockBehavior::Text("fallback produced this text"),
            },
        ]);

        let result = chain.extract(&item(), &mut StubSession).await.unwrap();
        assert_eq!(result.strategy, "fallback");
    }

    #[tokio::test]
    async fn test_chain_returns_none_when_all_fail() {
        let chain = chain_of(vec![
            MockStrategy {
                mock_name: "a",
                behavior: MockBehavior::Nothing,
            },
            MockStrategy {
                mock_name: "b",
                behavior: MockBehavior::Error,
            },
        ]);

        assert!(chain.extract(&item(), &mut StubSession).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_returns_none() {
        let chain = ExtractionChain::new();
        assert!(chain.is_empty());
        assert!(chain.extract(&item(), &mut StubSession).await.is_none());
    }

    #[test]
    fn test_default_chain_orders_rendered_before_structured() {
        let chain = build_default_chain();
        assert_eq!(chain.len(), 2);
        let debug = format!("{chain:?}");
        let rendered_at = debug.find("rendered").unwrap();
        let structured_at = debug.find("structured-query").unwrap();
        assert!(rendered_at < structured_at);
    }
}
