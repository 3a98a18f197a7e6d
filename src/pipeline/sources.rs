//! Document handler: extraction chain + document cleanup.

use async_trait::async_trait;

use crate::checkpoint::ResultPayload;
use crate::clean::clean_document;
use crate::extract::ExtractionChain;
use crate::item::Item;
use crate::session::RemoteSession;

use super::{ItemFailure, ItemHandler, ItemProduct, WaitPolicy};

/// Produces a synced source document via the extraction strategy chain.
pub struct DocumentHandler {
    chain: ExtractionChain,
}

impl DocumentHandler {
    /// Creates a handler around `chain`.
    #[must_use]
    pub fn new(chain: ExtractionChain) -> Self {
        Self { chain }
    }
}

impl std::fmt::Debug for DocumentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandler")
            .field("chain", &self.chain)
            .finish()
    }
}

#[async_trait]
impl ItemHandler for DocumentHandler {
    fn name(&self) -> &'static str {
        "sources"
    }

    async fn produce(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
        _waits: &WaitPolicy,
    ) -> Result<ItemProduct, ItemFailure> {
        let Some(extraction) = self.chain.extract(item, session).await else {
            return Err(ItemFailure::ExtractionFailed);
        };

        let text = clean_document(&extraction.text);
        if text.is_empty() {
            return Err(ItemFailure::EmptyResult);
        }

        Ok(ItemProduct {
            artifact_text: text,
            payload: ResultPayload::Document,
        })
    }
}
