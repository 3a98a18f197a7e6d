//! Prompt handler: the conversational-turn protocol.
//!
//! Submits the prompt, waits for the generation-in-progress indicator to
//! clear (polling an observable signal, never a fixed sleep), reads the
//! latest response block, cleans it, and collects disclosed source
//! attributions.

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::checkpoint::ResultPayload;
use crate::clean::{clean_answer, parse_source_entries};
use crate::item::Item;
use crate::session::RemoteSession;

use super::{ItemFailure, ItemHandler, ItemProduct, WaitPolicy};

/// Produces an answer + sources for one prompt.
#[derive(Debug, Default)]
pub struct PromptHandler;

impl PromptHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Blocks until the generation indicator transitions from present to
    /// absent, bounded by the generous generation timeout.
    ///
    /// The indicator never appearing means "already done". Timeout expiry
    /// means "proceed and extract whatever is currently rendered": partial
    /// output is still useful, and blocking forever would stall the batch.
    async fn await_generation(&self, item: &Item, session: &dyn RemoteSession, waits: &WaitPolicy) {
        let deadline = Instant::now() + waits.generation;
        loop {
            match session.generation_in_progress().await {
                Ok(false) => return,
                Ok(true) => {
                    if Instant::now() >= deadline {
                        warn!(
                            identity = %item.identity,
                            "generation wait expired; extracting partial output"
                        );
                        return;
                    }
                    sleep(waits.generation_poll).await;
                }
                Err(error) => {
                    warn!(
                        identity = %item.identity,
                        error = %error,
                        "generation status unavailable; proceeding"
                    );
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ItemHandler for PromptHandler {
    fn name(&self) -> &'static str {
        "prompts"
    }

    async fn produce(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
        waits: &WaitPolicy,
    ) -> Result<ItemProduct, ItemFailure> {
        session
            .submit_prompt(&item.label)
            .await
            .map_err(ItemFailure::from)?;

        self.await_generation(item, &*session, waits).await;

        let raw = session.latest_response().await.map_err(ItemFailure::from)?;
        let answer = clean_answer(&raw);
        if answer.is_empty() {
            return Err(ItemFailure::EmptyResult);
        }

        // Source attribution is best-effort; a missing disclosure surface
        // never fails an otherwise good answer.
        let entries = match session.disclosed_sources().await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(identity = %item.identity, error = %error, "source disclosure failed");
                Vec::new()
            }
        };
        let sources = parse_source_entries(&entries);
        debug!(
            identity = %item.identity,
            answer_chars = answer.len(),
            sources = sources.len(),
            "prompt answered"
        );

        Ok(ItemProduct {
            artifact_text: answer.clone(),
            payload: ResultPayload::Answer {
                question: item.label.clone(),
                answer,
                sources,
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::session::{ContentQuery, SessionError};

    struct ChatSession {
        submitted: Option<String>,
        /// Remaining "still generating" polls before completion.
        generating_polls: Mutex<u32>,
        response: String,
        source_entries: Vec<String>,
    }

    impl ChatSession {
        fn answering(response: &str) -> Self {
            Self {
                submitted: None,
                generating_polls: Mutex::new(2),
                response: response.to_string(),
                source_entries: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl RemoteSession for ChatSession {
        async fn navigate(&mut self, _target: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn current_location(&self) -> Result<String, SessionError> {
            Ok("https://workspace.example/w/1/chat".to_string())
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

        async fn submit_prompt(&mut self, prompt: &str) -> Result<(), SessionError> {
            self.submitted = Some(prompt.to_string());
            Ok(())
        }

        async fn generation_in_progress(&self) -> Result<bool, SessionError> {
            let mut polls = self.generating_polls.lock().map_err(|_| {
                SessionError::protocol("poisoned poll counter")
            })?;
            if *polls > 0 {
                *polls -= 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn latest_response(&self) -> Result<String, SessionError> {
            Ok(self.response.clone())
        }

        async fn disclosed_sources(&mut self) -> Result<Vec<String>, SessionError> {
            Ok(self.source_entries.clone())
        }
    }

    fn prompt_item() -> Item {
        Item::prompt("What is the refund window?", "https://workspace.example/w/1/chat", 0)
    }

    fn fast_waits() -> WaitPolicy {
        WaitPolicy {
            generation: Duration::from_millis(100),
            generation_poll: Duration::from_millis(5),
            ..WaitPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_produce_submits_waits_and_cleans() {
        let mut session =
            ChatSession::answering("Thinking...\nRefunds close after 30 days. (2 citations)");
        session.source_entries = vec![
            "Policy\nrefunds.md".to_string(),
            "Policy\nrefunds.md".to_string(),
        ];
        let handler = PromptHandler::new();

        let product = handler
            .produce(&prompt_item(), &mut session, &fast_waits())
            .await
            .unwrap();

        assert_eq!(session.submitted.as_deref(), Some("What is the refund window?"));
        assert_eq!(product.artifact_text, "Refunds close after 30 days.");
        match product.payload {
            ResultPayload::Answer {
                question,
                answer,
                sources,
            } => {
                assert_eq!(question, "What is the refund window?");
                assert_eq!(answer, "Refunds close after 30 days.");
                assert_eq!(sources, vec!["refunds.md"]);
            }
            ResultPayload::Document => panic!("expected answer payload"),
        }
    }

    #[tokio::test]
    async fn test_produce_empty_after_cleaning_is_failure() {
        let mut session = ChatSession::answering("Thinking...\n3 Sources");
        let handler = PromptHandler::new();

        let result = handler
            .produce(&prompt_item(), &mut session, &fast_waits())
            .await;
        assert!(matches!(result, Err(ItemFailure::EmptyResult)));
    }

    #[tokio::test]
    async fn test_produce_indicator_never_present_is_done() {
        let mut session = ChatSession::answering("A complete answer, immediately.");
        *session.generating_polls.lock().unwrap() = 0;
        let handler = PromptHandler::new();

        let product = handler
            .produce(&prompt_item(), &mut session, &fast_waits())
            .await
            .unwrap();
        assert_eq!(product.artifact_text, "A complete answer, immediately.");
    }

    #[tokio::test]
    async fn test_produce_generation_timeout_extracts_partial() {
        let mut session = ChatSession::answering("A partial answer so far");
        // Indicator never clears within the bounded wait.
        *session.generating_polls.lock().unwrap() = u32::MAX;
        let handler = PromptHandler::new();

        let product = handler
            .produce(&prompt_item(), &mut session, &fast_waits())
            .await
            .unwrap();
        assert_eq!(product.artifact_text, "A partial answer so far");
    }
}
