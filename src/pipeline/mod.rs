//! Per-item processing pipeline.
//!
//! One item flows through: navigate → settle → produce (extract or
//! converse) → post-process → persist. Every step is a possible exit point
//! with a typed failure; failures are recovered by the batch driver, never
//! propagated as run aborts. Side effects are strictly additive: a failed
//! outcome never deletes or corrupts a prior successful checkpoint record
//! for the same identity.
//!
//! The skip decision is taken by the driver via [`ItemPipeline::should_skip`]
//! BEFORE a session handle is acquired: a skipped item pays zero session or
//! network cost.

pub mod prompts;
pub mod sources;

pub use prompts::PromptHandler;
pub use sources::DocumentHandler;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::checkpoint::{ArtifactStore, CheckpointRecord, CheckpointStore, ResultPayload, StoreError};
use crate::item::Item;
use crate::session::{RemoteSession, SessionError, is_auth_surface};

/// Per-item failure taxonomy. All of these are recovered locally by the
/// batch driver; none aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum ItemFailure {
    /// Bounded navigation or stabilization wait expired. Retryable on the
    /// next full run.
    #[error("navigation to {target} timed out")]
    NavigationTimeout {
        /// The navigation target.
        target: String,
    },

    /// Every strategy in the chain returned trivial output.
    #[error("all extraction strategies returned trivial output")]
    ExtractionFailed,

    /// Post-processing/cleaning reduced the output to nothing.
    #[error("post-processing reduced the output to nothing")]
    EmptyResult,

    /// Writing the artifact or checkpoint failed; the item's success is NOT
    /// recorded and it is retried on the next invocation of the run.
    #[error("failed to persist result: {0}")]
    Persistence(#[from] StoreError),

    /// The session was observed logged-out mid-item; the driver requests a
    /// fresh handle and retries this item once.
    #[error("session is no longer authenticated")]
    SessionInvalid,

    /// Any other per-item session fault.
    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for ItemFailure {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Expired { .. } => Self::SessionInvalid,
            other => Self::Session(other),
        }
    }
}

/// Outcome of processing one item.
#[derive(Debug)]
pub enum ItemOutcome {
    /// The item's result was produced and durably checkpointed.
    Persisted,
    /// A valid checkpoint and artifact already existed; nothing was done.
    Skipped,
    /// Processing failed; the loop continues with the next item.
    Failed(ItemFailure),
}

impl ItemOutcome {
    /// Returns true for [`ItemOutcome::Persisted`].
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted)
    }

    /// Short label for progress output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Bounded-wait configuration for the pipeline's suspension points.
///
/// No suspension may block indefinitely. Navigation/settle expiry is a
/// retryable failure; generation-wait expiry means "proceed and extract
/// whatever is currently rendered".
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Maximum time for one navigation.
    pub navigation: Duration,
    /// Maximum time for the surface to settle after navigation.
    pub settle: Duration,
    /// Poll interval while waiting for settlement.
    pub settle_poll: Duration,
    /// Maximum time to wait for the generation indicator to clear.
    pub generation: Duration,
    /// Poll interval while the generation indicator is present.
    pub generation_poll: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            settle: Duration::from_secs(20),
            settle_poll: Duration::from_millis(500),
            generation: Duration::from_secs(180),
            generation_poll: Duration::from_secs(2),
        }
    }
}

/// What a handler produced for one item: the text to write as the artifact
/// plus the payload to checkpoint.
#[derive(Debug)]
pub struct ItemProduct {
    /// Primary extracted output, written to the artifact store.
    pub artifact_text: String,
    /// Payload recorded in the checkpoint.
    pub payload: ResultPayload,
}

/// The extract/interact + post-process stage of the pipeline, pluggable per
/// workflow: documents run the extraction chain, prompts run the
/// conversational protocol.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    /// Returns the handler's name for logs.
    fn name(&self) -> &'static str;

    /// Produces the item's result on an already-navigated, settled session.
    async fn produce(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
        waits: &WaitPolicy,
    ) -> Result<ItemProduct, ItemFailure>;
}

/// Runs one item through the full stage sequence.
pub struct ItemPipeline {
    handler: Box<dyn ItemHandler>,
    waits: WaitPolicy,
    diagnostics_dir: Option<PathBuf>,
}

impl ItemPipeline {
    /// Creates a pipeline around `handler` with default waits and no
    /// diagnostics capture.
    #[must_use]
    pub fn new(handler: Box<dyn ItemHandler>) -> Self {
        Self {
            handler,
            waits: WaitPolicy::default(),
            diagnostics_dir: None,
        }
    }

    /// Overrides the wait policy.
    #[must_use]
    pub fn with_waits(mut self, waits: WaitPolicy) -> Self {
        self.waits = waits;
        self
    }

    /// Enables diagnostic snapshot capture into `dir` on extraction failure.
    #[must_use]
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    /// Returns true when `item` has a valid checkpoint and matching artifact.
    ///
    /// Called by the driver before any session is acquired.
    #[must_use]
    pub fn should_skip(
        &self,
        item: &Item,
        store: &CheckpointStore,
        artifacts: &ArtifactStore,
    ) -> bool {
        let skip = store.should_skip(&item.identity, artifacts);
        if skip {
            debug!(identity = %item.identity, "checkpoint valid; skipping");
        }
        skip
    }

    /// Processes `item` on the borrowed session handle.
    ///
    /// The handle is used only for the duration of this call and never
    /// retained.
    pub async fn process(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
        store: &mut CheckpointStore,
        artifacts: &ArtifactStore,
    ) -> ItemOutcome {
        match self.run_stages(item, &mut *session, store, artifacts).await {
            Ok(()) => ItemOutcome::Persisted,
            Err(failure) => {
                warn!(
                    identity = %item.identity,
                    handler = self.handler.name(),
                    failure = %failure,
                    "item failed"
                );
                if matches!(
                    failure,
                    ItemFailure::ExtractionFailed | ItemFailure::EmptyResult
                ) {
                    self.capture_diagnostic(item, &*session).await;
                }
                ItemOutcome::Failed(failure)
            }
        }
    }

    async fn run_stages(
        &self,
        item: &Item,
        session: &mut dyn RemoteSession,
        store: &mut CheckpointStore,
        artifacts: &ArtifactStore,
    ) -> Result<(), ItemFailure> {
        // Navigate, bounded.
        match timeout(self.waits.navigation, session.navigate(&item.target)).await {
            Err(_) => {
                return Err(ItemFailure::NavigationTimeout {
                    target: item.target.clone(),
                });
            }
            Ok(Err(error)) => return Err(error.into()),
            Ok(Ok(())) => {}
        }

        // A bounce onto the login surface mid-run invalidates the session.
        let location = session.current_location().await.map_err(ItemFailure::from)?;
        if is_auth_surface(&location) {
            return Err(ItemFailure::SessionInvalid);
        }

        self.wait_until_settled(item, &*session).await?;

        let product = self.handler.produce(item, &mut *session, &self.waits).await?;

        let (bytes, fingerprint) = artifacts.write(&item.identity, &product.artifact_text)?;
        store.save(
            &item.identity,
            CheckpointRecord::new(product.payload, bytes, fingerprint),
        )?;
        info!(
            identity = %item.identity,
            handler = self.handler.name(),
            bytes,
            "item persisted"
        );
        Ok(())
    }

    /// Polls the readiness signal until the surface settles, bounded by the
    /// settle timeout.
    async fn wait_until_settled(
        &self,
        item: &Item,
        session: &dyn RemoteSession,
    ) -> Result<(), ItemFailure> {
        let deadline = Instant::now() + self.waits.settle;
        loop {
            if session.is_settled().await.map_err(ItemFailure::from)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ItemFailure::NavigationTimeout {
                    target: item.target.clone(),
                });
            }
            sleep(self.waits.settle_poll).await;
        }
    }

    /// Best-effort snapshot of the current state for later manual
    /// inspection. Must never fail the item loop.
    async fn capture_diagnostic(&self, item: &Item, session: &dyn RemoteSession) {
        let Some(dir) = &self.diagnostics_dir else {
            return;
        };
        match session.snapshot().await {
            Ok(snapshot) if !snapshot.is_empty() => {
                let path = dir.join(format!("{}.snapshot.html", item.identity));
                let write = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, &snapshot));
                match write {
                    Ok(()) => debug!(path = %path.display(), "diagnostic snapshot captured"),
                    Err(error) => {
                        warn!(identity = %item.identity, error = %error, "diagnostic capture failed");
                    }
                }
            }
            Ok(_) => debug!(identity = %item.identity, "empty snapshot; nothing to capture"),
            Err(error) => {
                warn!(identity = %item.identity, error = %error, "diagnostic capture failed");
            }
        }
    }
}

impl std::fmt::Debug for ItemPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPipeline")
            .field("handler", &self.handler.name())
            .field("waits", &self.waits)
            .field("diagnostics_dir", &self.diagnostics_dir)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::session::ContentQuery;

    // ==================== Scripted Session ====================

    struct ScriptedSession {
        /// Location reported after each navigation.
        landing: String,
        /// Delay injected into navigate().
        navigate_delay: Duration,
        /// Settle responses consumed front-to-back; empty means settled.
        settle_script: Vec<bool>,
        snapshot_body: String,
    }

    impl ScriptedSession {
        fn settled(landing: &str) -> Self {
            Self {
                landing: landing.to_string(),
                navigate_delay: Duration::ZERO,
                settle_script: Vec::new(),
                snapshot_body: "<html>stuck</html>".to_string(),
            }
        }
    }

    #[async_trait]
    impl RemoteSession for ScriptedSession {
        async fn navigate(&mut self, _target: &str) -> Result<(), SessionError> {
            sleep(self.navigate_delay).await;
            Ok(())
        }

        async fn current_location(&self) -> Result<String, SessionError> {
            Ok(self.landing.clone())
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

        async fn is_settled(&self) -> Result<bool, SessionError> {
            Ok(self.settle_script.first().copied().unwrap_or(true))
        }

        async fn snapshot(&self) -> Result<String, SessionError> {
            Ok(self.snapshot_body.clone())
        }
    }

    // ==================== Mock Handlers ====================

    struct FixedHandler {
        text: &'static str,
    }

    #[async_trait]
    impl ItemHandler for FixedHandler {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn produce(
            &self,
            _item: &Item,
            _session: &mut dyn RemoteSession,
            _waits: &WaitPolicy,
        ) -> Result<ItemProduct, ItemFailure> {
            Ok(ItemProduct {
                artifact_text: self.text.to_string(),
                payload: ResultPayload::Document,
            })
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ItemHandler for FailingHandler {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn produce(
            &self,
            _item: &Item,
            _session: &mut dyn RemoteSession,
            _waits: &WaitPolicy,
        ) -> Result<ItemProduct, ItemFailure> {
            Err(ItemFailure::ExtractionFailed)
        }
    }

    fn fixtures(dir: &TempDir) -> (CheckpointStore, ArtifactStore) {
        (
            CheckpointStore::load(&dir.path().join("checkpoints.json")),
            ArtifactStore::new(dir.path().join("out")),
        )
    }

    fn item() -> Item {
        Item::document("guide", "https://workspace.example/w/1/source/guide", 0)
    }

    fn fast_waits() -> WaitPolicy {
        WaitPolicy {
            navigation: Duration::from_millis(50),
            settle: Duration::from_millis(50),
            settle_poll: Duration::from_millis(5),
            generation: Duration::from_millis(50),
            generation_poll: Duration::from_millis(5),
        }
    }

    // ==================== Pipeline Tests ====================

    #[tokio::test]
    async fn test_process_happy_path_persists() {
        let dir = TempDir::new().unwrap();
        let (mut store, artifacts) = fixtures(&dir);
        let pipeline = ItemPipeline::new(Box::new(FixedHandler { text: "document body" }));
        let mut session = ScriptedSession::settled("https://workspace.example/w/1/source/guide");

        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;

        assert!(outcome.is_persisted());
        assert_eq!(artifacts.size_of("guide"), Some(13));
        assert!(store.get("guide").is_some());
    }

    #[tokio::test]
    async fn test_process_navigation_timeout() {
        let dir = TempDir::new().unwrap();
        let (mut store, artifacts) = fixtures(&dir);
        let pipeline =
            ItemPipeline::new(Box::new(FixedHandler { text: "x" })).with_waits(fast_waits());
        let mut session = ScriptedSession::settled("https://workspace.example/w/1");
        session.navigate_delay = Duration::from_millis(200);

        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;

        assert!(matches!(
            outcome,
            ItemOutcome::Failed(ItemFailure::NavigationTimeout { .. })
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_process_settle_timeout() {
        let dir = TempDir::new().unwrap();
        let (mut store, artifacts) = fixtures(&dir);
        let pipeline =
            ItemPipeline::new(Box::new(FixedHandler { text: "x" })).with_waits(fast_waits());
        let mut session = ScriptedSession::settled("https://workspace.example/w/1");
        session.settle_script = vec![false];

        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;

        assert!(matches!(
            outcome,
            ItemOutcome::Failed(ItemFailure::NavigationTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_login_bounce_is_session_invalid() {
        let dir = TempDir::new().unwrap();
        let (mut store, artifacts) = fixtures(&dir);
        let pipeline = ItemPipeline::new(Box::new(FixedHandler { text: "x" }));
        let mut session = ScriptedSession::settled("https://accounts.example.com/signin?next=w1");

        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;

        assert!(matches!(
            outcome,
            ItemOutcome::Failed(ItemFailure::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_process_extraction_failure_captures_diagnostic() {
        let dir = TempDir::new().unwrap();
        let (mut store, artifacts) = fixtures(&dir);
        let diag_dir = dir.path().join("diagnostics");
        let pipeline =
            ItemPipeline::new(Box::new(FailingHandler)).with_diagnostics_dir(&diag_dir);
        let mut session = ScriptedSession::settled("https://workspace.example/w/1/source/guide");

        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;

        assert!(matches!(
            outcome,
            ItemOutcome::Failed(ItemFailure::ExtractionFailed)
        ));
        assert!(diag_dir.join("guide.snapshot.html").exists());
    }

    #[tokio::test]
    async fn test_process_persistence_failure_is_nonfatal_outcome() {
        let dir = TempDir::new().unwrap();
        // Block the artifact directory with a plain file.
        let blocked = dir.path().join("out");
        std::fs::write(&blocked, "x").unwrap();

        let mut store = CheckpointStore::load(&dir.path().join("checkpoints.json"));
        let artifacts = ArtifactStore::new(&blocked);
        let pipeline = ItemPipeline::new(Box::new(FixedHandler { text: "body" }));
        let mut session = ScriptedSession::settled("https://workspace.example/w/1/source/guide");

        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;

        assert!(matches!(
            outcome,
            ItemOutcome::Failed(ItemFailure::Persistence(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_item_preserves_prior_record() {
        let dir = TempDir::new().unwrap();
        let (mut store, artifacts) = fixtures(&dir);

        // First run persists.
        let pipeline = ItemPipeline::new(Box::new(FixedHandler { text: "original body" }));
        let mut session = ScriptedSession::settled("https://workspace.example/w/1/source/guide");
        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;
        assert!(outcome.is_persisted());
        let recorded = store.get("guide").unwrap().clone();

        // Second run fails; the old record must survive untouched.
        let pipeline = ItemPipeline::new(Box::new(FailingHandler));
        let outcome = pipeline
            .process(&item(), &mut session, &mut store, &artifacts)
            .await;
        assert!(matches!(outcome, ItemOutcome::Failed(_)));
        assert_eq!(store.get("guide").unwrap(), &recorded);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ItemOutcome::Persisted.label(), "persisted");
        assert_eq!(ItemOutcome::Skipped.label(), "skipped");
        assert_eq!(
            ItemOutcome::Failed(ItemFailure::ExtractionFailed).label(),
            "failed"
        );
    }
}
