//! Top-level batch driver.
//!
//! Loads the checkpoint state, de-duplicates the item list, and feeds items
//! one at a time through the pipeline inside quota-bounded session windows.
//! Progress is persisted after every item, so terminating the process at
//! any point and re-running reproduces an uninterrupted run (the item in
//! flight at termination is simply reprocessed).
//!
//! Only one condition aborts a run: fatal session expiry. Every per-item
//! failure is counted and the loop moves on.

use tracing::{debug, info, warn};

use crate::checkpoint::{ArtifactStore, CheckpointStore};
use crate::item::{Item, dedup_items};
use crate::pipeline::{ItemFailure, ItemOutcome, ItemPipeline};
use crate::progress::Progress;
use crate::session::{SessionError, SessionManager};

/// Fatal run-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The remote bounced to its authentication surface and no unattended
    /// re-authentication is possible.
    #[error(
        "session expired (landed on {location}); re-authenticate out-of-band with `notepilot auth import` and re-run"
    )]
    SessionExpired {
        /// Location that triggered the detection.
        location: String,
    },

    /// Opening a session failed for a non-auth reason.
    #[error("failed to open session: {0}")]
    Session(SessionError),
}

impl From<SessionError> for RunError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Expired { location } => Self::SessionExpired { location },
            other => Self::Session(other),
        }
    }
}

/// Final tally of a batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Items processed and checkpointed this run.
    pub persisted: usize,
    /// Items skipped on a valid prior checkpoint.
    pub skipped: usize,
    /// Items that failed this run (retried on the next invocation).
    pub failed: usize,
}

impl RunSummary {
    /// Total items accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.persisted + self.skipped + self.failed
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} persisted, {} skipped, {} failed",
            self.persisted, self.skipped, self.failed
        )
    }
}

/// The batch engine's single entry point.
pub struct BatchDriver {
    sessions: SessionManager,
    pipeline: ItemPipeline,
    store: CheckpointStore,
    artifacts: ArtifactStore,
    progress: Progress,
}

impl BatchDriver {
    /// Assembles a driver. The store should already be loaded from its
    /// fixed path; the driver takes ownership of all parts for the run.
    #[must_use]
    pub fn new(
        sessions: SessionManager,
        pipeline: ItemPipeline,
        store: CheckpointStore,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            sessions,
            pipeline,
            store,
            artifacts,
            progress: Progress::disabled(),
        }
    }

    /// Attaches a console progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Borrows the session manager (rotation counters, for callers/tests).
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Borrows the checkpoint store.
    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Runs the batch to completion or fatal session expiry.
    ///
    /// Items are de-duplicated by identity before processing begins. The
    /// final store state is already on disk when this returns; persistence
    /// happened after every item, not at the end.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::SessionExpired`] when the remote demands
    /// re-authentication, or [`RunError::Session`] when a session cannot be
    /// opened at all.
    pub async fn run(&mut self, items: Vec<Item>) -> Result<RunSummary, RunError> {
        let items = dedup_items(items);
        info!(
            items = items.len(),
            resumed = self.store.len(),
            "batch starting"
        );
        self.progress.start(items.len() as u64);

        let mut summary = RunSummary::default();
        for item in &items {
            // The critical optimization: decide skips before any session or
            // network cost is paid.
            if self.pipeline.should_skip(item, &self.store, &self.artifacts) {
                summary.skipped += 1;
                self.progress.tick(&item.label, "skipped");
                continue;
            }

            let outcome = match self.process_with_session(item).await {
                Ok(outcome) => outcome,
                Err(fatal) => {
                    self.progress.abandon();
                    self.sessions.shutdown().await;
                    return Err(fatal);
                }
            };

            match &outcome {
                ItemOutcome::Persisted => summary.persisted += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
                ItemOutcome::Failed(failure) => {
                    summary.failed += 1;
                    warn!(identity = %item.identity, failure = %failure, "continuing after failure");
                }
            }
            self.progress.tick(&item.label, outcome.label());
        }

        self.sessions.shutdown().await;
        self.progress.finish(&summary.to_string());
        info!(
            persisted = summary.persisted,
            skipped = summary.skipped,
            failed = summary.failed,
            sessions = self.sessions.sessions_opened(),
            "batch complete"
        );
        Ok(summary)
    }

    /// Processes one item on a managed session, retrying exactly once on a
    /// fresh session when the current one is observed logged-out mid-item.
    async fn process_with_session(&mut self, item: &Item) -> Result<ItemOutcome, RunError> {
        let mut retried = false;
        loop {
            let session = self.sessions.acquire().await.map_err(RunError::from)?;
            let outcome = self
                .pipeline
                .process(item, session, &mut self.store, &self.artifacts)
                .await;

            if matches!(outcome, ItemOutcome::Failed(ItemFailure::SessionInvalid)) {
                self.sessions.invalidate().await;
                if !retried {
                    retried = true;
                    debug!(identity = %item.identity, "retrying item on a fresh session");
                    continue;
                }
            }

            self.sessions.release(outcome.is_persisted());
            return Ok(outcome);
        }
    }
}

impl std::fmt::Debug for BatchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDriver")
            .field("sessions", &self.sessions)
            .field("pipeline", &self.pipeline)
            .field("checkpoints", &self.store.len())
            .finish_non_exhaustive()
    }
}
