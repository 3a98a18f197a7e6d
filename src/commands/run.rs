//! `notepilot sync` / `notepilot ask` - batch execution.

use std::env;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use notepilot::auth::CredentialStore;
use notepilot::extract::build_default_chain;
use notepilot::pipeline::{DocumentHandler, ItemHandler, PromptHandler};
use notepilot::progress::Progress;
use notepilot::session::http::HttpSessionOpener;
use notepilot::{
    ArtifactStore, BatchDriver, CheckpointStore, Credentials, Item, ItemPipeline, RunError,
    SessionManager, item,
};

use crate::cli::RunArgs;

/// Environment fallback for the workspace base URL.
const BASE_URL_ENV: &str = "NOTEPILOT_BASE_URL";

/// Hidden state subdirectory inside the output directory.
const STATE_DIR_NAME: &str = ".notepilot";

/// File name of the checkpoint store inside the state directory.
const CHECKPOINT_FILE_NAME: &str = "checkpoints.json";

/// Runs the document sync workflow.
pub async fn sync(manifest: &Path, run: &RunArgs, quiet: bool) -> Result<()> {
    let items = item::load_manifest(manifest)?;
    let handler = DocumentHandler::new(build_default_chain());
    execute(items, Box::new(handler), run, quiet).await
}

/// Runs the prompt/answer workflow.
pub async fn ask(prompts: &Path, chat: &str, run: &RunArgs, quiet: bool) -> Result<()> {
    let items = item::load_prompts(prompts, chat)?;
    execute(items, Box::new(PromptHandler::new()), run, quiet).await
}

async fn execute(
    items: Vec<Item>,
    handler: Box<dyn ItemHandler>,
    run: &RunArgs,
    quiet: bool,
) -> Result<()> {
    let base_url = resolve_base_url(run)?;
    let credentials = load_credentials()?;

    let state_dir = run.output_dir.join(STATE_DIR_NAME);
    let store = CheckpointStore::load(&state_dir.join(CHECKPOINT_FILE_NAME));
    let artifacts = ArtifactStore::new(&run.output_dir);

    let sessions = SessionManager::new(
        Box::new(HttpSessionOpener::new(base_url)),
        credentials,
        run.quota,
    );
    let mut pipeline = ItemPipeline::new(handler);
    if run.diagnostics {
        pipeline = pipeline.with_diagnostics_dir(state_dir.join("diagnostics"));
    }

    let mut driver = BatchDriver::new(sessions, pipeline, store, artifacts)
        .with_progress(Progress::auto(quiet));

    match driver.run(items).await {
        Ok(summary) => {
            println!("{summary}");
            Ok(())
        }
        Err(fatal @ RunError::SessionExpired { .. }) => {
            // Surface the out-of-band re-authentication instruction plainly,
            // not buried in a log line.
            eprintln!("{fatal}");
            Err(fatal.into())
        }
        Err(other) => Err(other.into()),
    }
}

fn resolve_base_url(run: &RunArgs) -> Result<String> {
    if let Some(url) = &run.base_url {
        return Ok(url.clone());
    }
    if let Ok(url) = env::var(BASE_URL_ENV)
        && !url.trim().is_empty()
    {
        return Ok(url);
    }
    bail!("no workspace base URL; pass --base-url or set {BASE_URL_ENV}")
}

fn load_credentials() -> Result<Credentials> {
    let store = CredentialStore::open_default()?;
    match store.load() {
        Ok(Some(cookies)) => {
            info!(cookies = cookies.len(), "loaded persisted credentials");
            Ok(Credentials::new(cookies))
        }
        Ok(None) => {
            bail!("no persisted credentials; run `notepilot auth import <cookies.txt>` first")
        }
        Err(error) => Err(error).context("failed to load persisted credentials"),
    }
}
