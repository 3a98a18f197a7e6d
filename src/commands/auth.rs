//! `notepilot auth` - persisted credential management.

use std::fs::File;
use std::io::{self, BufRead, BufReader};

use anyhow::{Context, Result, anyhow};
use tracing::warn;

use notepilot::auth::{CredentialStore, parse_netscape_cookies};

use crate::cli::AuthCommand;

/// Dispatches an auth subcommand.
pub fn dispatch(command: &AuthCommand) -> Result<()> {
    match command {
        AuthCommand::Import { file } => import(file),
        AuthCommand::Clear => clear(),
    }
}

fn import(source: &str) -> Result<()> {
    let reader: Box<dyn BufRead> = if source == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(source)
            .map_err(|e| anyhow!("cannot open cookie file '{source}': {e}"))?;
        Box::new(BufReader::new(file))
    };

    let parsed = parse_netscape_cookies(reader).context("failed to parse cookie export")?;
    for (line, reason) in &parsed.warnings {
        warn!(line, reason = %reason, "skipping malformed cookie line");
    }

    let store = CredentialStore::open_default()?;
    store
        .store(&parsed.cookies)
        .context("failed to persist credentials securely")?;
    println!(
        "Stored {} cookies encrypted at {}",
        parsed.cookies.len(),
        store.path().display()
    );
    Ok(())
}

fn clear() -> Result<()> {
    let store = CredentialStore::open_default()?;
    if store.clear().context("failed to remove credentials")? {
        println!("Removed persisted credentials");
    } else {
        println!("No persisted credentials to remove");
    }
    Ok(())
}
