//! Item model, identity derivation, and input list loading.
//!
//! One [`Item`] is one unit of work in the ordered batch: a source document
//! to pull down, or a prompt to submit. Identity is derived deterministically
//! from the item's text so that re-runs and de-duplication agree across
//! process restarts.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Maximum length of the slug portion of an identity.
const MAX_SLUG_LEN: usize = 64;

/// Length of the content-hash suffix appended to prompt identities.
const PROMPT_HASH_LEN: usize = 8;

/// Errors raised while loading item lists from disk.
#[derive(Debug, thiserror::Error)]
pub enum ItemListError {
    /// The input file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest was not valid JSON of the expected shape.
    #[error("invalid manifest {path}: {source}")]
    Manifest {
        /// Path that failed to parse.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The input file contained no usable items.
    #[error("no items found in {path}")]
    Empty {
        /// Path that yielded nothing.
        path: String,
    },
}

/// One unit of work in the ordered batch list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Stable identity; deterministic and collision-free within one run.
    pub identity: String,
    /// Display label. For prompts this is the full prompt text.
    pub label: String,
    /// Location the session navigates to for this item.
    pub target: String,
    /// Position in the original input list.
    pub ordinal: usize,
}

impl Item {
    /// Creates a document item; identity is the slug of the label.
    #[must_use]
    pub fn document(label: impl Into<String>, target: impl Into<String>, ordinal: usize) -> Self {
        let label = label.into();
        let identity = document_identity(&label, ordinal);
        Self {
            identity,
            label,
            target: target.into(),
            ordinal,
        }
    }

    /// Creates a prompt item.
    ///
    /// Prompt identities append a short content-hash suffix so that long
    /// prompts sharing a leading phrase remain distinct, while exact
    /// duplicates still collapse to one identity.
    #[must_use]
    pub fn prompt(text: impl Into<String>, target: impl Into<String>, ordinal: usize) -> Self {
        let text = text.into();
        let identity = prompt_identity(&text);
        Self {
            identity,
            label: text,
            target: target.into(),
            ordinal,
        }
    }
}

/// Derives a filesystem-safe slug from a label.
///
/// Lowercases, maps every non-alphanumeric run to a single `-`, and trims.
/// Returns an empty string for labels with no usable characters.
#[must_use]
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut pending_dash = false;
    for ch in label.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

fn document_identity(label: &str, ordinal: usize) -> String {
    let slug = slugify(label);
    if slug.is_empty() {
        // Unnamed entries fall back to their list position.
        format!("item-{}", ordinal + 1)
    } else {
        slug
    }
}

fn prompt_identity(text: &str) -> String {
    let digest = Sha256::digest(text.trim().as_bytes());
    let mut suffix = String::with_capacity(PROMPT_HASH_LEN);
    for byte in digest.iter().take(PROMPT_HASH_LEN / 2) {
        suffix.push_str(&format!("{byte:02x}"));
    }
    let slug = slugify(text);
    if slug.is_empty() {
        format!("prompt-{suffix}")
    } else {
        format!("{slug}-{suffix}")
    }
}

/// De-duplicates items by identity, keeping the first occurrence of each.
///
/// Position does not participate: the third entry of `[a, b, a]` is dropped
/// because its identity collides with the first, not because of where it sits.
#[must_use]
pub fn dedup_items(items: Vec<Item>) -> Vec<Item> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.identity.clone()) {
            unique.push(item);
        } else {
            debug!(identity = %item.identity, ordinal = item.ordinal, "dropping duplicate item");
        }
    }
    unique
}

/// One entry of a `sync` manifest file.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    label: String,
    target: String,
}

/// Loads a JSON manifest of `{label, target}` entries into document items.
///
/// # Errors
///
/// Returns [`ItemListError`] when the file cannot be read, is not valid
/// JSON, or contains no entries.
pub fn load_manifest(path: &Path) -> Result<Vec<Item>, ItemListError> {
    let text = fs::read_to_string(path).map_err(|source| ItemListError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&text).map_err(|source| ItemListError::Manifest {
            path: path.display().to_string(),
            source,
        })?;
    if entries.is_empty() {
        return Err(ItemListError::Empty {
            path: path.display().to_string(),
        });
    }
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(ordinal, entry)| Item::document(entry.label, entry.target, ordinal))
        .collect())
}

/// Loads a plain-text prompt file into prompt items.
///
/// One prompt per line; blank lines and `#` comments are skipped. Every
/// prompt shares the same navigation target (the conversational surface).
///
/// # Errors
///
/// Returns [`ItemListError`] when the file cannot be read or contains no
/// prompts.
pub fn load_prompts(path: &Path, target: &str) -> Result<Vec<Item>, ItemListError> {
    let text = fs::read_to_string(path).map_err(|source| ItemListError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let items: Vec<Item> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(ordinal, line)| Item::prompt(line, target, ordinal))
        .collect();
    if items.is_empty() {
        return Err(ItemListError::Empty {
            path: path.display().to_string(),
        });
    }
    Ok(items)
}
