//! Pure text transforms for stripping known response noise.
//!
//! The remote surface decorates answers with a reasoning preamble, an inline
//! citation summary, and a source counter. Cleaning is a pure function over
//! the text with an explicit pattern list, decoupled from how the surface
//! renders those decorations, and is idempotent: cleaning already-clean text
//! is a no-op.

use std::sync::LazyLock;

use regex::Regex;

/// Compiles a pattern known to be valid at build time.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Leading reasoning/thinking line emitted before the answer proper.
static THINKING_PREAMBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)\A\s*(?:thinking(?:\.\.\.|…)?|show thinking|thought for [^\n]*)\s*\n")
});

/// Trailing parenthetical citation summary, e.g. `(cited from 3 passages)`.
static CITATION_SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\s*\([^()]*\bcit(?:ations?|ed)\b[^()]*\)\s*\z"));

/// Trailing source counter annotation, e.g. `4 Sources`.
static SOURCE_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)(?:\A|\s)\d+\s+sources?\s*\z"));

/// Runs of three or more blank lines in synced document text.
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\n{3,}"));

/// Cleans a conversational answer.
///
/// Removes, in order: a reasoning/thinking preamble line, a trailing
/// parenthetical citation summary, and a trailing "N Sources" counter. The
/// result is trimmed; an empty result means the response carried no usable
/// answer and the caller must treat it as a failure, not persist it.
#[must_use]
pub fn clean_answer(raw: &str) -> String {
    let mut text = THINKING_PREAMBLE_RE.replace(raw, "").trim().to_string();
    // The two suffix decorations can stack (citation summary, then counter);
    // strip to a fixpoint so cleaning already-clean text is a no-op.
    loop {
        let stripped = CITATION_SUMMARY_RE.replace(&text, "");
        let stripped = SOURCE_COUNT_RE.replace(&stripped, "");
        let stripped = stripped.trim();
        if stripped == text {
            return text;
        }
        text = stripped.to_string();
    }
}

/// Cleans synced document text: normalizes line endings and collapses long
/// blank runs left behind by the rendered surface.
#[must_use]
pub fn clean_document(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n");
    BLANK_RUN_RE.replace_all(&unified, "\n\n").trim().to_string()
}

/// Parses disclosed source entries into a de-duplicated name list.
///
/// Each raw entry is a short text block whose first line is a type/category
/// label and whose second line is the source name; single-line entries are
/// taken as-is. First-seen order is preserved.
#[must_use]
pub fn parse_source_entries(entries: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut names = Vec::new();
    for entry in entries {
        let mut lines = entry.lines().map(str::trim).filter(|l| !l.is_empty());
        let first = lines.next();
        let name = match lines.next() {
            Some(second) => second,
            None => match first {
                Some(only) => only,
                None => continue,
            },
        };
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    names
}
