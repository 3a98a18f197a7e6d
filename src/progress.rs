//! Console progress tally for batch runs.
//!
//! Progress is emitted on stderr so stdout stays parseable; it is disabled
//! automatically when stderr is not a terminal or `--quiet` is set.

use std::io::{self, IsTerminal};

use indicatif::{ProgressBar, ProgressStyle};

/// Maximum label length shown in the running tally.
const LABEL_WIDTH: usize = 48;

/// Running `[n/total]` tally with a per-item outcome message.
#[derive(Debug, Default)]
pub struct Progress {
    bar: Option<ProgressBar>,
    enabled: bool,
}

impl Progress {
    /// Creates a disabled reporter (logs only).
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates a reporter that draws when stderr is a terminal and quiet
    /// mode is off.
    #[must_use]
    pub fn auto(quiet: bool) -> Self {
        Self {
            bar: None,
            enabled: !quiet && io::stderr().is_terminal(),
        }
    }

    /// Starts the tally for `total` items.
    pub fn start(&mut self, total: u64) {
        if !self.enabled {
            return;
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("[{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar = Some(bar);
    }

    /// Records one finished item.
    pub fn tick(&self, label: &str, outcome: &str) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(format!("{outcome}: {}", truncate_label(label)));
        }
    }

    /// Finishes the tally with a summary line.
    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }

    /// Clears the tally without a summary (fatal abort path).
    pub fn abandon(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

fn truncate_label(label: &str) -> String {
    if label.chars().count() <= LABEL_WIDTH {
        return label.to_string();
    }
    let truncated: String = label.chars().take(LABEL_WIDTH - 1).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_label_short_passthrough() {
        assert_eq!(truncate_label("guide"), "guide");
    }

    #[test]
    fn test_truncate_label_long_is_bounded() {
        let long = "x".repeat(200);
        let truncated = truncate_label(&long);
        assert!(truncated.chars().count() <= LABEL_WIDTH);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_disabled_progress_is_inert() {
        let mut progress = Progress::disabled();
        progress.start(10);
        progress.tick("guide", "persisted");
        progress.finish("done");
        assert!(progress.bar.is_none());
    }
}
