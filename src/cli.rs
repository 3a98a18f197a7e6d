//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use notepilot::DEFAULT_SESSION_QUOTA;

/// Batch-drive a remote notebook workspace.
///
/// Notepilot synchronizes a workspace's source documents into local files
/// and runs ordered prompt lists through its conversational surface, with
/// durable per-item checkpoints so interrupted runs resume where they left
/// off.
#[derive(Parser, Debug)]
#[command(name = "notepilot")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync the workspace's source documents into local files
    Sync {
        /// JSON manifest of {"label", "target"} entries, in batch order
        #[arg(long)]
        manifest: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run an ordered prompt list through the conversational surface
    Ask {
        /// Plain-text prompt file: one prompt per line, `#` comments
        #[arg(long)]
        prompts: PathBuf,

        /// Location of the conversational surface within the workspace
        #[arg(long)]
        chat: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Manage persisted workspace credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
}

/// Options shared by the batch subcommands.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Workspace base URL (falls back to NOTEPILOT_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Output directory for synced artifacts and run state
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Successful items per session before rotation (1-100)
    #[arg(long, default_value_t = DEFAULT_SESSION_QUOTA, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub quota: u32,

    /// Capture diagnostic snapshots when extraction fails
    #[arg(long)]
    pub diagnostics: bool,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Import a Netscape cookie export ("-" reads stdin) into encrypted storage
    Import {
        /// Cookie file path, or "-" for stdin
        file: String,
    },

    /// Remove persisted credentials
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_sync_parses_with_defaults() {
        let args =
            Args::try_parse_from(["notepilot", "sync", "--manifest", "sources.json"]).unwrap();
        match args.command {
            Command::Sync { manifest, run } => {
                assert_eq!(manifest, PathBuf::from("sources.json"));
                assert_eq!(run.quota, DEFAULT_SESSION_QUOTA);
                assert_eq!(run.output_dir, PathBuf::from("."));
                assert!(!run.diagnostics);
            }
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn test_cli_ask_requires_chat_target() {
        let result = Args::try_parse_from(["notepilot", "ask", "--prompts", "prompts.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_ask_parses_full() {
        let args = Args::try_parse_from([
            "notepilot",
            "ask",
            "--prompts",
            "prompts.txt",
            "--chat",
            "w/1/chat",
            "--quota",
            "3",
            "--diagnostics",
        ])
        .unwrap();
        match args.command {
            Command::Ask { prompts, chat, run } => {
                assert_eq!(prompts, PathBuf::from("prompts.txt"));
                assert_eq!(chat, "w/1/chat");
                assert_eq!(run.quota, 3);
                assert!(run.diagnostics);
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn test_cli_quota_zero_rejected() {
        let result = Args::try_parse_from([
            "notepilot",
            "sync",
            "--manifest",
            "m.json",
            "--quota",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_verbose_is_global() {
        let args =
            Args::try_parse_from(["notepilot", "sync", "--manifest", "m.json", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_auth_import_stdin() {
        let args = Args::try_parse_from(["notepilot", "auth", "import", "-"]).unwrap();
        match args.command {
            Command::Auth {
                command: AuthCommand::Import { file },
            } => assert_eq!(file, "-"),
            _ => panic!("expected auth import"),
        }
    }

    #[test]
    fn test_cli_missing_subcommand_fails() {
        assert!(Args::try_parse_from(["notepilot"]).is_err());
    }
}
