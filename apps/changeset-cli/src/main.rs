//! # changeset
//!
//! Command-line driver for observable change sets:
//! - `changeset replay <script>` — replay a change script, printing events as JSONL
//! - `changeset check <script>` — validate a script without running it

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Replay change scripts against an observable change set.
#[derive(Parser)]
#[command(name = "changeset", version, about)]
struct Cli {
    /// Project root directory (holds `.changeset/config.toml`).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script, printing every change set event as a JSON line.
    Replay {
        /// Path to the JSON script.
        script: PathBuf,
        /// Directory that workspace locators resolve against (defaults to project root).
        #[arg(long)]
        root: Option<PathBuf>,
        /// Also append events to this JSONL file.
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Parse a script and report its steps without running it.
    Check {
        /// Path to the JSON script.
        script: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("changeset_core=info".parse()?)
                .add_directive("changeset_cli=info".parse()?)
                .add_directive("changeset=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);

    match &cli.command {
        Commands::Replay {
            script,
            root,
            events,
        } => commands::replay::execute(
            &project_root,
            script,
            root.as_deref(),
            events.as_deref(),
        ),
        Commands::Check { script } => commands::check::execute(script),
    }
}
