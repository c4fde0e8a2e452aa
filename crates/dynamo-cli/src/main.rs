//! Dynamo simulator CLI.
//!
//! Runs the scripted scenarios and prints their event history.
//!
//! # Quick Start
//!
//! ```bash
//! # See what can be run
//! dynamo list
//!
//! # Hinted handoff, with vector clocks shown
//! dynamo run handoff-recovery --seed 7 --clocks
//!
//! # Machine-readable history
//! dynamo run partition --json > partition.jsonl
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Dynamo - a deterministic simulator of a Dynamo-style replicated store.
#[derive(Parser)]
#[command(name = "dynamo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available scenarios.
    List,

    /// Run one scenario and print its history.
    Run {
        /// Scenario name (see `dynamo list`).
        scenario: String,

        /// Seed for random destination choices (overrides configuration).
        #[arg(short, long)]
        seed: Option<u64>,

        /// Emit events as JSON lines instead of text.
        #[arg(long)]
        json: bool,

        /// Show vector clocks next to values.
        #[arg(long)]
        clocks: bool,

        /// Print the whole history, not just the part the scenario is about.
        #[arg(long)]
        full: bool,

        /// Configuration file to use instead of the layered lookup.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also save the history in binary form to this file.
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Configuration management.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration.
    Show {
        /// Output format (toml, json).
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Write the default configuration to `dynamo.toml`.
    Init {
        /// Directory to write into.
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays clean.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            commands::list::run();
            Ok(())
        }
        Commands::Run {
            scenario,
            seed,
            json,
            clocks,
            full,
            config,
            save,
        } => commands::run::run(&commands::run::RunArgs {
            scenario,
            seed,
            json,
            clocks,
            full,
            config,
            save,
        }),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show { format } => commands::config::show(&format),
            ConfigCommands::Init { dir, force } => commands::config::init(&dir, force),
        },
    }
}
