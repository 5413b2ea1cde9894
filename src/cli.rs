//! CLI definitions for svcagent.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// svcagent CLI.
#[derive(Parser)]
#[command(name = "svcagent")]
#[command(about = "Service application lifecycle and background-suspend coordinator")]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a demo service driven by JSON-lines launcher commands on stdin
    Run {
        /// Configuration file path
        #[arg(short, long, env = "SVCAGENT_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for rolling log files
        #[arg(long)]
        log_dir: Option<String>,

        /// Emit JSON log lines
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Configuration file path
        path: PathBuf,
    },
}
