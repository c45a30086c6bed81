//! CLI interface for the navigator
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-model web navigator
///
/// Plans browser actions for a goal with local language models, drives a
/// WebDriver session through them and remembers what it learned.
#[derive(Parser, Debug)]
#[command(name = "navigator")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pursue a navigation goal
    Run {
        /// What to accomplish, in plain words
        goal: String,
    },

    /// Search semantic memory
    Search {
        query: String,

        /// Number of records to show
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Show run history
    History {
        /// Number of runs to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show all steps of a past run
    Replay {
        /// Run ID to replay
        run_id: String,
    },

    /// Check configuration, models and the WebDriver endpoint
    Doctor,
}
