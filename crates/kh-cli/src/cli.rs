//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kh_core::KeyPosition;

/// Keyboard usage tracker.
///
/// Logs every key press from a split keyboard's debug console and reports
/// which keys are used together.
#[derive(Debug, Parser)]
#[command(name = "kh", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the keypress database (overrides the config file).
    #[arg(short, long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read key events from the keyboard and record them.
    ///
    /// Pass both halves' console devices with `-f`, or nothing to read from stdin.
    Track {
        /// Input files or devices (exactly two, or none for stdin).
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Start recording before the stored history has been replayed.
        #[arg(long)]
        no_wait_history: bool,
    },

    /// Show combos that include a key.
    Combos {
        /// Key position to look up.
        #[arg(short, long, value_parser = parse_position)]
        position: KeyPosition,

        /// Show at most this many combos.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show keys pressed directly after a key.
    Neighbors {
        /// Key position to look up.
        #[arg(short, long, value_parser = parse_position)]
        position: KeyPosition,

        /// Show at most this many neighbors.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show press counts per key.
    Stats {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Merge several keypress databases into a new one.
    Merge {
        /// Databases to merge.
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Output database. Must not exist yet.
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn parse_position(value: &str) -> Result<KeyPosition, String> {
    let value: i64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    KeyPosition::new(value).map_err(|err| err.to_string())
}
