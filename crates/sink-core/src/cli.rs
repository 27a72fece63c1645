use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// sink - a content-addressed filesystem deduplication engine
///
/// Indexes filesystem subtrees into a persistent content-fingerprint store,
/// finds groups of identical files/directories, and plans a safe quarantine
/// of every redundant copy but one.
#[derive(Parser, Debug)]
#[command(name = "sink")]
#[command(about = "Find and quarantine duplicate files and directories")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recursively add a path's content fingerprints to the index
    Add(AddArgs),
    /// Find duplicate items within an already-indexed path
    Dedupe(DedupeArgs),
    /// Move redundant copies from a candidates file into quarantine
    Quarantine(QuarantineArgs),
}

#[derive(ClapArgs, Debug)]
pub struct AddArgs {
    /// Path to recursively index
    pub path: PathBuf,

    /// Path to the sqlite index database
    #[arg(long, default_value = "sink.db")]
    pub db_path: PathBuf,

    /// Chunk size (bytes) used when streaming file hashes
    #[arg(long, default_value_t = 1024 * 1024)]
    pub chunksize: usize,

    /// Free-text description stored with this run's report
    #[arg(long)]
    pub description: Option<String>,

    /// Basenames to ignore during traversal (comma-separated)
    #[arg(long, value_delimiter = ',', default_values_t = default_ignore_names())]
    pub ignore_path_names: Vec<String>,

    /// Maximum worker threads used for file hashing (default: all cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

fn default_ignore_names() -> Vec<String> {
    vec!["sink-quarantine".to_string(), "$RECYCLE.BIN".to_string()]
}

#[derive(ClapArgs, Debug)]
pub struct DedupeArgs {
    /// Already-indexed base path to search for duplicates within
    pub path: PathBuf,

    /// Path to the sqlite index database
    #[arg(long, default_value = "sink.db")]
    pub db_path: PathBuf,

    /// Output path for the candidate-groups JSON
    #[arg(long, default_value = "candidates.json")]
    pub candidate_path: PathBuf,

    /// Report sizes in bytes instead of item counts in the final summary
    #[arg(long, default_value_t = true)]
    pub use_bytes: bool,
}

#[derive(ClapArgs, Debug)]
pub struct QuarantineArgs {
    /// Input candidate-groups JSON (from `dedupe`)
    #[arg(long, default_value = "candidates.json")]
    pub candidate_path: PathBuf,

    /// Directory under which quarantined items are placed
    #[arg(long)]
    pub quarantine_root: Option<PathBuf>,

    /// Number of largest groups to preview before confirming
    #[arg(long, default_value_t = 10)]
    pub show_top: usize,

    /// Skip the interactive confirmation prompt
    #[arg(long)]
    pub auto_confirm: bool,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
