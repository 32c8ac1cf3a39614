//! Command-line arguments.

use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Global options and the subcommand to run.
#[derive(Debug, Parser)]
#[command(
    name = "imgcache",
    version,
    about = "Load and cache remote images with retries and lazy scheduling",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Persistent store directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Retries after the first failed attempt.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in milliseconds.
    #[arg(long, global = true)]
    pub load_timeout_ms: Option<u64>,

    /// Maximum images held in memory.
    #[arg(long, global = true)]
    pub memory_cache_capacity: Option<usize>,

    /// URLs per prefetch batch.
    #[arg(long, global = true)]
    pub prefetch_batch_size: Option<usize>,

    /// Days to keep images in the persistent store.
    #[arg(long, global = true)]
    pub retention_days: Option<u64>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// `imgcache` subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the canonical form of each URL.
    Normalize {
        /// Image or share-link URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Load images concurrently and report where each came from.
    Load {
        /// Image or share-link URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Warm the caches in idle-time batches.
    Prefetch {
        /// Image or share-link URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Remove persisted images past the retention horizon.
    Sweep,
    /// Empty the persistent store.
    Clear,
    /// Print store location, size and effective settings as JSON.
    Stats,
}
