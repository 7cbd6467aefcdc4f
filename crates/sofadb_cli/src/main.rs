//! SofaDB CLI
//!
//! Command-line tools for SofaDB database files.
//!
//! # Commands
//!
//! - `inspect` - Display header fields, counters and file size
//! - `verify` - Check every block reachable from the latest header
//! - `compact` - Rewrite the file without stale revisions and tombstones
//! - `dump` - List documents in sequence order for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SofaDB command-line database tools.
#[derive(Parser)]
#[command(name = "sofadb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display database header and statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify database integrity
    Verify {
        /// Only scan headers, skip walking the indexes
        #[arg(long)]
        headers_only: bool,
    },

    /// Compact the database to reclaim space
    Compact {
        /// Write the compacted copy here instead of replacing the file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep tombstones written at or after this sequence number
        #[arg(long)]
        keep_tombstones_since: Option<u64>,

        /// Compress document bodies in the compacted file
        #[arg(short, long)]
        compress: bool,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump documents in sequence order
    Dump {
        /// Only show writes after this sequence number
        #[arg(short, long, default_value = "0")]
        since: u64,

        /// Maximum number of documents to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

/// Errors reported by the CLI itself rather than by the engine.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A command needs `--path`.
    #[error("database path required for {0}")]
    MissingPath(&'static str),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { headers_only } => {
            let path = cli.path.ok_or(CliError::MissingPath("verify"))?;
            commands::verify::run(&path, !headers_only)?;
        }
        Commands::Compact {
            output,
            keep_tombstones_since,
            compress,
            dry_run,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("compact"))?;
            let options = commands::compact::CompactOptions {
                output,
                keep_tombstones_since,
                compress,
                dry_run,
            };
            commands::compact::run(&path, &options)?;
        }
        Commands::Dump {
            since,
            limit,
            format,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("dump"))?;
            commands::dump::run(&path, since, limit, &format)?;
        }
        Commands::Version => {
            println!("SofaDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SofaDB Core v{}", sofadb_core::VERSION);
            println!("Disk format v{}", sofadb_core::DISK_VERSION);
        }
    }

    Ok(())
}
