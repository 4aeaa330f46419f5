//! StopSync CLI
//!
//! Command-line tools for looking into a favourite-stop cache directory.
//!
//! # Commands
//!
//! - `inspect` - Display store counters
//! - `list` - List cached stops in display order
//! - `pending` - List operations waiting to be pushed
//! - `verify` - Check every journal frame
//! - `compact` - Rewrite the journal as a single snapshot

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// StopSync command-line cache tools.
#[derive(Parser)]
#[command(name = "stopsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache directory
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
    /// Display store counters
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List cached stops
    List {
        /// Include records awaiting a confirmed delete
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List operations waiting to be pushed
    Pending {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Verify journal integrity
    Verify,

    /// Rewrite the journal as a single snapshot
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Cache path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::List { all, format } => {
            let path = cli.path.ok_or("Cache path required for list")?;
            commands::list::run(&path, all, format)?;
        }
        Commands::Pending { format } => {
            let path = cli.path.ok_or("Cache path required for pending")?;
            commands::pending::run(&path, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Cache path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Cache path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("StopSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
