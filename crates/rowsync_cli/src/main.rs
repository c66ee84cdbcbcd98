//! rowsync CLI
//!
//! Command-line tools for exercising and inspecting rowsync stores.
//!
//! # Commands
//!
//! - `demo` - Sync a file-backed client store with an in-process server
//! - `inspect` - Display tables, rows, change tracker and watermarks

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use rowsync_engine::ResolutionPolicy;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// rowsync command-line tools.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the client store file
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
    /// Edit a customer locally and sync it with an in-process server
    Demo {
        /// Seconds between scheduled sessions
        #[arg(short, long, default_value = "10")]
        interval: u64,

        /// Let the server rename the customer concurrently
        #[arg(short, long)]
        server_edits: bool,

        /// Conflict resolution policy
        #[arg(long, value_enum, default_value_t = Policy::Latest)]
        policy: Policy,

        /// Server store file [default: <path> with a .server.json extension]
        #[arg(long)]
        server_path: Option<PathBuf>,
    },

    /// Display tables, rows, change tracker and watermarks
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

/// Conflict resolution policy selectable from the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    /// The remote row replaces the local one
    RemoteWins,
    /// The local row is kept and pushed
    LocalWins,
    /// The most recent change wins
    Latest,
}

impl From<Policy> for ResolutionPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::RemoteWins => ResolutionPolicy::RemoteWins,
            Policy::LocalWins => ResolutionPolicy::LocalWins,
            Policy::Latest => ResolutionPolicy::LatestVersionWins,
        }
    }
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
        Commands::Demo {
            interval,
            server_edits,
            policy,
            server_path,
        } => {
            let path = cli.path.ok_or("Store path required for demo")?;
            let options = commands::demo::DemoOptions {
                server_path: server_path
                    .unwrap_or_else(|| commands::demo::server_path_for(&path)),
                interval: Duration::from_secs(interval.max(1)),
                server_edits,
                policy: policy.into(),
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::demo::run(&path, options))?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Version => {
            println!("rowsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Protocol v{}", rowsync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
