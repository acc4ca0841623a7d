//! Caskade Admin Binary
//!
//! One-shot maintenance commands against a data directory.

use std::path::PathBuf;

use caskade::{Config, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// Caskade maintenance tool
#[derive(Parser, Debug)]
#[command(name = "caskade-admin")]
#[command(about = "Maintenance commands for a Caskade data directory")]
#[command(version)]
struct Args {
    /// Data directory
    data_dir: PathBuf,

    /// Number of recovery worker threads
    #[arg(short = 'w', long)]
    recovery_workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print segment and key counts (read-only)
    Stats,

    /// List live keys, one per line (read-only)
    Keys,

    /// Write a fresh KeyDir checkpoint
    Checkpoint,

    /// Compact all sealed segments
    Merge,
}

impl Commands {
    fn needs_write(&self) -> bool {
        matches!(self, Commands::Checkpoint | Commands::Merge)
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskade=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("Caskade Admin v{}", caskade::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());

    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .writable(args.command.needs_write());
    if let Some(workers) = args.recovery_workers {
        builder = builder.recovery_workers(workers);
    }

    let engine = match Engine::open(builder.build()) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&engine, &args.command) {
        tracing::error!("{:?} failed: {}", args.command, e);
        std::process::exit(1);
    }

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
        std::process::exit(1);
    }
}

fn run(engine: &Engine, command: &Commands) -> caskade::Result<()> {
    match command {
        Commands::Stats => {
            let stats = engine.stats()?;
            println!("segments:   {:?}", stats.segment_ids);
            println!("live keys:  {}", stats.live_keys);
            println!("tombstones: {}", stats.tombstones);
        }
        Commands::Keys => {
            for key in engine.list_keys() {
                println!("{}", key);
            }
        }
        Commands::Checkpoint => {
            engine.checkpoint()?;
            println!("checkpoint written");
        }
        Commands::Merge => match engine.merge()? {
            Some(stats) => println!(
                "merged {} segments into segment {}: {} records kept, {} dropped, {} -> {} bytes",
                stats.retired.len(),
                stats.merged_segment,
                stats.records_copied,
                stats.records_dropped,
                stats.bytes_before,
                stats.bytes_after
            ),
            None => println!("nothing to merge"),
        },
    }
    Ok(())
}
