//! caskdb CLI
//!
//! Local administration tool: opens a data directory in-process.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use caskdb::{Engine, IoType, Options};

/// caskdb CLI
#[derive(Parser, Debug)]
#[command(name = "caskdb-cli")]
#[command(about = "Inspect and maintain a caskdb data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./caskdb_data")]
    dir: PathBuf,

    /// Data file size limit in MB before rotation
    #[arg(short = 's', long, default_value = "100")]
    data_file_mb: u64,

    /// Replay data files through a memory map at open
    #[arg(long)]
    mmap: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List every live key
    Keys,

    /// Print engine statistics
    Stat,

    /// Compact the data directory if enough of it is reclaimable
    Merge {
        /// Override the reclaimable ratio threshold
        #[arg(long)]
        ratio: Option<f32>,
    },

    /// Copy the data directory elsewhere
    Backup {
        /// Destination directory
        dest: PathBuf,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        if e.is_not_found() {
            println!("(not found)");
            return;
        }
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> caskdb::Result<()> {
    let mut builder = Options::builder()
        .dir_path(&args.dir)
        .data_file_size(args.data_file_mb * 1024 * 1024);
    if args.mmap {
        builder = builder.io_type(IoType::MemoryMap);
    }
    if let Commands::Merge { ratio: Some(ratio) } = &args.command {
        builder = builder.reclaimable_ratio(*ratio);
    }

    let engine = Engine::open(builder.build())?;
    tracing::debug!("Opened data directory {}", args.dir.display());

    match args.command {
        Commands::Get { key } => {
            let value = engine.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            let old = engine.delete(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&old));
        }
        Commands::Keys => {
            for key in engine.list_keys() {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Stat => {
            println!("{}", engine.stat()?);
        }
        Commands::Merge { .. } => {
            let before = engine.stat()?;
            engine.merge()?;
            let after = engine.stat()?;
            println!(
                "reclaimable {} -> {} bytes",
                before.reclaimable_size, after.reclaimable_size
            );
        }
        Commands::Backup { dest } => {
            engine.backup(&dest)?;
            println!("Backed up to {}", dest.display());
        }
    }

    engine.close()
}
