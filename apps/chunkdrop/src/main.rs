//! chunkdrop entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chunkdrop_client::{DEFAULT_PARALLELISM, UploadOptions};
use chunkdrop_transfer::ChunkPolicy;

/// Resumable, deduplicated file uploads.
#[derive(Parser)]
#[command(name = "chunkdrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload server
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Storage directory (overrides config)
        #[arg(short, long)]
        storage_root: Option<PathBuf>,
    },

    /// Upload files to a server
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Server URL
        #[arg(short, long, default_value = "ws://127.0.0.1:9999")]
        server: String,

        /// Fixed chunk size in bytes (default: 1 MiB, grown for very large files)
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Chunks in flight at once
        #[arg(short = 'j', long, default_value_t = DEFAULT_PARALLELISM)]
        parallelism: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = config::Config::load(cli.config.as_deref())?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting chunkdrop");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Serve {
            bind,
            port,
            storage_root,
        } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(root) = storage_root {
                config.storage_root = root;
            }
            rt.block_on(app::serve(config))?;
        }
        Commands::Upload {
            files,
            server,
            chunk_size,
            parallelism,
        } => {
            let options = UploadOptions {
                chunk_policy: chunk_size.map(ChunkPolicy::fixed).unwrap_or_default(),
                parallelism,
            };
            rt.block_on(app::upload(&server, &files, options))?;
        }
    }

    Ok(())
}
