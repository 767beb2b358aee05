use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "precache",
    about = "Precache - offline asset cache and cache-first proxy for web application shells",
    version,
    author
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true, env = "PRECACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding cache generations
    #[arg(long, global = true, env = "PRECACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Request timeout in seconds (0 disables)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Connection timeout in seconds (0 disables)
    #[arg(long, global = true)]
    pub connect_timeout: Option<u64>,

    /// Extra request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", global = true)]
    pub headers: Vec<String>,

    /// Ignore system proxy settings
    #[arg(long, global = true)]
    pub no_proxy: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pre-cache the manifest of the configured version and activate it
    Install,

    /// Resolve URLs through the active version, cache first
    Fetch {
        /// Absolute URLs, or paths resolved against the configured origin
        #[arg(required = true)]
        targets: Vec<String>,

        /// Treat the requests as document navigations
        #[arg(long)]
        document: bool,
    },

    /// List stored cache generations
    Generations,

    /// Delete a cache generation
    Purge {
        /// Generation (version) identifier
        generation: String,
    },

    /// Run an HTTP proxy that resolves every request through the active version
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
}
