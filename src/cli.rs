//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use sharefetch::DEFAULT_CONCURRENCY;

/// Fetch a saved selection from a shared cloud-storage listing.
///
/// Sharefetch reads a manifest describing the selected files, resolves a
/// direct download link for each one through the share API, and drives the
/// transfers through an external download engine over JSON-RPC.
#[derive(Parser, Debug)]
#[command(name = "sharefetch")]
#[command(author, version, about)]
pub struct Args {
    /// Manifest file describing the share and the selected files
    pub manifest: PathBuf,

    /// Share API base URL used to resolve download links
    #[arg(long)]
    pub api_base: String,

    /// Download engine JSON-RPC endpoint
    #[arg(long, default_value = "http://localhost:6800/jsonrpc")]
    pub rpc_url: String,

    /// Engine binary to start when the RPC endpoint is unreachable
    #[arg(long)]
    pub engine: Option<PathBuf>,

    /// Directory downloads are written to
    #[arg(short = 'd', long, default_value = "downloads")]
    pub dir: PathBuf,

    /// Maximum number of in-flight downloads (minimum 1)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..))]
    pub concurrency: u8,

    /// Engine status poll interval in milliseconds (100-60000)
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(100..=60000))]
    pub poll_interval: u64,

    /// Overall download bandwidth limit in KB/s (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_overall_limit: u64,

    /// Per-download bandwidth limit in KB/s (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_download_limit: u64,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
