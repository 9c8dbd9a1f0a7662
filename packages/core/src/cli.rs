use clap::Parser;

/// MasterBus metrics service CLI arguments
///
/// Every flag overrides the matching environment variable.
#[derive(Debug, Parser)]
#[command(
    name = "masterbus-metrics",
    version,
    about = "Facility maintenance compliance metrics with caching"
)]
pub struct Cli {
    /// Address to bind the HTTP listener to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind the HTTP listener to
    #[arg(long)]
    pub port: Option<u16>,

    /// Cached metric lifetime in seconds
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    /// Maximum cached metrics before least-recently-used eviction
    #[arg(long)]
    pub cache_capacity: Option<usize>,

    /// Default aggregation window in days
    #[arg(long)]
    pub default_window_days: Option<u64>,

    /// SQLite database URL for persistence
    #[arg(long)]
    pub database_url: Option<String>,
}
