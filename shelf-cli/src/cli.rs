use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "shelf",
    about = "Shelf - fetch, watch and download marketplace records from the terminal",
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

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the REST API
    #[arg(long, global = true, env = "SHELF_API_BASE")]
    pub api_base: Option<String>,

    /// Bearer token forwarded to the API
    #[arg(long, global = true, env = "SHELF_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Outbound HTTP proxy (supports http, https, socks5)
    #[arg(long, global = true)]
    pub proxy: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch and print one record
    Fetch {
        /// Record id
        id: String,

        /// Include reviews in the response
        #[arg(long)]
        reviews: bool,

        /// Bypass the cache
        #[arg(long)]
        skip_cache: bool,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep a record fresh and print every merged update
    Watch {
        /// Record id
        id: String,

        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Exit after this many updates
        #[arg(long)]
        ticks: Option<usize>,
    },

    /// Download the file attached to a record
    Download {
        /// Record id
        id: String,

        /// Directory the file is saved into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Behave like a mobile device
        #[arg(long)]
        mobile: bool,

        /// Answer to the mobile prompt
        #[arg(long, value_enum, default_value = "download")]
        choice: ChoiceArg,

        /// Skip the same-origin proxy strategy
        #[arg(long)]
        no_proxy_download: bool,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration to a file
    Init {
        /// Destination, defaults to ./shelf.toml
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChoiceArg {
    /// Open the file URL instead of saving it
    Open,
    Download,
    /// Dismiss the prompt
    Cancel,
}
