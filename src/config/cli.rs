//! CLI argument parsing using clap

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{warn, Level};

/// Output sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One point per line, comma separated
    Csv,
    /// JSON array of arrays
    Json,
}

/// distfunc - evaluate a sample of points over weighted compute hosts
#[derive(Parser, Debug)]
#[command(name = "distfunc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML run file (CLI flags override its values)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Program run once per point, receiving the point values as arguments
    #[arg(short = 'w', long)]
    pub wrapper: Option<PathBuf>,

    /// Input dimension of the function
    #[arg(long)]
    pub n_input: Option<usize>,

    /// Output dimension of the function
    #[arg(long)]
    pub n_output: Option<usize>,

    /// Sample file (one point per line, or .json array of arrays)
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,

    /// Where to write the output sample (stdout when omitted)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Output sample format
    #[arg(long, value_enum, default_value = "csv")]
    pub format: OutputFormat,

    // === Hosts ===
    /// Comma-separated hosts, optionally weighted (e.g., "node-1,node-3:2")
    #[arg(long)]
    pub hosts: Option<String>,

    /// Scheduler holding the host reservation (supersedes --hosts)
    #[arg(long)]
    pub scheduler: Option<String>,

    /// Cores per host (0 = auto-detect)
    #[arg(long)]
    pub cores: Option<usize>,

    // === Workdirs ===
    /// Share one workdir between all points (cheap analytical functions)
    #[arg(long)]
    pub analytical: bool,

    /// Cleanup policy: none, keep-failed or all
    #[arg(long)]
    pub cleanup: Option<String>,

    /// Local temporary directory for workdirs
    #[arg(long)]
    pub tmpdir: Option<PathBuf>,

    /// Temporary directory on remote hosts (defaults to --tmpdir)
    #[arg(long)]
    pub remote_tmpdir: Option<PathBuf>,

    /// File staged into every workdir (repeatable)
    #[arg(long = "file", value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// JSON payload forwarded to every evaluation
    #[arg(long)]
    pub user_data: Option<String>,

    // === Misc ===
    /// Validate and print the configuration without evaluating
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations clap cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.config.is_none() && self.wrapper.is_none() {
            anyhow::bail!("either --config or --wrapper must be given");
        }
        if !self.dry_run && self.input.is_none() {
            anyhow::bail!("--input is required unless --dry-run is set");
        }
        if self.hosts.is_some() && self.scheduler.is_some() {
            warn!("--scheduler supersedes --hosts");
        }
        Ok(())
    }

    /// Default log level when RUST_LOG is not set
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}
