//! Command-line interface for the contract runtime.

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "chainscript", version, about = "Sandboxed JavaScript smart-contract runtime")]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    pub fn to_log_level(self) -> LevelFilter {
        match self {
            Verbosity::Normal => LevelFilter::WARN,
            Verbosity::Verbose => LevelFilter::INFO,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check contract source without running it
    Check(CheckArgs),
    /// Execute a contract's `main` against an in-memory ledger
    Run(RunArgs),
    /// Query a contract's `query` entry (readonly)
    Query(RunArgs),
}

#[derive(Args)]
pub struct CheckArgs {
    /// Contract source file
    pub file: PathBuf,

    /// Also require a callable `main` at the top level
    #[arg(long)]
    pub require_entry: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Contract source file
    pub file: PathBuf,

    /// Input string handed to the entry function
    #[arg(long, default_value = "")]
    pub input: String,

    /// Sender address visible to the contract
    #[arg(long, default_value = "addr-sender")]
    pub sender: String,

    /// The contract's own address
    #[arg(long = "address", default_value = "addr-contract")]
    pub this_address: String,

    /// Trigger transaction, JSON
    #[arg(long, default_value = "{}")]
    pub trigger: String,

    /// Consensus value / header, JSON
    #[arg(long, default_value = "{}")]
    pub consensus_value: String,

    /// Directory of `include`-able JS libraries (default: <exe-dir>/jslib)
    #[arg(long)]
    pub jslib: Option<PathBuf>,

    /// Cancel the contract after this many seconds
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,
}
