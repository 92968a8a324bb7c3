use std::path::PathBuf;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stream the device to stdout
    Read,
    /// Stream stdin into the device
    Write,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Transfer direction
    #[arg(short, long, value_enum)]
    pub mode: Mode,

    /// Block device or regular file to transfer
    #[arg(short, long)]
    pub device: PathBuf,

    /// Chunk size in bytes (overrides config when set)
    #[arg(long, value_parser = positive_usize())]
    pub block_size: Option<usize>,

    /// Number of parallel I/O workers (overrides config when set)
    #[arg(long, value_parser = positive_usize())]
    pub workers: Option<usize>,

    /// Progress report interval, in milliseconds
    #[arg(long)]
    pub progress_interval_ms: Option<u64>,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Skip the final fsync after a write-mode transfer
    #[arg(long)]
    pub no_sync: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn positive_usize() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::<usize>::new().range(1..)
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
