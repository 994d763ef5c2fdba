//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use ddm_core::mission::ConflictPolicy;
use ddm_core::observer::LogVerbosity;

#[derive(Parser, Debug)]
#[command(name = "ddm", version, about = "Concurrent HTTP(S) download manager")]
pub struct Cli {
    /// URLs to download. Omit entirely to run a `config` subcommand instead.
    pub urls: Vec<String>,

    /// Destination directory (defaults to the configured goal path).
    #[arg(short = 'd', long = "dir")]
    pub dir: Option<PathBuf>,

    /// Destination file name. Only valid with exactly one URL.
    #[arg(long)]
    pub rename: Option<String>,

    /// What to do when the destination path already exists.
    #[arg(long = "on-conflict", value_enum, default_value = "rename")]
    pub on_conflict: ConflictArg,

    /// Never split a download across multiple range requests.
    #[arg(long)]
    pub no_split: bool,

    /// Override the configured worker pool size for this run.
    #[arg(long)]
    pub roads: Option<usize>,

    /// Override the configured retry count for this run.
    #[arg(long)]
    pub retry: Option<u32>,

    /// Override the configured retry interval (seconds) for this run.
    #[arg(long)]
    pub interval: Option<f64>,

    /// Override the configured read timeout (seconds) for this run.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Override the configured block size (e.g. `10M`, `512K`) for this run.
    #[arg(long = "block-size")]
    pub block_size: Option<String>,

    /// Extra request header, `Key: Value`. May be repeated.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// How much the terminal-mission record sink logs.
    #[arg(long, value_enum, default_value = "all")]
    pub verbosity: VerbosityArg,

    /// Suppress the progress renderer.
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current configuration as TOML.
    ConfigShow,
    /// Write the current (or default) configuration to the XDG config file.
    ConfigInit,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ConflictArg {
    Skip,
    Overwrite,
    Rename,
    Add,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Skip => ConflictPolicy::Skip,
            ConflictArg::Overwrite => ConflictPolicy::Overwrite,
            ConflictArg::Rename => ConflictPolicy::Rename,
            ConflictArg::Add => ConflictPolicy::Add,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum VerbosityArg {
    All,
    FailedOnly,
    None,
}

impl From<VerbosityArg> for LogVerbosity {
    fn from(arg: VerbosityArg) -> Self {
        match arg {
            VerbosityArg::All => LogVerbosity::All,
            VerbosityArg::FailedOnly => LogVerbosity::FailedOnly,
            VerbosityArg::None => LogVerbosity::None,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Key: Value`, got {:?}", raw))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_splits_on_first_colon() {
        assert_eq!(
            parse_header("X-Custom: a:b").unwrap(),
            ("X-Custom".to_string(), "a:b".to_string())
        );
    }

    #[test]
    fn parse_header_rejects_missing_colon() {
        assert!(parse_header("nope").is_err());
    }
}
