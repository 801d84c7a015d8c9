//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

use crate::url::{parse_endpoint, Endpoint};

/// Link options shared by sphxfer and sphxfer-peer
#[derive(Clone, Debug, Parser)]
pub struct LinkOpts {
    /// Link address (tcp://host:port to dial, listen://addr:port to wait)
    #[arg(long, value_parser = endpoint_arg)]
    pub endpoint: Endpoint,

    /// Config file (default: <config dir>/sphxfer.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the effective settings (including overrides given here) back to the config file
    #[arg(long = "save-config")]
    pub save_config: bool,
}

/// Output options
#[derive(Clone, Debug, Parser)]
pub struct OutputOpts {
    /// Append timestamped event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append one JSON line per transferred file to this journal
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// No progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn endpoint_arg(s: &str) -> Result<Endpoint, String> {
    parse_endpoint(s).ok_or_else(|| {
        format!(
            "invalid endpoint '{}': expected tcp://host[:port] or listen://addr[:port]",
            s
        )
    })
}
