//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from the update flow.

use clap::Parser;
use std::path::PathBuf;
use ublue_common::UpdateIntent;

/// Universal Blue Update Utility
#[derive(Parser, Debug)]
#[command(name = "ublue-update")]
#[command(about = "Universal Blue Update Utility", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Force system update without update checks
    #[arg(short, long)]
    pub force: bool,

    /// Run update checks and exit
    #[arg(short, long)]
    pub check: bool,

    /// Check for updates and exit
    #[arg(short = 'u', long = "updatecheck")]
    pub updatecheck: bool,

    /// Wait for transactions to complete and exit
    #[arg(short, long)]
    pub wait: bool,

    /// Only run system updates (requires root)
    #[arg(long)]
    pub system: bool,

    /// Use this config file instead of the system search paths
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn intent(&self) -> UpdateIntent {
        UpdateIntent {
            force: self.force,
            check: self.check,
            update_check: self.updatecheck,
            wait: self.wait,
            system: self.system,
        }
    }
}
