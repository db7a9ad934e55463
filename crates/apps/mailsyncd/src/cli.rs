//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keeps local Gmail mailboxes in sync
#[derive(Debug, Parser)]
#[command(name = "mailsyncd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store an OAuth token obtained out of band
    ImportToken {
        /// Account the token belongs to
        account: String,
        /// Token JSON file
        token: PathBuf,
    },
    /// Fetch the label catalog and register the account
    Link { account: String },
    /// Sync one account now and print the run statistics
    Sync { account: String },
    /// Resume interrupted runs, then sync due accounts on every tick
    Daemon,
}
