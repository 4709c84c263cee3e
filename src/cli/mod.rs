//! CLI module - Command-line interface for Pikarr
//!
//! Each command opens a folder session, loads its episode list and runs one
//! management action against it.

mod commands;

use clap::{Parser, Subcommand};

/// Pikarr - cloud drive episode manager
/// Rename, delete and refresh the play links of a library folder's files
#[derive(Parser)]
#[command(name = "pikarr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Print action results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the files of a library folder
    #[command(alias = "ls")]
    Episodes {
        /// Cloud drive folder ID
        folder: String,
        /// Bypass the listing cooldown
        #[arg(long)]
        force: bool,
    },

    /// Rename a file, keeping its extension
    #[command(alias = "mv")]
    Rename {
        /// Cloud drive folder ID
        folder: String,
        /// File ID
        id: String,
        /// New base name (the original extension is appended)
        new_name: String,
    },

    /// Delete files from a folder
    #[command(alias = "rm")]
    Delete {
        /// Cloud drive folder ID
        folder: String,
        /// File IDs to delete
        #[arg(required = true)]
        ids: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Refresh play links in throttle-safe chunks
    #[command(alias = "refresh")]
    RefreshLinks {
        /// Cloud drive folder ID
        folder: String,
        /// File IDs to refresh (default: every video in the folder)
        ids: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Create default config file
    Init,
}

pub use commands::*;
