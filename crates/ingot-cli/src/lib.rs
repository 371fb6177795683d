//! ingot - mirror a rubygems registry into a signed pacman repository
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! # Overview
//!
//! Each run loads a snapshot of the registry index, reads the repository
//! database, works out which packages are outdated or need a rebuild, and
//! builds them dependency-first in a clean chroot. Every finished package is
//! signed and added to the database before the next build starts.
//!
//! # Directory Layout
//!
//! ```text
//! ingot.toml
//! snapshot/         # stable.json, prerelease.json
//! config.pkg/       # per-package overrides and patches
//! index/            # artifacts, signatures, <repo>.db.tar.xz, lastupdate
//! work/             # scratch space, wiped every run
//! ```

pub mod cmd;
pub mod session;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "ingot")]
#[command(author, version, about = "ingot - mirror rubygems into a pacman repository")]
pub struct Cli {
    /// Config file (defaults to $INGOT_CONFIG, then ./ingot.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// What to do
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build everything outdated and publish the repository
    Update {
        /// Print the build plan and stop
        #[arg(long)]
        dry_run: bool,
    },
    /// Print candidates and the build order
    Plan,
    /// List unneeded entries and orphaned files
    Cleanup {
        /// Remove them instead of only listing them
        #[arg(long)]
        apply: bool,
    },
    /// Resolve a constraint to a version and slot
    Slot {
        /// Package name
        name: String,
        /// Version constraint, e.g. "~> 1.2" or ">= 1.1, < 2.0"
        #[arg(default_value = "")]
        constraint: String,
    },
}
