//! CLI argument parsing using clap.
//!
//! This module defines the command-line interface for shipsync,
//! including all subcommands and their arguments.

mod config;

pub use config::{SyncArgs, SyncArgsError};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// shipsync - Courier tracking synchronization
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Identify the carrier of a tracking number
    Recognize {
        /// Tracking number as printed on the waybill
        tracking_number: String,
    },

    /// Sync every non-archived order in the orders file once
    SyncAll {
        /// JSON file holding the orders
        #[arg(long)]
        orders: PathBuf,
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Sync a single order by id
    SyncOne {
        /// JSON file holding the orders
        #[arg(long)]
        orders: PathBuf,
        /// Order id to sync
        #[arg(long)]
        id: String,
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Sync now, then every night at local midnight until Ctrl-C
    Daemon {
        /// JSON file holding the orders
        #[arg(long)]
        orders: PathBuf,
        /// Serve /health and /metrics on this port
        #[arg(long)]
        health_port: Option<u16>,
        #[command(flatten)]
        sync: SyncArgs,
    },
}
