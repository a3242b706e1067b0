//! CLI argument definitions using clap
//!
//! Commands:
//! - colldb init --config <path>
//! - colldb create --config <path> --name <name> [--edge] [--definition <json>]
//! - colldb exec --config <path>
//! - colldb checksum --config <path> --collection <name>
//! - colldb inventory --config <path>
//! - colldb rename --config <path> --collection <name> --to <name>
//! - colldb properties --config <path> --collection <name> --set <json>
//! - colldb drop --config <path> --collection <name>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// colldb - per-collection document store
#[derive(Parser, Debug)]
#[command(name = "colldb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a new data directory
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,
    },

    /// Create a collection
    Create {
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,

        /// Collection name
        #[arg(long)]
        name: String,

        /// Create an edge collection
        #[arg(long)]
        edge: bool,

        /// Extra definition attributes as a JSON object
        #[arg(long)]
        definition: Option<String>,
    },

    /// Execute document operations read as JSON lines from stdin
    Exec {
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,
    },

    /// Compute a collection checksum
    Checksum {
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,

        #[arg(long)]
        collection: String,

        /// Include document revisions
        #[arg(long)]
        with_revisions: bool,

        /// Include user attributes
        #[arg(long)]
        with_data: bool,
    },

    /// Print the replication inventory of all collections
    Inventory {
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,

        /// Include system collections
        #[arg(long)]
        include_system: bool,
    },

    /// Rename a collection
    Rename {
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,

        #[arg(long)]
        collection: String,

        /// New name
        #[arg(long)]
        to: String,
    },

    /// Change collection properties
    Properties {
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,

        #[arg(long)]
        collection: String,

        /// Properties as a JSON object
        #[arg(long)]
        set: String,
    },

    /// Drop a collection
    Drop {
        #[arg(long, default_value = "./colldb.json")]
        config: PathBuf,

        #[arg(long)]
        collection: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
