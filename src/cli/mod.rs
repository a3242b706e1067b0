//! Command-line interface
//!
//! - init: create the data directory layout
//! - create, rename, properties, drop: collection administration
//! - exec: document operations as JSON lines on stdin
//! - checksum, inventory: replication support

mod args;
mod catalog;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use catalog::Catalog;
pub use commands::{exec, init, inventory, rename, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
