//! colldb CLI entry point
//!
//! Parses arguments, dispatches to the command and exits non-zero with the
//! error on stderr on failure. All logic lives in the cli module.

use colldb::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
