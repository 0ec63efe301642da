//! Command-line front end for trisync.

/// CLI module - argument parsing and command handlers
mod cli;

fn main() {
    let success = cli::run_cli();
    if !success {
        std::process::exit(1);
    }
}
