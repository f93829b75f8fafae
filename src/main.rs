//! # Polyplay
//!
//! Plays several audio files at once: the first is the primary source, the
//! rest are mixed over it at their own gains.

use log::error;

mod cli;
mod logging;
mod runner;

fn main() {
    let args = cli::args::build_cli().get_matches();

    // For any error, return an exit code -1. Otherwise return the exit code provided.
    let code = match runner::run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            -1
        }
    };

    std::process::exit(code)
}
