//! procfleet - dependency-aware local process fleet manager

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = procfleet::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
