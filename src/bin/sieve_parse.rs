//! `sieve-parse <path>` — parses a Sieve script and reports syntax errors.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "sieve-parse")]
#[command(about = "Checks a Sieve script's syntax")]
#[command(version)]
struct Args {
    /// Path to the Sieve script to check
    path: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {e}", args.path.display());
            return ExitCode::FAILURE;
        }
    };

    match sieve_client::parse(&source) {
        Ok(_) => {
            println!("Syntax OK");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("line {}: {}", e.line, e.message);
            ExitCode::FAILURE
        }
    }
}
