//! # tickscope - Main Entry Point
//!
//! Three subcommands:
//! - **analyze** (`tickscope analyze app.jfr`): replay a recording through the native engine
//! - **sample** (`tickscope sample --pid <PID>`): poll a live process's threads via /proc
//! - **info** (`tickscope info app.jfr`): chunk and event counts of a recording

use anyhow::Result;
use clap::Parser;

use tickscope::cli::{commands, Args, Command};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version land here too
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let quiet = args.quiet;
    match args.command {
        Command::Analyze {
            recording,
            mode,
            clock,
            session,
        } => commands::analyze(&recording, mode, clock, &session, quiet),
        Command::Sample {
            pid,
            duration,
            session,
        } => commands::sample(pid, duration, &session, quiet).await,
        Command::Info { recording } => commands::info(&recording),
    }
}
