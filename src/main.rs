//! lineio - GPIO line access from the command line
//!
//! Lines are addressed by a flat pin number (every line of every controller,
//! controllers in device node order) or by the name the kernel reports for
//! them.
//!
//! # Architecture
//!
//! The library crates do the work:
//! - **lineio-core** - resolution, line handles, edge notifier
//! - **lineio-linux** - `/dev/gpiochipN` backend
//! - **lineio-dummy** - in-memory emulator backend
//!
//! This binary only parses arguments, picks a backend and prints results.

mod backends;
mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // -v and -vv raise the default filter; RUST_LOG still wins
    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Backends => {
            commands::list_backends();
            Ok(())
        }
        _ => backends::dispatch(&cli),
    }
}
