//! CLI argument parsing

use clap::{Parser, Subcommand};
use lineio_core::{Drive, Edge, PinId};
use std::path::PathBuf;

/// Parse a line level: 0/1, low/high, false/true, off/on
pub fn parse_level(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "0" | "low" | "false" | "off" => Ok(false),
        "1" | "high" | "true" | "on" => Ok(true),
        _ => Err(format!("Invalid level: {} (use 0/1, low/high)", s)),
    }
}

fn parse_pin_id(s: &str) -> Result<PinId, String> {
    s.parse().map_err(|e: lineio_core::Error| e.to_string())
}

fn parse_edge(s: &str) -> Result<Edge, String> {
    s.parse().map_err(|e: lineio_core::Error| e.to_string())
}

fn parse_drive(s: &str) -> Result<Drive, String> {
    s.parse().map_err(|e: lineio_core::Error| e.to_string())
}

#[derive(Parser)]
#[command(name = "lineio")]
#[command(author, version, about = "GPIO line access over the character device", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Backend providing the GPIO controllers (see `lineio backends`)
    #[arg(short, long, default_value = "linux", global = true)]
    pub backend: String,

    /// Directory containing the gpiochipN nodes (linux backend)
    #[arg(long, default_value = "/dev", global = true)]
    pub dev_root: PathBuf,

    /// Line counts of the emulated controllers (dummy backend)
    #[arg(long, default_value = "32,16", global = true)]
    pub dummy_chips: String,

    /// Consumer label shown while a line is held
    #[arg(long, default_value = lineio_core::DEFAULT_CONSUMER, global = true)]
    pub consumer: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List compiled-in backends
    Backends,

    /// List GPIO controllers
    Chips,

    /// List every line with its pin number
    List {
        /// Only show lines of this controller (e.g. gpiochip0)
        #[arg(long)]
        chip: Option<String>,
    },

    /// Print the pin number of a named line
    Find {
        /// Line name
        name: String,
    },

    /// Print the name of a pin
    Name {
        /// Pin number
        pin: u32,
    },

    /// Read a line
    Get {
        /// Pin number or line name
        #[arg(value_parser = parse_pin_id)]
        line: PinId,

        /// Invert the logical value
        #[arg(long)]
        active_low: bool,
    },

    /// Drive a line
    Set {
        /// Pin number or line name
        #[arg(value_parser = parse_pin_id)]
        line: PinId,

        /// Level to drive (0/1, low/high)
        #[arg(value_parser = parse_level, action = clap::ArgAction::Set, required = true)]
        value: bool,

        /// Invert the logical value
        #[arg(long)]
        active_low: bool,

        /// Output drive mode (push-pull, open-drain, open-source)
        #[arg(long, value_parser = parse_drive, default_value = "push-pull")]
        drive: Drive,
    },

    /// Wait for one edge
    Poll {
        /// Pin number or line name
        #[arg(value_parser = parse_pin_id)]
        line: PinId,

        /// Edge to wait for (rising, falling, both)
        #[arg(long, value_parser = parse_edge, default_value = "both")]
        edge: Edge,

        /// Timeout in seconds; negative or absent waits forever
        #[arg(long, allow_negative_numbers = true)]
        timeout: Option<f64>,

        /// Invert the logical value
        #[arg(long)]
        active_low: bool,
    },

    /// Print edges as they happen
    Watch {
        /// Pin number or line name
        #[arg(value_parser = parse_pin_id)]
        line: PinId,

        /// Edge to watch for (rising, falling, both)
        #[arg(long, value_parser = parse_edge, default_value = "both")]
        edge: Edge,

        /// Stop after this many edges
        #[arg(long)]
        count: Option<usize>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Invert the logical value
        #[arg(long)]
        active_low: bool,
    },
}
