//! CLI command implementations
//!
//! Every command except `backends` runs against a
//! [`GpioProvider`](lineio_core::GpioProvider) chosen by the backend
//! dispatcher, so the same code serves real controllers and the emulator.
//!
//! ## Inventory commands
//!
//! `chips`, `list`, `find` and `name` only query metadata and never claim a
//! line.
//!
//! ## Line commands
//!
//! `get`, `set`, `poll` and `watch` open a single line for the duration of
//! the command.

mod line;
mod list;

pub use list::list_backends;

use crate::cli::{Cli, Commands};
use lineio_core::{GpioProvider, LineConfig, PinId};

/// Run `cli.command` against `provider`
pub fn run<P>(provider: &P, cli: &Cli) -> Result<(), Box<dyn std::error::Error>>
where
    P: GpioProvider,
    P::Chip: 'static,
{
    match &cli.command {
        Commands::Backends => {
            list_backends();
            Ok(())
        }
        Commands::Chips => list::list_chips(provider),
        Commands::List { chip } => list::list_lines(provider, chip.as_deref()),
        Commands::Find { name } => list::find_line(provider, name),
        Commands::Name { pin } => list::name_of_pin(provider, *pin),
        Commands::Get { line, active_low } => {
            let config = input_config(cli, line, *active_low);
            line::cmd_get(provider, config)
        }
        Commands::Set {
            line,
            value,
            active_low,
            drive,
        } => {
            let config = LineConfig::output(line.clone())
                .with_consumer(cli.consumer.as_str())
                .with_active_low(*active_low)
                .with_drive(*drive);
            line::cmd_set(provider, config, *value)
        }
        Commands::Poll {
            line,
            edge,
            timeout,
            active_low,
        } => {
            let config = input_config(cli, line, *active_low);
            line::cmd_poll(provider, config, *edge, *timeout)
        }
        Commands::Watch {
            line,
            edge,
            count,
            duration,
            active_low,
        } => {
            let config = input_config(cli, line, *active_low);
            line::cmd_watch(provider, config, *edge, *count, *duration)
        }
    }
}

fn input_config(cli: &Cli, line: &PinId, active_low: bool) -> LineConfig {
    LineConfig::input(line.clone())
        .with_consumer(cli.consumer.as_str())
        .with_active_low(active_low)
}
