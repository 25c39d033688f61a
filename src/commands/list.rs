//! Inventory commands implementation

use crate::backends;
use lineio_core::{GpioProvider, Resolver};

/// List compiled-in backends
pub fn list_backends() {
    println!("Available backends:");
    println!();
    for b in backends::available_backends() {
        let aliases = if b.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", b.aliases.join(", "))
        };
        println!("  {:<8} - {}{}", b.name, b.description, aliases);
    }
}

/// List controllers with the pin number of their first line
pub fn list_chips<P: GpioProvider>(provider: &P) -> Result<(), Box<dyn std::error::Error>> {
    let chips = Resolver::new(provider).chips()?;

    println!(
        "{:<12} {:<20} {:<20} {:>6} {:>10}",
        "Node", "Name", "Label", "Lines", "First pin"
    );
    println!("{}", "-".repeat(72));
    for chip in &chips {
        println!(
            "{:<12} {:<20} {:<20} {:>6} {:>10}",
            chip.node,
            chip.name,
            chip.label.as_deref().unwrap_or("-"),
            chip.lines,
            chip.first_pin
        );
    }

    let total: u32 = chips.iter().map(|c| c.lines).sum();
    println!();
    println!("{} controllers, {} lines", chips.len(), total);
    Ok(())
}

/// List every line, optionally restricted to one controller
pub fn list_lines<P: GpioProvider>(
    provider: &P,
    chip_filter: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = Resolver::new(provider);
    if let Some(node) = chip_filter {
        if !resolver.chip_nodes()?.iter().any(|n| n == node) {
            return Err(format!("No such controller: {}", node).into());
        }
    }

    println!(
        "{:>5} {:<12} {:>6} {:<20} {:<16} {:<6} {}",
        "Pin", "Chip", "Offset", "Name", "Consumer", "Dir", "Flags"
    );
    println!("{}", "-".repeat(80));

    for line in resolver.lines()? {
        if chip_filter.is_some_and(|node| node != line.chip) {
            continue;
        }

        let mut flags = Vec::new();
        if line.is_used() {
            flags.push("used");
        }
        if line.flags.contains(lineio_core::uapi::LineFlags::ACTIVE_LOW) {
            flags.push("active-low");
        }
        if line.flags.contains(lineio_core::uapi::LineFlags::OPEN_DRAIN) {
            flags.push("open-drain");
        }
        if line.flags.contains(lineio_core::uapi::LineFlags::OPEN_SOURCE) {
            flags.push("open-source");
        }

        let direction = match line.direction() {
            lineio_core::Direction::Input => "in",
            lineio_core::Direction::Output => "out",
        };

        println!(
            "{:>5} {:<12} {:>6} {:<20} {:<16} {:<6} {}",
            line.pin,
            line.chip,
            line.offset,
            line.name.as_deref().unwrap_or("-"),
            line.consumer.as_deref().unwrap_or("-"),
            direction,
            flags.join(",")
        );
    }
    Ok(())
}

/// Print the pin number of a named line
pub fn find_line<P: GpioProvider>(
    provider: &P,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = Resolver::new(provider);
    let pin = resolver.resolve_name(name)?;
    let (node, offset) = resolver.resolve_pin(pin)?;
    log::debug!("{} is {} line {}", name, node, offset);
    println!("{}", pin);
    Ok(())
}

/// Print the name of a pin
pub fn name_of_pin<P: GpioProvider>(
    provider: &P,
    pin: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    match Resolver::new(provider).name_of_pin(pin)? {
        Some(name) => {
            println!("{}", name);
            Ok(())
        }
        None => Err(format!("Pin {} has no name", pin).into()),
    }
}
