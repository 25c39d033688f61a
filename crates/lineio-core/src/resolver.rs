//! Pin enumeration and lookup
//!
//! A pin is a flat index over every line of every controller: controllers are
//! taken in lexicographic order of their device node name (`gpiochip10` sorts
//! before `gpiochip2`), and lines within a controller in kernel offset order.
//! Nothing is cached; every call lists and opens the controllers again, so
//! the mapping always reflects the live system.

use crate::error::{Error, Result};
use crate::line::Direction;
use crate::provider::{Access, ChipDevice, GpioProvider, CHIP_PREFIX};
use crate::uapi::{read_label, LineFlags};

/// One controller, as seen during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipSummary {
    /// Device node name, e.g. `gpiochip0`
    pub node: String,
    /// Kernel name of the chip
    pub name: String,
    /// Functional label
    pub label: Option<String>,
    /// Number of lines
    pub lines: u32,
    /// Pin number of the chip's first line
    pub first_pin: u32,
}

/// One line, as reported by line info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSummary {
    /// Flat pin number
    pub pin: u32,
    /// Device node name of the owning controller
    pub chip: String,
    /// Offset within the controller
    pub offset: u32,
    /// Line name
    pub name: Option<String>,
    /// Current consumer label
    pub consumer: Option<String>,
    /// Kernel flags
    pub flags: LineFlags,
}

impl LineSummary {
    /// Configured direction; lines not flagged as outputs are inputs
    pub fn direction(&self) -> Direction {
        if self.flags.contains(LineFlags::IS_OUT) {
            Direction::Output
        } else {
            Direction::Input
        }
    }

    /// Whether something currently holds the line
    pub fn is_used(&self) -> bool {
        self.flags.contains(LineFlags::KERNEL)
    }
}

/// Resolves pins and names against a provider
#[derive(Debug)]
pub struct Resolver<'a, P: GpioProvider + ?Sized> {
    provider: &'a P,
}

impl<'a, P: GpioProvider + ?Sized> Resolver<'a, P> {
    /// Create a resolver over `provider`
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Controller node names in pin order
    pub fn chip_nodes(&self) -> Result<Vec<String>> {
        Ok(sort_chip_nodes(self.provider.chip_names()?))
    }

    /// Describe every controller, with the pin of its first line
    pub fn chips(&self) -> Result<Vec<ChipSummary>> {
        let mut chips = Vec::new();
        let mut base = 0u32;
        for node in self.chip_nodes()? {
            let chip = self.provider.open_chip(&node, Access::ReadOnly)?;
            let info = chip.chip_info()?;
            chips.push(ChipSummary {
                node,
                name: read_label(&info.name).unwrap_or_default(),
                label: read_label(&info.label),
                lines: info.lines,
                first_pin: base,
            });
            base += info.lines;
        }
        Ok(chips)
    }

    /// Every pin on the system, `0..N`
    pub fn enumerate_lines(&self) -> Result<Vec<u32>> {
        let mut pins = Vec::new();
        let mut pin = 0u32;
        for node in self.chip_nodes()? {
            let chip = self.provider.open_chip(&node, Access::ReadOnly)?;
            let info = chip.chip_info()?;
            for _ in 0..info.lines {
                pins.push(pin);
                pin += 1;
            }
        }
        log::trace!("resolver: enumerated {} pins", pins.len());
        Ok(pins)
    }

    /// Map a pin to its controller node name and line offset
    pub fn resolve_pin(&self, pin: u32) -> Result<(String, u32)> {
        let mut base = 0u32;
        for node in self.chip_nodes()? {
            let chip = self.provider.open_chip(&node, Access::ReadOnly)?;
            let lines = chip.chip_info()?.lines;
            if pin < base + lines {
                log::trace!("resolver: pin {} is {} line {}", pin, node, pin - base);
                return Ok((node, pin - base));
            }
            base += lines;
        }
        Err(Error::NotFound(format!("pin {} (only {} lines)", pin, base)))
    }

    /// Find the pin of the line named `name`
    pub fn resolve_name(&self, name: &str) -> Result<u32> {
        if name.is_empty() {
            return Err(Error::NotFound("empty line name".into()));
        }

        let mut pin = 0u32;
        for node in self.chip_nodes()? {
            let chip = self.provider.open_chip(&node, Access::ReadOnly)?;
            let lines = chip.chip_info()?.lines;
            for offset in 0..lines {
                let info = chip.line_info(offset)?;
                if read_label(&info.name).as_deref() == Some(name) {
                    log::trace!("resolver: '{}' is pin {} ({} line {})", name, pin, node, offset);
                    return Ok(pin);
                }
                pin += 1;
            }
        }
        Err(Error::NotFound(format!("line named '{}'", name)))
    }

    /// Name of the line behind `pin`, if the kernel has one
    pub fn name_of_pin(&self, pin: u32) -> Result<Option<String>> {
        Ok(self.line_info(pin)?.name)
    }

    /// Line info for `pin`
    pub fn line_info(&self, pin: u32) -> Result<LineSummary> {
        let (node, offset) = self.resolve_pin(pin)?;
        let chip = self.provider.open_chip(&node, Access::ReadOnly)?;
        let info = chip.line_info(offset)?;
        Ok(LineSummary {
            pin,
            chip: node,
            offset,
            name: read_label(&info.name),
            consumer: read_label(&info.consumer),
            flags: info.line_flags(),
        })
    }

    /// Line info for every pin, in pin order
    pub fn lines(&self) -> Result<Vec<LineSummary>> {
        let mut lines = Vec::new();
        let mut pin = 0u32;
        for node in self.chip_nodes()? {
            let chip = self.provider.open_chip(&node, Access::ReadOnly)?;
            let count = chip.chip_info()?.lines;
            for offset in 0..count {
                let info = chip.line_info(offset)?;
                lines.push(LineSummary {
                    pin,
                    chip: node.clone(),
                    offset,
                    name: read_label(&info.name),
                    consumer: read_label(&info.consumer),
                    flags: info.line_flags(),
                });
                pin += 1;
            }
        }
        Ok(lines)
    }
}

/// Keep controller nodes only and put them in pin order
pub fn sort_chip_nodes(names: Vec<String>) -> Vec<String> {
    let mut nodes: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(CHIP_PREFIX))
        .collect();
    nodes.sort();
    nodes.dedup();
    nodes
}
