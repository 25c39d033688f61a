//! GPIO line handle
//!
//! A [`Line`] owns its controller device for its whole lifetime, but the
//! kernel handle used for each `get`, `set` or `poll` only lives for the
//! duration of that call: it is requested right before use and dropped right
//! after, on every path out of the call. Polling many lines in sequence
//! therefore never accumulates descriptors.
//!
//! The controller device sits behind a read/write lock. Operations take a
//! read lock just long enough to issue the handle or event request, and
//! [`Line::close`] takes the write lock, so a line shared through an `Arc`
//! may be closed while another thread is blocked in [`Line::poll`]; that
//! poll finishes on its own event descriptor and the next call fails with
//! [`Error::UseAfterClose`].

use crate::error::{Error, Result};
use crate::provider::{Access, ChipDevice, GpioProvider, LineRequest};
use crate::resolver::{LineSummary, Resolver};
use crate::uapi::{
    read_label, EventFlags, EventRequest, HandleData, HandleFlags, HandleRequest,
    GPIOEVENT_EVENT_FALLING_EDGE, GPIOEVENT_EVENT_RISING_EDGE,
};
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Consumer label used when none is configured
pub const DEFAULT_CONSUMER: &str = "lineio";

/// Attempts at opening a controller while its node is still permission-denied
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 20;

/// Delay between those attempts
pub const DEFAULT_OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Line direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Read the line
    Input,
    /// Drive the line
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Output drive mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Drive {
    /// Actively drive both levels
    #[default]
    PushPull,
    /// Drive low only
    OpenDrain,
    /// Drive high only
    OpenSource,
}

impl FromStr for Drive {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "push-pull" | "push_pull" | "pushpull" => Ok(Self::PushPull),
            "open-drain" | "open_drain" | "opendrain" => Ok(Self::OpenDrain),
            "open-source" | "open_source" | "opensource" => Ok(Self::OpenSource),
            _ => Err(Error::InvalidParameter(format!("invalid drive mode '{}'", s))),
        }
    }
}

/// Edge selection and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Low to high
    Rising,
    /// High to low
    Falling,
    /// Either transition (selection only)
    Both,
}

impl Edge {
    /// Event request flags selecting this edge
    pub fn event_flags(self) -> EventFlags {
        match self {
            Self::Rising => EventFlags::RISING_EDGE,
            Self::Falling => EventFlags::FALLING_EDGE,
            Self::Both => EventFlags::BOTH_EDGES,
        }
    }

    /// Classify a kernel event id
    pub fn from_event_id(id: u32) -> Option<Self> {
        match id {
            GPIOEVENT_EVENT_RISING_EDGE => Some(Self::Rising),
            GPIOEVENT_EVENT_FALLING_EDGE => Some(Self::Falling),
            _ => None,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rising => f.write_str("rising"),
            Self::Falling => f.write_str("falling"),
            Self::Both => f.write_str("both"),
        }
    }
}

impl FromStr for Edge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rising" => Ok(Self::Rising),
            "falling" => Ok(Self::Falling),
            "both" => Ok(Self::Both),
            _ => Err(Error::InvalidParameter(format!("invalid edge '{}'", s))),
        }
    }
}

/// One detected edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// [`Edge::Rising`] or [`Edge::Falling`]
    pub edge: Edge,
    /// Kernel timestamp in nanoseconds
    pub timestamp_ns: u64,
}

/// How a line is identified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinId {
    /// Flat pin number
    Index(u32),
    /// Line name as reported by the kernel
    Name(String),
}

impl From<u32> for PinId {
    fn from(pin: u32) -> Self {
        Self::Index(pin)
    }
}

impl From<&str> for PinId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PinId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl FromStr for PinId {
    type Err = Error;

    /// Numbers are pins, anything else is a line name
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidParameter("empty line identifier".into()));
        }
        Ok(s.parse::<u32>()
            .map(Self::Index)
            .unwrap_or_else(|_| Self::Name(s.to_string())))
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(pin) => write!(f, "pin {}", pin),
            Self::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Configuration for opening a [`Line`]
#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Line to open
    pub pin: PinId,
    /// Direction of every operation on the line
    pub direction: Direction,
    /// Value driven right after opening an output
    pub initial: Option<bool>,
    /// Accepted for parity with the other peripherals; the kernel arbitrates
    /// concurrent claims
    pub force_own: bool,
    /// Consumer label shown in line info while a handle is held
    pub consumer: String,
    /// Invert the logical value
    pub active_low: bool,
    /// Output drive mode
    pub drive: Drive,
    /// Open attempts while the device node is permission-denied
    pub open_attempts: u32,
    /// Delay between open attempts
    pub open_retry_delay: Duration,
}

impl LineConfig {
    /// Configuration with defaults for everything but the line and direction
    pub fn new(pin: impl Into<PinId>, direction: Direction) -> Self {
        Self {
            pin: pin.into(),
            direction,
            initial: None,
            force_own: false,
            consumer: DEFAULT_CONSUMER.to_string(),
            active_low: false,
            drive: Drive::PushPull,
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            open_retry_delay: DEFAULT_OPEN_RETRY_DELAY,
        }
    }

    /// Input line
    pub fn input(pin: impl Into<PinId>) -> Self {
        Self::new(pin, Direction::Input)
    }

    /// Output line
    pub fn output(pin: impl Into<PinId>) -> Self {
        Self::new(pin, Direction::Output)
    }

    /// Drive `value` as soon as the output is opened
    pub fn with_initial(mut self, value: bool) -> Self {
        self.initial = Some(value);
        self
    }

    /// Set the `force_own` flag
    pub fn with_force_own(mut self, force_own: bool) -> Self {
        self.force_own = force_own;
        self
    }

    /// Set the consumer label
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Invert the logical value
    pub fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    /// Set the output drive mode
    pub fn with_drive(mut self, drive: Drive) -> Self {
        self.drive = drive;
        self
    }

    /// Set the permission-denied retry policy
    pub fn with_open_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.open_attempts = attempts;
        self.open_retry_delay = delay;
        self
    }

    /// Check option combinations
    pub fn validate(&self) -> Result<()> {
        if self.direction == Direction::Input && self.drive != Drive::PushPull {
            return Err(Error::InvalidParameter(format!(
                "{:?} drive requires an output line",
                self.drive
            )));
        }
        Ok(())
    }

    /// Handle flags for get/set requests
    fn handle_flags(&self) -> HandleFlags {
        let mut flags = match self.direction {
            Direction::Input => HandleFlags::INPUT,
            Direction::Output => HandleFlags::OUTPUT,
        };
        if self.active_low {
            flags |= HandleFlags::ACTIVE_LOW;
        }
        match self.drive {
            Drive::PushPull => {}
            Drive::OpenDrain => flags |= HandleFlags::OPEN_DRAIN,
            Drive::OpenSource => flags |= HandleFlags::OPEN_SOURCE,
        }
        flags
    }
}

/// A GPIO line opened for input or output
pub struct Line<C: ChipDevice> {
    chip: RwLock<Option<C>>,
    chip_name: String,
    offset: u32,
    pin: u32,
    direction: Direction,
    flags: HandleFlags,
    consumer: String,
    force_own: bool,
}

impl<C: ChipDevice> Line<C> {
    /// Resolve the configured line and open its controller
    ///
    /// If the line is an output with an initial value, that value is driven
    /// before returning.
    pub fn open<P>(provider: &P, config: LineConfig) -> Result<Self>
    where
        P: GpioProvider<Chip = C> + ?Sized,
    {
        config.validate()?;

        let resolver = Resolver::new(provider);
        let pin = match &config.pin {
            PinId::Index(pin) => *pin,
            PinId::Name(name) => resolver.resolve_name(name)?,
        };
        let (chip_name, offset) = resolver.resolve_pin(pin)?;

        let chip = open_chip_with_retry(
            provider,
            &chip_name,
            config.open_attempts,
            config.open_retry_delay,
        )?;

        log::debug!(
            "line: opened pin {} ({} line {}) as {}",
            pin,
            chip_name,
            offset,
            config.direction
        );

        let line = Self {
            chip: RwLock::new(Some(chip)),
            chip_name,
            offset,
            pin,
            direction: config.direction,
            flags: config.handle_flags(),
            consumer: config.consumer,
            force_own: config.force_own,
        };

        if line.direction == Direction::Output {
            if let Some(value) = config.initial {
                line.set(value)?;
            }
        }

        Ok(line)
    }

    /// Flat pin number
    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// Device node name of the owning controller
    pub fn chip_name(&self) -> &str {
        &self.chip_name
    }

    /// Offset within the controller
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Configured direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Value of the `force_own` option the line was opened with
    pub fn force_own(&self) -> bool {
        self.force_own
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.chip
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Whether the controller reports edge events; `false` once closed
    pub fn interrupts_available(&self) -> bool {
        self.with_chip(|chip| Ok(chip.interrupts_available()))
            .unwrap_or(false)
    }

    /// Fresh line info from the kernel
    pub fn info(&self) -> Result<LineSummary> {
        let info = self.with_chip(|chip| chip.line_info(self.offset))?;
        Ok(LineSummary {
            pin: self.pin,
            chip: self.chip_name.clone(),
            offset: self.offset,
            name: read_label(&info.name),
            consumer: read_label(&info.consumer),
            flags: info.line_flags(),
        })
    }

    /// Line name as currently reported by the kernel
    pub fn name(&self) -> Result<Option<String>> {
        Ok(self.info()?.name)
    }

    /// Read the line
    pub fn get(&self) -> Result<bool> {
        self.require(Direction::Input, "read")?;

        let handle = self.with_chip(|chip| {
            chip.request_handle(HandleRequest::single(
                self.offset,
                self.flags,
                false,
                &self.consumer,
            ))
        })?;
        let data = handle.get_values()?;
        Ok(data.values[0] != 0)
    }

    /// Drive the line
    pub fn set(&self, value: bool) -> Result<()> {
        self.require(Direction::Output, "drive")?;

        let handle = self.with_chip(|chip| {
            chip.request_handle(HandleRequest::single(
                self.offset,
                self.flags,
                value,
                &self.consumer,
            ))
        })?;
        handle.set_values(HandleData::with_first(value))
    }

    /// Wait for an edge
    ///
    /// `None` blocks until an edge arrives, `Some(Duration::ZERO)` only
    /// checks. Returns `Ok(None)` on timeout.
    pub fn poll(&self, edge: Edge, timeout: Option<Duration>) -> Result<Option<EdgeEvent>> {
        let events = self.with_chip(|chip| {
            if !chip.interrupts_available() {
                return Err(Error::Unsupported(self.chip_name.clone()));
            }
            let mut flags = HandleFlags::INPUT;
            if self.flags.contains(HandleFlags::ACTIVE_LOW) {
                flags |= HandleFlags::ACTIVE_LOW;
            }
            chip.request_events(EventRequest::new(
                self.offset,
                flags,
                edge.event_flags(),
                &self.consumer,
            ))
        })?;

        if !events.wait_readable(timeout)? {
            return Ok(None);
        }

        let data = events.read_event()?;
        match Edge::from_event_id(data.id) {
            Some(edge) => Ok(Some(EdgeEvent {
                edge,
                timestamp_ns: data.timestamp,
            })),
            None => {
                log::warn!(
                    "line: pin {} reported unknown event id {}",
                    self.pin,
                    data.id
                );
                Ok(None)
            }
        }
    }

    /// Release the controller device
    ///
    /// Safe to call any number of times.
    pub fn close(&self) {
        let chip = self
            .chip
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if chip.is_some() {
            log::debug!("line: closed pin {} ({})", self.pin, self.chip_name);
        }
    }

    fn require(&self, direction: Direction, operation: &'static str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::UseAfterClose);
        }
        if self.direction != direction {
            return Err(Error::WrongMode {
                operation,
                direction: self.direction,
            });
        }
        Ok(())
    }

    fn with_chip<T>(&self, f: impl FnOnce(&C) -> Result<T>) -> Result<T> {
        let guard = self.chip.read().unwrap_or_else(PoisonError::into_inner);
        let chip = guard.as_ref().ok_or(Error::UseAfterClose)?;
        f(chip)
    }
}

impl<C: ChipDevice> Drop for Line<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: ChipDevice> fmt::Debug for Line<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Line")
            .field("pin", &self.pin)
            .field("chip", &self.chip_name)
            .field("offset", &self.offset)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: ChipDevice> fmt::Display for Line<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPIO line (pin={}, chip={}, offset={}, direction={}{})",
            self.pin,
            self.chip_name,
            self.offset,
            self.direction,
            if self.is_closed() { ", closed" } else { "" }
        )
    }
}

/// Open a controller read-write, retrying while udev may still be fixing up
/// the node's permissions
fn open_chip_with_retry<P>(
    provider: &P,
    node: &str,
    attempts: u32,
    delay: Duration,
) -> Result<P::Chip>
where
    P: GpioProvider + ?Sized,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match provider.open_chip(node, Access::ReadWrite) {
            Err(e) if e.is_permission_denied() && attempt < attempts => {
                log::debug!(
                    "line: {} permission denied, retrying ({}/{})",
                    node,
                    attempt,
                    attempts
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}
