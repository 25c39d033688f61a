//! lineio-dummy - In-memory GPIO controller emulator for testing
//!
//! This crate provides a [`GpioProvider`] whose controllers live entirely in
//! memory. Lines keep a level, outputs loop back to anything reading the same
//! line, and edges can be generated from the test side with
//! [`DummyGpio::drive`] and [`DummyGpio::inject_edge`]. It is useful for
//! exercising resolution, line handles and notifiers without hardware.

mod emulator;
#[cfg(test)]
mod scenarios;

use emulator::{EmulatedChip, EmulatedLine, Shared, State};
use lineio_core::provider::{Access, ChipDevice, DeviceControl, GpioProvider, LineRequest};
use lineio_core::uapi::{EventData, Request, RequestKind};
use lineio_core::{Edge, Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zerocopy::IntoBytes;

/// Bytes returned by a read cut short with [`DummyGpio::truncate_next_read`]
const SHORT_READ_BYTES: usize = 4;

/// Configuration for one emulated controller
#[derive(Debug, Clone)]
pub struct DummyChipConfig {
    /// Device node name, e.g. `gpiochip0`
    pub node: String,
    /// Kernel chip name
    pub name: String,
    /// Functional label
    pub label: String,
    /// Line names by offset; `None` leaves a line unnamed
    pub line_names: Vec<Option<String>>,
}

impl DummyChipConfig {
    /// Controller `index` with `lines` lines named `LINE<index>_<offset>`
    pub fn new(index: usize, lines: u32) -> Self {
        Self {
            node: format!("gpiochip{}", index),
            name: format!("dummy-gpio.{}", index),
            label: format!("dummy{}", index),
            line_names: (0..lines)
                .map(|offset| Some(format!("LINE{}_{}", index, offset)))
                .collect(),
        }
    }

    /// Use a different device node name
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    /// Replace the line names
    pub fn with_line_names(mut self, names: Vec<Option<String>>) -> Self {
        self.line_names = names;
        self
    }
}

/// Configuration for the dummy provider
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Emulated controllers
    pub chips: Vec<DummyChipConfig>,
    /// Number of read-write opens that fail with permission denied before
    /// opens start succeeding
    pub permission_denials: u32,
    /// Whether controllers report edge interrupts
    pub interrupts: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self::with_line_counts(&[32])
    }
}

impl DummyConfig {
    /// One controller per entry, with the given number of lines each
    pub fn with_line_counts(counts: &[u32]) -> Self {
        Self {
            chips: counts
                .iter()
                .enumerate()
                .map(|(index, &lines)| DummyChipConfig::new(index, lines))
                .collect(),
            permission_denials: 0,
            interrupts: true,
        }
    }

    /// Parse a comma separated list of line counts, e.g. `32,16`
    pub fn parse_line_counts(list: &str) -> Result<Self> {
        let counts = list
            .split(',')
            .map(|s| {
                s.trim().parse::<u32>().map_err(|_| {
                    Error::InvalidParameter(format!("invalid line count '{}'", s.trim()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_line_counts(&counts))
    }

    /// Fail the first `count` read-write opens with permission denied
    pub fn with_permission_denials(mut self, count: u32) -> Self {
        self.permission_denials = count;
        self
    }

    /// Report edge interrupts as unavailable
    pub fn without_interrupts(mut self) -> Self {
        self.interrupts = false;
        self
    }
}

/// In-memory GPIO provider
///
/// Clones share the same controllers.
#[derive(Debug, Clone)]
pub struct DummyGpio {
    shared: Arc<Shared>,
}

impl DummyGpio {
    /// Create emulated controllers from `config`
    pub fn new(config: DummyConfig) -> Self {
        let chips = config
            .chips
            .into_iter()
            .map(|chip| EmulatedChip {
                node: chip.node,
                name: chip.name,
                label: chip.label,
                lines: chip
                    .line_names
                    .into_iter()
                    .map(|name| EmulatedLine {
                        name,
                        level: false,
                        is_output: false,
                        active_low: false,
                        consumer: None,
                        latched: VecDeque::new(),
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        log::debug!("dummy: emulating {} controllers", chips.len());
        Self {
            shared: Arc::new(Shared::new(State::new(
                chips,
                config.permission_denials,
                config.interrupts,
            ))),
        }
    }

    /// Apply an external level to a line
    ///
    /// Subscribers currently watching the line see the resulting edge.
    pub fn drive(&self, node: &str, offset: u32, level: bool) -> Result<()> {
        let mut state = self.shared.lock();
        let chip = find_chip(&state, node)?;
        check_offset(&state, chip, offset)?;
        state.change_level(chip, offset, level);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Generate an edge on a line
    ///
    /// If nothing is subscribed to the line the edge is kept until the next
    /// matching subscription. [`Edge::Both`] generates a rising edge followed
    /// by a falling edge.
    pub fn inject_edge(&self, node: &str, offset: u32, edge: Edge) -> Result<()> {
        let mut state = self.shared.lock();
        let chip = find_chip(&state, node)?;
        check_offset(&state, chip, offset)?;
        state.inject(chip, offset, edge);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Physical level of a line
    pub fn level(&self, node: &str, offset: u32) -> Result<bool> {
        let state = self.shared.lock();
        let chip = find_chip(&state, node)?;
        check_offset(&state, chip, offset)?;
        Ok(state.chips[chip].lines[offset as usize].level)
    }

    /// Number of handle and event descriptors currently held
    pub fn open_requests(&self) -> usize {
        self.shared.lock().claims.len()
    }

    /// Remaining permission-denied opens
    pub fn permission_denials_left(&self) -> u32 {
        self.shared.lock().permission_denials
    }

    /// Switch edge interrupt support on or off
    pub fn set_interrupts_available(&self, available: bool) {
        self.shared.lock().interrupts = available;
    }

    /// Fail the next request of `kind` with `errno`
    ///
    /// The failure is consumed by the first matching request, whether it is
    /// issued on a controller or on a line handle.
    pub fn fail_next(&self, kind: RequestKind, errno: i32) {
        self.shared.lock().failures.insert(kind, errno);
    }

    /// Return only the first few bytes of the next event read
    ///
    /// The event itself is consumed, as a kernel read into a short buffer
    /// would.
    pub fn truncate_next_read(&self) {
        self.shared.lock().short_reads += 1;
    }
}

impl Default for DummyGpio {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

impl GpioProvider for DummyGpio {
    type Chip = DummyChip;

    fn chip_names(&self) -> Result<Vec<String>> {
        // Reverse creation order, like an unsorted directory listing
        Ok(self
            .shared
            .lock()
            .chips
            .iter()
            .rev()
            .map(|chip| chip.node.clone())
            .collect())
    }

    fn open_chip(&self, name: &str, access: Access) -> Result<DummyChip> {
        let mut state = self.shared.lock();
        let path = format!("/dev/{}", name);

        let index = state.chip_index(name).ok_or_else(|| Error::OpenFailed {
            path: path.clone(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;

        if access == Access::ReadWrite && state.permission_denials > 0 {
            state.permission_denials -= 1;
            log::trace!("dummy: denying open of {}", path);
            return Err(Error::OpenFailed {
                path,
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }

        Ok(DummyChip {
            shared: Arc::clone(&self.shared),
            index,
        })
    }
}

/// An opened emulated controller
#[derive(Debug)]
pub struct DummyChip {
    shared: Arc<Shared>,
    index: usize,
}

impl DeviceControl for DummyChip {
    fn control(&self, request: Request<'_>) -> Result<()> {
        let kind = request.kind();
        if !kind.targets_chip() {
            return Err(Error::device(kind, libc::ENOTTY));
        }
        let mut state = self.shared.lock();
        state.take_failure(kind)?;
        let result = match request {
            Request::ChipInfo(info) => {
                state.chip_info(self.index, info);
                Ok(())
            }
            Request::LineInfo(info) => state.line_info(self.index, info),
            Request::LineHandle(req) => state.request_handle(self.index, req),
            Request::LineEvent(req) => state.request_events(self.index, req),
            other => Err(Error::device(other.kind(), libc::ENOTTY)),
        };
        self.shared.changed.notify_all();
        result
    }
}

impl ChipDevice for DummyChip {
    type Line = DummyRequest;

    fn adopt(&self, fd: i32) -> Result<DummyRequest> {
        if !self.shared.lock().claims.contains_key(&fd) {
            return Err(Error::InvalidParameter(format!("unknown descriptor {}", fd)));
        }
        Ok(DummyRequest {
            shared: Arc::clone(&self.shared),
            fd,
        })
    }

    fn interrupts_available(&self) -> bool {
        self.shared.lock().interrupts
    }
}

/// An emulated line handle or event descriptor
#[derive(Debug)]
pub struct DummyRequest {
    shared: Arc<Shared>,
    fd: i32,
}

impl DummyRequest {
    /// Fake descriptor number
    pub fn fd(&self) -> i32 {
        self.fd
    }
}

impl DeviceControl for DummyRequest {
    fn control(&self, request: Request<'_>) -> Result<()> {
        let kind = request.kind();
        if kind.targets_chip() {
            return Err(Error::device(kind, libc::ENOTTY));
        }
        let mut state = self.shared.lock();
        state.take_failure(kind)?;
        let result = match request {
            Request::GetValues(data) => state.get_values(self.fd, data),
            Request::SetValues(data) => state.set_values(self.fd, data),
            other => Err(Error::device(other.kind(), libc::ENOTTY)),
        };
        self.shared.changed.notify_all();
        result
    }
}

impl LineRequest for DummyRequest {
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.shared.lock();
        loop {
            if state.pending_events(self.fd) {
                return Ok(true);
            }
            if !state.claims.contains_key(&self.fd) {
                return Err(Error::device(RequestKind::LineEvent, libc::EBADF));
            }
            state = match deadline {
                None => self
                    .shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.shared
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.shared.lock();
        let event = state.pop_event(self.fd);
        let limit = if event.is_some() && state.short_reads > 0 {
            state.short_reads -= 1;
            buf.len().min(SHORT_READ_BYTES)
        } else {
            buf.len()
        };
        drop(state);
        match event {
            Some(event) => Ok(copy_event(&event, &mut buf[..limit])),
            None => Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::WouldBlock,
            ))),
        }
    }
}

impl Drop for DummyRequest {
    fn drop(&mut self) {
        self.shared.lock().release(self.fd);
        self.shared.changed.notify_all();
    }
}

/// Copy an event record into a read buffer, truncating like a short read
fn copy_event(event: &EventData, buf: &mut [u8]) -> usize {
    let bytes = event.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    n
}

fn find_chip(state: &State, node: &str) -> Result<usize> {
    state
        .chip_index(node)
        .ok_or_else(|| Error::NotFound(format!("controller {}", node)))
}

fn check_offset(state: &State, chip: usize, offset: u32) -> Result<()> {
    if (offset as usize) < state.chips[chip].lines.len() {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "{} line {}",
            state.chips[chip].node, offset
        )))
    }
}
