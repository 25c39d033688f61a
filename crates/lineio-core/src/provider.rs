//! Controller provider traits
//!
//! Resolution and line handling never touch `/dev` directly. They go through
//! a [`GpioProvider`], which lists controller nodes and opens them, and the
//! [`ChipDevice`] and [`LineRequest`] descriptors it hands out. The Linux
//! backend implements these over real character devices; the dummy backend
//! emulates controllers in memory.
//!
//! Every descriptor executes requests through one method,
//! [`DeviceControl::control`]. The provided methods on the traits only build
//! the right [`Request`] variant and unpack the result.

use crate::error::{Error, Result};
use crate::uapi::{
    ChipInfo, EventData, EventRequest, HandleData, HandleRequest, LineInfo, Request,
};
use std::time::Duration;

/// Prefix shared by controller device node names
pub const CHIP_PREFIX: &str = "gpiochip";

/// How a controller node is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Metadata queries only
    ReadOnly,
    /// Handle and event acquisition
    ReadWrite,
}

/// A descriptor that accepts device-control requests
pub trait DeviceControl {
    /// Execute one request, filling in the borrowed structure
    fn control(&self, request: Request<'_>) -> Result<()>;
}

/// Source of controller devices
pub trait GpioProvider: Send + Sync {
    /// Controller descriptor type
    type Chip: ChipDevice;

    /// Names of the device nodes present, in no particular order
    ///
    /// Names not starting with [`CHIP_PREFIX`] are ignored by the resolver.
    fn chip_names(&self) -> Result<Vec<String>>;

    /// Open the controller node called `name`
    fn open_chip(&self, name: &str, access: Access) -> Result<Self::Chip>;
}

/// An open controller device
pub trait ChipDevice: DeviceControl + Send + Sync {
    /// Descriptor type for acquired line handles and event subscriptions
    type Line: LineRequest;

    /// Take ownership of a descriptor the kernel wrote into a handle or event
    /// request
    fn adopt(&self, fd: i32) -> Result<Self::Line>;

    /// Whether the controller can report edge events
    fn interrupts_available(&self) -> bool {
        true
    }

    /// Query chip name, label and line count
    fn chip_info(&self) -> Result<ChipInfo> {
        let mut info = ChipInfo::new();
        self.control(Request::ChipInfo(&mut info))?;
        Ok(info)
    }

    /// Query the line at `offset`
    fn line_info(&self, offset: u32) -> Result<LineInfo> {
        let mut info = LineInfo::for_offset(offset);
        self.control(Request::LineInfo(&mut info))?;
        Ok(info)
    }

    /// Acquire a line handle
    ///
    /// The returned descriptor is released when dropped.
    fn request_handle(&self, mut request: HandleRequest) -> Result<Self::Line> {
        self.control(Request::LineHandle(&mut request))?;
        self.adopt(request.fd)
    }

    /// Subscribe to edge events on one line
    ///
    /// The returned descriptor is released when dropped.
    fn request_events(&self, mut request: EventRequest) -> Result<Self::Line> {
        self.control(Request::LineEvent(&mut request))?;
        self.adopt(request.fd)
    }
}

/// A kernel-issued line handle or event descriptor
pub trait LineRequest: DeviceControl + Send {
    /// Wait until the descriptor is readable
    ///
    /// `None` waits forever, a zero duration only checks. Returns `false` on
    /// timeout.
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool>;

    /// Read raw bytes from the descriptor
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Read the current line values
    fn get_values(&self) -> Result<HandleData> {
        let mut data = HandleData::new();
        self.control(Request::GetValues(&mut data))?;
        Ok(data)
    }

    /// Drive the line values
    fn set_values(&self, mut data: HandleData) -> Result<()> {
        self.control(Request::SetValues(&mut data))
    }

    /// Read one queued event record
    fn read_event(&self) -> Result<EventData> {
        let mut buf = [0u8; core::mem::size_of::<EventData>()];
        let n = self.read(&mut buf)?;
        EventData::decode(&buf[..n]).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short event read ({} bytes)", n),
            ))
        })
    }
}
