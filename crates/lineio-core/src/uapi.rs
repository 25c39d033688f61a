//! GPIO character device ABI (v1)
//!
//! Fixed-layout request and response structures exchanged with a
//! `/dev/gpiochipN` node, matching `<linux/gpio.h>` byte for byte. Each
//! structure is paired with a [`RequestKind`], and a borrowed structure is
//! wrapped in a [`Request`] before being handed to
//! [`DeviceControl::control`](crate::provider::DeviceControl::control).
//!
//! The request codes themselves are architecture dependent (`_IOC` bit
//! layout differs on mips, powerpc and sparc), so they are generated by the
//! backend that actually issues the ioctl. This module only fixes the magic
//! number, the sequence numbers and the structure sizes.

use bitflags::bitflags;
use core::fmt;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// ioctl magic shared by every GPIO request
pub const GPIO_IOC_MAGIC: u8 = 0xB4;

/// Maximum number of lines a single handle request may carry
pub const GPIOHANDLES_MAX: usize = 64;

/// Size of the name/label/consumer string fields, including the NUL
pub const LABEL_LEN: usize = 32;

/// Smallest read that yields a complete event record (the 32-bit x86
/// layout has no tail padding)
pub const EVENT_DATA_MIN_LEN: usize = 12;

/// Event id reported for a rising edge
pub const GPIOEVENT_EVENT_RISING_EDGE: u32 = 0x01;
/// Event id reported for a falling edge
pub const GPIOEVENT_EVENT_FALLING_EDGE: u32 = 0x02;

bitflags! {
    /// Flags for line handle requests (`GPIOHANDLE_REQUEST_*`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HandleFlags: u32 {
        /// Request the line as an input
        const INPUT       = 1 << 0;
        /// Request the line as an output
        const OUTPUT      = 1 << 1;
        /// Invert the logical value
        const ACTIVE_LOW  = 1 << 2;
        /// Drive only low, float high
        const OPEN_DRAIN  = 1 << 3;
        /// Drive only high, float low
        const OPEN_SOURCE = 1 << 4;
    }
}

bitflags! {
    /// Edge selection for line event requests (`GPIOEVENT_REQUEST_*`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        /// Report rising edges
        const RISING_EDGE  = 1 << 0;
        /// Report falling edges
        const FALLING_EDGE = 1 << 1;
        /// Report both edges
        const BOTH_EDGES   = Self::RISING_EDGE.bits() | Self::FALLING_EDGE.bits();
    }
}

bitflags! {
    /// Line state reported by line info (`GPIOLINE_FLAG_*`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LineFlags: u32 {
        /// Line is claimed by the kernel or another consumer
        const KERNEL      = 1 << 0;
        /// Line is configured as an output
        const IS_OUT      = 1 << 1;
        /// Line is active low
        const ACTIVE_LOW  = 1 << 2;
        /// Line is open drain
        const OPEN_DRAIN  = 1 << 3;
        /// Line is open source
        const OPEN_SOURCE = 1 << 4;
    }
}

/// `struct gpiochip_info`
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ChipInfo {
    /// Kernel name of the chip
    pub name: [u8; LABEL_LEN],
    /// Functional label, possibly empty
    pub label: [u8; LABEL_LEN],
    /// Number of lines handled by the chip
    pub lines: u32,
}

/// `struct gpioline_info`
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct LineInfo {
    /// Offset of the line within the chip (input)
    pub line_offset: u32,
    /// [`LineFlags`] bits
    pub flags: u32,
    /// Line name, possibly empty
    pub name: [u8; LABEL_LEN],
    /// Label of the current consumer, empty if unclaimed
    pub consumer: [u8; LABEL_LEN],
}

/// `struct gpiohandle_request`
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HandleRequest {
    /// Offsets of the requested lines
    pub lineoffsets: [u32; GPIOHANDLES_MAX],
    /// [`HandleFlags`] bits
    pub flags: u32,
    /// Initial values for output lines
    pub default_values: [u8; GPIOHANDLES_MAX],
    /// Consumer label
    pub consumer_label: [u8; LABEL_LEN],
    /// Number of valid entries in `lineoffsets`
    pub lines: u32,
    /// Handle descriptor written back by the kernel
    pub fd: i32,
}

/// `struct gpioevent_request`
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct EventRequest {
    /// Offset of the monitored line
    pub lineoffset: u32,
    /// [`HandleFlags`] bits
    pub handleflags: u32,
    /// [`EventFlags`] bits
    pub eventflags: u32,
    /// Consumer label
    pub consumer_label: [u8; LABEL_LEN],
    /// Event descriptor written back by the kernel
    pub fd: i32,
}

/// `struct gpiohandle_data`
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HandleData {
    /// One value per requested line, in request order
    pub values: [u8; GPIOHANDLES_MAX],
}

/// `struct gpioevent_data`
///
/// The kernel struct is `{ __u64 timestamp; __u32 id; }`, which most ABIs pad
/// to 16 bytes. The padding is spelled out so the record can be viewed as
/// plain bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct EventData {
    /// Event time in nanoseconds
    pub timestamp: u64,
    /// `GPIOEVENT_EVENT_*` id
    pub id: u32,
    _padding: u32,
}

impl ChipInfo {
    /// Zeroed structure ready to be filled by the kernel
    pub fn new() -> Self {
        Self::new_zeroed()
    }
}

impl Default for ChipInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl LineInfo {
    /// Query structure for the line at `offset`
    pub fn for_offset(offset: u32) -> Self {
        let mut info = Self::new_zeroed();
        info.line_offset = offset;
        info
    }

    /// Decoded flags, ignoring unknown bits
    pub fn line_flags(&self) -> LineFlags {
        LineFlags::from_bits_truncate(self.flags)
    }
}

impl HandleRequest {
    /// Request for exactly one line
    pub fn single(offset: u32, flags: HandleFlags, default: bool, consumer: &str) -> Self {
        let mut req = Self::new_zeroed();
        req.lineoffsets[0] = offset;
        req.default_values[0] = default as u8;
        req.flags = flags.bits();
        write_label(&mut req.consumer_label, consumer);
        req.lines = 1;
        req
    }

    /// Decoded flags, ignoring unknown bits
    pub fn handle_flags(&self) -> HandleFlags {
        HandleFlags::from_bits_truncate(self.flags)
    }

    /// Offsets actually carried by the request
    pub fn offsets(&self) -> &[u32] {
        let n = (self.lines as usize).min(GPIOHANDLES_MAX);
        &self.lineoffsets[..n]
    }
}

impl EventRequest {
    /// Edge subscription for one line
    pub fn new(offset: u32, handle_flags: HandleFlags, events: EventFlags, consumer: &str) -> Self {
        let mut req = Self::new_zeroed();
        req.lineoffset = offset;
        req.handleflags = handle_flags.bits();
        req.eventflags = events.bits();
        write_label(&mut req.consumer_label, consumer);
        req
    }

    /// Decoded handle flags, ignoring unknown bits
    pub fn handle_flags(&self) -> HandleFlags {
        HandleFlags::from_bits_truncate(self.handleflags)
    }

    /// Decoded edge selection, ignoring unknown bits
    pub fn event_flags(&self) -> EventFlags {
        EventFlags::from_bits_truncate(self.eventflags)
    }
}

impl HandleData {
    /// All values cleared
    pub fn new() -> Self {
        Self::new_zeroed()
    }

    /// Values with the first line set to `value`
    pub fn with_first(value: bool) -> Self {
        let mut data = Self::new();
        data.values[0] = value as u8;
        data
    }
}

impl Default for HandleData {
    fn default() -> Self {
        Self::new()
    }
}

impl EventData {
    /// Build an event record
    pub fn new(timestamp: u64, id: u32) -> Self {
        Self {
            timestamp,
            id,
            _padding: 0,
        }
    }

    /// Decode a record from the bytes returned by `read(2)`
    ///
    /// Returns `None` if fewer than [`EVENT_DATA_MIN_LEN`] bytes were read.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < EVENT_DATA_MIN_LEN {
            return None;
        }
        let mut raw = [0u8; core::mem::size_of::<EventData>()];
        let n = buf.len().min(raw.len());
        raw[..n].copy_from_slice(&buf[..n]);
        let mut event = Self::read_from_bytes(&raw[..]).ok()?;
        event._padding = 0;
        Some(event)
    }
}

/// Identifies one of the six GPIO requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `GPIO_GET_CHIPINFO_IOCTL`
    ChipInfo,
    /// `GPIO_GET_LINEINFO_IOCTL`
    LineInfo,
    /// `GPIO_GET_LINEHANDLE_IOCTL`
    LineHandle,
    /// `GPIO_GET_LINEEVENT_IOCTL`
    LineEvent,
    /// `GPIOHANDLE_GET_LINE_VALUES_IOCTL`
    GetValues,
    /// `GPIOHANDLE_SET_LINE_VALUES_IOCTL`
    SetValues,
}

impl RequestKind {
    /// ioctl sequence number
    pub const fn nr(self) -> u8 {
        match self {
            Self::ChipInfo => 0x01,
            Self::LineInfo => 0x02,
            Self::LineHandle => 0x03,
            Self::LineEvent => 0x04,
            Self::GetValues => 0x08,
            Self::SetValues => 0x09,
        }
    }

    /// Size of the structure carried by the request
    pub const fn size(self) -> usize {
        match self {
            Self::ChipInfo => core::mem::size_of::<ChipInfo>(),
            Self::LineInfo => core::mem::size_of::<LineInfo>(),
            Self::LineHandle => core::mem::size_of::<HandleRequest>(),
            Self::LineEvent => core::mem::size_of::<EventRequest>(),
            Self::GetValues | Self::SetValues => core::mem::size_of::<HandleData>(),
        }
    }

    /// Whether the request is issued on a chip descriptor rather than on a
    /// line handle descriptor
    pub const fn targets_chip(self) -> bool {
        matches!(
            self,
            Self::ChipInfo | Self::LineInfo | Self::LineHandle | Self::LineEvent
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChipInfo => "chip info",
            Self::LineInfo => "line info",
            Self::LineHandle => "line handle",
            Self::LineEvent => "line event",
            Self::GetValues => "get line values",
            Self::SetValues => "set line values",
        };
        f.write_str(name)
    }
}

/// A device-control request borrowing its fixed-layout structure
#[derive(Debug)]
pub enum Request<'a> {
    /// Query chip name, label and line count
    ChipInfo(&'a mut ChipInfo),
    /// Query one line's flags, name and consumer
    LineInfo(&'a mut LineInfo),
    /// Acquire a line handle; the kernel fills in `fd`
    LineHandle(&'a mut HandleRequest),
    /// Subscribe to edge events; the kernel fills in `fd`
    LineEvent(&'a mut EventRequest),
    /// Read the values of a handle's lines
    GetValues(&'a mut HandleData),
    /// Drive the values of a handle's lines
    SetValues(&'a mut HandleData),
}

impl Request<'_> {
    /// Tag of this request
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::ChipInfo(_) => RequestKind::ChipInfo,
            Self::LineInfo(_) => RequestKind::LineInfo,
            Self::LineHandle(_) => RequestKind::LineHandle,
            Self::LineEvent(_) => RequestKind::LineEvent,
            Self::GetValues(_) => RequestKind::GetValues,
            Self::SetValues(_) => RequestKind::SetValues,
        }
    }

    /// The borrowed structure as raw bytes, as passed to `ioctl(2)`
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        match self {
            Self::ChipInfo(s) => s.as_mut_bytes(),
            Self::LineInfo(s) => s.as_mut_bytes(),
            Self::LineHandle(s) => s.as_mut_bytes(),
            Self::LineEvent(s) => s.as_mut_bytes(),
            Self::GetValues(s) | Self::SetValues(s) => s.as_mut_bytes(),
        }
    }
}

/// Copy `src` into a fixed-size C string field, truncating so that the
/// last byte is always NUL
pub fn write_label(dst: &mut [u8; LABEL_LEN], src: &str) {
    dst.fill(0);
    let n = src.len().min(LABEL_LEN - 1);
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
}

/// Read a fixed-size C string field; an empty field yields `None`
pub fn read_label(src: &[u8]) -> Option<String> {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    if end == 0 {
        None
    } else {
        Some(String::from_utf8_lossy(&src[..end]).into_owned())
    }
}
