//! lineio-core - GPIO line access over the character-device interface
//!
//! This crate maps flat pin numbers and line names onto GPIO controllers,
//! opens single lines for input or output, and waits for edges either
//! synchronously or on a background thread.
//!
//! Controllers are reached through the [`GpioProvider`] trait so the same
//! code runs against the real kernel interface (`lineio-linux`) and the
//! in-memory emulator (`lineio-dummy`).
//!
//! # Example
//!
//! ```ignore
//! use lineio_core::{Edge, Line, LineConfig};
//! use std::time::Duration;
//!
//! fn wait_for_button<P: lineio_core::GpioProvider>(provider: &P) -> lineio_core::Result<()> {
//!     let line = Line::open(provider, LineConfig::input("BUTTON"))?;
//!     if let Some(event) = line.poll(Edge::Falling, Some(Duration::from_secs(5)))? {
//!         println!("pressed at {} ns", event.timestamp_ns);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod line;
pub mod notifier;
pub mod provider;
pub mod resolver;
pub mod uapi;

pub use error::{Error, Result};
pub use line::{Direction, Drive, Edge, EdgeEvent, Line, LineConfig, PinId, DEFAULT_CONSUMER};
pub use notifier::{Notifier, NotifierState, DEFAULT_POLL_INTERVAL};
pub use provider::{Access, ChipDevice, DeviceControl, GpioProvider, LineRequest, CHIP_PREFIX};
pub use resolver::{ChipSummary, LineSummary, Resolver};
