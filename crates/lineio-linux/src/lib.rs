//! lineio-linux - Linux GPIO character-device backend
//!
//! This crate implements the `lineio-core` provider traits over the
//! `/dev/gpiochipN` nodes exposed by the kernel's GPIO character-device
//! interface (ABI v1).
//!
//! # Example
//!
//! ```no_run
//! use lineio_core::{Line, LineConfig};
//! use lineio_linux::{LinuxGpio, LinuxGpioConfig};
//!
//! let gpio = LinuxGpio::new(LinuxGpioConfig::new());
//! let led = Line::open(&gpio, LineConfig::output(17).with_initial(true))?;
//! led.set(false)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with `CONFIG_GPIO_CDEV_V1`
//! - Read/write access to `/dev/gpiochipN`, usually through the `gpio`
//!   group or a udev rule

pub mod device;

pub use device::{LinuxChip, LinuxGpio, LinuxGpioConfig, LinuxLineRequest, DEFAULT_DEV_ROOT};
