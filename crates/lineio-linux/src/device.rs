//! Linux GPIO character-device provider
//!
//! Controllers are opened from `<dev_root>/gpiochipN`. Line handles and event
//! subscriptions come back from the kernel as new descriptors, which are
//! wrapped in a [`File`] so they are closed on drop.

use lineio_core::error::{Error, Result};
use lineio_core::provider::{Access, ChipDevice, DeviceControl, GpioProvider, LineRequest};
use lineio_core::uapi::Request;
use lineio_core::CHIP_PREFIX;

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Directory holding the controller nodes
pub const DEFAULT_DEV_ROOT: &str = "/dev";

/// GPIO ioctl definitions from `<linux/gpio.h>`
mod ioctl {
    use lineio_core::uapi::{
        ChipInfo, EventRequest, HandleData, HandleRequest, LineInfo, RequestKind, GPIO_IOC_MAGIC,
    };
    use nix::{ioctl_read, ioctl_readwrite};

    const CHIPINFO_NR: u8 = RequestKind::ChipInfo.nr();
    const LINEINFO_NR: u8 = RequestKind::LineInfo.nr();
    const LINEHANDLE_NR: u8 = RequestKind::LineHandle.nr();
    const LINEEVENT_NR: u8 = RequestKind::LineEvent.nr();
    const GET_VALUES_NR: u8 = RequestKind::GetValues.nr();
    const SET_VALUES_NR: u8 = RequestKind::SetValues.nr();

    ioctl_read!(gpio_get_chipinfo, GPIO_IOC_MAGIC, CHIPINFO_NR, ChipInfo);
    ioctl_readwrite!(gpio_get_lineinfo, GPIO_IOC_MAGIC, LINEINFO_NR, LineInfo);
    ioctl_readwrite!(
        gpio_get_linehandle,
        GPIO_IOC_MAGIC,
        LINEHANDLE_NR,
        HandleRequest
    );
    ioctl_readwrite!(
        gpio_get_lineevent,
        GPIO_IOC_MAGIC,
        LINEEVENT_NR,
        EventRequest
    );
    ioctl_readwrite!(
        gpiohandle_get_line_values,
        GPIO_IOC_MAGIC,
        GET_VALUES_NR,
        HandleData
    );
    ioctl_readwrite!(
        gpiohandle_set_line_values,
        GPIO_IOC_MAGIC,
        SET_VALUES_NR,
        HandleData
    );
}

/// Configuration for the Linux provider
#[derive(Debug, Clone)]
pub struct LinuxGpioConfig {
    /// Directory searched for `gpiochipN` nodes (default: `/dev`)
    pub dev_root: PathBuf,
}

impl Default for LinuxGpioConfig {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from(DEFAULT_DEV_ROOT),
        }
    }
}

impl LinuxGpioConfig {
    /// Configuration using `/dev`
    pub fn new() -> Self {
        Self::default()
    }

    /// Look for controller nodes under `dev_root` instead
    pub fn with_dev_root(mut self, dev_root: impl Into<PathBuf>) -> Self {
        self.dev_root = dev_root.into();
        self
    }
}

/// Provider over the kernel's GPIO character devices
#[derive(Debug, Clone)]
pub struct LinuxGpio {
    dev_root: PathBuf,
}

impl LinuxGpio {
    /// Create a provider from `config`
    pub fn new(config: LinuxGpioConfig) -> Self {
        Self {
            dev_root: config.dev_root,
        }
    }

    /// Directory searched for controller nodes
    pub fn dev_root(&self) -> &Path {
        &self.dev_root
    }
}

impl Default for LinuxGpio {
    fn default() -> Self {
        Self::new(LinuxGpioConfig::default())
    }
}

impl GpioProvider for LinuxGpio {
    type Chip = LinuxChip;

    fn chip_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dev_root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(CHIP_PREFIX) {
                    names.push(name.to_string());
                }
            }
        }
        log::trace!(
            "linux_gpio: found {} controllers in {}",
            names.len(),
            self.dev_root.display()
        );
        Ok(names)
    }

    fn open_chip(&self, name: &str, access: Access) -> Result<LinuxChip> {
        let path = self.dev_root.join(name);
        log::trace!("linux_gpio: opening {} ({:?})", path.display(), access);

        let file = OpenOptions::new()
            .read(true)
            .write(access == Access::ReadWrite)
            .open(&path)
            .map_err(|e| Error::OpenFailed {
                path: path.display().to_string(),
                source: e,
            })?;

        Ok(LinuxChip { file, path })
    }
}

/// An open `/dev/gpiochipN` node
#[derive(Debug)]
pub struct LinuxChip {
    file: File,
    path: PathBuf,
}

impl LinuxChip {
    /// Path of the device node
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceControl for LinuxChip {
    fn control(&self, request: Request<'_>) -> Result<()> {
        issue(self.file.as_raw_fd(), request)
    }
}

impl ChipDevice for LinuxChip {
    type Line = LinuxLineRequest;

    fn adopt(&self, fd: i32) -> Result<LinuxLineRequest> {
        if fd < 0 {
            return Err(Error::InvalidParameter(format!(
                "kernel returned invalid descriptor {} for {}",
                fd,
                self.path.display()
            )));
        }
        // SAFETY: the kernel just created this descriptor for us and nothing
        // else owns it.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(LinuxLineRequest { file })
    }
}

/// A line handle or event descriptor issued by the kernel
#[derive(Debug)]
pub struct LinuxLineRequest {
    file: File,
}

impl DeviceControl for LinuxLineRequest {
    fn control(&self, request: Request<'_>) -> Result<()> {
        issue(self.file.as_raw_fd(), request)
    }
}

impl LineRequest for LinuxLineRequest {
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        // A deadline past the end of time waits forever
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        };

        loop {
            // A signal must not restart the full timeout
            let timeout_ms = poll_timeout_ms(remaining(deadline, Instant::now()));
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    log::trace!("linux_gpio: poll interrupted, retrying");
                    continue;
                }
                return Err(Error::Io(err));
            }
            return Ok(ret > 0);
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match (&self.file).read(buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                result => return Ok(result?),
            }
        }
    }
}

/// Run one request against `fd`
fn issue(fd: RawFd, request: Request<'_>) -> Result<()> {
    let kind = request.kind();
    // SAFETY: every request borrows a `repr(C)` structure whose layout and
    // size match the one encoded in its ioctl number.
    let ret = unsafe {
        match request {
            Request::ChipInfo(info) => ioctl::gpio_get_chipinfo(fd, info),
            Request::LineInfo(info) => ioctl::gpio_get_lineinfo(fd, info),
            Request::LineHandle(req) => ioctl::gpio_get_linehandle(fd, req),
            Request::LineEvent(req) => ioctl::gpio_get_lineevent(fd, req),
            Request::GetValues(data) => ioctl::gpiohandle_get_line_values(fd, data),
            Request::SetValues(data) => ioctl::gpiohandle_set_line_values(fd, data),
        }
    };

    ret.map(|_| ()).map_err(|e| {
        log::debug!("linux_gpio: {} request failed: {}", kind, e);
        Error::device(kind, e as i32)
    })
}

/// Time left until `deadline`, zero once it has passed
fn remaining(deadline: Option<Instant>, now: Instant) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(now))
}

/// Convert a poll timeout to milliseconds, rounding up so short waits do not
/// turn into busy checks
fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => d
            .as_nanos()
            .div_ceil(1_000_000)
            .min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_timeout_ms() {
        assert_eq!(poll_timeout_ms(None), -1);
        assert_eq!(poll_timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_millis(100))), 100);
        assert_eq!(
            poll_timeout_ms(Some(Duration::from_secs(u64::MAX))),
            libc::c_int::MAX
        );
    }

    #[test]
    fn test_remaining_shrinks_to_zero() {
        let start = Instant::now();
        let deadline = Some(start + Duration::from_millis(150));
        assert_eq!(remaining(None, start), None);
        assert_eq!(
            remaining(deadline, start + Duration::from_millis(100)),
            Some(Duration::from_millis(50))
        );
        assert_eq!(
            remaining(deadline, start + Duration::from_secs(1)),
            Some(Duration::ZERO)
        );
    }

    /// Regular file standing in for `gpiochip0` under a scratch dev root
    fn scratch_chip(tag: &str) -> (PathBuf, LinuxChip) {
        let root = std::env::temp_dir().join(format!("lineio-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        File::create(root.join("gpiochip0")).unwrap();
        let gpio = LinuxGpio::new(LinuxGpioConfig::new().with_dev_root(&root));
        let chip = gpio.open_chip("gpiochip0", Access::ReadOnly).unwrap();
        (root, chip)
    }

    /// Pipe with its read end adopted as a line request
    fn adopted_pipe(chip: &LinuxChip) -> (LinuxLineRequest, File) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let request = chip.adopt(fds[0]).unwrap();
        let writer = unsafe { File::from_raw_fd(fds[1]) };
        (request, writer)
    }

    #[test]
    fn test_wait_readable_sees_data() {
        use std::io::Write;

        let (root, chip) = scratch_chip("readable");
        assert_eq!(chip.path(), root.join("gpiochip0"));
        let (request, mut writer) = adopted_pipe(&chip);

        assert!(!request.wait_readable(Some(Duration::ZERO)).unwrap());
        writer.write_all(&[1, 2, 3]).unwrap();
        assert!(request.wait_readable(Some(Duration::from_secs(1))).unwrap());

        let mut buf = [0u8; 8];
        assert_eq!(request.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);

        std::fs::remove_dir_all(root).unwrap();
    }

    extern "C" fn ignore_signal(_: libc::c_int) {}

    #[test]
    fn test_wait_readable_deadline_survives_signals() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::{mpsc, Arc};

        // Handler without SA_RESTART so every delivery interrupts poll()
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(
                libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut()),
                0
            );
        }

        let (root, chip) = scratch_chip("signals");
        let (request, _writer) = adopted_pipe(&chip);

        let done = Arc::new(AtomicBool::new(false));
        let (tid_tx, tid_rx) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            tid_tx.send(unsafe { libc::pthread_self() }).unwrap();
            let start = Instant::now();
            let ready = request.wait_readable(Some(Duration::from_millis(150)));
            (ready.unwrap(), start.elapsed())
        });

        let target = tid_rx.recv().unwrap();
        let signaller = {
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                // Give up after 3 s so a regression fails instead of hanging
                let give_up = Instant::now() + Duration::from_secs(3);
                while !done.load(Ordering::SeqCst) && Instant::now() < give_up {
                    unsafe { libc::pthread_kill(target, libc::SIGUSR1) };
                    std::thread::sleep(Duration::from_millis(20));
                }
            })
        };

        let (ready, elapsed) = waiter.join().unwrap();
        done.store(true, Ordering::SeqCst);
        signaller.join().unwrap();

        assert!(!ready);
        assert!(elapsed >= Duration::from_millis(150), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);

        std::fs::remove_dir_all(root).unwrap();
    }

    #[cfg(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "arm",
        target_arch = "riscv64"
    ))]
    #[test]
    fn test_request_codes_match_kernel() {
        use lineio_core::uapi::{
            ChipInfo, EventRequest, HandleData, HandleRequest, LineInfo, GPIO_IOC_MAGIC,
        };
        use std::mem::size_of;

        let chipinfo = nix::request_code_read!(GPIO_IOC_MAGIC, 0x01, size_of::<ChipInfo>());
        let lineinfo = nix::request_code_readwrite!(GPIO_IOC_MAGIC, 0x02, size_of::<LineInfo>());
        let handle = nix::request_code_readwrite!(GPIO_IOC_MAGIC, 0x03, size_of::<HandleRequest>());
        let event = nix::request_code_readwrite!(GPIO_IOC_MAGIC, 0x04, size_of::<EventRequest>());
        let get = nix::request_code_readwrite!(GPIO_IOC_MAGIC, 0x08, size_of::<HandleData>());
        let set = nix::request_code_readwrite!(GPIO_IOC_MAGIC, 0x09, size_of::<HandleData>());

        assert_eq!(chipinfo as u32, 0x8044_B401);
        assert_eq!(lineinfo as u32, 0xC048_B402);
        assert_eq!(handle as u32, 0xC16C_B403);
        assert_eq!(event as u32, 0xC030_B404);
        assert_eq!(get as u32, 0xC040_B408);
        assert_eq!(set as u32, 0xC040_B409);
    }

    #[test]
    fn test_missing_dev_root_is_io_error() {
        let gpio = LinuxGpio::new(
            LinuxGpioConfig::new().with_dev_root("/nonexistent/lineio-test-root"),
        );
        assert!(matches!(gpio.chip_names(), Err(Error::Io(_))));
    }

    #[test]
    fn test_open_missing_node() {
        let gpio = LinuxGpio::new(
            LinuxGpioConfig::new().with_dev_root("/nonexistent/lineio-test-root"),
        );
        match gpio.open_chip("gpiochip0", Access::ReadOnly) {
            Err(Error::OpenFailed { path, source }) => {
                assert_eq!(path, "/nonexistent/lineio-test-root/gpiochip0");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected result: {:?}", other.map(|c| c.path)),
        }
    }
}
