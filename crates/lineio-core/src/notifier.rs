//! Background edge notifier
//!
//! A [`Notifier`] runs [`Line::poll`] on a dedicated thread with a short
//! timeout and hands every detected edge to a callback. The short timeout is
//! what keeps the thread stoppable: the stop flag is checked once per
//! iteration, so [`Notifier::stop`] returns within one interval.

use crate::error::{Error, Result};
use crate::line::{Edge, EdgeEvent, Line};
use crate::provider::ChipDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll timeout used by each notifier iteration
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of a notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    /// The background thread is looping
    Running,
    /// Stopped explicitly, or the loop ended on an error
    Stopped,
}

/// Calls a callback for every edge detected on a line
pub struct Notifier {
    pin: u32,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Start watching `line` for `edge` with the default poll interval
    pub fn start<C, F>(line: Arc<Line<C>>, edge: Edge, callback: F) -> Result<Self>
    where
        C: ChipDevice + 'static,
        F: FnMut(EdgeEvent) + Send + 'static,
    {
        Self::start_with_interval(line, edge, DEFAULT_POLL_INTERVAL, callback)
    }

    /// Start watching `line`, polling with `interval` as the timeout
    ///
    /// Returns once the background loop is running.
    pub fn start_with_interval<C, F>(
        line: Arc<Line<C>>,
        edge: Edge,
        interval: Duration,
        mut callback: F,
    ) -> Result<Self>
    where
        C: ChipDevice + 'static,
        F: FnMut(EdgeEvent) + Send + 'static,
    {
        if line.is_closed() {
            return Err(Error::UseAfterClose);
        }
        if !line.interrupts_available() {
            return Err(Error::Unsupported(line.chip_name().to_string()));
        }

        let pin = line.pin();
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<()>(0);

        let thread_stop = Arc::clone(&stop);
        let thread_running = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name(format!("lineio-notify-{}", pin))
            .spawn(move || {
                let _ = ready_tx.send(());
                while !thread_stop.load(Ordering::Acquire) {
                    match line.poll(edge, Some(interval)) {
                        Ok(Some(event)) => callback(event),
                        Ok(None) => {}
                        Err(e) => {
                            log::debug!("notifier: pin {} loop ended: {}", pin, e);
                            break;
                        }
                    }
                }
                thread_running.store(false, Ordering::Release);
            })?;

        if ready_rx.recv().is_err() {
            let _ = thread.join();
            return Err(Error::Io(std::io::Error::other(
                "notifier thread exited before starting",
            )));
        }

        log::debug!("notifier: watching pin {} for {} edges", pin, edge);
        Ok(Self {
            pin,
            stop,
            running,
            thread: Some(thread),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> NotifierState {
        if self.thread.is_some() && self.running.load(Ordering::Acquire) {
            NotifierState::Running
        } else {
            NotifierState::Stopped
        }
    }

    /// Stop the loop and wait for the thread to exit
    ///
    /// No callback runs after this returns. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("notifier: pin {} callback panicked", self.pin);
            }
            log::debug!("notifier: stopped pin {}", self.pin);
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("pin", &self.pin)
            .field("state", &self.state())
            .finish()
    }
}
