//! Line commands implementation

use lineio_core::{Edge, EdgeEvent, GpioProvider, Line, LineConfig, Notifier};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Read a line and print 0 or 1
pub fn cmd_get<P: GpioProvider>(
    provider: &P,
    config: LineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let line = Line::open(provider, config)?;
    let value = line.get()?;
    log::debug!("{} reads {}", line, value);
    println!("{}", value as u8);
    Ok(())
}

/// Drive a line
pub fn cmd_set<P: GpioProvider>(
    provider: &P,
    config: LineConfig,
    value: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let line = Line::open(provider, config.with_initial(value))?;
    log::info!(
        "Set pin {} ({} line {}) to {}",
        line.pin(),
        line.chip_name(),
        line.offset(),
        value as u8
    );
    Ok(())
}

/// Wait for one edge and print it
pub fn cmd_poll<P: GpioProvider>(
    provider: &P,
    config: LineConfig,
    edge: Edge,
    timeout: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = seconds(timeout)?;
    let line = Line::open(provider, config)?;

    match timeout {
        Some(t) => log::info!("Waiting up to {:?} for a {} edge on pin {}", t, edge, line.pin()),
        None => log::info!("Waiting for a {} edge on pin {}", edge, line.pin()),
    }

    match line.poll(edge, timeout)? {
        Some(event) => {
            print_event(&event);
            Ok(())
        }
        None => Err("Timed out waiting for an edge".into()),
    }
}

/// Print edges until the count or duration is reached
pub fn cmd_watch<P>(
    provider: &P,
    config: LineConfig,
    edge: Edge,
    count: Option<usize>,
    duration: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: GpioProvider,
    P::Chip: 'static,
{
    let deadline = seconds(duration)?.and_then(|d| Instant::now().checked_add(d));
    let line = Arc::new(Line::open(provider, config)?);

    let (tx, rx) = mpsc::channel();
    let mut notifier = Notifier::start(Arc::clone(&line), edge, move |event| {
        let _ = tx.send(event);
    })?;
    log::info!("Watching pin {} for {} edges", line.pin(), edge);

    let mut seen = 0usize;
    while count.map_or(true, |limit| seen < limit) {
        let event = match deadline {
            None => match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                match rx.recv_timeout(deadline - now) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        };
        print_event(&event);
        seen += 1;
    }

    notifier.stop();
    if line.is_closed() {
        log::warn!("Pin {} was closed while watching", line.pin());
    }
    log::info!("Saw {} edges", seen);
    Ok(())
}

fn print_event(event: &EdgeEvent) {
    println!("{:>20} {}", event.timestamp_ns, event.edge);
}

/// Convert a seconds argument; negative values mean "no limit"
fn seconds(value: Option<f64>) -> Result<Option<Duration>, Box<dyn std::error::Error>> {
    match value {
        Some(secs) if secs >= 0.0 => Ok(Some(
            Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid duration: {}", e))?,
        )),
        _ => Ok(None),
    }
}
