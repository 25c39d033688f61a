//! End-to-end behaviour of resolution, line handles and notifiers against
//! emulated controllers

use crate::{DummyChipConfig, DummyConfig, DummyGpio};
use lineio_core::provider::{Access, ChipDevice, DeviceControl, GpioProvider, LineRequest};
use lineio_core::uapi::{
    ChipInfo, EventFlags, EventRequest, HandleData, HandleFlags, HandleRequest, Request,
    RequestKind,
};
use lineio_core::{
    Direction, Edge, Error, Line, LineConfig, Notifier, NotifierState, Resolver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

fn gpio(counts: &[u32]) -> DummyGpio {
    DummyGpio::new(DummyConfig::with_line_counts(counts))
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_resolve_pin_across_chips() {
    let gpio = gpio(&[32, 16]);
    let resolver = Resolver::new(&gpio);

    assert_eq!(resolver.resolve_pin(31).unwrap(), ("gpiochip0".to_string(), 31));
    assert_eq!(resolver.resolve_pin(32).unwrap(), ("gpiochip1".to_string(), 0));
    assert_eq!(resolver.resolve_pin(47).unwrap(), ("gpiochip1".to_string(), 15));
    assert!(matches!(resolver.resolve_pin(48), Err(Error::NotFound(_))));
}

#[test]
fn test_enumeration_is_stable() {
    let gpio = gpio(&[8, 4, 2]);
    let resolver = Resolver::new(&gpio);

    let first = resolver.enumerate_lines().unwrap();
    let second = resolver.enumerate_lines().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, (0..14).collect::<Vec<_>>());
}

#[test]
fn test_name_round_trip() {
    let gpio = gpio(&[6, 3]);
    let resolver = Resolver::new(&gpio);

    for pin in resolver.enumerate_lines().unwrap() {
        let name = resolver.name_of_pin(pin).unwrap().unwrap();
        assert_eq!(resolver.resolve_name(&name).unwrap(), pin);
    }
}

#[test]
fn test_unknown_and_empty_names() {
    let config = DummyConfig {
        chips: vec![DummyChipConfig::new(0, 2).with_line_names(vec![None, Some("LED".into())])],
        permission_denials: 0,
        interrupts: true,
    };
    let gpio = DummyGpio::new(config);
    let resolver = Resolver::new(&gpio);

    assert_eq!(resolver.resolve_name("LED").unwrap(), 1);
    assert_eq!(resolver.name_of_pin(0).unwrap(), None);
    assert!(matches!(resolver.resolve_name("MISSING"), Err(Error::NotFound(_))));
    assert!(matches!(resolver.resolve_name(""), Err(Error::NotFound(_))));
}

#[test]
fn test_chips_follow_node_name_order() {
    let chips = (0..11).map(|i| DummyChipConfig::new(i, 1)).collect();
    let gpio = DummyGpio::new(DummyConfig {
        chips,
        permission_denials: 0,
        interrupts: true,
    });
    let resolver = Resolver::new(&gpio);

    let summaries = resolver.chips().unwrap();
    let nodes: Vec<_> = summaries.iter().map(|c| c.node.as_str()).collect();
    assert_eq!(&nodes[..4], &["gpiochip0", "gpiochip1", "gpiochip10", "gpiochip2"]);
    assert_eq!(summaries[2].first_pin, 2);
    assert_eq!(resolver.resolve_pin(2).unwrap().0, "gpiochip10");
}

#[test]
fn test_lines_report_consumer_while_held() {
    let gpio = gpio(&[4]);
    let chip = gpio.open_chip("gpiochip0", Access::ReadWrite).unwrap();
    let held = chip
        .request_handle(HandleRequest::single(2, HandleFlags::OUTPUT, true, "holder"))
        .unwrap();

    let lines = Resolver::new(&gpio).lines().unwrap();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[2].consumer.as_deref(), Some("holder"));
    assert!(lines[2].is_used());
    assert_eq!(lines[2].direction(), Direction::Output);
    assert!(!lines[1].is_used());

    drop(held);
    let info = Resolver::new(&gpio).line_info(2).unwrap();
    assert_eq!(info.consumer, None);
}

#[test]
fn test_output_loops_back_to_input() {
    let gpio = gpio(&[32, 16]);

    let output = Line::open(&gpio, LineConfig::output(40).with_initial(true)).unwrap();
    assert_eq!(output.chip_name(), "gpiochip1");
    assert_eq!(output.offset(), 8);
    assert!(gpio.level("gpiochip1", 8).unwrap());

    let input = Line::open(&gpio, LineConfig::input(40)).unwrap();
    assert!(input.get().unwrap());

    output.set(false).unwrap();
    assert!(!input.get().unwrap());
}

#[test]
fn test_open_by_name() {
    let gpio = gpio(&[4, 4]);
    let line = Line::open(&gpio, LineConfig::input("LINE1_2")).unwrap();
    assert_eq!(line.pin(), 6);
    assert_eq!(line.name().unwrap().as_deref(), Some("LINE1_2"));
    assert!(matches!(
        Line::open(&gpio, LineConfig::input("NOPE")),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_active_low_inverts() {
    let gpio = gpio(&[4]);
    let output = Line::open(&gpio, LineConfig::output(1).with_active_low(true)).unwrap();
    output.set(true).unwrap();
    assert!(!gpio.level("gpiochip0", 1).unwrap());

    let input = Line::open(&gpio, LineConfig::input(1)).unwrap();
    assert!(!input.get().unwrap());
}

#[test]
fn test_wrong_mode() {
    let gpio = gpio(&[4]);
    let output = Line::open(&gpio, LineConfig::output(0)).unwrap();
    let input = Line::open(&gpio, LineConfig::input(1)).unwrap();

    assert!(matches!(
        output.get(),
        Err(Error::WrongMode {
            direction: Direction::Output,
            ..
        })
    ));
    assert!(matches!(
        input.set(true),
        Err(Error::WrongMode {
            direction: Direction::Input,
            ..
        })
    ));
}

#[test]
fn test_poll_zero_timeout_returns_immediately() {
    let gpio = gpio(&[4]);
    let line = Line::open(&gpio, LineConfig::input(3)).unwrap();

    let start = Instant::now();
    assert_eq!(line.poll(Edge::Rising, Some(Duration::ZERO)).unwrap(), None);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_both_edges_in_order() {
    let gpio = gpio(&[4]);
    let chip = gpio.open_chip("gpiochip0", Access::ReadWrite).unwrap();
    let events = chip
        .request_events(EventRequest::new(
            2,
            HandleFlags::INPUT,
            EventFlags::BOTH_EDGES,
            "test",
        ))
        .unwrap();

    gpio.inject_edge("gpiochip0", 2, Edge::Rising).unwrap();
    gpio.inject_edge("gpiochip0", 2, Edge::Falling).unwrap();

    assert!(events.wait_readable(Some(Duration::ZERO)).unwrap());
    let first = events.read_event().unwrap();
    let second = events.read_event().unwrap();
    assert_eq!(Edge::from_event_id(first.id), Some(Edge::Rising));
    assert_eq!(Edge::from_event_id(second.id), Some(Edge::Falling));
    assert!(first.timestamp < second.timestamp);
    assert!(!events.wait_readable(Some(Duration::ZERO)).unwrap());
}

#[test]
fn test_poll_returns_latched_edges_in_order() {
    let gpio = gpio(&[4]);
    let line = Line::open(&gpio, LineConfig::input(2)).unwrap();

    gpio.inject_edge("gpiochip0", 2, Edge::Both).unwrap();

    let timeout = Some(Duration::from_secs(1));
    let first = line.poll(Edge::Both, timeout).unwrap().unwrap();
    let second = line.poll(Edge::Both, timeout).unwrap().unwrap();
    assert_eq!(first.edge, Edge::Rising);
    assert_eq!(second.edge, Edge::Falling);
    assert_eq!(line.poll(Edge::Both, Some(Duration::ZERO)).unwrap(), None);
}

#[test]
fn test_poll_filters_edges() {
    let gpio = gpio(&[4]);
    let line = Line::open(&gpio, LineConfig::input(0)).unwrap();

    gpio.inject_edge("gpiochip0", 0, Edge::Rising).unwrap();
    assert_eq!(line.poll(Edge::Falling, Some(Duration::ZERO)).unwrap(), None);

    let event = line.poll(Edge::Rising, Some(Duration::ZERO)).unwrap().unwrap();
    assert_eq!(event.edge, Edge::Rising);
}

#[test]
fn test_poll_wakes_on_external_drive() {
    let gpio = gpio(&[4]);
    let line = Line::open(&gpio, LineConfig::input(1)).unwrap();

    let driver = gpio.clone();
    let handle = std::thread::spawn(move || {
        // Keep driving until the edge is observed so the test does not depend
        // on when the subscription is made
        let mut level = false;
        while driver.open_requests() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        for _ in 0..4 {
            level = !level;
            let _ = driver.drive("gpiochip0", 1, level);
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    let event = line.poll(Edge::Both, Some(Duration::from_secs(5))).unwrap();
    assert!(event.is_some());
    handle.join().unwrap();
}

#[test]
fn test_descriptors_released() {
    let gpio = gpio(&[4]);
    let output = Line::open(&gpio, LineConfig::output(0)).unwrap();
    let input = Line::open(&gpio, LineConfig::input(1)).unwrap();

    output.set(true).unwrap();
    input.get().unwrap();
    input.poll(Edge::Both, Some(Duration::ZERO)).unwrap();
    assert_eq!(gpio.open_requests(), 0);

    // Error path: the kernel refuses the handle while someone else holds it
    let chip = gpio.open_chip("gpiochip0", Access::ReadWrite).unwrap();
    let held = chip
        .request_handle(HandleRequest::single(1, HandleFlags::INPUT, false, "other"))
        .unwrap();
    assert!(matches!(
        input.get(),
        Err(Error::DeviceOperationFailed {
            request: RequestKind::LineHandle,
            code: libc::EBUSY
        })
    ));
    assert!(matches!(
        input.poll(Edge::Rising, Some(Duration::ZERO)),
        Err(Error::DeviceOperationFailed {
            request: RequestKind::LineEvent,
            ..
        })
    ));
    assert_eq!(gpio.open_requests(), 1);
    drop(held);
    assert_eq!(gpio.open_requests(), 0);
}

#[test]
fn test_descriptors_released_when_held_handle_fails() {
    let gpio = gpio(&[4]);
    let output = Line::open(&gpio, LineConfig::output(0)).unwrap();
    let input = Line::open(&gpio, LineConfig::input(1)).unwrap();

    gpio.fail_next(RequestKind::GetValues, libc::EIO);
    assert!(matches!(
        input.get(),
        Err(Error::DeviceOperationFailed {
            request: RequestKind::GetValues,
            code: libc::EIO
        })
    ));
    assert_eq!(gpio.open_requests(), 0);

    gpio.fail_next(RequestKind::SetValues, libc::EIO);
    assert!(matches!(
        output.set(true),
        Err(Error::DeviceOperationFailed {
            request: RequestKind::SetValues,
            code: libc::EIO
        })
    ));
    assert_eq!(gpio.open_requests(), 0);

    gpio.inject_edge("gpiochip0", 1, Edge::Rising).unwrap();
    gpio.truncate_next_read();
    match input.poll(Edge::Both, Some(Duration::from_secs(1))) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(gpio.open_requests(), 0);

    // Each failure fires once
    output.set(false).unwrap();
    assert!(!gpio.level("gpiochip0", 0).unwrap());
    input.get().unwrap();
    assert_eq!(input.poll(Edge::Both, Some(Duration::ZERO)).unwrap(), None);
    assert_eq!(gpio.open_requests(), 0);
}

#[test]
fn test_requests_on_wrong_descriptor() {
    let gpio = gpio(&[4]);
    let chip = gpio.open_chip("gpiochip0", Access::ReadOnly).unwrap();
    let mut data = HandleData::new();
    assert!(matches!(
        chip.control(Request::GetValues(&mut data)),
        Err(Error::DeviceOperationFailed {
            request: RequestKind::GetValues,
            code: libc::ENOTTY
        })
    ));

    let handle = chip
        .request_handle(HandleRequest::single(0, HandleFlags::INPUT, false, "test"))
        .unwrap();
    let mut info = ChipInfo::new();
    assert!(matches!(
        handle.control(Request::ChipInfo(&mut info)),
        Err(Error::DeviceOperationFailed {
            request: RequestKind::ChipInfo,
            code: libc::ENOTTY
        })
    ));
}

#[test]
fn test_handle_request_flag_validation() {
    let gpio = gpio(&[4]);
    let chip = gpio.open_chip("gpiochip0", Access::ReadWrite).unwrap();

    let mut unknown = HandleRequest::single(0, HandleFlags::INPUT, false, "test");
    unknown.flags |= 1 << 31;
    assert_eq!(unknown.handle_flags(), HandleFlags::INPUT);

    let conflicting = HandleRequest::single(
        0,
        HandleFlags::OUTPUT | HandleFlags::OPEN_DRAIN | HandleFlags::OPEN_SOURCE,
        false,
        "test",
    );
    for request in [unknown, conflicting] {
        assert!(matches!(
            chip.request_handle(request),
            Err(Error::DeviceOperationFailed {
                request: RequestKind::LineHandle,
                code: libc::EINVAL
            })
        ));
    }
    assert_eq!(gpio.open_requests(), 0);
}

#[test]
fn test_use_after_close() {
    let gpio = gpio(&[4]);
    let line = Line::open(&gpio, LineConfig::output(0)).unwrap();
    line.set(true).unwrap();

    line.close();
    line.close();
    assert!(line.is_closed());
    assert!(matches!(line.set(false), Err(Error::UseAfterClose)));
    assert!(matches!(line.get(), Err(Error::UseAfterClose)));
    assert!(matches!(
        line.poll(Edge::Rising, Some(Duration::ZERO)),
        Err(Error::UseAfterClose)
    ));
    assert!(matches!(line.name(), Err(Error::UseAfterClose)));
    assert!(line.to_string().contains("closed"));
}

#[test]
fn test_permission_denied_retry() {
    let gpio = DummyGpio::new(DummyConfig::with_line_counts(&[4]).with_permission_denials(3));
    let config = LineConfig::input(0).with_open_retries(20, Duration::from_millis(1));
    let line = Line::open(&gpio, config).unwrap();
    assert_eq!(gpio.permission_denials_left(), 0);
    assert_eq!(line.pin(), 0);
}

#[test]
fn test_permission_denied_retry_is_bounded() {
    let gpio = DummyGpio::new(DummyConfig::with_line_counts(&[4]).with_permission_denials(100));
    let config = LineConfig::input(0).with_open_retries(5, Duration::from_millis(1));

    let err = Line::open(&gpio, config).unwrap_err();
    assert!(err.is_permission_denied());
    assert_eq!(gpio.permission_denials_left(), 95);
}

#[test]
fn test_interrupts_unavailable() {
    let gpio = DummyGpio::new(DummyConfig::with_line_counts(&[4]).without_interrupts());
    let line = Arc::new(Line::open(&gpio, LineConfig::input(0)).unwrap());

    assert!(!line.interrupts_available());
    assert!(matches!(
        line.poll(Edge::Rising, Some(Duration::ZERO)),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        Notifier::start(Arc::clone(&line), Edge::Rising, |_| {}),
        Err(Error::Unsupported(_))
    ));
    assert_eq!(gpio.open_requests(), 0);

    gpio.set_interrupts_available(true);
    assert!(line.interrupts_available());
}

#[test]
fn test_drive_rejected_on_input() {
    let gpio = gpio(&[4]);
    let config = LineConfig::input(0).with_drive(lineio_core::Drive::OpenDrain);
    assert!(matches!(Line::open(&gpio, config), Err(Error::InvalidParameter(_))));

    let line = Line::open(
        &gpio,
        LineConfig::output(0).with_drive(lineio_core::Drive::OpenDrain),
    )
    .unwrap();
    line.set(true).unwrap();
    assert!(gpio.level("gpiochip0", 0).unwrap());
}

#[test]
fn test_notifier_start_stop_without_edges() {
    let gpio = gpio(&[4]);
    let line = Arc::new(Line::open(&gpio, LineConfig::input(0)).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let mut notifier = Notifier::start_with_interval(
        Arc::clone(&line),
        Edge::Both,
        Duration::from_millis(20),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();
    assert_eq!(notifier.state(), NotifierState::Running);

    let start = Instant::now();
    notifier.stop();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(notifier.state(), NotifierState::Stopped);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    notifier.stop();
    assert_eq!(notifier.state(), NotifierState::Stopped);
}

#[test]
fn test_notifier_delivers_edges_in_order() {
    let gpio = gpio(&[4]);
    let line = Arc::new(Line::open(&gpio, LineConfig::input(3)).unwrap());
    let (tx, rx) = mpsc::channel();

    let mut notifier = Notifier::start_with_interval(
        Arc::clone(&line),
        Edge::Both,
        Duration::from_millis(20),
        move |event| {
            let _ = tx.send(event.edge);
        },
    )
    .unwrap();

    gpio.inject_edge("gpiochip0", 3, Edge::Rising).unwrap();
    gpio.inject_edge("gpiochip0", 3, Edge::Falling).unwrap();

    let timeout = Duration::from_secs(5);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), Edge::Rising);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), Edge::Falling);

    notifier.stop();
    gpio.inject_edge("gpiochip0", 3, Edge::Rising).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_notifier_ends_when_line_closes() {
    let gpio = gpio(&[4]);
    let line = Arc::new(Line::open(&gpio, LineConfig::input(0)).unwrap());

    let mut notifier = Notifier::start_with_interval(
        Arc::clone(&line),
        Edge::Rising,
        Duration::from_millis(10),
        |_| {},
    )
    .unwrap();

    line.close();
    assert!(wait_until(Duration::from_secs(5), || {
        notifier.state() == NotifierState::Stopped
    }));
    notifier.stop();
    assert_eq!(gpio.open_requests(), 0);
}

#[test]
fn test_notifier_refuses_closed_line() {
    let gpio = gpio(&[4]);
    let line = Arc::new(Line::open(&gpio, LineConfig::input(0)).unwrap());
    line.close();
    assert!(matches!(
        Notifier::start(line, Edge::Rising, |_| {}),
        Err(Error::UseAfterClose)
    ));
}
