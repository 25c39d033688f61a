//! Emulated controller state
//!
//! All controllers of one [`DummyGpio`](crate::DummyGpio) share a single
//! [`State`] behind a mutex. Handle and event requests are recorded in a
//! table keyed by a fake descriptor number; dropping the descriptor object
//! removes the entry and frees the line.

use lineio_core::uapi::{
    read_label, write_label, ChipInfo, EventData, EventFlags, EventRequest, HandleData,
    HandleFlags, HandleRequest, LineFlags, LineInfo, RequestKind, GPIOEVENT_EVENT_FALLING_EDGE,
    GPIOEVENT_EVENT_RISING_EDGE,
};
use lineio_core::{Edge, Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// First fake descriptor number handed out
const FIRST_FD: i32 = 100;

#[derive(Debug)]
pub(crate) struct EmulatedLine {
    pub name: Option<String>,
    /// Physical level
    pub level: bool,
    pub is_output: bool,
    pub active_low: bool,
    pub consumer: Option<String>,
    /// Edges waiting for the next subscription
    pub latched: VecDeque<EventData>,
}

#[derive(Debug)]
pub(crate) struct EmulatedChip {
    pub node: String,
    pub name: String,
    pub label: String,
    pub lines: Vec<EmulatedLine>,
}

#[derive(Debug)]
pub(crate) enum Claim {
    Handle {
        chip: usize,
        offsets: Vec<u32>,
        flags: HandleFlags,
    },
    Events {
        chip: usize,
        offset: u32,
        active_low: bool,
        events: EventFlags,
        queue: VecDeque<EventData>,
    },
}

#[derive(Debug)]
pub(crate) struct State {
    pub chips: Vec<EmulatedChip>,
    pub claims: HashMap<i32, Claim>,
    pub next_fd: i32,
    pub permission_denials: u32,
    pub interrupts: bool,
    /// One-shot failures: errno returned by the next request of each kind
    pub failures: HashMap<RequestKind, i32>,
    /// Number of upcoming event reads cut short
    pub short_reads: u32,
    epoch: Instant,
    last_timestamp: u64,
}

impl State {
    pub fn new(chips: Vec<EmulatedChip>, permission_denials: u32, interrupts: bool) -> Self {
        Self {
            chips,
            claims: HashMap::new(),
            next_fd: FIRST_FD,
            permission_denials,
            interrupts,
            failures: HashMap::new(),
            short_reads: 0,
            epoch: Instant::now(),
            last_timestamp: 0,
        }
    }

    /// Consume a pending failure for `kind`
    pub fn take_failure(&mut self, kind: RequestKind) -> Result<()> {
        match self.failures.remove(&kind) {
            Some(code) => {
                log::trace!("dummy: failing {} with errno {}", kind, code);
                Err(Error::device(kind, code))
            }
            None => Ok(()),
        }
    }

    pub fn chip_index(&self, node: &str) -> Option<usize> {
        self.chips.iter().position(|c| c.node == node)
    }

    fn line(&self, chip: usize, offset: u32, kind: RequestKind) -> Result<&EmulatedLine> {
        self.chips[chip]
            .lines
            .get(offset as usize)
            .ok_or(Error::device(kind, libc::EINVAL))
    }

    fn line_mut(&mut self, chip: usize, offset: u32, kind: RequestKind) -> Result<&mut EmulatedLine> {
        self.chips[chip]
            .lines
            .get_mut(offset as usize)
            .ok_or(Error::device(kind, libc::EINVAL))
    }

    fn is_claimed(&self, chip: usize, offset: u32) -> bool {
        self.claims.values().any(|claim| match claim {
            Claim::Handle {
                chip: c, offsets, ..
            } => *c == chip && offsets.contains(&offset),
            Claim::Events {
                chip: c, offset: o, ..
            } => *c == chip && *o == offset,
        })
    }

    fn allocate_fd(&mut self) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    fn timestamp(&mut self) -> u64 {
        let now = self.epoch.elapsed().as_nanos() as u64;
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }

    pub fn chip_info(&self, chip: usize, info: &mut ChipInfo) {
        let chip = &self.chips[chip];
        write_label(&mut info.name, &chip.name);
        write_label(&mut info.label, &chip.label);
        info.lines = chip.lines.len() as u32;
    }

    pub fn line_info(&self, chip: usize, info: &mut LineInfo) -> Result<()> {
        let offset = info.line_offset;
        let claimed = self.is_claimed(chip, offset);
        let line = self.line(chip, offset, RequestKind::LineInfo)?;

        let mut flags = LineFlags::empty();
        if claimed {
            flags |= LineFlags::KERNEL;
        }
        if line.is_output {
            flags |= LineFlags::IS_OUT;
        }
        if line.active_low {
            flags |= LineFlags::ACTIVE_LOW;
        }

        info.flags = flags.bits();
        write_label(&mut info.name, line.name.as_deref().unwrap_or(""));
        write_label(&mut info.consumer, line.consumer.as_deref().unwrap_or(""));
        Ok(())
    }

    pub fn request_handle(&mut self, chip: usize, req: &mut HandleRequest) -> Result<()> {
        let kind = RequestKind::LineHandle;
        let flags = req.handle_flags();
        let output = flags.contains(HandleFlags::OUTPUT);
        if flags.bits() != req.flags
            || req.lines == 0
            || flags.contains(HandleFlags::INPUT | HandleFlags::OUTPUT)
            || flags.contains(HandleFlags::OPEN_DRAIN | HandleFlags::OPEN_SOURCE)
            || (!output && flags.intersects(HandleFlags::OPEN_DRAIN | HandleFlags::OPEN_SOURCE))
        {
            return Err(Error::device(kind, libc::EINVAL));
        }

        let offsets = req.offsets().to_vec();
        for &offset in &offsets {
            self.line(chip, offset, kind)?;
            if self.is_claimed(chip, offset) {
                return Err(Error::device(kind, libc::EBUSY));
            }
        }

        let consumer = read_label(&req.consumer_label);
        for (i, &offset) in offsets.iter().enumerate() {
            let default = req.default_values[i] != 0;
            let line = self.line_mut(chip, offset, kind)?;
            line.consumer = consumer.clone();
            line.active_low = flags.contains(HandleFlags::ACTIVE_LOW);
            if output || flags.contains(HandleFlags::INPUT) {
                line.is_output = output;
            }
            if output {
                let physical = default ^ line.active_low;
                self.change_level(chip, offset, physical);
            }
        }

        let fd = self.allocate_fd();
        log::trace!("dummy: handle fd {} on chip {} lines {:?}", fd, chip, offsets);
        self.claims.insert(
            fd,
            Claim::Handle {
                chip,
                offsets,
                flags,
            },
        );
        req.fd = fd;
        Ok(())
    }

    pub fn request_events(&mut self, chip: usize, req: &mut EventRequest) -> Result<()> {
        let kind = RequestKind::LineEvent;
        let offset = req.lineoffset;
        let flags = req.handle_flags();
        if flags.intersects(HandleFlags::OUTPUT | HandleFlags::OPEN_DRAIN | HandleFlags::OPEN_SOURCE)
        {
            return Err(Error::device(kind, libc::EINVAL));
        }
        self.line(chip, offset, kind)?;
        if self.is_claimed(chip, offset) {
            return Err(Error::device(kind, libc::EBUSY));
        }

        let events = req.event_flags();
        let active_low = flags.contains(HandleFlags::ACTIVE_LOW);
        let consumer = read_label(&req.consumer_label);

        let line = self.line_mut(chip, offset, kind)?;
        line.is_output = false;
        line.active_low = active_low;
        line.consumer = consumer;

        let mut queue = VecDeque::new();
        let mut kept = VecDeque::new();
        for event in line.latched.drain(..) {
            if event_matches(events, event.id) {
                queue.push_back(event);
            } else {
                kept.push_back(event);
            }
        }
        line.latched = kept;

        let fd = self.allocate_fd();
        log::trace!("dummy: event fd {} on chip {} line {}", fd, chip, offset);
        self.claims.insert(
            fd,
            Claim::Events {
                chip,
                offset,
                active_low,
                events,
                queue,
            },
        );
        req.fd = fd;
        Ok(())
    }

    pub fn get_values(&self, fd: i32, data: &mut HandleData) -> Result<()> {
        let kind = RequestKind::GetValues;
        match self.claims.get(&fd) {
            Some(Claim::Handle {
                chip,
                offsets,
                flags,
            }) => {
                let active_low = flags.contains(HandleFlags::ACTIVE_LOW);
                for (i, &offset) in offsets.iter().enumerate() {
                    let line = self.line(*chip, offset, kind)?;
                    data.values[i] = (line.level ^ active_low) as u8;
                }
                Ok(())
            }
            Some(Claim::Events {
                chip,
                offset,
                active_low,
                ..
            }) => {
                let line = self.line(*chip, *offset, kind)?;
                data.values[0] = (line.level ^ *active_low) as u8;
                Ok(())
            }
            None => Err(Error::device(kind, libc::EBADF)),
        }
    }

    pub fn set_values(&mut self, fd: i32, data: &HandleData) -> Result<()> {
        let kind = RequestKind::SetValues;
        let (chip, offsets, active_low) = match self.claims.get(&fd) {
            Some(Claim::Handle {
                chip,
                offsets,
                flags,
            }) => {
                if !flags.contains(HandleFlags::OUTPUT) {
                    return Err(Error::device(kind, libc::EPERM));
                }
                (*chip, offsets.clone(), flags.contains(HandleFlags::ACTIVE_LOW))
            }
            Some(Claim::Events { .. }) => return Err(Error::device(kind, libc::EINVAL)),
            None => return Err(Error::device(kind, libc::EBADF)),
        };

        for (i, offset) in offsets.into_iter().enumerate() {
            let physical = (data.values[i] != 0) ^ active_low;
            self.change_level(chip, offset, physical);
        }
        Ok(())
    }

    /// Set a line's physical level and report the transition to subscribers
    pub fn change_level(&mut self, chip: usize, offset: u32, physical: bool) {
        let Some(line) = self.chips[chip].lines.get_mut(offset as usize) else {
            return;
        };
        if line.level == physical {
            return;
        }
        line.level = physical;

        let timestamp = self.timestamp();
        for claim in self.claims.values_mut() {
            if let Claim::Events {
                chip: c,
                offset: o,
                active_low,
                events,
                queue,
            } = claim
            {
                if *c != chip || *o != offset {
                    continue;
                }
                let id = edge_id(physical ^ *active_low);
                if event_matches(*events, id) {
                    queue.push_back(EventData::new(timestamp, id));
                }
            }
        }
    }

    /// Record a logical edge, delivering it to a current subscriber or
    /// latching it for the next one
    pub fn inject(&mut self, chip: usize, offset: u32, edge: Edge) {
        let ids: &[u32] = match edge {
            Edge::Rising => &[GPIOEVENT_EVENT_RISING_EDGE],
            Edge::Falling => &[GPIOEVENT_EVENT_FALLING_EDGE],
            Edge::Both => &[GPIOEVENT_EVENT_RISING_EDGE, GPIOEVENT_EVENT_FALLING_EDGE],
        };

        for &id in ids {
            let timestamp = self.timestamp();
            let event = EventData::new(timestamp, id);
            let subscriber = self.claims.values_mut().find_map(|claim| match claim {
                Claim::Events {
                    chip: c,
                    offset: o,
                    events,
                    queue,
                    ..
                } if *c == chip && *o == offset && event_matches(*events, id) => Some(queue),
                _ => None,
            });
            match subscriber {
                Some(queue) => queue.push_back(event),
                None => {
                    if let Some(line) = self.chips[chip].lines.get_mut(offset as usize) {
                        line.latched.push_back(event);
                    }
                }
            }

            if let Some(line) = self.chips[chip].lines.get_mut(offset as usize) {
                line.level = (id == GPIOEVENT_EVENT_RISING_EDGE) ^ line.active_low;
            }
        }
    }

    pub fn pending_events(&self, fd: i32) -> bool {
        matches!(self.claims.get(&fd), Some(Claim::Events { queue, .. }) if !queue.is_empty())
    }

    pub fn pop_event(&mut self, fd: i32) -> Option<EventData> {
        match self.claims.get_mut(&fd) {
            Some(Claim::Events { queue, .. }) => queue.pop_front(),
            _ => None,
        }
    }

    /// Drop a descriptor; unread edges go back to the line's latch
    pub fn release(&mut self, fd: i32) {
        let Some(claim) = self.claims.remove(&fd) else {
            return;
        };
        log::trace!("dummy: released fd {}", fd);
        match claim {
            Claim::Handle { chip, offsets, .. } => {
                for offset in offsets {
                    if let Some(line) = self.chips[chip].lines.get_mut(offset as usize) {
                        line.consumer = None;
                    }
                }
            }
            Claim::Events {
                chip,
                offset,
                mut queue,
                ..
            } => {
                if let Some(line) = self.chips[chip].lines.get_mut(offset as usize) {
                    line.consumer = None;
                    queue.append(&mut line.latched);
                    line.latched = queue;
                }
            }
        }
    }
}

/// State plus the condition variable signalled on every change
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<State>,
    pub changed: Condvar,
}

impl Shared {
    pub fn new(state: State) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn edge_id(logical: bool) -> u32 {
    if logical {
        GPIOEVENT_EVENT_RISING_EDGE
    } else {
        GPIOEVENT_EVENT_FALLING_EDGE
    }
}

fn event_matches(events: EventFlags, id: u32) -> bool {
    match id {
        GPIOEVENT_EVENT_RISING_EDGE => events.contains(EventFlags::RISING_EDGE),
        GPIOEVENT_EVENT_FALLING_EDGE => events.contains(EventFlags::FALLING_EDGE),
        _ => false,
    }
}
