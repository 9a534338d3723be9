//! Wait/event bridge
//!
//! Win32-style event objects: manual- or auto-reset, waited on singly or in groups,
//! with alertable waits. Every event of a bridge lives in one table guarded by a
//! `parking_lot` mutex, and a single condvar is notified whenever any event changes, so
//! multi-object waits observe all of their handles atomically.
//!
//! Status codes and error codes follow `WaitForMultipleObjectsEx`.

use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::error::{win32, PlatformError, Result};
use crate::handle::Handle;
use crate::interop::Interop;

const FIRST_EVENT: usize = 0x1000;
const EVENT_STRIDE: usize = 4;

/// `INFINITE`
pub const INFINITE: u32 = u32::MAX;

/// How long a wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    Infinite,
    Millis(u32),
}

impl Timeout {
    /// From a Win32 millisecond value, where `INFINITE` never expires
    pub fn from_millis(ms: u32) -> Self {
        if ms == INFINITE {
            Timeout::Infinite
        } else {
            Timeout::Millis(ms)
        }
    }

    fn deadline(self, start: Instant) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(start + Duration::from_millis(ms as u64)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::Millis(u32::try_from(duration.as_millis()).unwrap_or(INFINITE - 1))
    }
}

/// Outcome of a wait that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// The event at this index released the wait (index 0 for wait-all)
    Signaled(usize),
    /// The event at this index was closed while waiting
    Abandoned(usize),
    TimedOut,
    /// An alert was delivered to the waiting thread
    Alerted,
}

impl WaitStatus {
    /// `WAIT_OBJECT_0 + i`, `WAIT_ABANDONED_0 + i`, `WAIT_TIMEOUT` or `WAIT_IO_COMPLETION`
    pub fn to_raw(self) -> u32 {
        match self {
            WaitStatus::Signaled(i) => i as u32,
            WaitStatus::Abandoned(i) => 0x80 + i as u32,
            WaitStatus::TimedOut => 0x102,
            WaitStatus::Alerted => 0xC0,
        }
    }
}

#[derive(Debug)]
struct Event {
    manual_reset: bool,
    signaled: bool,
}

#[derive(Default)]
struct EventTable {
    events: FxHashMap<usize, Event>,
    next: usize,
    alerts: FxHashSet<ThreadId>,
}

impl EventTable {
    fn allocate_id(&mut self) -> usize {
        loop {
            let id = self.next;
            self.next = self.next.wrapping_add(EVENT_STRIDE).max(FIRST_EVENT);
            if !self.events.contains_key(&id) {
                return id;
            }
        }
    }

    fn try_complete(&mut self, handles: &[Handle], wait_all: bool) -> Option<WaitStatus> {
        if let Some(i) = handles
            .iter()
            .position(|h| !self.events.contains_key(&h.addr()))
        {
            return Some(WaitStatus::Abandoned(i));
        }

        let signaled = |table: &Self, h: &Handle| {
            table.events.get(&h.addr()).map_or(false, |e| e.signaled)
        };

        if wait_all {
            if handles.iter().all(|h| signaled(self, h)) {
                for h in handles {
                    self.consume(*h);
                }
                return Some(WaitStatus::Signaled(0));
            }
        } else if let Some(i) = handles.iter().position(|h| signaled(self, h)) {
            self.consume(handles[i]);
            return Some(WaitStatus::Signaled(i));
        }
        None
    }

    fn consume(&mut self, handle: Handle) {
        if let Some(event) = self.events.get_mut(&handle.addr()) {
            if !event.manual_reset {
                event.signaled = false;
            }
        }
    }
}

/// A set of events sharing one lock and condvar
pub struct EventBridge {
    table: Mutex<EventTable>,
    changed: Condvar,
    max_events: usize,
    max_wait_handles: usize,
}

impl EventBridge {
    pub fn new(max_events: usize, max_wait_handles: usize) -> Self {
        Self {
            table: Mutex::new(EventTable {
                next: FIRST_EVENT,
                ..Default::default()
            }),
            changed: Condvar::new(),
            max_events,
            max_wait_handles,
        }
    }

    /// `CreateEvent`
    pub fn create_event(&self, manual_reset: bool, initial_state: bool) -> Result<Handle> {
        let mut table = self.table.lock();
        if table.events.len() >= self.max_events {
            return Err(PlatformError::from_win32(win32::ERROR_NOT_ENOUGH_MEMORY).into());
        }
        let id = table.allocate_id();
        table.events.insert(
            id,
            Event {
                manual_reset,
                signaled: initial_state,
            },
        );
        let handle = Handle::from_addr(id);
        debug!(%handle, manual_reset, initial_state, "created event");
        Ok(handle)
    }

    /// `SetEvent`
    pub fn set_event(&self, handle: Handle) -> Result<()> {
        self.update(handle, true)
    }

    /// `ResetEvent`
    pub fn reset_event(&self, handle: Handle) -> Result<()> {
        self.update(handle, false)
    }

    fn update(&self, handle: Handle, signaled: bool) -> Result<()> {
        let mut table = self.table.lock();
        let event = table
            .events
            .get_mut(&handle.addr())
            .ok_or_else(|| PlatformError::from_win32(win32::ERROR_INVALID_HANDLE))?;
        event.signaled = signaled;
        drop(table);
        if signaled {
            self.changed.notify_all();
        }
        Ok(())
    }

    /// `CloseHandle`. Waiters on the event observe [`WaitStatus::Abandoned`].
    pub fn close(&self, handle: Handle) -> bool {
        let removed = self.table.lock().events.remove(&handle.addr()).is_some();
        if removed {
            debug!(%handle, "closed event");
            self.changed.notify_all();
        }
        removed
    }

    /// Queue an alert for `thread`, delivered to its next (or current) alertable wait.
    ///
    /// An alert stays queued until an alertable wait or [`take_alert`](Self::take_alert)
    /// consumes it, so at most `max_events` threads may have one pending. Returns `false`
    /// when the queue is full and the alert was dropped.
    pub fn alert(&self, thread: ThreadId) -> bool {
        let mut table = self.table.lock();
        if !table.alerts.contains(&thread) && table.alerts.len() >= self.max_events {
            return false;
        }
        table.alerts.insert(thread);
        drop(table);
        self.changed.notify_all();
        true
    }

    /// Threads with an undelivered alert
    pub fn pending_alerts(&self) -> usize {
        self.table.lock().alerts.len()
    }

    /// `WaitForSingleObjectEx`
    pub fn wait_one(
        &self,
        handle: Handle,
        timeout: Timeout,
        alertable: bool,
    ) -> Result<WaitStatus> {
        self.wait_many(&[handle], true, timeout, alertable)
    }

    /// `WaitForMultipleObjectsEx`
    pub fn wait_many(
        &self,
        handles: &[Handle],
        wait_all: bool,
        timeout: Timeout,
        alertable: bool,
    ) -> Result<WaitStatus> {
        if handles.is_empty() || handles.len() > self.max_wait_handles {
            return Err(PlatformError::from_win32(win32::ERROR_INVALID_PARAMETER).into());
        }
        if wait_all {
            let mut seen = FxHashSet::default();
            if !handles.iter().all(|h| seen.insert(h.addr())) {
                return Err(PlatformError::from_win32(win32::ERROR_INVALID_PARAMETER).into());
            }
        }

        let deadline = timeout.deadline(Instant::now());
        let current = thread::current().id();
        let mut table = self.table.lock();

        if handles.iter().any(|h| !table.events.contains_key(&h.addr())) {
            return Err(PlatformError::from_win32(win32::ERROR_INVALID_HANDLE).into());
        }

        loop {
            if alertable && table.alerts.remove(&current) {
                trace!("wait alerted");
                return Ok(WaitStatus::Alerted);
            }
            if let Some(status) = table.try_complete(handles, wait_all) {
                return Ok(status);
            }
            match deadline {
                None => self.changed.wait(&mut table),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(WaitStatus::TimedOut);
                    }
                    // Timing out here still rechecks state before returning.
                    let _ = self.changed.wait_until(&mut table, deadline);
                }
            }
        }
    }

    /// Number of open events
    pub fn len(&self) -> usize {
        self.table.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().events.is_empty()
    }

    /// Current signal state, for diagnostics
    pub fn is_signaled(&self, handle: Handle) -> Option<bool> {
        self.table.lock().events.get(&handle.addr()).map(|e| e.signaled)
    }

    /// Clear a queued alert without waiting. Returns whether one was pending.
    pub fn take_alert(&self, thread: ThreadId) -> bool {
        self.table.lock().alerts.remove(&thread)
    }
}

impl fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("events", &self.len())
            .field("max_events", &self.max_events)
            .field("max_wait_handles", &self.max_wait_handles)
            .finish()
    }
}

impl Interop {
    pub fn create_event(&self, manual_reset: bool, initial_state: bool) -> Result<Handle> {
        self.events.create_event(manual_reset, initial_state)
    }

    pub fn set_event(&self, handle: Handle) -> Result<()> {
        self.events.set_event(handle)
    }

    pub fn reset_event(&self, handle: Handle) -> Result<()> {
        self.events.reset_event(handle)
    }

    pub fn wait_one(
        &self,
        handle: Handle,
        timeout: Timeout,
        alertable: bool,
    ) -> Result<WaitStatus> {
        self.events.wait_one(handle, timeout, alertable)
    }

    pub fn wait_many(
        &self,
        handles: &[Handle],
        wait_all: bool,
        timeout: Timeout,
        alertable: bool,
    ) -> Result<WaitStatus> {
        self.events.wait_many(handles, wait_all, timeout, alertable)
    }

    /// Close an event. `false` if the handle is not an open event.
    pub fn close(&self, handle: Handle) -> bool {
        self.events.close(handle)
    }

    pub fn alert(&self, thread: ThreadId) -> bool {
        self.events.alert(thread)
    }

    /// Number of open events
    pub fn live_events(&self) -> usize {
        self.events.len()
    }
}
