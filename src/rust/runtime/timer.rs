// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Timer facilities used to fire delay suspension points and the periodic maintenance of task pools.
//!
//! A facility only ever invokes callbacks. Callbacks are expected to do nothing more than set a flag, so they may
//! run on an interrupt-like context such as the worker thread of a [ThreadTimer].

mod thread;

//==============================================================================
// Exports
//==============================================================================

pub use self::thread::ThreadTimer;

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    SharedObject,
};
use ::core::cmp::Reverse;
use ::std::{
    cell::RefCell,
    collections::{
        BinaryHeap,
        HashMap,
    },
    rc::Rc,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Static Variables
//==============================================================================

/// Source of timer handles. Handles are never reused, so a stale queue entry can never match a newer registration.
static NEXT_TIMER_HANDLE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Timer facility used by delay points and pools that were not given one explicitly.
    static DEFAULT_TIMER: RefCell<Option<Rc<dyn TimerFacility>>> = RefCell::new(None);
}

//==============================================================================
// Structures
//==============================================================================

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

/// Identifies a registration in a [TimerFacility].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerHandle(u64);

struct TimerQueueEntry {
    expiry: Instant,
    handle: TimerHandle,
}

struct Registration {
    /// Taken out while the callback runs.
    callback: Option<TimerCallback>,
    interval: Duration,
    repeating: bool,
}

/// Queue of timer registrations ordered by expiration.
#[derive(Default)]
pub(crate) struct TimerQueue {
    // Use a reverse to get a min heap.
    heap: BinaryHeap<Reverse<TimerQueueEntry>>,
    registrations: HashMap<TimerHandle, Registration>,
}

/// Timer that is driven by an explicit clock.
struct Timer {
    now: Instant,
    queue: TimerQueue,
}

/// Deterministic timer facility. Time only moves when [SharedTimer::advance_clock] is called.
#[derive(Clone)]
pub struct SharedTimer(SharedObject<RefCell<Timer>>);

//==============================================================================
// Traits
//==============================================================================

/// Periodic and one-shot timer facility.
pub trait TimerFacility {
    /// Registers `callback` to fire after `interval_ns` nanoseconds, and then every `interval_ns` if `repeating`.
    fn register(&self, callback: TimerCallback, interval_ns: u64, repeating: bool) -> TimerHandle;

    /// Tears down a registration. Unregistering a timer that already fired or was never registered is a no-op.
    fn unregister(&self, handle: TimerHandle);
}

//==============================================================================
// Associate Functions
//==============================================================================

impl TimerHandle {
    fn next() -> Self {
        Self(NEXT_TIMER_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl TimerQueue {
    pub fn insert(
        &mut self,
        handle: TimerHandle,
        callback: TimerCallback,
        interval: Duration,
        repeating: bool,
        now: Instant,
    ) {
        self.registrations.insert(
            handle,
            Registration {
                callback: Some(callback),
                interval,
                repeating,
            },
        );
        self.heap.push(Reverse(TimerQueueEntry {
            expiry: now + interval,
            handle,
        }));
    }

    /// Removes a registration. Its queue entries are discarded lazily once they expire.
    pub fn remove(&mut self, handle: TimerHandle) -> bool {
        self.registrations.remove(&handle).is_some()
    }

    /// Returns the earliest expiration in the queue, which may belong to a removed registration.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.expiry)
    }

    /// Pops every live registration that expired at `now` and takes its callback out. Each registration is returned
    /// at most once per call, even if it is repeating with an interval shorter than the elapsed time.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(TimerHandle, Instant, TimerCallback)> {
        let mut expired: Vec<(TimerHandle, Instant, TimerCallback)> = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if now < entry.expiry {
                break;
            }
            let expiry: Instant = entry.expiry;
            let handle: TimerHandle = entry.handle;
            self.heap.pop();
            if let Some(callback) = self
                .registrations
                .get_mut(&handle)
                .and_then(|registration| registration.callback.take())
            {
                expired.push((handle, expiry, callback));
            }
        }
        expired
    }

    /// Gives back the callback of a registration that just fired. Repeating registrations are re-armed, one-shot
    /// registrations are dropped.
    pub fn restore(&mut self, handle: TimerHandle, expiry: Instant, callback: TimerCallback, now: Instant) {
        let Some(registration) = self.registrations.get_mut(&handle) else {
            return;
        };
        if !registration.repeating {
            self.registrations.remove(&handle);
            return;
        }
        registration.callback = Some(callback);
        let next: Instant = ::std::cmp::max(expiry + registration.interval, now + registration.interval);
        self.heap.push(Reverse(TimerQueueEntry { expiry: next, handle }));
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }
}

impl SharedTimer {
    pub fn new(now: Instant) -> Self {
        Self(SharedObject::new(RefCell::new(Timer {
            now,
            queue: TimerQueue::default(),
        })))
    }

    /// Moves time forward and fires every timer that expired. Callbacks run without the timer borrowed, so they may
    /// register or unregister timers themselves.
    pub fn advance_clock(&self, now: Instant) {
        let expired: Vec<(TimerHandle, Instant, TimerCallback)> = {
            let mut timer = self.0.borrow_mut();
            if now < timer.now {
                warn!("advance_clock(): clock cannot move backwards");
                return;
            }
            timer.now = now;
            timer.queue.take_expired(now)
        };

        for (handle, expiry, mut callback) in expired {
            trace!("advance_clock(): firing timer {:?}", handle);
            callback();
            self.0.borrow_mut().queue.restore(handle, expiry, callback, now);
        }
    }

    /// Moves time forward by `delta`.
    pub fn advance_by(&self, delta: Duration) {
        let now: Instant = self.now() + delta;
        self.advance_clock(now)
    }

    pub fn now(&self) -> Instant {
        self.0.borrow().now
    }

    /// Returns the number of live registrations.
    pub fn num_timers(&self) -> usize {
        self.0.borrow().queue.len()
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Returns the timer facility of the current scheduler thread. A [ThreadTimer] is created on first use.
pub fn default_timer() -> Result<Rc<dyn TimerFacility>, Fail> {
    DEFAULT_TIMER.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(timer) = slot.as_ref() {
            return Ok(timer.clone());
        }
        let timer: Rc<dyn TimerFacility> = Rc::new(ThreadTimer::new()?);
        *slot = Some(timer.clone());
        Ok(timer)
    })
}

/// Replaces the timer facility of the current scheduler thread and returns the previous one.
pub fn set_default_timer(timer: Rc<dyn TimerFacility>) -> Option<Rc<dyn TimerFacility>> {
    DEFAULT_TIMER.with(|slot| slot.borrow_mut().replace(timer))
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl TimerFacility for SharedTimer {
    fn register(&self, callback: TimerCallback, interval_ns: u64, repeating: bool) -> TimerHandle {
        let handle: TimerHandle = TimerHandle::next();
        let mut timer = self.0.borrow_mut();
        let now: Instant = timer.now;
        timer
            .queue
            .insert(handle, callback, Duration::from_nanos(interval_ns), repeating, now);
        handle
    }

    fn unregister(&self, handle: TimerHandle) {
        if !self.0.borrow_mut().queue.remove(handle) {
            trace!("unregister(): no such timer {:?}", handle);
        }
    }
}

impl Default for SharedTimer {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &TimerQueueEntry) -> bool {
        self.expiry == other.expiry && self.handle == other.handle
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &TimerQueueEntry) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &TimerQueueEntry) -> core::cmp::Ordering {
        // Break ties by registration order.
        self.expiry
            .cmp(&other.expiry)
            .then_with(|| self.handle.cmp(&other.handle))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
