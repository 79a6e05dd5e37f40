// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Suspension points.
//!
//! A coroutine hands a [SuspensionPoint] back to its pool each time it yields. The pool does not step the task again
//! until [SuspensionPoint::can_continue] returns true. Delay and manual points only ever go from "waiting" to
//! "continuable"; a predicate point mirrors its condition every time it is asked.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    timer::{
        self,
        TimerFacility,
        TimerHandle,
    },
};
use ::std::{
    fmt,
    rc::{
        Rc,
        Weak,
    },
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Nanoseconds in a millisecond.
pub const NANOS_PER_MILLI: u64 = 1_000_000;
/// Milliseconds in a second.
pub const MILLIS_PER_SEC: u64 = 1_000;
/// Seconds in a minute.
pub const SECS_PER_MIN: u64 = 60;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One-shot timer registration behind a [DelayPoint]. Torn down when the last clone of the point is dropped.
struct DelayRegistration {
    elapsed: Arc<AtomicBool>,
    handle: TimerHandle,
    nanoseconds: u64,
    timer: Weak<dyn TimerFacility>,
}

/// Waits until a one-shot timer fires.
#[derive(Clone)]
pub struct DelayPoint(Rc<DelayRegistration>);

/// Waits until a condition holds.
#[derive(Clone)]
pub struct PredicatePoint {
    condition: Rc<dyn Fn() -> bool>,
}

/// Waits until someone calls [ManualPoint::release]. Clones share the same state, so the point can be handed to
/// whichever task, thread or interrupt handler signals the awaited event.
#[derive(Clone, Default)]
pub struct ManualPoint {
    released: Arc<AtomicBool>,
}

/// A point at which a suspended task waits before it may be stepped again.
#[derive(Clone)]
pub enum SuspensionPoint {
    Delay(DelayPoint),
    Predicate(PredicatePoint),
    Manual(ManualPoint),
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SuspensionPoint {
    /// Waits for `nanoseconds` on the timer facility of the current thread.
    pub fn delay(nanoseconds: u64) -> Result<Self, Fail> {
        let timer: Rc<dyn TimerFacility> = timer::default_timer()?;
        Ok(Self::delay_on(&timer, nanoseconds))
    }

    /// Waits for `nanoseconds` on `timer`.
    pub fn delay_on(timer: &Rc<dyn TimerFacility>, nanoseconds: u64) -> Self {
        Self::Delay(DelayPoint::new(timer, nanoseconds))
    }

    /// Waits for `ms` milliseconds on the timer facility of the current thread.
    pub fn delay_ms(ms: u64) -> Result<Self, Fail> {
        Self::delay(to_nanoseconds::from_millis(ms)?)
    }

    /// Waits for `s` seconds on the timer facility of the current thread.
    pub fn delay_secs(s: u64) -> Result<Self, Fail> {
        Self::delay(to_nanoseconds::from_secs(s)?)
    }

    /// Waits for `m` minutes on the timer facility of the current thread.
    pub fn delay_mins(m: u64) -> Result<Self, Fail> {
        Self::delay(to_nanoseconds::from_mins(m)?)
    }

    /// Waits until `condition` returns true.
    pub fn until<F: Fn() -> bool + 'static>(condition: F) -> Self {
        Self::Predicate(PredicatePoint {
            condition: Rc::new(condition),
        })
    }

    /// Checks if the task that yielded this point may continue.
    pub fn can_continue(&self) -> bool {
        match self {
            Self::Delay(point) => point.has_elapsed(),
            Self::Predicate(point) => (point.condition)(),
            Self::Manual(point) => point.is_released(),
        }
    }
}

impl DelayPoint {
    /// Registers a one-shot timer that marks this point as elapsed. The point does not keep `timer` alive.
    pub fn new(timer: &Rc<dyn TimerFacility>, nanoseconds: u64) -> Self {
        let elapsed: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
        let flag: Arc<AtomicBool> = elapsed.clone();
        let handle: TimerHandle = timer.register(Box::new(move || flag.store(true, Ordering::Release)), nanoseconds, false);
        trace!("new(): delay of {:?} ns armed on timer {:?}", nanoseconds, handle);
        Self(Rc::new(DelayRegistration {
            elapsed,
            handle,
            nanoseconds,
            timer: Rc::downgrade(timer),
        }))
    }

    pub fn has_elapsed(&self) -> bool {
        self.0.elapsed.load(Ordering::Acquire)
    }

    pub fn timer_handle(&self) -> TimerHandle {
        self.0.handle
    }

    pub fn nanoseconds(&self) -> u64 {
        self.0.nanoseconds
    }
}

impl ManualPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the waiting task continue. Releasing more than once has no further effect.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Exact conversions from coarser time units to nanoseconds.
pub mod to_nanoseconds {
    use super::{
        MILLIS_PER_SEC,
        NANOS_PER_MILLI,
        SECS_PER_MIN,
    };
    use crate::runtime::fail::Fail;

    fn scale(value: u64, factor: u64, unit: &str) -> Result<u64, Fail> {
        match value.checked_mul(factor) {
            Some(ns) => Ok(ns),
            None => {
                let cause: String = format!("{} {} do not fit in 64-bit nanoseconds", value, unit);
                error!("scale(): {}", cause);
                Err(Fail::new(libc::ERANGE, &cause))
            },
        }
    }

    pub fn from_millis(ms: u64) -> Result<u64, Fail> {
        scale(ms, NANOS_PER_MILLI, "milliseconds")
    }

    pub fn from_secs(s: u64) -> Result<u64, Fail> {
        scale(s, MILLIS_PER_SEC * NANOS_PER_MILLI, "seconds")
    }

    pub fn from_mins(m: u64) -> Result<u64, Fail> {
        scale(m, SECS_PER_MIN * MILLIS_PER_SEC * NANOS_PER_MILLI, "minutes")
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<ManualPoint> for SuspensionPoint {
    fn from(point: ManualPoint) -> Self {
        Self::Manual(point)
    }
}

impl From<DelayPoint> for SuspensionPoint {
    fn from(point: DelayPoint) -> Self {
        Self::Delay(point)
    }
}

impl Drop for DelayRegistration {
    fn drop(&mut self) {
        if self.elapsed.load(Ordering::Acquire) {
            return;
        }
        if let Some(timer) = self.timer.upgrade() {
            trace!("drop(): abandoned delay, unregistering timer {:?}", self.handle);
            timer.unregister(self.handle);
        }
    }
}

impl fmt::Debug for SuspensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay(point) => write!(
                f,
                "Delay(ns={:?}, elapsed={:?})",
                point.nanoseconds(),
                point.has_elapsed()
            ),
            Self::Predicate(_) => write!(f, "Predicate"),
            Self::Manual(point) => write!(f, "Manual(released={:?})", point.is_released()),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
