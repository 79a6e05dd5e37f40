// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::{
        point::SuspensionPoint,
        task::{
            Coroutine,
            Resume,
        },
    },
    SharedObject,
};
use ::futures::task::noop_waker_ref;
use ::std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Yield is a future that lets the currently running coroutine cooperatively yield because it cannot make progress.
/// Coroutines are expected to use the async functions of [Yielder] to create yield points.
struct Yield {
    /// How many times have we already yielded?
    already_yielded: usize,
    /// How many times should we yield? If none, then we yield until the point can continue.
    yield_quanta: Option<usize>,
    /// Point to wait on.
    point: Option<SuspensionPoint>,
    /// Where the point is parked for the pool to look at.
    parked: SharedObject<RefCell<Option<SuspensionPoint>>>,
}

/// Yielder lets a single async coroutine yield to its task pool.
#[derive(Clone)]
pub struct Yielder {
    parked: SharedObject<RefCell<Option<SuspensionPoint>>>,
}

/// Drives a future one poll per step.
pub struct AsyncCoroutine {
    future: Pin<Box<dyn Future<Output = ()>>>,
    parked: SharedObject<RefCell<Option<SuspensionPoint>>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Yield {
    fn new(yield_quanta: Option<usize>, point: Option<SuspensionPoint>, yielder: &Yielder) -> Self {
        Self {
            already_yielded: 0,
            yield_quanta,
            point,
            parked: yielder.parked.clone(),
        }
    }
}

impl Yielder {
    fn new() -> Self {
        Self {
            parked: SharedObject::new(RefCell::new(None)),
        }
    }

    /// Yields for just one step.
    pub async fn yield_once(&self) {
        Yield::new(Some(1), None, self).await
    }

    /// Yields for `n` steps.
    pub async fn yield_times(&self, n: usize) {
        Yield::new(Some(n), None, self).await
    }

    /// Yields until `point` can continue. The pool does not step the task while the point is waiting.
    pub async fn wait(&self, point: SuspensionPoint) {
        Yield::new(None, Some(point), self).await
    }
}

impl AsyncCoroutine {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: FnOnce(Yielder) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let yielder: Yielder = Yielder::new();
        let parked: SharedObject<RefCell<Option<SuspensionPoint>>> = yielder.parked.clone();
        Self {
            future: Box::pin(factory(yielder)),
            parked,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Future for Yield {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();

        if let Some(point) = self_.point.as_ref() {
            // Checked again on resume. A predicate that turned false after the pool saw it true parks once more.
            if point.can_continue() {
                return Poll::Ready(());
            }
            *self_.parked.borrow_mut() = Some(point.clone());
            return Poll::Pending;
        }

        // Yielding for a fixed quanta.
        let budget: usize = self_.yield_quanta.unwrap_or(0);
        if self_.already_yielded >= budget {
            return Poll::Ready(());
        }
        self_.already_yielded += 1;
        Poll::Pending
    }
}

impl Coroutine for AsyncCoroutine {
    fn resume(&mut self) -> Resume {
        // Wake-ups are not used: the pool decides when to poll by looking at the parked point.
        let mut context: Context = Context::from_waker(noop_waker_ref());
        match self.future.as_mut().poll(&mut context) {
            Poll::Ready(()) => {
                self.parked.borrow_mut().take();
                Resume::Done
            },
            Poll::Pending => Resume::Yield(self.parked.borrow_mut().take()),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
