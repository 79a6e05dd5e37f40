// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        point::SuspensionPoint,
        pool::{
            TaskPool,
            WeakTaskPool,
        },
        yielder::{
            AsyncCoroutine,
            Yielder,
        },
    },
    SharedObject,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    fmt,
    future::Future,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

//==============================================================================
// Static Variables
//==============================================================================

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

//==============================================================================
// Structures
//==============================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct TaskId(pub u64);

/// Outcome of advancing a coroutine by one increment.
pub enum Resume {
    /// The coroutine stopped at a suspension point. `None` means it is ready to run again on the next cycle.
    Yield(Option<SuspensionPoint>),
    /// The coroutine has no more increments.
    Done,
}

/// Runs the increments of an iterator of suspension points, the way an enumerator-based coroutine would.
pub struct IterCoroutine<I>(I);

struct TaskState {
    id: TaskId,
    name: String,
    coroutine: RefCell<Box<dyn Coroutine>>,
    current_point: RefCell<Option<SuspensionPoint>>,
    finished: Cell<bool>,
    running: Cell<bool>,
    halted: Cell<bool>,
    pool: RefCell<Option<WeakTaskPool>>,
}

/// A cooperative task. Cloning a task yields another handle to the same task.
#[derive(Clone)]
pub struct Task(SharedObject<TaskState>);

//==============================================================================
// Traits
//==============================================================================

/// A resumable computation. Each call runs the computation until it either finishes or reaches a new suspension
/// point.
pub trait Coroutine {
    fn resume(&mut self) -> Resume;
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Task {
    /// Instantiates a new detached Task.
    pub fn new<C: Coroutine + 'static>(name: &str, coroutine: C) -> Self {
        Self(SharedObject::new(TaskState {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            coroutine: RefCell::new(Box::new(coroutine)),
            current_point: RefCell::new(None),
            finished: Cell::new(false),
            running: Cell::new(false),
            halted: Cell::new(false),
            pool: RefCell::new(None),
        }))
    }

    /// Instantiates a task that runs the increments of `iter`.
    pub fn from_points<I>(name: &str, iter: I) -> Self
    where
        I: IntoIterator<Item = Option<SuspensionPoint>>,
        I::IntoIter: 'static,
    {
        Self::new(name, IterCoroutine(iter.into_iter()))
    }

    /// Instantiates a task that runs the future built by `factory`. The future suspends itself through the
    /// [Yielder] it is given.
    pub fn from_async<F, Fut>(name: &str, factory: F) -> Self
    where
        F: FnOnce(Yielder) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        Self::new(name, AsyncCoroutine::new(factory))
    }

    /// Starts the task on the pool it was assigned to, or on the main pool if it has none.
    pub fn start(&self) -> Result<(), Fail> {
        self.start_with(true)
    }

    /// Starts the task. Without `auto_join`, the task must have been assigned to a pool beforehand.
    pub fn start_with(&self, auto_join: bool) -> Result<(), Fail> {
        if self.is_running() {
            let cause: String = format!("cannot start an already running task (task={:?})", self);
            error!("start_with(): {}", cause);
            return Err(Fail::invalid_state(&cause));
        }

        let pool: TaskPool = match self.pool() {
            Some(pool) => pool,
            None if auto_join => TaskPool::main(),
            None => {
                let cause: String = format!("no task pool to start on (task={:?})", self);
                error!("start_with(): {}", cause);
                return Err(Fail::invalid_state(&cause));
            },
        };

        pool.add_task(self)
    }

    /// Stops the task. The pool drops it at the end of its current cycle; a step that is already running completes.
    pub fn stop(&self) {
        if let Some(pool) = self.pool() {
            pool.remove_task(self);
        }
        self.exit();
    }

    /// Advances the computation by exactly one increment.
    pub fn step(&self) {
        if self.is_finished() {
            return;
        }

        let resumed: Resume = match self.0.coroutine.try_borrow_mut() {
            Ok(mut coroutine) => coroutine.resume(),
            Err(_) => {
                warn!("step(): task is already being stepped (task={:?})", self);
                return;
            },
        };

        match resumed {
            Resume::Yield(point) => {
                trace!("step(): task yielded (task={:?}, point={:?})", self, point);
                *self.0.current_point.borrow_mut() = point;
            },
            Resume::Done => {
                trace!("step(): task finished (task={:?})", self);
                self.0.finished.set(true);
                self.0.current_point.borrow_mut().take();
            },
        }
    }

    /// Assigns the task to `pool` without scheduling it. The next call to [Task::start_with] joins that pool. A running
    /// task cannot be moved to another pool.
    pub fn assign(&self, pool: &TaskPool) -> Result<(), Fail> {
        if self.is_running() {
            let cause: String = format!("cannot assign an already running task (task={:?})", self);
            error!("assign(): {}", cause);
            return Err(Fail::invalid_state(&cause));
        }

        self.join(pool);
        Ok(())
    }

    /// Checks if the task may be stepped, ignoring whether it is halted.
    pub fn can_continue(&self) -> bool {
        // Predicates run user code, so do not hold the borrow while polling.
        match self.current_point() {
            None => true,
            Some(point) => point.can_continue(),
        }
    }

    pub(crate) fn join(&self, pool: &TaskPool) {
        *self.0.pool.borrow_mut() = Some(pool.downgrade());
    }

    pub(crate) fn exit(&self) {
        self.0.pool.borrow_mut().take();
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.0.running.set(running);
    }

    /// Checks if both handles refer to the same task.
    pub fn ptr_eq(&self, other: &Task) -> bool {
        self.0.ptr_eq(&other.0)
    }

    pub fn id(&self) -> TaskId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Returns the point yielded by the most recent step.
    pub fn current_point(&self) -> Option<SuspensionPoint> {
        self.0.current_point.borrow().clone()
    }

    /// Whether the task is attached to a pool and is running.
    pub fn is_running(&self) -> bool {
        self.0.running.get()
    }

    /// Whether the task is paused by its host.
    pub fn is_halted(&self) -> bool {
        self.0.halted.get()
    }

    /// Pauses or resumes the task. Takes effect the next time its pool decides whether to step it.
    pub fn set_halted(&self, halted: bool) {
        self.0.halted.set(halted);
    }

    /// Whether the computation has no more increments.
    pub fn is_finished(&self) -> bool {
        self.0.finished.get()
    }

    /// Returns the pool this task belongs to, if that pool is still alive.
    pub fn pool(&self) -> Option<TaskPool> {
        self.0.pool.borrow().as_ref().and_then(WeakTaskPool::upgrade)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<F: FnMut() -> Resume> Coroutine for F {
    fn resume(&mut self) -> Resume {
        self()
    }
}

impl<I: Iterator<Item = Option<SuspensionPoint>>> Coroutine for IterCoroutine<I> {
    fn resume(&mut self) -> Resume {
        match self.0.next() {
            Some(point) => Resume::Yield(point),
            None => Resume::Done,
        }
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.name, self.0.id.0)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
