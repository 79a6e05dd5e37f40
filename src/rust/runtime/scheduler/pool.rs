// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our single-threaded, cooperative task pool.
//!
//! Each cycle visits the tasks in reverse insertion order. Finished tasks are dropped in place, halted tasks and
//! tasks whose suspension point cannot continue are skipped, and every other task is stepped exactly once. Because
//! the scan walks backwards, dropping the current entry never shifts an entry that is still to be visited, and tasks
//! that join during the scan are appended past the range being scanned. Newly joined tasks are therefore the first to
//! be examined on the following cycle.
//!
//! Removals requested while a cycle is running are queued and applied once the scan completes. Cycle observers and the
//! periodic maintenance action run after that, never in between two task steps.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::Config,
    runtime::{
        fail::Fail,
        memory,
        scheduler::task::Task,
        timer::{
            self,
            TimerFacility,
            TimerHandle,
        },
        SharedObject,
        WeakObject,
    },
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::VecDeque,
    convert::Infallible,
    fmt,
    rc::Rc,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default interval between two maintenance actions (250 ms).
pub const DEFAULT_MAINTENANCE_INTERVAL_NS: u64 = 250_000_000;

//======================================================================================================================
// Static Variables
//======================================================================================================================

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Main task pool of the scheduler thread. Created on first use and kept until the thread exits.
    static MAIN_POOL: RefCell<Option<TaskPool>> = RefCell::new(None);
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible pool identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct PoolId(pub u64);

struct Maintenance {
    enabled: bool,
    interval_ns: u64,
    /// Repeating timer that raises the due flag. Only armed while the pool is started.
    registration: Option<TimerHandle>,
    /// Taken out while it runs.
    action: Option<Box<dyn FnMut()>>,
}

struct PoolState {
    id: PoolId,
    /// Scheduling order is insertion order.
    tasks: RefCell<Vec<Task>>,
    /// Tasks to drop at the end of the current cycle.
    removals: RefCell<VecDeque<Task>>,
    started: Cell<bool>,
    /// Set while a cycle is running.
    cycling: Cell<bool>,
    observers: RefCell<Vec<Box<dyn FnMut()>>>,
    maintenance: RefCell<Maintenance>,
    /// Raised by the maintenance timer, consumed once per cycle.
    maintenance_due: Arc<AtomicBool>,
    /// Resolved to the default timer of the thread on first use if not given.
    timer: RefCell<Option<Rc<dyn TimerFacility>>>,
}

/// Task Pool
#[derive(Clone)]
pub struct TaskPool(SharedObject<PoolState>);

/// Reference to a pool that does not keep it alive.
#[derive(Clone)]
pub struct WeakTaskPool(WeakObject<PoolState>);

/// Clears the cycling flag of a pool, even if a step panics.
struct CycleGuard<'a>(&'a Cell<bool>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TaskPool {
    /// Creates a pool without periodic maintenance that uses the default timer facility of the thread.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a pool without periodic maintenance that uses `timer`.
    pub fn with_timer(timer: Rc<dyn TimerFacility>) -> Self {
        Self::build(Some(timer))
    }

    fn build(timer: Option<Rc<dyn TimerFacility>>) -> Self {
        Self(SharedObject::new(PoolState {
            id: PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)),
            tasks: RefCell::new(Vec::new()),
            removals: RefCell::new(VecDeque::new()),
            started: Cell::new(false),
            cycling: Cell::new(false),
            observers: RefCell::new(Vec::new()),
            maintenance: RefCell::new(Maintenance {
                enabled: false,
                interval_ns: DEFAULT_MAINTENANCE_INTERVAL_NS,
                registration: None,
                action: None,
            }),
            maintenance_due: Arc::new(AtomicBool::new(false)),
            timer: RefCell::new(timer),
        }))
    }

    /// Returns the main pool of the scheduler thread. On first use, the pool is created with heap reclamation as its
    /// periodic maintenance action.
    pub fn main() -> TaskPool {
        MAIN_POOL.with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(|| {
                    let pool: TaskPool = TaskPool::new();
                    {
                        let mut maintenance = pool.0.maintenance.borrow_mut();
                        maintenance.enabled = true;
                        maintenance.action = Some(Box::new(memory::reclaim));
                    }
                    pool
                })
                .clone()
        })
    }

    /// Replaces the main pool of the scheduler thread and returns the previous one.
    pub fn set_main(pool: TaskPool) -> Option<TaskPool> {
        MAIN_POOL.with(|slot| slot.borrow_mut().replace(pool))
    }

    /// Adds a task at the end of the pool and marks it as running.
    pub fn add_task(&self, task: &Task) -> Result<(), Fail> {
        if task.is_running() {
            let cause: String = format!("cannot start an already running task (task={:?})", task);
            error!("add_task(): {}", cause);
            return Err(Fail::invalid_state(&cause));
        }

        trace!("add_task(): pool={:?} task={:?}", self, task);
        self.0.tasks.borrow_mut().push(task.clone());
        task.join(self);
        task.set_running(true);
        Ok(())
    }

    /// Requests the removal of a task. The task stays in the pool until the current cycle completes.
    pub fn remove_task(&self, task: &Task) {
        trace!("remove_task(): pool={:?} task={:?}", self, task);
        self.0.removals.borrow_mut().push_back(task.clone());
    }

    /// Registers an observer that is notified every time a cycle completes.
    pub fn on_cycle<F: FnMut() + 'static>(&self, observer: F) {
        self.0.observers.borrow_mut().push(Box::new(observer));
    }

    /// Marks the pool as started and arms periodic maintenance. A pool can only be started once.
    pub fn start(&self) -> Result<(), Fail> {
        if self.0.started.get() {
            let cause: String = format!("task pool has already been started (pool={:?})", self);
            error!("start(): {}", cause);
            return Err(Fail::invalid_state(&cause));
        }

        let needs_timer: bool = {
            let maintenance = self.0.maintenance.borrow();
            maintenance.enabled && maintenance.registration.is_none()
        };
        if needs_timer {
            self.arm_maintenance()?;
        }

        self.0.started.set(true);
        Ok(())
    }

    /// Starts the pool and runs cycles on the current thread forever.
    pub fn run(&self) -> Result<Infallible, Fail> {
        self.start()?;
        loop {
            self.poll();
        }
    }

    /// Runs a single cycle and returns the number of tasks that were stepped.
    pub fn poll(&self) -> usize {
        if self.0.cycling.replace(true) {
            warn!("poll(): a cycle is already running (pool={:?})", self);
            return 0;
        }
        let _guard: CycleGuard = CycleGuard(&self.0.cycling);

        let stepped: usize = self.scan();
        self.drain_removals();
        self.notify_observers();
        self.maintain();
        stepped
    }

    /// Visits every task once, from the most recently added to the oldest.
    fn scan(&self) -> usize {
        let mut stepped: usize = 0;
        let count: usize = self.0.tasks.borrow().len();
        for index in (0..count).rev() {
            // Steps may add tasks, so never hold the borrow across one.
            let task: Task = match self.0.tasks.borrow().get(index) {
                Some(task) => task.clone(),
                None => continue,
            };

            if task.is_finished() {
                self.0.tasks.borrow_mut().remove(index);
                self.detach(&task);
                trace!("scan(): dropped finished task (pool={:?}, task={:?})", self, task);
                continue;
            }

            if task.is_halted() {
                continue;
            }

            if task.can_continue() {
                task.step();
                stepped += 1;
            }
        }
        stepped
    }

    /// Applies the removals requested since the last drain.
    fn drain_removals(&self) {
        let removals: Vec<Task> = self.0.removals.borrow_mut().drain(..).collect();
        for task in removals {
            let position: Option<usize> = self.0.tasks.borrow().iter().position(|t| t.ptr_eq(&task));
            match position {
                Some(index) => {
                    self.0.tasks.borrow_mut().remove(index);
                    self.detach(&task);
                    trace!("drain_removals(): removed task (pool={:?}, task={:?})", self, task);
                },
                None => {
                    // Already gone, e.g. it finished during the scan.
                    task.set_running(false);
                },
            }
        }
    }

    fn detach(&self, task: &Task) {
        // The task may have been assigned to another pool after it was stopped.
        let attached_here: bool = match task.pool() {
            Some(pool) => pool.ptr_eq(self),
            None => true,
        };
        if attached_here {
            task.exit();
        }
        task.set_running(false);
    }

    fn notify_observers(&self) {
        // Observers may register further observers.
        let mut observers: Vec<Box<dyn FnMut()>> = ::std::mem::take(&mut *self.0.observers.borrow_mut());
        for observer in observers.iter_mut() {
            observer();
        }
        let mut slot = self.0.observers.borrow_mut();
        observers.append(&mut slot);
        *slot = observers;
    }

    /// Runs the maintenance action if its timer fired since the last cycle.
    fn maintain(&self) {
        if !self.0.maintenance_due.swap(false, Ordering::AcqRel) {
            return;
        }

        let action: Option<Box<dyn FnMut()>> = self.0.maintenance.borrow_mut().action.take();
        match action {
            Some(mut action) => {
                debug!("maintain(): running maintenance (pool={:?})", self);
                action();
                let mut maintenance = self.0.maintenance.borrow_mut();
                // Keep a replacement installed by the action itself.
                if maintenance.action.is_none() {
                    maintenance.action = Some(action);
                }
            },
            None => debug!("maintain(): no maintenance action (pool={:?})", self),
        }
    }

    /// Enables or disables periodic maintenance.
    pub fn set_maintenance_enabled(&self, enabled: bool) -> Result<(), Fail> {
        self.0.maintenance.borrow_mut().enabled = enabled;
        if !enabled {
            self.0.maintenance_due.store(false, Ordering::Release);
        }

        if self.0.started.get() {
            if enabled {
                self.arm_maintenance()?;
            } else {
                self.disarm_maintenance();
            }
        }
        Ok(())
    }

    /// Sets the interval, in nanoseconds, between two maintenance actions.
    pub fn set_maintenance_interval(&self, interval_ns: u64) -> Result<(), Fail> {
        if interval_ns == 0 {
            let cause: &str = "maintenance interval must not be zero";
            error!("set_maintenance_interval(): {}", cause);
            return Err(Fail::new(libc::EINVAL, cause));
        }

        let enabled: bool = {
            let mut maintenance = self.0.maintenance.borrow_mut();
            if maintenance.interval_ns == interval_ns {
                return Ok(());
            }
            maintenance.interval_ns = interval_ns;
            maintenance.enabled
        };

        if self.0.started.get() && enabled {
            self.arm_maintenance()?;
        }
        Ok(())
    }

    /// Sets the action to run when maintenance is due.
    pub fn set_maintenance_action<F: FnMut() + 'static>(&self, action: F) {
        self.0.maintenance.borrow_mut().action = Some(Box::new(action));
    }

    /// Applies the maintenance settings of `config`.
    pub fn configure(&self, config: &Config) -> Result<(), Fail> {
        self.set_maintenance_interval(config.maintenance_interval_ns()?)?;
        self.set_maintenance_enabled(config.maintenance_enabled()?)
    }

    /// Programs the maintenance timer, tearing down any previous registration.
    fn arm_maintenance(&self) -> Result<(), Fail> {
        self.disarm_maintenance();
        let interval_ns: u64 = self.0.maintenance.borrow().interval_ns;
        let timer: Rc<dyn TimerFacility> = self.timer()?;
        let due: Arc<AtomicBool> = self.0.maintenance_due.clone();
        let handle: TimerHandle = timer.register(Box::new(move || due.store(true, Ordering::Release)), interval_ns, true);
        debug!(
            "arm_maintenance(): pool={:?} interval_ns={:?} timer={:?}",
            self, interval_ns, handle
        );
        self.0.maintenance.borrow_mut().registration = Some(handle);
        Ok(())
    }

    fn disarm_maintenance(&self) {
        if let Some(handle) = self.0.maintenance.borrow_mut().registration.take() {
            debug!("disarm_maintenance(): pool={:?} timer={:?}", self, handle);
            if let Some(timer) = self.0.timer.borrow().as_ref() {
                timer.unregister(handle);
            }
        }
    }

    fn timer(&self) -> Result<Rc<dyn TimerFacility>, Fail> {
        if let Some(timer) = self.0.timer.borrow().as_ref() {
            return Ok(timer.clone());
        }
        let timer: Rc<dyn TimerFacility> = timer::default_timer()?;
        *self.0.timer.borrow_mut() = Some(timer.clone());
        Ok(timer)
    }

    pub fn downgrade(&self) -> WeakTaskPool {
        WeakTaskPool(self.0.downgrade())
    }

    /// Checks if both handles refer to the same pool.
    pub fn ptr_eq(&self, other: &TaskPool) -> bool {
        self.0.ptr_eq(&other.0)
    }

    pub fn id(&self) -> PoolId {
        self.0.id
    }

    /// Returns the tasks of the pool in insertion order.
    pub fn tasks(&self) -> Vec<Task> {
        self.0.tasks.borrow().clone()
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.0.tasks.borrow().iter().any(|t| t.ptr_eq(task))
    }

    pub fn len(&self) -> usize {
        self.0.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.tasks.borrow().is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.0.started.get()
    }

    pub fn maintenance_enabled(&self) -> bool {
        self.0.maintenance.borrow().enabled
    }

    pub fn maintenance_interval(&self) -> u64 {
        self.0.maintenance.borrow().interval_ns
    }
}

impl WeakTaskPool {
    pub fn upgrade(&self) -> Option<TaskPool> {
        self.0.upgrade().map(TaskPool)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskPool#{}", self.0.id.0)
    }
}

impl Drop for PoolState {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().registration.take() {
            if let Some(timer) = self.timer.get_mut().as_ref() {
                timer.unregister(handle);
            }
        }

        // Surviving task handles must be startable on another pool.
        for task in self.tasks.get_mut().drain(..) {
            if task.pool().is_none() {
                task.exit();
            }
            task.set_running(false);
        }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
