// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use self::common::{
    counter,
    step_log,
    ticker,
    Harness,
    StepLog,
};
use ::anyhow::Result;
use ::coropool::{
    ensure_eq,
    ensure_neq,
    ManualPoint,
    Resume,
    SuspensionPoint,
    Task,
    TaskPool,
};
use ::std::{
    cell::Cell,
    rc::Rc,
};

//======================================================================================================================
// Unit Tests
//======================================================================================================================

/// A finished task leaves its pool within exactly one cycle and is never stepped again.
#[test]
fn finished_task_leaves_within_one_cycle() -> Result<()> {
    let harness: Harness = Harness::new();
    let log: StepLog = step_log();
    let task: Task = ticker("short", 1, log.clone());
    harness.pool.add_task(&task)?;

    ensure_eq!(harness.cycles(2), 2);
    ensure_eq!(task.is_finished(), true);
    ensure_eq!(harness.pool.contains(&task), true);

    ensure_eq!(harness.pool.poll(), 0);
    ensure_eq!(harness.pool.contains(&task), false);
    ensure_eq!(task.is_running(), false);

    harness.cycles(5);
    ensure_eq!(log.borrow().len(), 2);
    Ok(())
}

/// A task that never yields finishes in the first cycle.
#[test]
fn task_without_points_finishes_in_one_step() -> Result<()> {
    let harness: Harness = Harness::new();
    let task: Task = Task::from_points("empty", Vec::<Option<SuspensionPoint>>::new());
    harness.pool.add_task(&task)?;

    ensure_eq!(harness.pool.poll(), 1);
    ensure_eq!(task.is_finished(), true);
    Ok(())
}

/// Halting skips a task regardless of its point, and resuming takes effect on the next cycle.
#[test]
fn halted_task_is_never_stepped() -> Result<()> {
    let harness: Harness = Harness::new();
    let log: StepLog = step_log();
    let task: Task = ticker("halted", 10, log.clone());
    harness.pool.add_task(&task)?;
    task.set_halted(true);

    ensure_eq!(harness.cycles(3), 0);
    ensure_eq!(log.borrow().is_empty(), true);

    task.set_halted(false);
    ensure_eq!(harness.pool.poll(), 1);
    Ok(())
}

/// A halted task with a released point still waits for its host.
#[test]
fn halting_overrides_a_ready_point() -> Result<()> {
    let harness: Harness = Harness::new();
    let gate: ManualPoint = ManualPoint::new();
    let task: Task = Task::from_points("gated", vec![Some(gate.clone().into()), None]);
    harness.pool.add_task(&task)?;
    harness.pool.poll();

    gate.release();
    task.set_halted(true);
    ensure_eq!(harness.cycles(2), 0);
    ensure_eq!(task.is_finished(), false);
    Ok(())
}

/// Stopping a sibling mid-cycle changes neither the scan order nor the step count of that cycle.
#[test]
fn removal_mid_cycle_is_deferred() -> Result<()> {
    let harness: Harness = Harness::new();
    let log: StepLog = step_log();
    let first: Task = ticker("first", 10, log.clone());
    let second: Task = ticker("second", 10, log.clone());
    harness.pool.add_task(&first)?;
    harness.pool.add_task(&second)?;

    // Visited first, since it joins last.
    let target: Task = second.clone();
    let stopper_log: StepLog = log.clone();
    harness.pool.add_task(&Task::new("stopper", move || {
        stopper_log.borrow_mut().push("stopper".to_string());
        target.stop();
        Resume::Yield(None)
    }))?;

    ensure_eq!(harness.pool.poll(), 3);
    ensure_eq!(*log.borrow(), vec!["stopper", "second", "first"]);
    ensure_eq!(harness.pool.contains(&second), false);
    ensure_eq!(second.is_running(), false);
    ensure_eq!(harness.pool.len(), 2);
    Ok(())
}

/// Removing a task that is not in the pool is harmless.
#[test]
fn removing_an_absent_task_is_not_an_error() -> Result<()> {
    let harness: Harness = Harness::new();
    let stranger: Task = ticker("stranger", 0, step_log());
    harness.pool.remove_task(&stranger);
    harness.pool.remove_task(&stranger);
    ensure_eq!(harness.pool.poll(), 0);
    ensure_eq!(stranger.is_running(), false);
    Ok(())
}

/// Starting a running task fails and leaves the task where it was.
#[test]
fn starting_a_running_task_is_refused() -> Result<()> {
    let harness: Harness = Harness::new();
    let log: StepLog = step_log();
    let before: Task = ticker("before", 10, log.clone());
    let task: Task = ticker("twice", 10, log.clone());
    let after: Task = ticker("after", 10, log.clone());
    task.assign(&harness.pool)?;
    harness.pool.add_task(&before)?;
    task.start()?;
    harness.pool.add_task(&after)?;

    let e = match task.start() {
        Ok(()) => anyhow::bail!("starting a running task should fail"),
        Err(e) => e,
    };
    ensure_eq!(e.is_invalid_state(), true);
    ensure_eq!(harness.pool.add_task(&task).is_err(), true);

    ensure_eq!(task.is_running(), true);
    ensure_eq!(task.pool().map(|p| p.id()), Some(harness.pool.id()));
    let order: Vec<String> = harness.pool.tasks().iter().map(|t| t.name().to_string()).collect();
    ensure_eq!(order, vec!["before", "twice", "after"]);
    Ok(())
}

/// A stopped task can be started again once its pool let go of it.
#[test]
fn stopped_task_can_be_restarted() -> Result<()> {
    let harness: Harness = Harness::new();
    let steps: Rc<Cell<usize>> = counter();
    let steps_ref: Rc<Cell<usize>> = steps.clone();
    let task: Task = Task::new("restartable", move || {
        steps_ref.set(steps_ref.get() + 1);
        Resume::Yield(None)
    });
    harness.pool.add_task(&task)?;
    harness.pool.poll();

    task.stop();
    ensure_eq!(task.start_with(false).is_err(), true);
    harness.pool.poll();
    ensure_eq!(task.is_running(), false);

    task.assign(&harness.pool)?;
    task.start_with(false)?;
    harness.pool.poll();
    ensure_eq!(steps.get(), 3);
    Ok(())
}

/// Tasks started without a pool join the main pool of the thread.
#[test]
fn tasks_join_the_main_pool_by_default() -> Result<()> {
    let harness: Harness = Harness::new();
    let previous: Option<TaskPool> = TaskPool::set_main(harness.pool.clone());
    ensure_eq!(previous.is_some(), false);

    let task: Task = ticker("auto", 0, step_log());
    task.start()?;
    ensure_eq!(harness.pool.contains(&task), true);
    ensure_neq!(TaskPool::new().id(), harness.pool.id());
    Ok(())
}

/// Observers run after the scan and after removals are applied.
#[test]
fn observers_see_the_drained_pool() -> Result<()> {
    let harness: Harness = Harness::new();
    let victim: Task = ticker("victim", 10, step_log());
    harness.pool.add_task(&victim)?;
    harness.pool.poll();

    let seen: Rc<Cell<usize>> = counter();
    let seen_ref: Rc<Cell<usize>> = seen.clone();
    let pool: TaskPool = harness.pool.clone();
    harness.pool.on_cycle(move || seen_ref.set(pool.len()));

    victim.stop();
    harness.pool.poll();
    ensure_eq!(seen.get(), 0);
    Ok(())
}

/// A second call to run fails without touching the pool.
#[test]
fn run_twice_is_refused() -> Result<()> {
    let harness: Harness = Harness::new();
    harness.pool.start()?;
    let e = match harness.pool.run() {
        Ok(never) => match never {},
        Err(e) => e,
    };
    ensure_eq!(e.is_invalid_state(), true);
    ensure_eq!(e.errno, libc::EINVAL);
    Ok(())
}
