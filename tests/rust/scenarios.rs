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
    runtime::timer::TimerFacility,
    ManualPoint,
    Resume,
    SuspensionPoint,
    Task,
    TaskPool,
    ThreadTimer,
};
use ::std::{
    cell::Cell,
    rc::Rc,
    thread,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Unit Tests
//======================================================================================================================

/// A task waiting on a delay is not stepped until the delay elapses, then finishes and leaves.
#[test]
fn delay_blocks_until_the_timer_fires() -> Result<()> {
    let harness: Harness = Harness::new();
    let steps: Rc<Cell<usize>> = counter();
    let steps_ref: Rc<Cell<usize>> = steps.clone();
    let mut waited: bool = false;
    let task: Task = Task::new("sleeper", move || {
        steps_ref.set(steps_ref.get() + 1);
        if waited {
            return Resume::Done;
        }
        waited = true;
        match SuspensionPoint::delay(1_000_000) {
            Ok(point) => Resume::Yield(Some(point)),
            Err(_) => Resume::Done,
        }
    });
    harness.pool.add_task(&task)?;

    ensure_eq!(harness.pool.poll(), 1);
    ensure_eq!(harness.cycles(10), 0);

    harness.timer.advance_by(Duration::from_nanos(999_999));
    ensure_eq!(harness.pool.poll(), 0);

    harness.timer.advance_by(Duration::from_nanos(1));
    ensure_eq!(harness.pool.poll(), 1);
    ensure_eq!(task.is_finished(), true);
    ensure_eq!(harness.pool.contains(&task), true);

    harness.pool.poll();
    ensure_eq!(harness.pool.contains(&task), false);
    ensure_eq!(steps.get(), 2);
    Ok(())
}

/// A task waiting on a predicate runs on the very next cycle after the predicate turns true.
#[test]
fn predicate_releases_on_the_next_cycle() -> Result<()> {
    let harness: Harness = Harness::new();
    let flag: Rc<Cell<bool>> = Rc::new(Cell::new(false));
    let condition: Rc<Cell<bool>> = flag.clone();
    let task: Task = Task::from_points(
        "watcher",
        vec![Some(SuspensionPoint::until(move || condition.get())), None],
    );
    harness.pool.add_task(&task)?;

    ensure_eq!(harness.pool.poll(), 1);
    ensure_eq!(harness.cycles(5), 0);

    flag.set(true);
    ensure_eq!(harness.pool.poll(), 1);

    // The predicate is not latched, but the task already moved past it.
    flag.set(false);
    ensure_eq!(harness.pool.poll(), 1);
    ensure_eq!(task.is_finished(), true);
    Ok(())
}

/// A predicate is evaluated every time it is asked.
#[test]
fn predicate_mirrors_its_condition_within_a_cycle() -> Result<()> {
    let harness: Harness = Harness::new();
    let flag: Rc<Cell<bool>> = Rc::new(Cell::new(false));
    let condition: Rc<Cell<bool>> = flag.clone();
    let point: SuspensionPoint = SuspensionPoint::until(move || condition.get());

    // A sibling flips the condition during the cycle, after the waiter was already examined.
    let waiter: Task = Task::from_points("waiter", vec![Some(point.clone()), None]);
    harness.pool.add_task(&waiter)?;
    harness.pool.poll();

    let observed: Rc<Cell<usize>> = counter();
    let observed_ref: Rc<Cell<usize>> = observed.clone();
    let flipper_flag: Rc<Cell<bool>> = flag.clone();
    let probe: SuspensionPoint = point.clone();
    let flipper: Task = Task::new("flipper", move || {
        flipper_flag.set(true);
        if probe.can_continue() {
            observed_ref.set(observed_ref.get() + 1);
        }
        flipper_flag.set(false);
        if !probe.can_continue() {
            observed_ref.set(observed_ref.get() + 1);
        }
        Resume::Done
    });
    // Joins last, so it is visited before the waiter.
    harness.pool.add_task(&flipper)?;

    ensure_eq!(harness.pool.poll(), 1);
    ensure_eq!(observed.get(), 2);
    ensure_eq!(waiter.is_finished(), false);
    Ok(())
}

/// A manual point shared with another thread releases its waiter.
#[test]
fn manual_point_released_from_another_thread() -> Result<()> {
    let harness: Harness = Harness::new();
    let gate: ManualPoint = ManualPoint::new();
    let task: Task = Task::from_points("gated", vec![Some(gate.clone().into())]);
    harness.pool.add_task(&task)?;
    harness.pool.poll();
    ensure_eq!(harness.cycles(3), 0);

    let remote: ManualPoint = gate.clone();
    if thread::spawn(move || remote.release()).join().is_err() {
        anyhow::bail!("releasing thread panicked");
    }
    gate.release();

    ensure_eq!(harness.pool.poll(), 1);
    ensure_eq!(task.is_finished(), true);
    Ok(())
}

/// Maintenance runs once, after every task of the cycle was stepped and removals were drained.
#[test]
fn maintenance_runs_at_the_end_of_the_cycle() -> Result<()> {
    let harness: Harness = Harness::new();
    let log: StepLog = step_log();
    harness.pool.add_task(&ticker("a", 100, log.clone()))?;
    harness.pool.add_task(&ticker("b", 100, log.clone()))?;
    let maintenance_log: StepLog = log.clone();
    harness
        .pool
        .set_maintenance_action(move || maintenance_log.borrow_mut().push("maintenance".to_string()));
    harness.pool.set_maintenance_interval(10_000_000)?;
    harness.pool.set_maintenance_enabled(true)?;
    harness.pool.start()?;

    harness.pool.poll();
    ensure_eq!(*log.borrow(), vec!["b", "a"]);

    log.borrow_mut().clear();
    harness.timer.advance_by(Duration::from_millis(10));
    harness.pool.poll();
    ensure_eq!(*log.borrow(), vec!["b", "a", "maintenance"]);

    log.borrow_mut().clear();
    harness.pool.poll();
    ensure_eq!(*log.borrow(), vec!["b", "a"]);

    // Two elapsed intervals between cycles still run maintenance once.
    log.borrow_mut().clear();
    harness.timer.advance_by(Duration::from_millis(10));
    harness.timer.advance_by(Duration::from_millis(10));
    harness.pool.poll();
    ensure_eq!(*log.borrow(), vec!["b", "a", "maintenance"]);
    Ok(())
}

/// Disabling maintenance drops a pending trigger.
#[test]
fn disabling_maintenance_discards_a_pending_trigger() -> Result<()> {
    let harness: Harness = Harness::new();
    let runs: Rc<Cell<usize>> = counter();
    let runs_ref: Rc<Cell<usize>> = runs.clone();
    harness.pool.set_maintenance_action(move || runs_ref.set(runs_ref.get() + 1));
    harness.pool.set_maintenance_interval(1_000_000)?;
    harness.pool.set_maintenance_enabled(true)?;
    harness.pool.start()?;

    harness.timer.advance_by(Duration::from_millis(1));
    harness.pool.set_maintenance_enabled(false)?;
    harness.timer.advance_by(Duration::from_millis(5));
    harness.cycles(3);
    ensure_eq!(runs.get(), 0);
    ensure_eq!(harness.timer.num_timers(), 0);

    harness.pool.set_maintenance_enabled(true)?;
    harness.timer.advance_by(Duration::from_millis(1));
    harness.pool.poll();
    ensure_eq!(runs.get(), 1);
    Ok(())
}

/// Async tasks park their points in the pool like explicit coroutines do.
#[test]
fn async_task_waits_on_a_delay() -> Result<()> {
    let harness: Harness = Harness::new();
    let progress: Rc<Cell<usize>> = counter();
    let progress_ref: Rc<Cell<usize>> = progress.clone();
    let task: Task = Task::from_async("async-sleeper", move |yielder| async move {
        for _ in 0..3 {
            if let Ok(point) = SuspensionPoint::delay_ms(5) {
                yielder.wait(point).await;
            }
            progress_ref.set(progress_ref.get() + 1);
        }
        yielder.yield_once().await;
    });
    harness.pool.add_task(&task)?;

    harness.pool.poll();
    ensure_eq!(progress.get(), 0);
    for round in 1..=3 {
        ensure_eq!(harness.cycles(2), 0);
        harness.timer.advance_by(Duration::from_millis(5));
        ensure_eq!(harness.pool.poll(), 1);
        ensure_eq!(progress.get(), round);
    }
    ensure_eq!(task.is_finished(), false);
    harness.pool.poll();
    ensure_eq!(task.is_finished(), true);
    Ok(())
}

/// Tasks may spawn siblings from within a step.
#[test]
fn tasks_spawned_mid_cycle_run_next_cycle() -> Result<()> {
    let harness: Harness = Harness::new();
    let log: StepLog = step_log();
    let pool: TaskPool = harness.pool.clone();
    let spawner_log: StepLog = log.clone();
    let mut spawned: usize = 0;
    harness.pool.add_task(&Task::new("spawner", move || {
        spawner_log.borrow_mut().push("spawner".to_string());
        spawned += 1;
        let child: Task = ticker(&format!("child-{}", spawned), 0, spawner_log.clone());
        if pool.add_task(&child).is_err() {
            return Resume::Done;
        }
        if spawned == 2 {
            return Resume::Done;
        }
        Resume::Yield(None)
    }))?;

    harness.pool.poll();
    ensure_eq!(*log.borrow(), vec!["spawner"]);
    harness.pool.poll();
    ensure_eq!(*log.borrow(), vec!["spawner", "child-1", "spawner"]);
    harness.pool.poll();
    ensure_eq!(*log.borrow(), vec!["spawner", "child-1", "spawner", "child-2"]);
    harness.pool.poll();
    ensure_eq!(harness.pool.is_empty(), true);
    Ok(())
}

/// A task stopped while it waits on a delay gives its timer back once it is gone.
#[test]
fn stopped_task_releases_its_delay() -> Result<()> {
    let harness: Harness = Harness::new();
    let task: Task = Task::from_async("abandoned", |yielder| async move {
        if let Ok(point) = SuspensionPoint::delay_secs(3600) {
            yielder.wait(point).await;
        }
    });
    harness.pool.add_task(&task)?;
    harness.pool.poll();
    ensure_eq!(harness.timer.num_timers(), 1);

    task.stop();
    harness.pool.poll();
    ensure_eq!(harness.pool.contains(&task), false);
    drop(task);
    ensure_eq!(harness.timer.num_timers(), 0);
    Ok(())
}

/// Delays armed on the real-time timer elapse on their own.
#[test]
fn thread_timer_releases_delays() -> Result<()> {
    let timer: Rc<dyn TimerFacility> = Rc::new(ThreadTimer::new()?);
    let pool: TaskPool = TaskPool::with_timer(timer.clone());
    let point: SuspensionPoint = SuspensionPoint::delay_on(&timer, 1_000_000);
    let task: Task = Task::from_points("real-time", vec![Some(point), None]);
    pool.add_task(&task)?;
    pool.poll();

    let deadline: Instant = Instant::now() + Duration::from_secs(10);
    while !task.is_finished() {
        if Instant::now() > deadline {
            anyhow::bail!("delay did not elapse in time");
        }
        pool.poll();
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
