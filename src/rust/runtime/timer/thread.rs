// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    timer::{
        TimerCallback,
        TimerFacility,
        TimerHandle,
        TimerQueue,
    },
};
use ::crossbeam_channel::{
    Receiver,
    RecvTimeoutError,
    Sender,
};
use ::std::{
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Structures
//==============================================================================

enum Command {
    Register {
        handle: TimerHandle,
        callback: TimerCallback,
        interval: Duration,
        repeating: bool,
    },
    Unregister(TimerHandle),
}

/// Real-time timer facility. A worker thread owns the timer queue and runs callbacks when they expire, playing the
/// role of a hardware timer interrupt for the scheduler thread.
pub struct ThreadTimer {
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl ThreadTimer {
    pub fn new() -> Result<Self, Fail> {
        let (commands, receiver): (Sender<Command>, Receiver<Command>) = ::crossbeam_channel::unbounded();
        let worker: JoinHandle<()> = thread::Builder::new()
            .name("coropool-timer".to_string())
            .spawn(move || run_worker(receiver))?;
        Ok(Self {
            commands: Some(commands),
            worker: Some(worker),
        })
    }

    fn send(&self, command: Command) {
        let sent: bool = match self.commands.as_ref() {
            Some(commands) => commands.send(command).is_ok(),
            None => false,
        };
        if !sent {
            warn!("send(): timer thread is gone");
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Serves commands and fires expired timers until every [ThreadTimer] handle is dropped.
fn run_worker(commands: Receiver<Command>) {
    let mut queue: TimerQueue = TimerQueue::default();
    loop {
        let received: Result<Command, RecvTimeoutError> = match queue.next_expiry() {
            Some(expiry) => commands.recv_timeout(expiry.saturating_duration_since(Instant::now())),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Register {
                handle,
                callback,
                interval,
                repeating,
            }) => queue.insert(handle, callback, interval, repeating, Instant::now()),
            Ok(Command::Unregister(handle)) => {
                queue.remove(handle);
            },
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now: Instant = Instant::now();
        for (handle, expiry, mut callback) in queue.take_expired(now) {
            callback();
            queue.restore(handle, expiry, callback, now);
        }
    }
    debug!("run_worker(): timer thread exiting");
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl TimerFacility for ThreadTimer {
    fn register(&self, callback: TimerCallback, interval_ns: u64, repeating: bool) -> TimerHandle {
        let handle: TimerHandle = TimerHandle::next();
        self.send(Command::Register {
            handle,
            callback,
            interval: Duration::from_nanos(interval_ns),
            repeating,
        });
        handle
    }

    fn unregister(&self, handle: TimerHandle) {
        self.send(Command::Unregister(handle));
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        // Disconnecting the channel stops the worker.
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("drop(): timer thread panicked");
            }
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
