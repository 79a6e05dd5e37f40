// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::coropool::{
    runtime::logging,
    Config,
    Resume,
    SuspensionPoint,
    Task,
    TaskPool,
};
use ::std::{
    cell::Cell,
    process,
    rc::Rc,
};

//==============================================================================
// Program Arguments
//==============================================================================

/// Program Arguments
#[derive(Debug)]
struct ProgramArguments {
    /// Optional configuration file for the main pool.
    config: Option<String>,
    /// Number of blinking tasks.
    tasks: usize,
    /// Number of blinks per task.
    blinks: usize,
    /// Time between two blinks (in milliseconds).
    period_ms: u64,
}

/// Associate functions for Program Arguments
impl ProgramArguments {
    const DEFAULT_TASKS: usize = 3;
    const DEFAULT_BLINKS: usize = 10;
    const DEFAULT_PERIOD_MS: u64 = 500;

    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_author: &'static str, app_about: &'static str) -> Result<Self> {
        let matches: ArgMatches = Command::new(app_name)
            .author(app_author)
            .about(app_about)
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets the configuration file of the main pool"),
            )
            .arg(
                Arg::new("tasks")
                    .long("tasks")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets the number of blinking tasks"),
            )
            .arg(
                Arg::new("blinks")
                    .long("blinks")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets the number of blinks per task"),
            )
            .arg(
                Arg::new("period-ms")
                    .long("period-ms")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("MILLISECONDS")
                    .help("Sets the time between two blinks"),
            )
            .get_matches();

        Ok(Self {
            config: matches.get_one::<String>("config").cloned(),
            tasks: matches.get_one::<usize>("tasks").copied().unwrap_or(Self::DEFAULT_TASKS),
            blinks: matches.get_one::<usize>("blinks").copied().unwrap_or(Self::DEFAULT_BLINKS),
            period_ms: matches
                .get_one::<u64>("period-ms")
                .copied()
                .unwrap_or(Self::DEFAULT_PERIOD_MS),
        })
    }
}

//==============================================================================
// Tasks
//==============================================================================

/// Builds a task that toggles a virtual LED every `period_ms` milliseconds.
fn blinker(index: usize, blinks: usize, period_ms: u64, done: Rc<Cell<usize>>) -> Task {
    let name: String = format!("blinker-{}", index);
    let task_name: String = name.clone();
    Task::from_async(&task_name, move |yielder| async move {
        for blink in 0..blinks {
            let point: SuspensionPoint = match SuspensionPoint::delay_ms(period_ms) {
                Ok(point) => point,
                Err(e) => {
                    println!("ERROR: {}: cannot arm delay (error={:?})", name, e);
                    break;
                },
            };
            yielder.wait(point).await;
            let state: &str = if blink % 2 == 0 { "on" } else { "off" };
            println!("{}: {} ({}/{})", name, state, blink + 1, blinks);
        }
        done.set(done.get() + 1);
    })
}

/// Builds a task that ends the process once `expected` blinkers are done.
fn supervisor(expected: usize, done: Rc<Cell<usize>>) -> Task {
    let mut armed: bool = false;
    Task::new("supervisor", move || {
        if !armed {
            armed = true;
            let done: Rc<Cell<usize>> = done.clone();
            return Resume::Yield(Some(SuspensionPoint::until(move || done.get() >= expected)));
        }
        println!("INFO: {} blinker(s) finished", expected);
        process::exit(0)
    })
}

//==============================================================================

/// Drives the application.
fn main() -> Result<()> {
    logging::initialize();

    let args: ProgramArguments = ProgramArguments::new(
        "blink",
        "Microsoft Corporation",
        "Blinks virtual LEDs from cooperative tasks.",
    )?;

    let pool: TaskPool = TaskPool::main();
    if let Some(path) = args.config.as_ref() {
        pool.configure(&Config::new(path)?)?;
    }

    let done: Rc<Cell<usize>> = Rc::new(Cell::new(0));
    for index in 0..args.tasks {
        blinker(index, args.blinks, args.period_ms, done.clone()).start()?;
    }
    supervisor(args.tasks, done).start()?;

    // The pool never returns on its own: the supervisor exits the process.
    match pool.run() {
        Ok(never) => match never {},
        Err(e) => anyhow::bail!("failed to run main pool: {:?}", e),
    }
}
