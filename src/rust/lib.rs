// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cooperative, single-threaded task pool.
//!
//! A [TaskPool] owns a list of [Task]s and steps each of them once per cycle. A task advances by one increment per
//! step and then hands back a [SuspensionPoint] that tells the pool when it may be stepped again.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod runtime;

pub use self::{
    config::Config,
    runtime::{
        fail::Fail,
        scheduler::{
            Coroutine,
            ManualPoint,
            Resume,
            SuspensionPoint,
            Task,
            TaskId,
            TaskPool,
            Yielder,
        },
        timer::{
            SharedTimer,
            ThreadTimer,
            TimerFacility,
        },
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Bails out of a test with a descriptive error if both expressions are not equal.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left, right) => {
                if !(*left == *right) {
                    ::anyhow::bail!(
                        "ensure_eq failed: {} == {} (left={:?}, right={:?}) at {}:{}",
                        stringify!($left),
                        stringify!($right),
                        left,
                        right,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}

/// Bails out of a test with a descriptive error if both expressions are equal.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left, right) => {
                if *left == *right {
                    ::anyhow::bail!(
                        "ensure_neq failed: {} != {} (value={:?}) at {}:{}",
                        stringify!($left),
                        stringify!($right),
                        left,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}
