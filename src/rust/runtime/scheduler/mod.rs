// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod pool;
mod task;
mod yielder;

//==============================================================================
// Exports
//==============================================================================

pub mod point;

pub use self::{
    point::{
        DelayPoint,
        ManualPoint,
        PredicatePoint,
        SuspensionPoint,
    },
    pool::{
        PoolId,
        TaskPool,
        WeakTaskPool,
        DEFAULT_MAINTENANCE_INTERVAL_NS,
    },
    task::{
        Coroutine,
        IterCoroutine,
        Resume,
        Task,
        TaskId,
    },
    yielder::{
        AsyncCoroutine,
        Yielder,
    },
};
