// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod fail;
pub mod logging;
pub mod memory;
pub mod scheduler;
pub mod timer;

pub use self::{
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
        TimerHandle,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    ops::Deref,
    rc::{
        Rc,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The SharedObject wraps an object that will be shared across coroutines of the same scheduler thread. Mutable
/// state inside the object lives in cells, so a coroutine may observe or update a shared object while the pool that
/// steps it holds another reference.
pub struct SharedObject<T: ?Sized>(Rc<T>);

/// Non-owning reference to a [SharedObject].
pub struct WeakObject<T: ?Sized>(Weak<T>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }
}

impl<T: ?Sized> SharedObject<T> {
    /// Creates a reference that does not keep the object alive.
    pub fn downgrade(&self) -> WeakObject<T> {
        WeakObject(Rc::downgrade(&self.0))
    }

    /// Checks if both references point to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> WeakObject<T> {
    /// Returns the object if it is still alive.
    pub fn upgrade(&self) -> Option<SharedObject<T>> {
        self.0.upgrade().map(SharedObject)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Dereferences a shared object for use.
impl<T: ?Sized> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Returns a reference to the interior object, which is borrowed for directly accessing the value. Generally deref
/// should be used unless you absolutely need to borrow the reference.
impl<T: ?Sized> AsRef<T> for SharedObject<T> {
    fn as_ref(&self) -> &T {
        self.0.as_ref()
    }
}

impl<T: ?Sized> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ?Sized> Clone for WeakObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
