// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Heap reclamation used as the periodic maintenance action of the main task pool.

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns free heap memory to the operating system. Never touches a task pool.
pub fn reclaim() {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // Safety: malloc_trim() only walks the allocator's own free lists.
        let released: libc::c_int = unsafe { libc::malloc_trim(0) };
        debug!("reclaim(): released={:?}", released != 0);
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    trace!("reclaim(): nothing to do on this platform");
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
