// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    FlexiLoggerError,
    Logger,
    LoggerHandle,
};
use ::std::sync::Once;

//==============================================================================
// Constants
//==============================================================================

/// Log specification used when `RUST_LOG` is not set.
const DEFAULT_LOG_SPEC: &str = "warn";

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features.
pub fn initialize() {
    INIT_LOG.call_once(|| match start_logger() {
        // The handle flushes and shuts the logger down when dropped, so keep it for the rest of the process.
        Ok(handle) => ::std::mem::forget(handle),
        Err(e) => eprintln!("initialize(): failed to start logger ({:?})", e),
    });
}

/// Starts a logger configured based on the RUST_LOG env var.
fn start_logger() -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str(DEFAULT_LOG_SPEC)?.start()
}
