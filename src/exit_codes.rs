//! Exit code constants for the lockbroker CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 4: Lock acquisition failure
//! - 5: A lock wait was cancelled

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or an invalid configuration file.
pub const USER_ERROR: i32 = 1;

/// Lock acquisition failure: an object lock could not be obtained.
pub const LOCK_FAILURE: i32 = 4;

/// A blocking lock wait was cancelled.
pub const CANCELLED: i32 = 5;
