//! Test clock for testkit
//!
//! - Clock: trait over "what time is it", with a system implementation
//! - TestClock: starts at a fixed instant and only moves when wound
//! - ResetClockExtension: puts a shared clock back after tests
//!
//! Winding is rejected with `Error::InvalidArgument` when the duration
//! points the wrong way, so `wind_forward` never moves the clock back.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod reset;

pub use clock::{
    default_test_instant, format_instant, Clock, IsoDuration, SystemClock, TestClock,
    DEFAULT_TEST_INSTANT_NANOS,
};
pub use reset::{ResetClockExtension, ResetPredicate};
