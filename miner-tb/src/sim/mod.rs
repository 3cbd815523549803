//! Discrete-event simulation primitives.
//!
//! Everything the bench needs from a simulator: simulated time, single-bit
//! signals with edge detection, free-running clocks, and the pin set of the
//! device under test.

pub mod clock;
pub mod dut;
pub mod signal;
pub mod time;

pub use clock::drive_clock;
pub use dut::Dut;
pub use signal::{EdgeWatcher, Signal, SignalClosed};
pub use time::{SimDuration, SimTime};
