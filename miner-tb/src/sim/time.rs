//! Simulated time.
//!
//! The test bench runs on a current-thread tokio runtime with a paused clock.
//! The runtime then only advances time when every task is blocked, jumping
//! straight to the next timer, which is exactly a discrete-event scheduler.
//!
//! Simulated time is kept in picoseconds. The runtime timer has millisecond
//! resolution, so one simulated picosecond is mapped onto one millisecond of
//! runtime time. The 80 µs test budget becomes 80 million virtual
//! milliseconds, which costs nothing on a paused clock.

use std::cell::Cell;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::time::Duration;

use tokio::time::Instant;

thread_local! {
    static EPOCH: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// A span of simulated time, in picoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimDuration(u64);

impl SimDuration {
    pub const ZERO: Self = Self(0);

    pub const fn from_ps(ps: u64) -> Self {
        Self(ps)
    }

    pub const fn from_ns(ns: u64) -> Self {
        Self(ns * 1_000)
    }

    pub const fn from_us(us: u64) -> Self {
        Self(us * 1_000_000)
    }

    pub const fn as_ps(self) -> u64 {
        self.0
    }

    /// Runtime duration this span occupies on the paused clock.
    pub fn to_runtime(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Mul<u64> for SimDuration {
    type Output = SimDuration;

    fn mul(self, rhs: u64) -> Self::Output {
        SimDuration(self.0.saturating_mul(rhs))
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ns(f, self.0)
    }
}

/// A point in simulated time, measured from the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_ps(ps: u64) -> Self {
        Self(ps)
    }

    pub const fn as_ps(self) -> u64 {
        self.0
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimDuration) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl Sub for SimTime {
    type Output = SimDuration;

    fn sub(self, rhs: SimTime) -> Self::Output {
        SimDuration(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ns(f, self.0)
    }
}

fn write_ns(f: &mut fmt::Formatter<'_>, ps: u64) -> fmt::Result {
    let text = format!("{}.{:03}ns", ps / 1_000, ps % 1_000);
    f.pad(&text)
}

/// Mark the current instant as simulated time zero for this thread.
///
/// The harness calls this once at the start of a run. Threads that never call
/// it get an epoch at their first call to [`now`].
pub fn start_epoch() {
    EPOCH.with(|epoch| epoch.set(Some(Instant::now())));
}

/// Current simulated time.
pub fn now() -> SimTime {
    let now = Instant::now();
    let epoch = EPOCH.with(|epoch| match epoch.get() {
        Some(start) => start,
        None => {
            epoch.set(Some(now));
            now
        }
    });
    let elapsed = now.saturating_duration_since(epoch);
    SimTime(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Suspend the calling task for `duration` of simulated time.
pub async fn sleep(duration: SimDuration) {
    tokio::time::sleep(duration.to_runtime()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_in_nanoseconds() {
        assert_eq!(SimDuration::from_ps(13_330).to_string(), "13.330ns");
        assert_eq!(SimTime::from_ps(52_000).to_string(), "52.000ns");
        assert_eq!(format!("{:>12}", SimTime::ZERO), "     0.000ns");
    }

    #[test]
    fn test_unit_constructors() {
        assert_eq!(SimDuration::from_ns(52), SimDuration::from_ps(52_000));
        assert_eq!(SimDuration::from_us(80), SimDuration::from_ps(80_000_000));
    }

    #[test]
    fn test_scaling_saturates() {
        assert_eq!(SimDuration::from_ps(55_560) * 3, SimDuration::from_ps(166_680));
        assert_eq!(SimDuration::from_ps(u64::MAX) * 2, SimDuration::from_ps(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_advances_simulated_time_exactly() {
        start_epoch();
        assert_eq!(now(), SimTime::ZERO);

        sleep(SimDuration::from_ps(6_665)).await;
        assert_eq!(now(), SimTime::from_ps(6_665));

        sleep(SimDuration::from_us(80)).await;
        assert_eq!(now(), SimTime::from_ps(80_006_665));
    }
}
