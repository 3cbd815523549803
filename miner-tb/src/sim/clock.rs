//! Free-running clock generators.

use tokio_util::sync::CancellationToken;

use super::signal::Signal;
use super::time::{self, SimDuration};
use crate::tracing::prelude::*;

/// Toggle `signal` with the given period until `shutdown` is cancelled.
///
/// The clock starts high at the current instant. Odd periods put the extra
/// picosecond in the low phase.
pub async fn drive_clock(signal: Signal, period: SimDuration, shutdown: CancellationToken) {
    let high = SimDuration::from_ps(period.as_ps() / 2);
    let low = SimDuration::from_ps(period.as_ps() - high.as_ps());
    debug!(clock = signal.name(), %period, "Clock started");

    loop {
        signal.set(true);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = time::sleep(high) => {}
        }
        signal.set(false);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = time::sleep(low) => {}
        }
    }

    debug!(clock = signal.name(), "Clock stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::time::SimTime;

    #[tokio::test(start_paused = true)]
    async fn test_edges_fall_on_period_boundaries() {
        time::start_epoch();
        let clk = Signal::new("i_spi_clk");
        let mut edges = clk.watch();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(drive_clock(
            clk.clone(),
            SimDuration::from_ps(55_560),
            shutdown.clone(),
        ));

        edges.falling_edge().await.unwrap();
        assert_eq!(time::now(), SimTime::from_ps(27_780));
        edges.rising_edge().await.unwrap();
        assert_eq!(time::now(), SimTime::from_ps(55_560));
        edges.rising_edge().await.unwrap();
        assert_eq!(time::now(), SimTime::from_ps(111_120));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_odd_period_gives_extra_picosecond_to_low_phase() {
        time::start_epoch();
        let clk = Signal::new("clk");
        let mut edges = clk.watch();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(drive_clock(
            clk.clone(),
            SimDuration::from_ps(3),
            shutdown.clone(),
        ));

        edges.falling_edge().await.unwrap();
        assert_eq!(time::now(), SimTime::from_ps(1));
        edges.rising_edge().await.unwrap();
        assert_eq!(time::now(), SimTime::from_ps(3));

        shutdown.cancel();
        task.await.unwrap();
    }
}
