//! Top-level test bench.
//!
//! Owns the DUT's pins and runs one test from time zero to the budget:
//!
//! 1. start the primary and SPI clocks,
//! 2. hold reset for the reset duration, then release it,
//! 3. bind the SPI interface into the registry and build and start the
//!    environment,
//! 4. at the budget, tear the environment down and stop the clocks.
//!
//! Must run on a current-thread runtime with a paused clock; see
//! [`crate::sim::time`].

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::agent::{BindError, SpiInterface, BUS_MAP};
use crate::env::{CheckerOptions, EnvError, Orchestrator, TestMode, TestReport, TimingConfig};
use crate::registry::{InterfaceRegistry, VIF_SPI};
use crate::sim::time;
use crate::sim::{drive_clock, Dut, Signal};
use crate::tracing::prelude::*;

/// DUT pin the primary clock drives.
pub const CLK_PIN: &str = "i_clk";

/// DUT pin the SPI clock drives.
pub const SPI_CLK_PIN: &str = "i_spi_clk";

/// DUT pin carrying the active-high reset.
pub const RESET_PIN: &str = "i_reset";

/// One configured test run.
pub struct Harness {
    mode: TestMode,
    timing: TimingConfig,
    options: CheckerOptions,
    dut: Dut,
}

impl Harness {
    /// A run of `mode` with default timing, no checkers, and a DUT exposing
    /// every pin of the bus map.
    pub fn new(mode: TestMode) -> Self {
        Self {
            mode,
            timing: TimingConfig::default(),
            options: CheckerOptions::default(),
            dut: Dut::with_pins(BUS_MAP.iter().map(|(_, pin)| *pin)),
        }
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_checkers(mut self, options: CheckerOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the DUT, e.g. to run against a different pinout.
    pub fn with_dut(mut self, dut: Dut) -> Self {
        self.dut = dut;
        self
    }

    /// The DUT's pins. Clones share wires with the running bench.
    pub fn dut(&self) -> &Dut {
        &self.dut
    }

    /// Run the test to the end of its budget.
    pub async fn run(self) -> Result<TestReport, EnvError> {
        time::start_epoch();
        info!(
            test = %self.mode,
            budget = %self.timing.budget,
            "Starting test"
        );

        let clk = pin(&self.dut, "clock", CLK_PIN)?;
        let spi_clk = pin(&self.dut, "spi clock", SPI_CLK_PIN)?;
        let reset = pin(&self.dut, "reset", RESET_PIN)?;

        let clocks = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(drive_clock(clk, self.timing.clk_period, clocks.clone()));
        tracker.spawn(drive_clock(spi_clk, self.timing.spi_clk_period, clocks.clone()));

        let bringup = tokio::spawn(bring_up(
            self.mode,
            self.options,
            self.dut.clone(),
            reset,
            self.timing,
        ));

        time::sleep(self.timing.budget).await;
        info!("Test budget elapsed");

        let result = match bringup.await {
            Ok(Ok(orchestrator)) => Ok(orchestrator.teardown().await),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(EnvError::TaskFailed {
                task: "bring-up",
                reason: e.to_string(),
            }),
        };

        clocks.cancel();
        tracker.close();
        tracker.wait().await;
        info!("Clocks stopped");

        result
    }
}

fn pin(dut: &Dut, role: &str, name: &str) -> Result<Signal, EnvError> {
    dut.pin(name).ok_or_else(|| {
        EnvError::Bind(BindError::MissingPin {
            role: role.to_string(),
            pin: name.to_string(),
        })
    })
}

/// Reset script followed by environment build.
async fn bring_up(
    mode: TestMode,
    options: CheckerOptions,
    dut: Dut,
    reset: Signal,
    timing: TimingConfig,
) -> Result<Orchestrator, EnvError> {
    reset.set(true);
    debug!("Reset asserted");
    time::sleep(timing.reset_duration).await;
    reset.set(false);
    debug!("Reset released");

    let mut registry = InterfaceRegistry::new();
    registry.set(VIF_SPI, SpiInterface::bind(&dut, &BUS_MAP)?);

    let mut orchestrator = Orchestrator::build(mode, &registry, options, timing)?;
    orchestrator.start()?;
    Ok(orchestrator)
}
