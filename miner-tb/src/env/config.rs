//! Environment and timing configuration.
//!
//! Everything here is assembled before the environment is built and never
//! changes afterwards. Defaults match the pipeline's clocking; the binary can
//! override them from environment variables.

use crate::agent::SpiConfig;
use crate::sim::time::SimDuration;
use crate::tracing::prelude::*;

/// Primary clock period, 13.33 ns.
pub const CLK_PERIOD: SimDuration = SimDuration::from_ps(13_330);

/// SPI serial clock period, 55.56 ns.
pub const SPI_CLK_PERIOD: SimDuration = SimDuration::from_ps(55_560);

/// How long reset is held at the start of a run.
pub const RESET_DURATION: SimDuration = SimDuration::from_ns(52);

/// Simulated time each test runs for.
pub const TEST_BUDGET: SimDuration = SimDuration::from_us(80);

/// Clock periods, reset length and test budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub clk_period: SimDuration,
    pub spi_clk_period: SimDuration,
    pub reset_duration: SimDuration,
    pub budget: SimDuration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            clk_period: CLK_PERIOD,
            spi_clk_period: SPI_CLK_PERIOD,
            reset_duration: RESET_DURATION,
            budget: TEST_BUDGET,
        }
    }
}

impl TimingConfig {
    /// Parse overrides from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MINER_TB_CLK_PS`: primary clock period in picoseconds
    /// - `MINER_TB_SPI_CLK_PS`: SPI clock period in picoseconds
    /// - `MINER_TB_RESET_PS`: reset duration in picoseconds
    /// - `MINER_TB_BUDGET_PS`: test budget in picoseconds
    ///
    /// Unset variables keep the default. Values that are not positive
    /// integers are logged and ignored. Clock periods must be at least 2 ps
    /// so both phases are non-empty.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            clk_period: ps_from_env("MINER_TB_CLK_PS", 2, defaults.clk_period),
            spi_clk_period: ps_from_env("MINER_TB_SPI_CLK_PS", 2, defaults.spi_clk_period),
            reset_duration: ps_from_env("MINER_TB_RESET_PS", 1, defaults.reset_duration),
            budget: ps_from_env("MINER_TB_BUDGET_PS", 1, defaults.budget),
        }
    }
}

fn ps_from_env(var: &str, min: u64, default: SimDuration) -> SimDuration {
    let Ok(val) = std::env::var(var) else {
        return default;
    };
    match val.trim().parse::<u64>() {
        Ok(ps) if ps >= min => SimDuration::from_ps(ps),
        Ok(ps) => {
            warn!(var, value = ps, min, %default, "Value too small, using default");
            default
        }
        Err(_) => {
            warn!(var, value = %val, %default, "Invalid duration, using default");
            default
        }
    }
}

/// Which optional checking components the environment builds.
///
/// All off in the shipped tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckerOptions {
    pub has_scoreboard: bool,
    pub has_predictor: bool,
    pub has_functional_coverage: bool,
}

impl CheckerOptions {
    /// Parse from `MINER_TB_SCOREBOARD`, `MINER_TB_PREDICTOR` and
    /// `MINER_TB_COVERAGE`. Accepts `1`/`true`/`yes`/`on` and their negations.
    pub fn from_env() -> Self {
        Self {
            has_scoreboard: flag_from_env("MINER_TB_SCOREBOARD"),
            has_predictor: flag_from_env("MINER_TB_PREDICTOR"),
            has_functional_coverage: flag_from_env("MINER_TB_COVERAGE"),
        }
    }
}

fn flag_from_env(var: &str) -> bool {
    let Ok(val) = std::env::var(var) else {
        return false;
    };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "" | "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(var, value = %val, "Invalid flag, treating as off");
            false
        }
    }
}

/// Configuration the environment is built from.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub options: CheckerOptions,
    pub timing: TimingConfig,
    pub spi: SpiConfig,
}
