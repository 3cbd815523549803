//! Test environment: builds the agent and checkers, runs the stimulus, and
//! decides pass or fail.
//!
//! The orchestrator's life cycle is
//!
//! 1. [`Orchestrator::build`]: look up the bound interface, build the agent,
//!    the optional checkers and the selected test's sequence, log the
//!    topology. Nothing runs yet.
//! 2. [`Orchestrator::start`]: start the agent's driver and monitor and spawn
//!    the stimulus task.
//! 3. [`Orchestrator::teardown`]: stop the stimulus between transfers, join
//!    it, stop the agent, run the checkers and report exactly once.
//!
//! The pass flag starts true and any fault clears it. A failed test is
//! logged at error level and turned into an error by
//! [`TestReport::into_result`].

pub mod checkers;
pub mod config;

pub use config::{CheckerOptions, EnvConfig, TimingConfig};

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use self::checkers::{Coverage, Mismatch, Predictor, ScoreboardSummary};
use crate::agent::{BindError, ObservedTransfer, SpiAgent, SpiConfig};
use crate::codec::{self, CodecError};
use crate::payload::{Payload, MAX_PAYLOAD_WIDTH};
use crate::registry::{InterfaceRegistry, VIF_SPI};
use crate::sequence::{AutoIncrement, Sequence, SequenceError, SingleShot};
use crate::sim::time::{self, SimDuration};
use crate::tracing::prelude::*;

/// First payload of the streaming test.
pub const STREAMING_SEED: u32 = 0x0000_00ff;

/// Width of every streaming transfer.
pub const STREAMING_WIDTH: usize = codec::INCREMENT_WIDTH;

/// Midstate of the mining-job test (block 120514), wire word order.
pub const MINING_JOB_MIDSTATE: &str =
    "0xa8ed1070889294cead037abcb2562de466353e488f855a6164e7b06de772fc69";

/// nBits, ntime and merkle tail of the mining-job test, wire word order.
pub const MINING_JOB_HEADER_FRAGMENT: &str = "0x1b00b5ac4db8345b9b574a86";

/// nBits exponent of the mining-job test.
pub const MINING_JOB_DIFFICULTY: u8 = 0x1b;

/// The complete 352-bit word the mining-job test shifts in.
pub const MINING_JOB_PAYLOAD: &str = "0x1b00b5ac4db8345b9b574a86a8ed1070889294cead037abcb2562de466353e488f855a6164e7b06de772fc69";

/// How long teardown waits for the stimulus to finish its last transfer.
///
/// Enough for the widest transfer: up to one period to reach the first
/// falling edge, one period per bit, then deselect and acknowledge.
pub fn stimulus_grace(spi_clk_period: SimDuration) -> SimDuration {
    spi_clk_period * (MAX_PAYLOAD_WIDTH as u64 + 3)
}

/// Error types for building and running the environment.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("No interface bound in registry slot {slot:?}")]
    MissingInterfaceBinding { slot: String },

    #[error("Failed to bind interface: {0}")]
    Bind(#[from] BindError),

    #[error("Failed to build stimulus: {0}")]
    Codec(#[from] CodecError),

    #[error("Scoreboard needs a predictor")]
    ScoreboardWithoutPredictor,

    #[error("Environment already started")]
    AlreadyStarted,

    #[error("Agent is passive; nothing to drive the stimulus")]
    PassiveAgent,

    #[error("{task} task failed: {reason}")]
    TaskFailed { task: &'static str, reason: String },

    #[error("Test {test} failed with {failures} failure(s)")]
    TestFailed { test: TestMode, failures: usize },
}

/// Which test to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TestMode {
    /// Stream an incrementing 32-bit payload until the budget runs out.
    Streaming,

    /// Send one mining job.
    MiningJob,
}

impl TestMode {
    pub fn name(self) -> &'static str {
        match self {
            TestMode::Streaming => "streaming_test",
            TestMode::MiningJob => "mining_job_test",
        }
    }

    /// Build the test's stimulus. `stop` ends a streaming test.
    pub fn build_sequence(self, stop: CancellationToken) -> Result<Box<dyn Sequence>, EnvError> {
        match self {
            TestMode::Streaming => Ok(Box::new(AutoIncrement::new(
                "seq0",
                STREAMING_SEED,
                STREAMING_WIDTH,
                stop,
            ))),
            TestMode::MiningJob => {
                let item = codec::encode_mining_job(
                    parse_constant("midstate", MINING_JOB_MIDSTATE)?,
                    parse_constant("header fragment", MINING_JOB_HEADER_FRAGMENT)?,
                    MINING_JOB_DIFFICULTY,
                )?;
                Ok(Box::new(SingleShot::new("seq0", item)))
            }
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_constant(field: &'static str, hex: &str) -> Result<Payload, CodecError> {
    Payload::from_hex(hex).map_err(|e| CodecError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Something that cleared the pass flag.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("Stimulus: {0}")]
    Stimulus(#[from] SequenceError),

    #[error("Stimulus task panicked: {0}")]
    StimulusPanicked(String),

    #[error("Stimulus did not finish within {0} of teardown")]
    StimulusStuck(SimDuration),

    #[error("Scoreboard: {0}")]
    Scoreboard(#[from] Mismatch),
}

/// Outcome of one test, produced once at teardown.
#[derive(Debug)]
pub struct TestReport {
    pub test: TestMode,
    pub passed: bool,
    pub failures: Vec<Failure>,

    /// Every transfer the monitor saw, in order.
    pub transfers: Vec<ObservedTransfer>,

    pub scoreboard: Option<ScoreboardSummary>,
    pub coverage: Option<Coverage>,
}

impl TestReport {
    /// Turn a failed report into an error.
    pub fn into_result(self) -> Result<Self, EnvError> {
        if self.passed {
            Ok(self)
        } else {
            Err(EnvError::TestFailed {
                test: self.test,
                failures: self.failures.len(),
            })
        }
    }
}

/// Builds, runs and judges one test.
pub struct Orchestrator {
    mode: TestMode,
    config: EnvConfig,
    agent: Option<SpiAgent>,
    sequence: Option<Box<dyn Sequence>>,
    observed_rx: mpsc::UnboundedReceiver<ObservedTransfer>,
    predictor: Option<Predictor>,

    /// Ends the stimulus between transfers.
    stop: CancellationToken,

    /// Stops the agent's driver and monitor.
    shutdown: CancellationToken,
    tracker: TaskTracker,
    stimulus: Option<JoinHandle<Result<(), SequenceError>>>,
    test_pass: bool,
}

impl Orchestrator {
    /// Build the environment for `mode` around the interface in slot
    /// `"vif_spi"`.
    ///
    /// Fails before anything is created if the slot is empty.
    pub fn build(
        mode: TestMode,
        registry: &InterfaceRegistry,
        options: CheckerOptions,
        timing: TimingConfig,
    ) -> Result<Self, EnvError> {
        let vif = registry
            .get(VIF_SPI)
            .cloned()
            .ok_or_else(|| EnvError::MissingInterfaceBinding {
                slot: VIF_SPI.to_string(),
            })?;

        if options.has_scoreboard && !options.has_predictor {
            return Err(EnvError::ScoreboardWithoutPredictor);
        }

        let config = EnvConfig {
            options,
            timing,
            spi: SpiConfig {
                vif,
                is_active: true,
            },
        };

        let stop = CancellationToken::new();
        let sequence = mode.build_sequence(stop.clone())?;

        let shutdown = CancellationToken::new();
        let mut agent = SpiAgent::build(&config.spi, &shutdown);
        let observed_rx = agent.subscribe();

        let predictor = if options.has_predictor {
            let (predictor, tx) = Predictor::channel();
            if let Some(sequencer) = agent.sequencer_mut() {
                sequencer.connect_analysis(tx);
            }
            Some(predictor)
        } else {
            None
        };

        let orchestrator = Self {
            mode,
            config,
            agent: Some(agent),
            sequence: Some(sequence),
            observed_rx,
            predictor,
            stop,
            shutdown,
            tracker: TaskTracker::new(),
            stimulus: None,
            test_pass: true,
        };
        info!("Topology:\n{}", orchestrator.topology());
        Ok(orchestrator)
    }

    /// The component tree, one component per line.
    pub fn topology(&self) -> String {
        let options = &self.config.options;
        let mut lines = vec![
            format!("{}", self.mode),
            "  env".to_string(),
            format!(
                "    spi_agent ({})",
                if self.config.spi.is_active {
                    "active"
                } else {
                    "passive"
                }
            ),
        ];
        if self.config.spi.is_active {
            lines.push("      sequencer".to_string());
            lines.push("      driver".to_string());
        }
        lines.push("      monitor".to_string());
        if options.has_predictor {
            lines.push("    predictor".to_string());
        }
        if options.has_scoreboard {
            lines.push("    scoreboard".to_string());
        }
        if options.has_functional_coverage {
            lines.push("    coverage".to_string());
        }
        lines.push(format!("  vif <- {VIF_SPI}"));
        lines.join("\n")
    }

    /// Start the agent and spawn the stimulus task.
    pub fn start(&mut self) -> Result<(), EnvError> {
        let (Some(agent), Some(mut sequence)) = (self.agent.take(), self.sequence.take()) else {
            return Err(EnvError::AlreadyStarted);
        };
        let sequencer = agent.start(&self.tracker).ok_or(EnvError::PassiveAgent)?;

        self.stimulus = Some(tokio::spawn(async move {
            info!(sequence = sequence.name(), "Stimulus started");
            let result = sequence.run(&sequencer).await;
            if let Err(e) = &result {
                warn!(sequence = sequence.name(), error = %e, "Stimulus ended with fault");
            }
            result
        }));
        Ok(())
    }

    /// Stop everything and judge the run.
    pub async fn teardown(mut self) -> TestReport {
        let mut failures = Vec::new();

        self.stop.cancel();
        let grace = stimulus_grace(self.config.timing.spi_clk_period);
        if let Some(mut handle) = self.stimulus.take() {
            tokio::select! {
                joined = &mut handle => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => failures.push(Failure::Stimulus(e)),
                    Err(e) => failures.push(Failure::StimulusPanicked(e.to_string())),
                },
                _ = time::sleep(grace) => {
                    handle.abort();
                    failures.push(Failure::StimulusStuck(grace));
                }
            }
        }

        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let mut transfers = Vec::new();
        while let Ok(transfer) = self.observed_rx.try_recv() {
            transfers.push(transfer);
        }

        let options = self.config.options;
        let scoreboard = match (&mut self.predictor, options.has_scoreboard) {
            (Some(predictor), true) => {
                let summary = checkers::score(&predictor.drain(), &transfers);
                info!(matched = summary.matched, mismatches = summary.mismatches.len(), "Scoreboard");
                failures.extend(summary.mismatches.iter().cloned().map(Failure::Scoreboard));
                Some(summary)
            }
            _ => None,
        };

        let coverage = options.has_functional_coverage.then(|| {
            let mut coverage = Coverage::default();
            transfers.iter().for_each(|t| coverage.sample(t));
            coverage.log();
            coverage
        });

        if !failures.is_empty() {
            self.test_pass = false;
        }

        let report = TestReport {
            test: self.mode,
            passed: self.test_pass,
            failures,
            transfers,
            scoreboard,
            coverage,
        };

        if report.passed {
            info!(
                test = %report.test,
                transfers = report.transfers.len(),
                "** TEST PASSED **"
            );
        } else {
            for failure in &report.failures {
                error!(test = %report.test, "{failure}");
            }
            error!(
                test = %report.test,
                failures = report.failures.len(),
                "** TEST FAILED **"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{SpiInterface, BUS_MAP};
    use crate::sim::Dut;

    fn registry() -> InterfaceRegistry {
        let dut = Dut::with_pins(BUS_MAP.iter().map(|(_, pin)| *pin));
        let mut registry = InterfaceRegistry::new();
        registry.set(VIF_SPI, SpiInterface::bind(&dut, &BUS_MAP).unwrap());
        registry
    }

    #[test]
    fn test_mining_job_sequence_carries_literal() {
        let item = codec::encode_mining_job(
            Payload::from_hex(MINING_JOB_MIDSTATE).unwrap(),
            Payload::from_hex(MINING_JOB_HEADER_FRAGMENT).unwrap(),
            MINING_JOB_DIFFICULTY,
        )
        .unwrap();
        assert_eq!(item.payload(), Payload::from_hex(MINING_JOB_PAYLOAD).unwrap());
        assert_eq!(item.payload_width(), 352);
        assert!(TestMode::MiningJob
            .build_sequence(CancellationToken::new())
            .is_ok());
    }

    #[test]
    fn test_missing_binding_fails_build() {
        let err = Orchestrator::build(
            TestMode::Streaming,
            &InterfaceRegistry::new(),
            CheckerOptions::default(),
            TimingConfig::default(),
        )
        .err()
        .unwrap();

        assert!(matches!(
            err,
            EnvError::MissingInterfaceBinding { ref slot } if slot == "vif_spi"
        ));
    }

    #[test]
    fn test_scoreboard_requires_predictor() {
        let options = CheckerOptions {
            has_scoreboard: true,
            ..Default::default()
        };
        let err = Orchestrator::build(
            TestMode::Streaming,
            &registry(),
            options,
            TimingConfig::default(),
        )
        .err()
            .unwrap();
        assert!(matches!(err, EnvError::ScoreboardWithoutPredictor));
    }

    #[test]
    fn test_topology_lists_components() {
        let options = CheckerOptions {
            has_scoreboard: true,
            has_predictor: true,
            has_functional_coverage: false,
        };
        let orchestrator = Orchestrator::build(
            TestMode::MiningJob,
            &registry(),
            options,
            TimingConfig::default(),
        )
        .unwrap();
        let topology = orchestrator.topology();

        assert!(topology.starts_with("mining_job_test\n  env\n    spi_agent (active)"));
        for component in ["sequencer", "driver", "monitor", "predictor", "scoreboard"] {
            assert!(topology.contains(component), "{component} missing");
        }
        assert!(!topology.contains("coverage"));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut orchestrator = Orchestrator::build(
            TestMode::MiningJob,
            &registry(),
            CheckerOptions::default(),
            TimingConfig::default(),
        )
        .unwrap();
        orchestrator.start().unwrap();
        assert!(matches!(orchestrator.start(), Err(EnvError::AlreadyStarted)));
    }

    #[test]
    fn test_grace_covers_widest_transfer_at_any_clock() {
        assert_eq!(
            stimulus_grace(SimDuration::from_ps(55_560)),
            SimDuration::from_ps(55_560 * 515)
        );
        // A 2 µs clock needs about 66 µs for one 32-bit transfer.
        assert!(stimulus_grace(SimDuration::from_us(2)) > SimDuration::from_us(70));
    }

    #[test]
    fn test_failed_report_becomes_error() {
        let report = TestReport {
            test: TestMode::Streaming,
            passed: false,
            failures: vec![Failure::StimulusStuck(SimDuration::from_us(50))],
            transfers: Vec::new(),
            scoreboard: None,
            coverage: None,
        };
        assert!(matches!(
            report.into_result(),
            Err(EnvError::TestFailed {
                test: TestMode::Streaming,
                failures: 1
            })
        ));
    }
}
