//! Run one test of the mining pipeline's SPI bench.

use anyhow::{Context, Result};
use clap::Parser;

use miner_tb::env::{CheckerOptions, TestMode, TimingConfig};
use miner_tb::harness::Harness;
use miner_tb::tracing::{self, prelude::*};

/// SPI stimulus test bench for the FPGA mining pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Test to run
    #[arg(short, long, value_enum, env = "MINER_TB_TEST", default_value = "streaming")]
    test: TestMode,

    /// Build the predictor and scoreboard regardless of environment
    #[arg(long)]
    scoreboard: bool,

    /// Build functional coverage regardless of environment
    #[arg(long)]
    coverage: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing::init_stdout();

    let timing = TimingConfig::from_env();
    let mut options = CheckerOptions::from_env();
    if args.scoreboard {
        options.has_predictor = true;
        options.has_scoreboard = true;
    }
    options.has_functional_coverage |= args.coverage;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .context("Failed to build runtime")?;

    let report = runtime.block_on(
        Harness::new(args.test)
            .with_timing(timing)
            .with_checkers(options)
            .run(),
    )?;
    let report = report.into_result()?;

    info!(
        test = %report.test,
        transfers = report.transfers.len(),
        "Done"
    );
    Ok(())
}
