//! SPI stimulus test bench for an FPGA double-SHA256 mining pipeline.
//!
//! The bench drives the pipeline's serial input port with two tests: a
//! stream of incrementing 32-bit words, and a single 352-bit mining job.
//! Everything runs in simulated time on a paused tokio runtime.

pub mod agent;
pub mod codec;
pub mod env;
pub mod harness;
pub mod payload;
pub mod registry;
pub mod sequence;
pub mod sim;
pub mod tracing;
