//! SPI agent: sequencer, driver and monitor bundled around one interface.
//!
//! An active agent owns all three; a passive agent only monitors. The
//! sequencer is the only way stimulus reaches the bus: sequences call
//! [`TransferPort::submit`], the driver shifts the item out and the call
//! returns once the transfer is acknowledged.

pub mod driver;
pub mod interface;
pub mod monitor;
pub mod sequencer;

pub use driver::SpiDriver;
pub use interface::{BindError, SpiInterface, BUS_MAP};
pub use monitor::{ObservedTransfer, SpiMonitor};
pub use sequencer::Sequencer;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::sequence::SequenceItem;
use crate::sim::time::SimTime;
use crate::tracing::prelude::*;

/// Acknowledgement of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferAck {
    /// Bits shifted onto the bus.
    pub bits: usize,

    /// Time the driver released the sequencer.
    pub completed_at: SimTime,
}

/// A transfer that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferFault {
    #[error("No driver is serving the sequencer")]
    DriverOffline,

    #[error("Reset asserted while shifting bit {bit}")]
    ResetAsserted { bit: usize },

    #[error("Bus signals closed")]
    BusClosed,
}

/// Where sequences send their items.
#[async_trait]
pub trait TransferPort: Send + Sync {
    /// Submit one item and wait until it has been driven.
    async fn submit(&self, item: SequenceItem) -> Result<TransferAck, TransferFault>;
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct SpiConfig {
    pub vif: SpiInterface,

    /// Active agents drive the bus; passive agents only observe it.
    pub is_active: bool,
}

/// An SPI agent ready to be started.
pub struct SpiAgent {
    sequencer: Option<Sequencer>,
    driver: Option<SpiDriver>,
    monitor: SpiMonitor,
}

impl SpiAgent {
    /// Build the agent's components. Nothing runs until [`start`](Self::start).
    pub fn build(config: &SpiConfig, shutdown: &CancellationToken) -> Self {
        let monitor = SpiMonitor::new(config.vif.clone(), shutdown.clone());

        if !config.is_active {
            return Self {
                sequencer: None,
                driver: None,
                monitor,
            };
        }

        // Capacity one: the sequencer never has more than one request queued.
        let (request_tx, request_rx) = mpsc::channel(1);
        Self {
            sequencer: Some(Sequencer::new(request_tx)),
            driver: Some(SpiDriver::new(
                config.vif.clone(),
                request_rx,
                shutdown.clone(),
            )),
            monitor,
        }
    }

    pub fn is_active(&self) -> bool {
        self.sequencer.is_some()
    }

    /// The sequencer, if the agent is active.
    pub fn sequencer_mut(&mut self) -> Option<&mut Sequencer> {
        self.sequencer.as_mut()
    }

    /// Receive every transfer the monitor observes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ObservedTransfer> {
        self.monitor.subscribe()
    }

    /// Spawn the driver and monitor on `tracker`, handing back the sequencer.
    pub fn start(self, tracker: &TaskTracker) -> Option<Sequencer> {
        tracker.spawn(self.monitor.run());
        if let Some(driver) = self.driver {
            tracker.spawn(driver.run());
        }
        debug!(active = self.sequencer.is_some(), "SPI agent started");
        self.sequencer
    }
}
