//! SPI driver: shifts sequencer items onto the bus.
//!
//! Timing, SPI mode 0 with an active-high select:
//!
//! ```text
//! sclk   ‾‾|__|‾‾|__|‾‾|__|‾‾ ... ‾‾|__|‾‾
//! ss     __|‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾ ... ‾‾‾‾|_____
//! mosi   __| b0  | b1  | b2   ...      |_____
//!                                         ^ ack on this rising edge
//! ```
//!
//! Bits change on falling edges, LSB first, and are sampled on rising edges.
//! Select drops on the falling edge after the last bit; the sequencer is
//! acknowledged one rising edge later.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::interface::SpiInterface;
use super::sequencer::TransferRequest;
use super::{TransferAck, TransferFault};
use crate::codec;
use crate::sequence::SequenceItem;
use crate::sim::time;
use crate::sim::SignalClosed;
use crate::tracing::prelude::*;

impl From<SignalClosed> for TransferFault {
    fn from(_: SignalClosed) -> Self {
        TransferFault::BusClosed
    }
}

/// Drives transfers requested through the [`Sequencer`](super::Sequencer).
pub struct SpiDriver {
    vif: SpiInterface,
    request_rx: mpsc::Receiver<TransferRequest>,
    shutdown: CancellationToken,
}

impl SpiDriver {
    pub(crate) fn new(
        vif: SpiInterface,
        request_rx: mpsc::Receiver<TransferRequest>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            vif,
            request_rx,
            shutdown,
        }
    }

    /// Serve requests until shutdown or until the sequencer goes away.
    ///
    /// Shutdown abandons a transfer in progress and its submitter sees
    /// [`TransferFault::DriverOffline`]. The environment only shuts the
    /// driver down once the stimulus has stopped.
    pub async fn run(mut self) {
        self.idle();

        loop {
            let request = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                request = self.request_rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.idle();
                    break;
                }
                result = self.drive(&request.item) => result,
            };
            match &result {
                Ok(ack) => trace!(
                    payload = %request.item.payload(),
                    bits = ack.bits,
                    completed_at = %ack.completed_at,
                    "Transfer complete"
                ),
                Err(fault) => warn!(payload = %request.item.payload(), %fault, "Transfer failed"),
            }

            if request.response_tx.send(result).is_err() {
                debug!("Submitter went away before acknowledgement");
            }
        }

        debug!("SPI driver stopped");
    }

    fn idle(&self) {
        self.vif.ss().set(false);
        self.vif.mosi().set(false);
    }

    async fn drive(&self, item: &SequenceItem) -> Result<TransferAck, TransferFault> {
        // No bits go out while the pipeline is held in reset.
        self.vif.reset().watch().wait_level(false).await?;

        // Owned copy: bitvec's iterators are not Send and this loop awaits.
        let wire: Vec<bool> = codec::to_wire_bits(item).iter().by_vals().collect();
        let mut sclk = self.vif.sclk().watch();

        for (index, &bit) in wire.iter().enumerate() {
            sclk.falling_edge().await?;
            if self.vif.reset().get() {
                self.idle();
                return Err(TransferFault::ResetAsserted { bit: index });
            }
            self.vif.ss().set(true);
            self.vif.mosi().set(bit);
        }

        sclk.falling_edge().await?;
        self.idle();
        sclk.rising_edge().await?;

        Ok(TransferAck {
            bits: wire.len(),
            completed_at: time::now(),
        })
    }
}
