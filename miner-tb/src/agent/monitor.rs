//! SPI monitor: reassembles transfers seen on the bus.
//!
//! Samples MOSI on every rising serial-clock edge while select is high and
//! closes the frame when select falls. Frames cut short by reset are
//! discarded. Completed frames go to every subscriber.

use bitvec::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::interface::SpiInterface;
use crate::codec::{self, CodecError};
use crate::sequence::SequenceItem;
use crate::sim::time::{self, SimTime};
use crate::tracing::prelude::*;

/// One frame as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransfer {
    /// Bits in wire order.
    pub bits: BitVec<u8, Lsb0>,

    /// Time the first bit was sampled.
    pub started_at: SimTime,

    /// Time select fell.
    pub ended_at: SimTime,
}

impl ObservedTransfer {
    /// Decode the frame back into the item that produced it.
    pub fn item(&self) -> Result<SequenceItem, CodecError> {
        codec::from_wire_bits(&self.bits)
    }
}

/// Passive observer of the SPI bus.
pub struct SpiMonitor {
    vif: SpiInterface,
    subscribers: Vec<mpsc::UnboundedSender<ObservedTransfer>>,
    shutdown: CancellationToken,
}

impl SpiMonitor {
    pub fn new(vif: SpiInterface, shutdown: CancellationToken) -> Self {
        Self {
            vif,
            subscribers: Vec::new(),
            shutdown,
        }
    }

    /// Receive every transfer observed from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ObservedTransfer> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub async fn run(mut self) {
        let mut sclk = self.vif.sclk().watch();
        let mut ss = self.vif.ss().watch();
        let mut bits: BitVec<u8, Lsb0> = BitVec::new();
        let mut started_at = SimTime::ZERO;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                edge = sclk.rising_edge() => {
                    if edge.is_err() {
                        break;
                    }
                    if self.vif.reset().get() {
                        if !bits.is_empty() {
                            debug!(bits = bits.len(), "Discarding frame cut by reset");
                            bits.clear();
                        }
                        continue;
                    }
                    if self.vif.ss().get() {
                        if bits.is_empty() {
                            started_at = time::now();
                        }
                        bits.push(self.vif.mosi().get());
                    }
                }

                edge = ss.falling_edge() => {
                    if edge.is_err() {
                        break;
                    }
                    if !bits.is_empty() {
                        let transfer = ObservedTransfer {
                            bits: std::mem::take(&mut bits),
                            started_at,
                            ended_at: time::now(),
                        };
                        self.publish(transfer);
                    }
                }
            }
        }

        debug!("SPI monitor stopped");
    }

    fn publish(&mut self, transfer: ObservedTransfer) {
        match transfer.item() {
            Ok(item) => debug!(
                payload = %item.payload(),
                width = item.payload_width(),
                started_at = %transfer.started_at,
                "Observed transfer"
            ),
            Err(e) => warn!(bits = transfer.bits.len(), error = %e, "Observed undecodable frame"),
        }
        self.subscribers.retain(|tx| tx.send(transfer.clone()).is_ok());
    }
}
