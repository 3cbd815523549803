//! Optional checking components: predictor, scoreboard, functional coverage.
//!
//! None of them run as tasks. The predictor collects what the sequencer was
//! asked to send, the monitor collects what appeared on the bus, and the
//! scoreboard compares the two at teardown.

use std::collections::BTreeMap;

use bitvec::prelude::*;
use tokio::sync::mpsc;

use crate::agent::ObservedTransfer;
use crate::codec;
use crate::sequence::SequenceItem;
use crate::tracing::prelude::*;

/// Expected wire image of every item handed to the sequencer.
#[derive(Debug)]
pub struct Predictor {
    rx: mpsc::UnboundedReceiver<SequenceItem>,
}

impl Predictor {
    /// Create a predictor and the sender the sequencer should copy items to.
    pub fn channel() -> (Self, mpsc::UnboundedSender<SequenceItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }

    /// Predicted transfers, in submission order.
    pub fn drain(&mut self) -> Vec<BitVec<u8, Lsb0>> {
        let mut expected = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            expected.push(codec::to_wire_bits(&item));
        }
        expected
    }
}

/// One disagreement between prediction and bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mismatch {
    #[error("Transfer {index}: expected {expected} bits, observed {observed}")]
    Width {
        index: usize,
        expected: usize,
        observed: usize,
    },

    #[error("Transfer {index}: first wrong bit at {bit}")]
    Bits { index: usize, bit: usize },

    #[error("Transfer {index} predicted but never observed")]
    Missing { index: usize },

    #[error("Transfer {index} observed but never predicted")]
    Unexpected { index: usize },
}

/// Result of an in-order comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreboardSummary {
    pub matched: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ScoreboardSummary {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare observed transfers against predicted ones, in order.
pub fn score(expected: &[BitVec<u8, Lsb0>], observed: &[ObservedTransfer]) -> ScoreboardSummary {
    let mut summary = ScoreboardSummary::default();

    for (index, (want, got)) in expected.iter().zip(observed).enumerate() {
        if want.len() != got.bits.len() {
            summary.mismatches.push(Mismatch::Width {
                index,
                expected: want.len(),
                observed: got.bits.len(),
            });
        } else if let Some(bit) = (0..want.len()).find(|&i| want[i] != got.bits[i]) {
            summary.mismatches.push(Mismatch::Bits { index, bit });
        } else {
            summary.matched += 1;
        }
    }

    let compared = expected.len().min(observed.len());
    summary
        .mismatches
        .extend((compared..expected.len()).map(|index| Mismatch::Missing { index }));
    summary
        .mismatches
        .extend((compared..observed.len()).map(|index| Mismatch::Unexpected { index }));

    summary
}

/// Observed transfers binned by width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    widths: BTreeMap<usize, u64>,
}

impl Coverage {
    pub fn sample(&mut self, transfer: &ObservedTransfer) {
        *self.widths.entry(transfer.bits.len()).or_default() += 1;
    }

    /// Transfer count per width.
    pub fn bins(&self) -> &BTreeMap<usize, u64> {
        &self.widths
    }

    pub fn total(&self) -> u64 {
        self.widths.values().sum()
    }

    pub fn log(&self) {
        for (width, count) in &self.widths {
            info!(width, count, "Coverage");
        }
        if self.widths.is_empty() {
            warn!("Coverage: no transfers observed");
        }
    }
}
