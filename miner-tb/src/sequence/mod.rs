//! Stimulus sequences.
//!
//! A sequence is a stateful generator of [`SequenceItem`]s. It runs against a
//! [`TransferPort`] (normally the SPI agent's sequencer) and submits items one
//! at a time: every `submit` is a rendezvous that only returns once the
//! driver has shifted the whole item onto the bus, so a sequence never has
//! more than one transfer in flight.
//!
//! Two patterns exist:
//!
//! - [`SingleShot`] sends one fixed item and terminates (`Ready → Sent →
//!   Done`). Running it again fails with [`SequenceError::AlreadyCompleted`];
//!   build a new instance per transfer instead.
//! - [`AutoIncrement`] sends `seed, seed + 1, seed + 2, …` until its stop
//!   token is cancelled (`Ready → (Sent → Ready)* → Cancelled`). The token is
//!   only checked between transfers, so cancellation never cuts a transfer
//!   short. Any error ends the stream in `Faulted` instead.
//!
//! Transfer faults are returned to the caller as-is. Whether to retry is the
//! orchestrator's call, not the sequence's. A terminated sequence refuses to
//! run again.

mod item;

pub use item::SequenceItem;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::{TransferFault, TransferPort};
use crate::codec::{self, CodecError};
use crate::payload::Payload;
use crate::tracing::prelude::*;

/// Error types for sequence execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("Failed to build item: {0}")]
    Codec(#[from] CodecError),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferFault),

    #[error("Sequence already completed")]
    AlreadyCompleted,
}

/// A unit of stimulus that can be run against a transfer port.
#[async_trait]
pub trait Sequence: Send {
    /// Name used in logs and the topology print.
    fn name(&self) -> &str;

    /// Generate and submit items until the sequence terminates.
    async fn run(&mut self, port: &dyn TransferPort) -> Result<(), SequenceError>;
}

/// State of a [`SingleShot`] sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleShotState {
    Ready,
    Sent,
    Done,
}

/// Sends exactly one pre-built item.
#[derive(Debug)]
pub struct SingleShot {
    name: String,
    item: Option<SequenceItem>,
    state: SingleShotState,
}

impl SingleShot {
    pub fn new(name: impl Into<String>, item: SequenceItem) -> Self {
        Self {
            name: name.into(),
            item: Some(item),
            state: SingleShotState::Ready,
        }
    }

    pub fn state(&self) -> SingleShotState {
        self.state
    }
}

#[async_trait]
impl Sequence for SingleShot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, port: &dyn TransferPort) -> Result<(), SequenceError> {
        let Some(item) = self.item.take() else {
            warn!(sequence = %self.name, state = ?self.state, "Single-shot sequence rerun");
            return Err(SequenceError::AlreadyCompleted);
        };

        debug!(
            sequence = %self.name,
            payload = %item.payload(),
            width = item.payload_width(),
            "Sending item"
        );
        self.state = SingleShotState::Sent;
        let result = port.submit(item).await;
        self.state = SingleShotState::Done;

        let ack = result?;
        debug!(sequence = %self.name, completed_at = %ack.completed_at, "Item sent");
        Ok(())
    }
}

/// State of an [`AutoIncrement`] sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoIncrementState {
    Ready,
    Sent,
    Cancelled,
    Faulted,
}

/// Streams an incrementing payload until cancelled.
#[derive(Debug)]
pub struct AutoIncrement {
    name: String,
    payload: Payload,
    width: usize,
    state: AutoIncrementState,
    stop: CancellationToken,
    sent: u64,
}

impl AutoIncrement {
    /// Create a stream starting at `seed`.
    ///
    /// The stream stops before the next transfer once `stop` is cancelled.
    pub fn new(
        name: impl Into<String>,
        seed: impl Into<Payload>,
        width: usize,
        stop: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            payload: seed.into(),
            width,
            state: AutoIncrementState::Ready,
            stop,
            sent: 0,
        }
    }

    pub fn state(&self) -> AutoIncrementState {
        self.state
    }

    /// Payload the next transfer will carry.
    pub fn next_payload(&self) -> Payload {
        self.payload
    }

    /// Number of transfers acknowledged so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn advance(&mut self) -> Result<(), CodecError> {
        // Past the width the next encode reports OutOfRange; only the 512-bit
        // ceiling needs handling here.
        self.payload = self
            .payload
            .checked_increment()
            .ok_or(CodecError::OutOfRange {
                payload: self.payload,
                bits: self.payload.bit_len() + 1,
                width: self.width,
            })?;
        Ok(())
    }

    /// Send until stopped. [`Sequence::run`] marks the stream faulted on error.
    async fn stream(&mut self, port: &dyn TransferPort) -> Result<(), SequenceError> {
        loop {
            if self.stop.is_cancelled() {
                self.state = AutoIncrementState::Cancelled;
                info!(
                    sequence = %self.name,
                    sent = self.sent,
                    next = %self.payload,
                    "Stream stopped"
                );
                return Ok(());
            }

            let item = codec::encode_incrementing(self.payload, self.width)?;
            trace!(sequence = %self.name, payload = %item.payload(), "Sending item");

            self.state = AutoIncrementState::Sent;
            port.submit(item).await?;
            self.sent += 1;
            self.state = AutoIncrementState::Ready;

            self.advance()?;
        }
    }
}

#[async_trait]
impl Sequence for AutoIncrement {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, port: &dyn TransferPort) -> Result<(), SequenceError> {
        if matches!(
            self.state,
            AutoIncrementState::Cancelled | AutoIncrementState::Faulted
        ) {
            warn!(sequence = %self.name, state = ?self.state, "Stream rerun");
            return Err(SequenceError::AlreadyCompleted);
        }

        let result = self.stream(port).await;
        if result.is_err() {
            self.state = AutoIncrementState::Faulted;
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::agent::TransferAck;
    use crate::sim::time::{self, SimDuration};

    /// Transfer port that records every item and checks for overlap.
    #[derive(Default)]
    pub(crate) struct RecordingPort {
        items: Mutex<Vec<SequenceItem>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        /// Fail the nth submission (0-based).
        fail_at: Option<usize>,
        /// Cancel this token once n items have been accepted.
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl RecordingPort {
        pub(crate) fn failing_at(n: usize) -> Self {
            Self {
                fail_at: Some(n),
                ..Default::default()
            }
        }

        pub(crate) fn cancelling_after(n: usize, token: CancellationToken) -> Self {
            Self {
                cancel_after: Some((n, token)),
                ..Default::default()
            }
        }

        pub(crate) fn payloads(&self) -> Vec<Payload> {
            self.items
                .lock()
                .unwrap()
                .iter()
                .map(SequenceItem::payload)
                .collect()
        }

        pub(crate) fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransferPort for RecordingPort {
        async fn submit(&self, item: SequenceItem) -> Result<TransferAck, TransferFault> {
            let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(n, Ordering::SeqCst);

            let index = {
                let mut items = self.items.lock().unwrap();
                items.push(item.clone());
                items.len() - 1
            };

            // Give any concurrent submitter the chance to overlap.
            time::sleep(SimDuration::from_ns(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some((n, token)) = &self.cancel_after {
                if index + 1 >= *n {
                    token.cancel();
                }
            }
            if self.fail_at == Some(index) {
                return Err(TransferFault::ResetAsserted { bit: 3 });
            }
            Ok(TransferAck {
                bits: item.payload_width(),
                completed_at: time::now(),
            })
        }
    }

    fn item(v: u32, width: usize) -> SequenceItem {
        SequenceItem::new(Payload::from(v), width).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_sends_exactly_one_item() {
        let port = RecordingPort::default();
        let mut seq = SingleShot::new("seq0", item(0xab, 8));
        assert_eq!(seq.state(), SingleShotState::Ready);

        seq.run(&port).await.unwrap();

        assert_eq!(seq.state(), SingleShotState::Done);
        assert_eq!(port.payloads(), vec![Payload::from(0xabu32)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_rerun_is_rejected() {
        let port = RecordingPort::default();
        let mut seq = SingleShot::new("seq0", item(0xab, 8));
        seq.run(&port).await.unwrap();

        assert_eq!(seq.run(&port).await, Err(SequenceError::AlreadyCompleted));
        assert_eq!(port.payloads().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_propagates_fault_and_terminates() {
        let port = RecordingPort::failing_at(0);
        let mut seq = SingleShot::new("seq0", item(1, 8));

        let err = seq.run(&port).await.unwrap_err();

        assert_eq!(
            err,
            SequenceError::Transfer(TransferFault::ResetAsserted { bit: 3 })
        );
        assert_eq!(seq.state(), SingleShotState::Done);
        assert_eq!(seq.run(&port).await, Err(SequenceError::AlreadyCompleted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_is_gap_free_and_serialized() {
        let stop = CancellationToken::new();
        let port = RecordingPort::cancelling_after(5, stop.clone());
        let mut seq = AutoIncrement::new("seq0", 0x0000_00ffu32, 32, stop);

        seq.run(&port).await.unwrap();

        let expected: Vec<Payload> = (0xffu32..0xff + 5).map(Payload::from).collect();
        assert_eq!(port.payloads(), expected);
        assert_eq!(port.max_in_flight(), 1);
        assert_eq!(seq.state(), AutoIncrementState::Cancelled);
        assert_eq!(seq.sent(), 5);
        assert_eq!(seq.next_payload(), Payload::from(0x104u32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_first_payloads_from_streaming_seed() {
        let stop = CancellationToken::new();
        let port = RecordingPort::cancelling_after(3, stop.clone());
        let mut seq = AutoIncrement::new("seq0", 0x0000_00ffu32, 32, stop);

        seq.run(&port).await.unwrap();

        assert_eq!(
            port.payloads(),
            vec![
                Payload::from(0x0000_00ffu32),
                Payload::from(0x0000_0100u32),
                Payload::from(0x0000_0101u32),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_cancelled_before_start_sends_nothing() {
        let stop = CancellationToken::new();
        stop.cancel();
        let port = RecordingPort::default();
        let mut seq = AutoIncrement::new("seq0", 0u32, 8, stop);

        seq.run(&port).await.unwrap();

        assert!(port.payloads().is_empty());
        assert_eq!(seq.run(&port).await, Err(SequenceError::AlreadyCompleted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_overflowing_width_is_out_of_range() {
        let stop = CancellationToken::new();
        let port = RecordingPort::default();
        let mut seq = AutoIncrement::new("seq0", 0xfeu32, 8, stop);

        let err = seq.run(&port).await.unwrap_err();

        assert!(matches!(
            err,
            SequenceError::Codec(CodecError::OutOfRange { bits: 9, width: 8, .. })
        ));
        assert_eq!(
            port.payloads(),
            vec![Payload::from(0xfeu32), Payload::from(0xffu32)]
        );
        assert_eq!(seq.state(), AutoIncrementState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stops_on_first_fault() {
        let stop = CancellationToken::new();
        let port = RecordingPort::failing_at(2);
        let mut seq = AutoIncrement::new("seq0", 10u32, 16, stop);

        let err = seq.run(&port).await.unwrap_err();

        assert!(matches!(err, SequenceError::Transfer(_)));
        assert_eq!(port.payloads().len(), 3);
        assert_eq!(seq.sent(), 2);
        assert_eq!(seq.state(), AutoIncrementState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faulted_stream_rerun_is_rejected() {
        let stop = CancellationToken::new();
        let port = RecordingPort::failing_at(1);
        let mut seq = AutoIncrement::new("seq0", 10u32, 16, stop);
        seq.run(&port).await.unwrap_err();
        let next = seq.next_payload();

        assert_eq!(seq.run(&port).await, Err(SequenceError::AlreadyCompleted));
        assert_eq!(seq.run(&port).await, Err(SequenceError::AlreadyCompleted));
        assert_eq!(port.payloads(), vec![Payload::from(10u32), Payload::from(11u32)]);
        assert_eq!(seq.next_payload(), next);
        assert_eq!(seq.sent(), 1);
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        fn paused_runtime() -> tokio::runtime::Runtime {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap()
        }

        proptest! {
            #[test]
            fn prop_stream_is_gap_free(seed in 0u32..u32::MAX - 64, count in 1usize..20) {
                let stop = CancellationToken::new();
                let port = RecordingPort::cancelling_after(count, stop.clone());
                let mut seq = AutoIncrement::new("seq0", seed, 32, stop);

                paused_runtime()
                    .block_on(async {
                        time::start_epoch();
                        seq.run(&port).await
                    })
                    .unwrap();

                let expected: Vec<Payload> =
                    (seed..seed + count as u32).map(Payload::from).collect();
                prop_assert_eq!(port.payloads(), expected);
                prop_assert_eq!(port.max_in_flight(), 1);
                prop_assert_eq!(seq.sent(), count as u64);
                prop_assert_eq!(seq.next_payload(), Payload::from(seed + count as u32));
                prop_assert_eq!(seq.state(), AutoIncrementState::Cancelled);
            }
        }
    }
}
