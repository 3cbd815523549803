//! Sequencer: the port sequences submit items through.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{TransferAck, TransferFault, TransferPort};
use crate::sequence::SequenceItem;

/// An item waiting for the driver, with the channel to acknowledge it on.
#[derive(Debug)]
pub(crate) struct TransferRequest {
    pub item: SequenceItem,
    pub response_tx: oneshot::Sender<Result<TransferAck, TransferFault>>,
}

/// Hands items to the driver one at a time.
///
/// `submit` blocks until the driver has finished the transfer, which is what
/// keeps sequences from pipelining.
#[derive(Debug, Clone)]
pub struct Sequencer {
    request_tx: mpsc::Sender<TransferRequest>,
    analysis_tx: Option<mpsc::UnboundedSender<SequenceItem>>,
}

impl Sequencer {
    pub(crate) fn new(request_tx: mpsc::Sender<TransferRequest>) -> Self {
        Self {
            request_tx,
            analysis_tx: None,
        }
    }

    /// Copy every submitted item to `tx` (used by the predictor).
    pub fn connect_analysis(&mut self, tx: mpsc::UnboundedSender<SequenceItem>) {
        self.analysis_tx = Some(tx);
    }
}

#[async_trait]
impl TransferPort for Sequencer {
    async fn submit(&self, item: SequenceItem) -> Result<TransferAck, TransferFault> {
        if let Some(tx) = &self.analysis_tx {
            // A dropped predictor just stops predicting.
            let _ = tx.send(item.clone());
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(TransferRequest { item, response_tx })
            .await
            .map_err(|_| TransferFault::DriverOffline)?;

        response_rx.await.map_err(|_| TransferFault::DriverOffline)?
    }
}
