//! Bounded per-priority buffers between intake and drain.

use tokio::sync::mpsc;

use crate::notification::{Message, MessageType};

/// Creates the three tier buffers, each holding at most `capacity` messages.
pub fn tiers(capacity: usize) -> (TierSender, TierReceiver) {
    let capacity = capacity.max(1);
    let (otp_tx, otp_rx) = mpsc::channel(capacity);
    let (trx_tx, trx_rx) = mpsc::channel(capacity);
    let (cmp_tx, cmp_rx) = mpsc::channel(capacity);
    (
        TierSender {
            senders: [otp_tx, trx_tx, cmp_tx],
        },
        TierReceiver {
            receivers: [otp_rx, trx_rx, cmp_rx],
        },
    )
}

#[derive(Debug, Clone)]
pub struct TierSender {
    senders: [mpsc::Sender<Message>; 3],
}

impl TierSender {
    /// Files `message` under its type, waiting while that tier is full.
    ///
    /// Hands the message back if the drain side is gone.
    pub async fn submit(&self, message: Message) -> Result<(), Message> {
        self.senders[message.kind.tier()]
            .send(message)
            .await
            .map_err(|e| e.0)
    }
}

#[derive(Debug)]
pub struct TierReceiver {
    receivers: [mpsc::Receiver<Message>; 3],
}

impl TierReceiver {
    /// Highest-priority buffered message, without waiting.
    pub fn try_next(&mut self) -> Option<Message> {
        self.receivers.iter_mut().find_map(|rx| rx.try_recv().ok())
    }

    /// Next message in strict priority order.
    ///
    /// Waits on every tier at once when all are empty. Returns `None` once
    /// every sender is dropped and nothing is left buffered.
    pub async fn next(&mut self) -> Option<Message> {
        if let Some(message) = self.try_next() {
            return Some(message);
        }

        let [otp, trx, cmp] = &mut self.receivers;
        tokio::select! {
            biased;

            Some(message) = otp.recv() => Some(message),
            Some(message) = trx.recv() => Some(message),
            Some(message) = cmp.recv() => Some(message),
            else => None,
        }
    }

    /// Messages currently buffered for `kind`.
    pub fn len(&self, kind: MessageType) -> usize {
        self.receivers[kind.tier()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.iter().all(|rx| rx.is_empty())
    }
}
