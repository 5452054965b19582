//! Per-process outbound mirror queue
//!
//! The delta applicator enqueues write intents here after its transaction
//! commits; the mirror writer in the worker crate consumes them. Sends are
//! best-effort: a full queue records an error in the delta summary instead
//! of failing the delta.

use tempo_core::models::MirrorIntent;
use tokio::sync::mpsc;

/// Bounded depth of the outbound queue
pub const MIRROR_QUEUE_DEPTH: usize = 1024;

pub type MirrorSender = mpsc::Sender<MirrorIntent>;
pub type MirrorReceiver = mpsc::Receiver<MirrorIntent>;

/// Create the process-wide mirror queue
pub fn mirror_channel() -> (MirrorSender, MirrorReceiver) {
    mpsc::channel(MIRROR_QUEUE_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::models::MirrorOperation;
    use tempo_core::types::{AccountId, EventId, UserId};

    fn intent() -> MirrorIntent {
        MirrorIntent {
            user_id: UserId::new(),
            target_account_id: AccountId::new(),
            canonical_event_id: EventId::new(),
            version: 1,
            operation: MirrorOperation::Upsert,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_queue_roundtrip() {
        let (tx, mut rx) = mirror_channel();
        let sent = intent();
        tx.try_send(sent.clone()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.canonical_event_id, sent.canonical_event_id);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(intent()).unwrap();
        assert!(tx.try_send(intent()).is_err());
    }
}
