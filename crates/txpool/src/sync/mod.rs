//! Transaction synchronization with consensus peers: wire packets, group
//! membership, and the background sync engine.

pub mod engine;
pub mod membership;
pub mod messages;

pub use engine::SyncEngine;
pub use membership::Membership;
pub use messages::{TxsSyncMsg, TxsSyncPacketType};

use shared_types::CodecError;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};

/// Errors reported to the verify-block completion callback; they never
/// crash the sync worker.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure while talking to a peer.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within `network_timeout`.
    #[error("request to peer timed out")]
    Timeout,

    /// The peer answered with something other than a response packet.
    #[error("peer returned a non-response packet")]
    FetchTransactionsFailed,

    /// Referenced transactions could not all be located.
    #[error("transactions missing")]
    TransactionsMissing,

    /// One or more fetched transactions failed verification during
    /// proposal import.
    #[error("fetched transactions failed signature verification")]
    TxsSignatureVerifyFailed,

    /// A fetched body did not hash to the hash requested at its index.
    #[error("fetched transactions inconsistent with requested hashes")]
    InconsistentTransactions,

    /// Encoding or decoding a packet failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The engine could not be constructed or driven.
    #[error("sync engine error: {0}")]
    Engine(String),
}

/// One-shot completion for block verification.
pub type VerifyCallback = oneshot::Sender<Result<(), SyncError>>;

/// Transport-provided closure replying on the request's correlation.
pub type ReplyFn = Box<dyn FnOnce(Vec<u8>) + Send + 'static>;

/// Wakeup channel between the pool store and the sync worker.
///
/// The store raises the flag when an admission succeeds; the worker
/// consumes it and otherwise parks on the notify with a short timeout.
#[derive(Debug, Default)]
pub struct SyncNotifier {
    new_txs: AtomicBool,
    notify: Notify,
}

impl SyncNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that fresh transactions await forwarding and wake the worker.
    pub fn mark_new_txs(&self) {
        self.new_txs.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Whether fresh transactions await forwarding.
    pub fn has_new_txs(&self) -> bool {
        self.new_txs.load(Ordering::Acquire)
    }

    /// Clear the flag once the pending batch drains empty.
    pub fn clear_new_txs(&self) {
        self.new_txs.store(false, Ordering::Release);
    }

    /// Wake the worker without raising the flag (e.g. on shutdown or an
    /// incoming download).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Park until woken.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_flag_lifecycle() {
        let notifier = SyncNotifier::new();
        assert!(!notifier.has_new_txs());
        notifier.mark_new_txs();
        assert!(notifier.has_new_txs());
        notifier.clear_new_txs();
        assert!(!notifier.has_new_txs());
    }

    #[tokio::test]
    async fn test_mark_new_txs_wakes_waiter() {
        let notifier = std::sync::Arc::new(SyncNotifier::new());
        let waiter = notifier.clone();
        let handle = tokio::spawn(async move { waiter.notified().await });
        tokio::task::yield_now().await;
        notifier.mark_new_txs();
        handle.await.unwrap();
    }
}
