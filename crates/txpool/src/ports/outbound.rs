//! Outbound (driven) ports: the ledger store, the peer transport, and the
//! block sealer the pool collaborates with.

use async_trait::async_trait;
use shared_types::{Hash, NodeId, Transaction, U256};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the ledger collaborator.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger could not serve the request.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// A write was rejected.
    #[error("ledger store failed: {0}")]
    StoreFailed(String),
}

/// Asynchronous access to the committed chain.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current highest committed block number.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Fetch transaction bodies by hash; absent hashes yield `None` at
    /// their index.
    async fn batch_txs_by_hash(
        &self,
        hashes: &[Hash],
    ) -> Result<Vec<Option<Transaction>>, LedgerError>;

    /// Persist encoded transactions ahead of sealing.
    async fn store_transactions(&self, txs: Vec<(Hash, Vec<u8>)>) -> Result<(), LedgerError>;

    /// Nonces mined per block for `count` blocks starting at `from_block`.
    async fn nonces(
        &self,
        from_block: u64,
        count: u64,
    ) -> Result<BTreeMap<u64, Vec<U256>>, LedgerError>;
}

/// Errors surfaced by the peer transport.
#[derive(Debug, Error)]
pub enum FrontError {
    /// The request did not complete within the deadline.
    #[error("request timed out")]
    Timeout,
    /// The peer is not reachable.
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Peer transport: fire-and-forget sends and request/response exchanges
/// addressed by node id.
#[async_trait]
pub trait FrontService: Send + Sync {
    /// One-way message to a peer.
    async fn send_message(&self, peer: &NodeId, data: Vec<u8>) -> Result<(), FrontError>;

    /// Request/response exchange with a deadline; the transport correlates
    /// the reply.
    async fn request(
        &self,
        peer: &NodeId,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, FrontError>;
}

/// Errors surfaced by the sealer gateway.
#[derive(Debug, Error)]
pub enum SealerError {
    /// The sealer could not accept the notification.
    #[error("sealer unavailable: {0}")]
    Unavailable(String),
}

/// The block sealer, notified whenever the unsealed transaction count
/// changes so it can gauge admission pressure.
#[async_trait]
pub trait SealerGateway: Send + Sync {
    async fn note_unsealed_txs_size(&self, size: usize) -> Result<(), SealerError>;
}
