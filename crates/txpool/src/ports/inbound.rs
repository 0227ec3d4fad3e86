//! Inbound (driving) port: the operations the pool exposes to the RPC
//! layer, the sealer, and the consensus verifier.

use crate::domain::entities::TxSubmitCallback;
use crate::sync::{ReplyFn, VerifyCallback};
use shared_types::{Hash, NodeId, Transaction, TxStatus, TxSubmitResult};
use std::collections::HashSet;
use std::sync::Arc;

/// Primary API of the transaction pool.
pub trait TxPoolApi: Send + Sync {
    /// Admit client transaction bytes. The callback, when given, receives
    /// exactly one terminal result: an admission failure now, or the final
    /// on-chain outcome later. Nodes outside the group reject immediately
    /// without inserting.
    fn submit(&self, tx_data: Vec<u8>, callback: Option<TxSubmitCallback>) -> TxStatus;

    /// Hand up to `limit` pending transactions to the sealer, marking them
    /// sealed; hashes in `avoid` are skipped.
    fn seal_txs(&self, limit: usize, avoid: &HashSet<Hash>) -> Vec<Hash>;

    /// Pending transactions not yet forwarded to peers.
    fn fetch_new_txs(&self, limit: usize) -> Vec<Arc<Transaction>>;

    /// Account for a committed block: bulk-remove its transactions,
    /// advance the nonce windows, and fire the per-transaction callbacks.
    fn notify_block_result(&self, batch_id: u64, results: Vec<TxSubmitResult>);

    /// Verify that every transaction of a peer's proposal is obtainable,
    /// fetching misses from the proposer; the callback receives the
    /// verdict.
    fn verify_block(&self, peer: NodeId, encoded_proposal: Vec<u8>, callback: VerifyCallback);

    /// Resolve hashes to local bodies; fails when any hash is absent.
    fn fill_block(&self, hashes: &[Hash]) -> Result<Vec<Arc<Transaction>>, TxStatus>;

    /// Flip the sealed flag on the given hashes.
    fn mark_txs(&self, hashes: &[Hash], sealed: bool);

    /// Inbound sync message from the transport; `reply` answers on the
    /// request's correlation when the packet warrants a response.
    fn notify_txs_sync_message(&self, from: NodeId, data: Vec<u8>, reply: Option<ReplyFn>);

    /// Replace the set of currently connected peers.
    fn notify_connected_nodes(&self, nodes: HashSet<NodeId>);

    /// Replace the ordered consensus node list.
    fn notify_consensus_node_list(&self, nodes: Vec<NodeId>);

    /// Replace the observer node list.
    fn notify_observer_node_list(&self, nodes: Vec<NodeId>);
}
