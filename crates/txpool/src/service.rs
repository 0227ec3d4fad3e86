//! The pool facade: wires the store, validator, and sync engine together
//! and implements the inbound API.

use crate::config::TxPoolConfig;
use crate::domain::entities::TxSubmitCallback;
use crate::domain::nonce::{LedgerNonceChecker, PoolNonceChecker};
use crate::domain::store::PoolStore;
use crate::domain::validator::TxValidator;
use crate::ports::inbound::TxPoolApi;
use crate::ports::outbound::{FrontService, Ledger, LedgerError, SealerGateway};
use crate::sync::engine::ProposalContext;
use crate::sync::{Membership, ReplyFn, SyncEngine, SyncError, SyncNotifier, VerifyCallback};
use shared_types::{
    Hash, NodeId, ProposalBlock, Transaction, TxStatus, TxSubmitResult,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The transaction pool service.
pub struct TxPool {
    config: Arc<TxPoolConfig>,
    store: Arc<PoolStore>,
    sync: Arc<SyncEngine>,
    membership: Arc<Membership>,
    ledger: Arc<dyn Ledger>,
}

impl TxPool {
    /// Wire up the pool: nonce checkers, validator, store, and sync
    /// engine, sharing one wakeup notifier between store and engine.
    pub fn new(
        config: TxPoolConfig,
        node_id: NodeId,
        front: Arc<dyn FrontService>,
        ledger: Arc<dyn Ledger>,
        sealer: Arc<dyn SealerGateway>,
    ) -> Result<Arc<Self>, SyncError> {
        let config = Arc::new(config);
        let pool_nonce_checker = Arc::new(PoolNonceChecker::new());
        let ledger_nonce_checker = Arc::new(LedgerNonceChecker::new(config.block_limit));
        let validator = Arc::new(TxValidator::new(
            pool_nonce_checker,
            ledger_nonce_checker,
            config.chain_id.clone(),
            config.group_id.clone(),
        ));
        let notifier = Arc::new(SyncNotifier::new());
        let membership = Arc::new(Membership::new(node_id));
        let store = Arc::new(PoolStore::new(
            config.clone(),
            validator,
            ledger.clone(),
            sealer,
            notifier.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(
            config.clone(),
            store.clone(),
            front,
            ledger.clone(),
            membership.clone(),
            notifier,
        )?);
        Ok(Arc::new(Self {
            config,
            store,
            sync,
            membership,
            ledger,
        }))
    }

    /// Seed the ledger nonce window with the nonces mined over the last
    /// `block_limit` committed blocks.
    pub async fn init(&self) -> Result<(), LedgerError> {
        let tip = self.ledger.block_number().await?;
        let start = if tip >= self.config.block_limit {
            tip - self.config.block_limit + 1
        } else {
            0
        };
        let count = tip.saturating_sub(start) + 1;
        let history = if tip > 0 {
            self.ledger.nonces(start, count).await?
        } else {
            Default::default()
        };
        self.store
            .validator()
            .ledger_nonce_checker()
            .initialize(tip, history);
        info!(tip, start, "seeded ledger nonce window");
        Ok(())
    }

    /// Start the sync worker.
    pub fn start(&self) {
        self.sync.start();
        info!("txpool started");
    }

    /// Stop the sync worker and wait for it to exit; outstanding
    /// callbacks are best-effort.
    pub async fn stop(&self) {
        self.sync.stop().await;
        info!("txpool stopped");
    }

    /// The underlying store, exposed for collaborators that inspect pool
    /// state directly.
    pub fn store(&self) -> &Arc<PoolStore> {
        &self.store
    }

    /// The sync engine.
    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }
}

impl TxPoolApi for TxPool {
    fn submit(&self, tx_data: Vec<u8>, callback: Option<TxSubmitCallback>) -> TxStatus {
        if !self.membership.in_group() {
            if let Some(callback) = callback {
                let _ = callback.send(TxSubmitResult::rejected(
                    [0u8; 32],
                    TxStatus::NotInGroup,
                ));
            }
            return TxStatus::NotInGroup;
        }
        self.store.submit(&tx_data, callback)
    }

    fn seal_txs(&self, limit: usize, avoid: &HashSet<Hash>) -> Vec<Hash> {
        let sealed = self.store.batch_fetch_txs(limit, avoid, true);
        debug!(sealed = sealed.len(), limit, "sealed transactions");
        sealed
    }

    fn fetch_new_txs(&self, limit: usize) -> Vec<Arc<Transaction>> {
        self.store
            .fetch_new_txs(limit)
            .into_iter()
            .map(|entry| entry.transaction().clone())
            .collect()
    }

    fn notify_block_result(&self, batch_id: u64, results: Vec<TxSubmitResult>) {
        let count = results.len();
        self.store.batch_remove(batch_id, results);
        debug!(batch_id, txs = count, "accounted committed block");
    }

    fn verify_block(&self, peer: NodeId, encoded_proposal: Vec<u8>, callback: VerifyCallback) {
        let proposal = match ProposalBlock::decode(&encoded_proposal) {
            Ok(proposal) => proposal,
            Err(error) => {
                warn!(%error, peer = %peer.short_hex(), "undecodable proposal");
                let _ = callback.send(Err(error.into()));
                return;
            }
        };
        let total = proposal.tx_hashes.len();
        let missed: Vec<Hash> = proposal
            .tx_hashes
            .iter()
            .filter(|hash| !self.store.exist(hash))
            .copied()
            .collect();
        debug!(
            block_number = proposal.block_number,
            total,
            missed = missed.len(),
            "verifying proposal"
        );
        if missed.is_empty() {
            let _ = callback.send(Ok(()));
            return;
        }
        let context = ProposalContext {
            block_number: proposal.block_number,
            block_hash: proposal.block_hash,
        };
        let sync = self.sync.clone();
        tokio::spawn(async move {
            sync.request_missed_txs(Some(peer), missed, Some(context), Some(callback))
                .await;
        });
    }

    fn fill_block(&self, hashes: &[Hash]) -> Result<Vec<Arc<Transaction>>, TxStatus> {
        let (found, missed) = self.store.fetch_txs(hashes);
        if !missed.is_empty() {
            warn!(missed = missed.len(), "fill block hit missing transactions");
            return Err(TxStatus::TxsMissing);
        }
        Ok(found)
    }

    fn mark_txs(&self, hashes: &[Hash], sealed: bool) {
        self.store.batch_mark_txs(hashes, sealed);
    }

    fn notify_txs_sync_message(&self, from: NodeId, data: Vec<u8>, reply: Option<ReplyFn>) {
        self.sync.on_recv_sync_message(from, data, reply);
    }

    fn notify_connected_nodes(&self, nodes: HashSet<NodeId>) {
        self.membership.set_connected_nodes(nodes);
    }

    fn notify_consensus_node_list(&self, nodes: Vec<NodeId>) {
        self.membership.set_consensus_node_list(nodes);
    }

    fn notify_observer_node_list(&self, nodes: Vec<NodeId>) {
        self.membership.set_observer_node_list(nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::mocks::{MockFrontService, MockLedger, MockSealer};
    use shared_crypto::Ed25519KeyPair;
    use shared_types::U256;
    use tokio::sync::oneshot;

    const TIP: u64 = 20;

    fn node(byte: u8) -> NodeId {
        NodeId([byte; 32])
    }

    async fn create_pool(self_node: NodeId) -> Arc<TxPool> {
        let ledger = Arc::new(MockLedger::new(TIP));
        let pool = TxPool::new(
            TxPoolConfig::for_testing(),
            self_node,
            Arc::new(MockFrontService::new()),
            ledger,
            Arc::new(MockSealer::new()),
        )
        .unwrap();
        pool.init().await.unwrap();
        pool
    }

    fn create_test_tx(seed: u8, nonce: u64) -> Vec<u8> {
        let keypair = Ed25519KeyPair::from_seed([seed; 32]);
        let tx = Transaction::signed(
            &keypair,
            "chain0",
            "group0",
            TIP + 5,
            U256::from(nonce),
            vec![seed],
        );
        bincode::serialize(&tx).unwrap()
    }

    #[tokio::test]
    async fn test_submit_outside_group_rejected() {
        let pool = create_pool(node(1)).await;
        let (sender, receiver) = oneshot::channel();

        let status = pool.submit(create_test_tx(1, 1), Some(sender));
        assert_eq!(status, TxStatus::NotInGroup);
        assert_eq!(pool.store().size(), 0);

        let result = receiver.await.unwrap();
        assert_eq!(result.status, TxStatus::NotInGroup);
        assert_eq!(result.tx_hash, [0u8; 32]);
    }

    #[tokio::test]
    async fn test_submit_seal_commit_round_trip() {
        let pool = create_pool(node(1)).await;
        pool.notify_consensus_node_list(vec![node(1)]);

        let (sender, receiver) = oneshot::channel();
        let status = pool.submit(create_test_tx(2, 1), Some(sender));
        assert_eq!(status, TxStatus::Ok);
        assert_eq!(pool.store().size(), 1);

        let sealed = pool.seal_txs(1, &HashSet::new());
        assert_eq!(sealed.len(), 1);
        assert_eq!(pool.store().unsealed_txs_size(), 0);

        let batch_id = TIP + 1;
        pool.notify_block_result(
            batch_id,
            vec![TxSubmitResult::committed(sealed[0], batch_id, [0xF0; 32])],
        );
        assert_eq!(pool.store().size(), 0);

        let result = receiver.await.unwrap();
        assert!(result.status.is_ok());
        assert_eq!(result.block_number, Some(batch_id));
    }

    #[tokio::test]
    async fn test_observer_membership_allows_submission() {
        let pool = create_pool(node(1)).await;
        pool.notify_observer_node_list(vec![node(1)]);
        assert_eq!(pool.submit(create_test_tx(3, 1), None), TxStatus::Ok);
    }

    #[tokio::test]
    async fn test_fill_block_missing_hash() {
        let pool = create_pool(node(1)).await;
        pool.notify_consensus_node_list(vec![node(1)]);
        pool.submit(create_test_tx(4, 1), None);

        let result = pool.fill_block(&[[0x42; 32]]);
        assert_eq!(result.unwrap_err(), TxStatus::TxsMissing);
    }

    #[tokio::test]
    async fn test_fill_block_returns_bodies() {
        let pool = create_pool(node(1)).await;
        pool.notify_consensus_node_list(vec![node(1)]);

        let keypair = Ed25519KeyPair::from_seed([0x05; 32]);
        let tx = Transaction::signed(
            &keypair,
            "chain0",
            "group0",
            TIP + 5,
            U256::from(1),
            vec![],
        );
        pool.submit(bincode::serialize(&tx).unwrap(), None);

        let bodies = pool.fill_block(&[tx.hash()]).unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].hash(), tx.hash());
    }

    #[tokio::test]
    async fn test_mark_txs_reopens_sealed_entries() {
        let pool = create_pool(node(1)).await;
        pool.notify_consensus_node_list(vec![node(1)]);
        pool.submit(create_test_tx(6, 1), None);

        let sealed = pool.seal_txs(1, &HashSet::new());
        assert_eq!(pool.store().unsealed_txs_size(), 0);

        // the candidate block was abandoned
        pool.mark_txs(&sealed, false);
        assert_eq!(pool.store().unsealed_txs_size(), 1);

        // the entry is sealable again
        let resealed = pool.seal_txs(1, &HashSet::new());
        assert_eq!(resealed, sealed);
    }

    #[tokio::test]
    async fn test_verify_block_with_all_local_txs() {
        let pool = create_pool(node(1)).await;
        pool.notify_consensus_node_list(vec![node(1)]);

        let keypair = Ed25519KeyPair::from_seed([0x07; 32]);
        let tx = Transaction::signed(
            &keypair,
            "chain0",
            "group0",
            TIP + 5,
            U256::from(1),
            vec![],
        );
        pool.submit(bincode::serialize(&tx).unwrap(), None);

        let proposal = ProposalBlock::new(TIP + 1, [0xAB; 32], vec![tx.hash()]);
        let (sender, receiver) = oneshot::channel();
        pool.verify_block(node(2), proposal.encode().unwrap(), sender);
        assert!(receiver.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_verify_block_empty_proposal() {
        let pool = create_pool(node(1)).await;
        let proposal = ProposalBlock::new(TIP + 1, [0xAB; 32], vec![]);
        let (sender, receiver) = oneshot::channel();
        pool.verify_block(node(2), proposal.encode().unwrap(), sender);
        assert!(receiver.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_verify_block_undecodable_proposal() {
        let pool = create_pool(node(1)).await;
        let (sender, receiver) = oneshot::channel();
        pool.verify_block(node(2), vec![0xFF, 0x01], sender);
        assert!(matches!(receiver.await.unwrap(), Err(SyncError::Codec(_))));
    }

    #[tokio::test]
    async fn test_init_seeds_ledger_window() {
        let ledger = Arc::new(
            MockLedger::new(TIP).with_nonces(TIP - 2, vec![U256::from(55)]),
        );
        let pool = TxPool::new(
            TxPoolConfig::for_testing(),
            node(1),
            Arc::new(MockFrontService::new()),
            ledger,
            Arc::new(MockSealer::new()),
        )
        .unwrap();
        pool.init().await.unwrap();
        pool.notify_consensus_node_list(vec![node(1)]);

        // nonce 55 was mined within the window: admission rejects it
        let keypair = Ed25519KeyPair::from_seed([0x08; 32]);
        let tx = Transaction::signed(
            &keypair,
            "chain0",
            "group0",
            TIP + 5,
            U256::from(55),
            vec![],
        );
        assert_eq!(
            pool.submit(bincode::serialize(&tx).unwrap(), None),
            TxStatus::NonceCheckFail
        );
    }
}
