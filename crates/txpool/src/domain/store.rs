//! Concurrent pool store: a hash-keyed table with a time-ordered index,
//! per-entry flags, bulk removal, deferred invalid-entry GC, and
//! submit-result notification.

use crate::config::TxPoolConfig;
use crate::domain::entities::{PoolTransaction, TxSubmitCallback};
use crate::domain::validator::TxValidator;
use crate::ports::outbound::{Ledger, SealerGateway};
use crate::sync::SyncNotifier;
use parking_lot::{Mutex, RwLock};
use shared_types::{abridged, Hash, NodeId, Transaction, TxStatus, TxSubmitResult, U256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

/// Attempts for the unsealed-size notification before giving up.
const NOTIFY_SEALER_ATTEMPTS: u32 = 5;
/// Attempts for the ledger pre-commit before giving up.
const PRE_COMMIT_ATTEMPTS: u32 = 3;
/// Base delay for both retry loops; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

struct PoolIndex {
    by_hash: HashMap<Hash, Arc<PoolTransaction>>,
    /// Entries keyed by `(import_time, hash)`; scans walk this map so the
    /// sealer and the forwarder see arrival order.
    by_time: BTreeMap<(u64, Hash), Arc<PoolTransaction>>,
}

impl PoolIndex {
    fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            by_time: BTreeMap::new(),
        }
    }
}

/// In-memory storage for pending transactions.
///
/// The main table sits behind one readers-writer lock; the missed-hash
/// set and the invalid-GC sets have their own locks so peer status
/// handling and the sealer scan do not contend with admissions.
pub struct PoolStore {
    config: Arc<TxPoolConfig>,
    validator: Arc<TxValidator>,
    ledger: Arc<dyn Ledger>,
    sealer: Arc<dyn SealerGateway>,
    sync_notifier: Arc<SyncNotifier>,
    inner: RwLock<PoolIndex>,
    sealed_count: AtomicUsize,
    missed_txs: Mutex<HashSet<Hash>>,
    invalid_txs: Mutex<HashSet<Hash>>,
    invalid_nonces: Mutex<HashSet<U256>>,
    gc_permits: Arc<Semaphore>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl PoolStore {
    pub fn new(
        config: Arc<TxPoolConfig>,
        validator: Arc<TxValidator>,
        ledger: Arc<dyn Ledger>,
        sealer: Arc<dyn SealerGateway>,
        sync_notifier: Arc<SyncNotifier>,
    ) -> Self {
        let gc_permits = Arc::new(Semaphore::new(config.notifier_worker_num.max(1)));
        Self {
            config,
            validator,
            ledger,
            sealer,
            sync_notifier,
            inner: RwLock::new(PoolIndex::new()),
            sealed_count: AtomicUsize::new(0),
            missed_txs: Mutex::new(HashSet::new()),
            invalid_txs: Mutex::new(HashSet::new()),
            invalid_nonces: Mutex::new(HashSet::new()),
            gc_permits,
        }
    }

    /// The validator admissions run through.
    pub fn validator(&self) -> &Arc<TxValidator> {
        &self.validator
    }

    /// Decode and admit client transaction bytes.
    ///
    /// On any failure the callback (when present) receives a terminal
    /// result synchronously and the returned status tells the caller why.
    pub fn submit(
        self: &Arc<Self>,
        tx_data: &[u8],
        callback: Option<TxSubmitCallback>,
    ) -> TxStatus {
        let tx: Transaction = match bincode::deserialize(tx_data) {
            Ok(tx) => tx,
            Err(error) => {
                warn!(%error, "rejecting transaction: decode failed");
                Self::notify_invalid_receipt([0u8; 32], TxStatus::Malformed, callback);
                return TxStatus::Malformed;
            }
        };
        let entry = Arc::new(PoolTransaction::new(tx, callback));
        self.submit_entry(entry, false)
    }

    /// Admit a decoded entry. `enforce` is set while importing the
    /// transactions of a proposal under verification: the pool cap is
    /// bypassed so consensus can always reconstruct the block.
    pub fn submit_entry(self: &Arc<Self>, entry: Arc<PoolTransaction>, enforce: bool) -> TxStatus {
        let mut status = self.storage_check(&entry, enforce);
        if status.is_ok() {
            status = self.validator.verify(&entry);
        }
        if status.is_ok() {
            status = self.insert(entry.clone(), enforce);
        }
        if !status.is_ok() {
            trace!(
                tx = %abridged(&entry.hash()),
                %status,
                "rejecting transaction"
            );
            Self::notify_invalid_receipt(entry.hash(), status, entry.take_callback());
            return status;
        }

        self.missed_txs.lock().remove(&entry.hash());
        self.pre_commit_transaction(entry);
        self.notify_unsealed_size();
        self.sync_notifier.mark_new_txs();
        TxStatus::Ok
    }

    /// Cheap pre-validation gate: cap and duplicate hash.
    fn storage_check(&self, entry: &PoolTransaction, enforce: bool) -> TxStatus {
        let inner = self.inner.read();
        if !enforce && inner.by_hash.len() >= self.config.pool_limit {
            return TxStatus::PoolIsFull;
        }
        if inner.by_hash.contains_key(&entry.hash()) {
            return TxStatus::AlreadyInPool;
        }
        TxStatus::Ok
    }

    /// Insert under the write lock, claiming the nonce atomically with the
    /// table update.
    fn insert(&self, entry: Arc<PoolTransaction>, enforce: bool) -> TxStatus {
        let mut inner = self.inner.write();
        if !enforce && inner.by_hash.len() >= self.config.pool_limit {
            return TxStatus::PoolIsFull;
        }
        let hash = entry.hash();
        if inner.by_hash.contains_key(&hash) {
            return TxStatus::AlreadyInPool;
        }
        let status = self
            .validator
            .pool_nonce_checker()
            .check_and_insert(entry.transaction().nonce);
        if !status.is_ok() {
            return status;
        }
        entry.set_import_time(now_ms());
        inner.by_time.insert((entry.import_time(), hash), entry.clone());
        inner.by_hash.insert(hash, entry);
        TxStatus::Ok
    }

    fn remove_without_lock(
        &self,
        inner: &mut PoolIndex,
        hash: &Hash,
    ) -> Option<Arc<PoolTransaction>> {
        let entry = inner.by_hash.remove(hash)?;
        inner.by_time.remove(&(entry.import_time(), *hash));
        if entry.is_sealed() {
            self.sealed_count.fetch_sub(1, Ordering::AcqRel);
        }
        Some(entry)
    }

    /// Remove one entry, releasing its nonce.
    pub fn remove(&self, hash: &Hash) -> Option<Arc<PoolTransaction>> {
        let entry = {
            let mut inner = self.inner.write();
            self.remove_without_lock(&mut inner, hash)?
        };
        self.validator
            .pool_nonce_checker()
            .remove(&entry.transaction().nonce);
        Some(entry)
    }

    /// Remove one entry and deliver its terminal submit result.
    pub fn remove_submitted_tx(&self, result: TxSubmitResult) -> Option<Arc<PoolTransaction>> {
        let entry = self.remove(&result.tx_hash)?;
        Self::notify_tx_result(&entry, result);
        Some(entry)
    }

    /// Remove every entry a committed block accounted for, then advance
    /// the ledger nonce window to `batch_id` and release the pool nonces.
    /// Hashes absent from the pool are skipped.
    pub fn batch_remove(self: &Arc<Self>, batch_id: u64, results: Vec<TxSubmitResult>) {
        let mut removed = Vec::with_capacity(results.len());
        {
            let mut inner = self.inner.write();
            for result in results {
                if let Some(entry) = self.remove_without_lock(&mut inner, &result.tx_hash) {
                    removed.push((entry, result));
                }
            }
        }
        let nonces: Vec<U256> = removed
            .iter()
            .map(|(entry, _)| entry.transaction().nonce)
            .collect();
        self.validator
            .ledger_nonce_checker()
            .batch_insert(batch_id, nonces.clone());
        self.validator.pool_nonce_checker().batch_remove(&nonces);
        for (entry, result) in removed {
            Self::notify_tx_result(&entry, result);
        }
        self.notify_unsealed_size();
    }

    /// Look up bodies by hash; the second list carries the misses.
    pub fn fetch_txs(&self, hashes: &[Hash]) -> (Vec<Arc<Transaction>>, Vec<Hash>) {
        let inner = self.inner.read();
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for hash in hashes {
            match inner.by_hash.get(hash) {
                Some(entry) => found.push(entry.transaction().clone()),
                None => missed.push(*hash),
            }
        }
        (found, missed)
    }

    /// Time-ordered walk emitting entries not yet forwarded to peers,
    /// flipping `synced` atomically with emission.
    pub fn fetch_new_txs(&self, limit: usize) -> Vec<Arc<PoolTransaction>> {
        let inner = self.inner.read();
        let mut fetched = Vec::new();
        for entry in inner.by_time.values() {
            if entry.set_synced(true) {
                continue;
            }
            fetched.push(entry.clone());
            if fetched.len() >= limit {
                break;
            }
        }
        fetched
    }

    /// Time-ordered sealer scan.
    ///
    /// Entries that expired their block limit are parked in the invalid
    /// sets under the read lock and drained later under the write lock,
    /// keeping the scan itself cheap.
    pub fn batch_fetch_txs(
        self: &Arc<Self>,
        limit: usize,
        avoid: &HashSet<Hash>,
        avoid_duplicate: bool,
    ) -> Vec<Hash> {
        let mut sealed = Vec::new();
        {
            let inner = self.inner.read();
            for entry in inner.by_time.values() {
                if avoid_duplicate && entry.is_sealed() {
                    continue;
                }
                let hash = entry.hash();
                if entry.is_invalid() || self.invalid_txs.lock().contains(&hash) {
                    continue;
                }
                match self.validator.submitted_to_chain(entry.transaction()) {
                    TxStatus::NonceCheckFail => continue,
                    TxStatus::BlockLimitCheckFail => {
                        self.invalid_txs.lock().insert(hash);
                        self.invalid_nonces.lock().insert(entry.transaction().nonce);
                        continue;
                    }
                    _ => {}
                }
                if avoid.contains(&hash) {
                    continue;
                }
                if !entry.set_sealed(true) {
                    self.sealed_count.fetch_add(1, Ordering::AcqRel);
                }
                sealed.push(hash);
                if sealed.len() >= limit {
                    break;
                }
            }
        }
        self.remove_invalid_txs();
        self.notify_unsealed_size();
        sealed
    }

    /// Drain the invalid sets on a background worker: expired entries get
    /// a terminal `BlockLimitCheckFail` result, and their nonces leave the
    /// pool window.
    fn remove_invalid_txs(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let permits = self.gc_permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire().await else {
                return;
            };
            let Some(store) = weak.upgrade() else {
                return;
            };
            let hashes: Vec<Hash> = store.invalid_txs.lock().drain().collect();
            let nonces: Vec<U256> = store.invalid_nonces.lock().drain().collect();
            if hashes.is_empty() && nonces.is_empty() {
                return;
            }
            rayon::join(
                || {
                    for hash in &hashes {
                        store.remove_submitted_tx(TxSubmitResult::rejected(
                            *hash,
                            TxStatus::BlockLimitCheckFail,
                        ));
                    }
                },
                || {
                    store.validator.pool_nonce_checker().batch_remove(&nonces);
                },
            );
            debug!(expired = hashes.len(), "dropped expired transactions");
            store.notify_unsealed_size();
        });
    }

    /// Flip the sealed flag on each present hash, counting edges, and
    /// publish the new unsealed size.
    pub fn batch_mark_txs(self: &Arc<Self>, hashes: &[Hash], sealed: bool) {
        {
            let inner = self.inner.read();
            for hash in hashes {
                let Some(entry) = inner.by_hash.get(hash) else {
                    continue;
                };
                let was_sealed = entry.set_sealed(sealed);
                if sealed && !was_sealed {
                    self.sealed_count.fetch_add(1, Ordering::AcqRel);
                } else if !sealed && was_sealed {
                    self.sealed_count.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
        self.notify_unsealed_size();
    }

    /// Record that `peer` holds the known hashes, and return the hashes
    /// worth requesting: unknown here and not already being fetched. The
    /// missed set is bounded by the pool limit and cleared when full.
    pub fn filter_unknown_txs(&self, hashes: &[Hash], peer: &NodeId) -> Vec<Hash> {
        let mut unknown = Vec::new();
        {
            let inner = self.inner.read();
            for hash in hashes {
                if let Some(entry) = inner.by_hash.get(hash) {
                    entry.append_known_node(*peer);
                }
            }
            let mut missed = self.missed_txs.lock();
            for hash in hashes {
                if inner.by_hash.contains_key(hash) || missed.contains(hash) {
                    continue;
                }
                missed.insert(*hash);
                unknown.push(*hash);
            }
            if missed.len() >= self.config.pool_limit {
                missed.clear();
            }
        }
        unknown
    }

    pub fn exist(&self, hash: &Hash) -> bool {
        self.inner.read().by_hash.contains_key(hash)
    }

    pub fn size(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    /// Entries not yet handed to the sealer; never underflows.
    pub fn unsealed_txs_size(&self) -> usize {
        self.size()
            .saturating_sub(self.sealed_count.load(Ordering::Acquire))
    }

    /// Drop every entry and reset the auxiliary state.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_hash.clear();
        inner.by_time.clear();
        drop(inner);
        self.sealed_count.store(0, Ordering::Release);
        self.validator.pool_nonce_checker().clear();
        self.missed_txs.lock().clear();
        self.invalid_txs.lock().clear();
        self.invalid_nonces.lock().clear();
    }

    /// Publish the unsealed size to the sealer on a background task,
    /// retrying with doubling back-off while the sealer is unavailable.
    pub fn notify_unsealed_size(self: &Arc<Self>) {
        let weak: Weak<PoolStore> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut delay = RETRY_BASE_DELAY;
            for _ in 0..NOTIFY_SEALER_ATTEMPTS {
                let Some(store) = weak.upgrade() else {
                    return;
                };
                let size = store.unsealed_txs_size();
                match store.sealer.note_unsealed_txs_size(size).await {
                    Ok(()) => return,
                    Err(error) => {
                        warn!(%error, size, "failed to notify sealer of unsealed size");
                    }
                }
                drop(store);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        });
    }

    /// Persist an admitted transaction to the ledger ahead of sealing.
    /// Failure is retried a few times and then dropped: the in-memory pool
    /// remains authoritative.
    fn pre_commit_transaction(self: &Arc<Self>, entry: Arc<PoolTransaction>) {
        let weak: Weak<PoolStore> = Arc::downgrade(self);
        tokio::spawn(async move {
            let encoded = match bincode::serialize(entry.transaction().as_ref()) {
                Ok(encoded) => encoded,
                Err(error) => {
                    warn!(%error, "pre-commit encode failed");
                    return;
                }
            };
            let mut delay = RETRY_BASE_DELAY;
            for _ in 0..PRE_COMMIT_ATTEMPTS {
                let Some(store) = weak.upgrade() else {
                    return;
                };
                match store
                    .ledger
                    .store_transactions(vec![(entry.hash(), encoded.clone())])
                    .await
                {
                    Ok(()) => return,
                    Err(error) => {
                        warn!(
                            %error,
                            tx = %abridged(&entry.hash()),
                            "pre-commit to ledger failed"
                        );
                    }
                }
                drop(store);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        });
    }

    /// Deliver a terminal rejection to the submitter, when a callback is
    /// attached.
    fn notify_invalid_receipt(hash: Hash, status: TxStatus, callback: Option<TxSubmitCallback>) {
        let Some(callback) = callback else {
            return;
        };
        if callback
            .send(TxSubmitResult::rejected(hash, status))
            .is_err()
        {
            trace!(tx = %abridged(&hash), "submitter dropped its receiver");
        }
    }

    /// Deliver the final submit result for a removed entry.
    fn notify_tx_result(entry: &PoolTransaction, result: TxSubmitResult) {
        let Some(callback) = entry.take_callback() else {
            return;
        };
        let hash = result.tx_hash;
        if callback.send(result).is_err() {
            trace!(tx = %abridged(&hash), "submitter dropped its receiver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::nonce::{LedgerNonceChecker, PoolNonceChecker};
    use crate::ports::outbound::mocks::{MockLedger, MockSealer};
    use shared_crypto::Ed25519KeyPair;
    use tokio::sync::oneshot;

    const TIP: u64 = 20;
    const BLOCK_LIMIT: u64 = 10;

    fn create_store(pool_limit: usize) -> (Arc<PoolStore>, Arc<MockSealer>, Arc<MockLedger>) {
        let config = Arc::new(TxPoolConfig {
            pool_limit,
            block_limit: BLOCK_LIMIT,
            ..TxPoolConfig::for_testing()
        });
        let ledger_checker = Arc::new(LedgerNonceChecker::new(BLOCK_LIMIT));
        ledger_checker.initialize(TIP, BTreeMap::new());
        let validator = Arc::new(TxValidator::new(
            Arc::new(PoolNonceChecker::new()),
            ledger_checker,
            config.chain_id.clone(),
            config.group_id.clone(),
        ));
        let ledger = Arc::new(MockLedger::new(TIP));
        let sealer = Arc::new(MockSealer::new());
        let store = Arc::new(PoolStore::new(
            config,
            validator,
            ledger.clone(),
            sealer.clone(),
            Arc::new(SyncNotifier::new()),
        ));
        (store, sealer, ledger)
    }

    fn create_test_tx(seed: u8, nonce: u64, block_limit: u64) -> Transaction {
        let keypair = Ed25519KeyPair::from_seed([seed; 32]);
        Transaction::signed(
            &keypair,
            "chain0",
            "group0",
            block_limit,
            U256::from(nonce),
            vec![seed],
        )
    }

    fn encode(tx: &Transaction) -> Vec<u8> {
        bincode::serialize(tx).unwrap()
    }

    #[tokio::test]
    async fn test_submit_admits_valid_tx() {
        let (store, _, ledger) = create_store(10);
        let tx = create_test_tx(1, 1, TIP + 5);
        let (sender, mut receiver) = oneshot::channel();

        let status = store.submit(&encode(&tx), Some(sender));
        assert_eq!(status, TxStatus::Ok);
        assert_eq!(store.size(), 1);
        assert!(store.exist(&tx.hash()));
        assert!(store.validator().pool_nonce_checker().contains(&tx.nonce));

        // callback pends until a terminal result
        assert!(receiver.try_recv().is_err());

        // pre-commit lands on the ledger
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ledger.stored_hashes(), vec![tx.hash()]);
    }

    #[tokio::test]
    async fn test_submit_malformed_bytes() {
        let (store, _, _) = create_store(10);
        let (sender, receiver) = oneshot::channel();

        let status = store.submit(&[0xde, 0xad], Some(sender));
        assert_eq!(status, TxStatus::Malformed);
        assert_eq!(store.size(), 0);

        let result = receiver.await.unwrap();
        assert_eq!(result.status, TxStatus::Malformed);
        assert_eq!(result.tx_hash, [0u8; 32]);
    }

    #[tokio::test]
    async fn test_submit_expired_block_limit() {
        let (store, _, _) = create_store(10);
        // block limit beyond tip + window
        let tx = create_test_tx(2, 1, TIP + BLOCK_LIMIT + 1);
        let (sender, receiver) = oneshot::channel();

        let status = store.submit(&encode(&tx), Some(sender));
        assert_eq!(status, TxStatus::BlockLimitCheckFail);
        assert_eq!(store.size(), 0);

        let result = receiver.await.unwrap();
        assert_eq!(result.status, TxStatus::BlockLimitCheckFail);
        assert_eq!(result.tx_hash, tx.hash());
    }

    #[tokio::test]
    async fn test_submit_ledger_nonce_collision() {
        let (store, _, _) = create_store(10);
        let mut history = BTreeMap::new();
        history.insert(TIP - 9, vec![U256::from(5)]);
        store
            .validator()
            .ledger_nonce_checker()
            .initialize(TIP, history);

        let tx = create_test_tx(3, 5, TIP + 5);
        let (sender, receiver) = oneshot::channel();
        let status = store.submit(&encode(&tx), Some(sender));
        assert_eq!(status, TxStatus::NonceCheckFail);
        assert_eq!(store.size(), 0);
        assert_eq!(receiver.await.unwrap().status, TxStatus::NonceCheckFail);
    }

    #[tokio::test]
    async fn test_submit_duplicate_hash() {
        let (store, _, _) = create_store(10);
        let tx = create_test_tx(4, 1, TIP + 5);
        assert_eq!(store.submit(&encode(&tx), None), TxStatus::Ok);
        assert_eq!(store.submit(&encode(&tx), None), TxStatus::AlreadyInPool);
        assert_eq!(store.size(), 1);
    }

    #[tokio::test]
    async fn test_submit_duplicate_nonce_different_tx() {
        let (store, _, _) = create_store(10);
        let first = create_test_tx(5, 9, TIP + 5);
        let second = create_test_tx(6, 9, TIP + 5);
        assert_ne!(first.hash(), second.hash());

        assert_eq!(store.submit(&encode(&first), None), TxStatus::Ok);
        assert_eq!(store.submit(&encode(&second), None), TxStatus::NonceCheckFail);
    }

    #[tokio::test]
    async fn test_pool_full() {
        let (store, _, _) = create_store(3);
        for i in 0..3 {
            let tx = create_test_tx(10 + i, i as u64, TIP + 5);
            assert_eq!(store.submit(&encode(&tx), None), TxStatus::Ok);
        }
        let overflow = create_test_tx(20, 99, TIP + 5);
        let (sender, receiver) = oneshot::channel();
        assert_eq!(
            store.submit(&encode(&overflow), Some(sender)),
            TxStatus::PoolIsFull
        );
        assert_eq!(store.size(), 3);
        assert_eq!(receiver.await.unwrap().status, TxStatus::PoolIsFull);
    }

    #[tokio::test]
    async fn test_enforced_import_bypasses_cap() {
        let (store, _, _) = create_store(1);
        let tx = create_test_tx(30, 1, TIP + 5);
        assert_eq!(store.submit(&encode(&tx), None), TxStatus::Ok);

        let extra = create_test_tx(31, 2, TIP + 5);
        let entry = Arc::new(PoolTransaction::new(extra, None));
        assert_eq!(store.submit_entry(entry, true), TxStatus::Ok);
        assert_eq!(store.size(), 2);
    }

    #[tokio::test]
    async fn test_fetch_new_txs_is_monotone() {
        let (store, _, _) = create_store(10);
        for i in 0..3 {
            let tx = create_test_tx(40 + i, i as u64, TIP + 5);
            store.submit(&encode(&tx), None);
        }
        let first = store.fetch_new_txs(10);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|e| e.is_synced()));

        let second = store.fetch_new_txs(10);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_batch_fetch_seals_without_overlap() {
        let (store, _, _) = create_store(10);
        for i in 0..4 {
            let tx = create_test_tx(50 + i, i as u64, TIP + 5);
            store.submit(&encode(&tx), None);
        }
        let first = store.batch_fetch_txs(2, &HashSet::new(), true);
        assert_eq!(first.len(), 2);
        assert_eq!(store.unsealed_txs_size(), 2);

        let second = store.batch_fetch_txs(10, &HashSet::new(), true);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|h| !second.contains(h)));
        assert_eq!(store.unsealed_txs_size(), 0);
    }

    #[tokio::test]
    async fn test_batch_fetch_respects_avoid_set() {
        let (store, _, _) = create_store(10);
        let tx = create_test_tx(60, 1, TIP + 5);
        let hash = tx.hash();
        store.submit(&encode(&tx), None);

        let mut avoid = HashSet::new();
        avoid.insert(hash);
        assert!(store.batch_fetch_txs(10, &avoid, true).is_empty());
        assert_eq!(store.batch_fetch_txs(10, &HashSet::new(), true), vec![hash]);
    }

    #[tokio::test]
    async fn test_batch_fetch_expires_stale_entries() {
        let (store, _, _) = create_store(10);
        let stale = create_test_tx(70, 1, TIP + 3);
        let (sender, receiver) = oneshot::channel();
        let entry = Arc::new(PoolTransaction::new(stale, Some(sender)));
        assert_eq!(store.submit_entry(entry, false), TxStatus::Ok);

        // the chain advances past the entry's block limit
        store
            .validator()
            .ledger_nonce_checker()
            .batch_insert(TIP + 4, vec![]);

        assert!(store.batch_fetch_txs(10, &HashSet::new(), true).is_empty());

        // the deferred GC evicts the entry and fires its terminal result
        let result = receiver.await.unwrap();
        assert_eq!(result.status, TxStatus::BlockLimitCheckFail);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.size(), 0);
        assert!(store.validator().pool_nonce_checker().is_empty());
    }

    #[tokio::test]
    async fn test_batch_remove_moves_nonces_to_ledger_window() {
        let (store, sealer, _) = create_store(10);
        let tx = create_test_tx(80, 7, TIP + 5);
        let hash = tx.hash();
        let (sender, receiver) = oneshot::channel();
        store.submit(&encode(&tx), Some(sender));

        let sealed = store.batch_fetch_txs(1, &HashSet::new(), true);
        assert_eq!(sealed, vec![hash]);

        let batch_id = TIP + 1;
        store.batch_remove(
            batch_id,
            vec![TxSubmitResult::committed(hash, batch_id, [0xB1; 32])],
        );

        assert_eq!(store.size(), 0);
        assert!(!store.exist(&hash));
        assert!(!store.validator().pool_nonce_checker().contains(&U256::from(7)));
        assert!(store
            .validator()
            .ledger_nonce_checker()
            .contains(&U256::from(7)));

        let result = receiver.await.unwrap();
        assert!(result.status.is_ok());
        assert_eq!(result.block_number, Some(batch_id));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sealer.last_reported(), Some(0));
    }

    #[tokio::test]
    async fn test_batch_remove_skips_absent_hashes() {
        let (store, _, _) = create_store(10);
        let tx = create_test_tx(81, 1, TIP + 5);
        store.submit(&encode(&tx), None);

        store.batch_remove(
            TIP + 1,
            vec![
                TxSubmitResult::committed([0xAA; 32], TIP + 1, [0xB2; 32]),
                TxSubmitResult::committed(tx.hash(), TIP + 1, [0xB2; 32]),
            ],
        );
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn test_batch_mark_txs_flips_both_ways() {
        let (store, _, _) = create_store(10);
        let tx = create_test_tx(82, 1, TIP + 5);
        let hash = tx.hash();
        store.submit(&encode(&tx), None);

        store.batch_mark_txs(&[hash], true);
        assert_eq!(store.unsealed_txs_size(), 0);

        // marking twice must not double-count
        store.batch_mark_txs(&[hash], true);
        assert_eq!(store.unsealed_txs_size(), 0);

        store.batch_mark_txs(&[hash], false);
        assert_eq!(store.unsealed_txs_size(), 1);
    }

    #[tokio::test]
    async fn test_filter_unknown_txs() {
        let (store, _, _) = create_store(10);
        let resident = create_test_tx(83, 1, TIP + 5);
        let resident_hash = resident.hash();
        store.submit(&encode(&resident), None);

        let peer = NodeId([9; 32]);
        let unknown_hash = [0x77; 32];
        let unknown = store.filter_unknown_txs(&[resident_hash, unknown_hash], &peer);
        assert_eq!(unknown, vec![unknown_hash]);

        // the resident entry now knows the peer
        let (found, _) = store.fetch_txs(&[resident_hash]);
        assert_eq!(found.len(), 1);
        let inner = store.inner.read();
        assert!(inner.by_hash.get(&resident_hash).unwrap().is_known_by(&peer));
        drop(inner);

        // a second advert for the same unknown hash is suppressed
        assert!(store.filter_unknown_txs(&[unknown_hash], &peer).is_empty());
    }

    #[tokio::test]
    async fn test_missed_set_clears_when_full() {
        let (store, _, _) = create_store(3);
        let peer = NodeId([9; 32]);
        let hashes: Vec<Hash> = (0..3u8).map(|i| [i; 32]).collect();
        let unknown = store.filter_unknown_txs(&hashes, &peer);
        assert_eq!(unknown.len(), 3);

        // the set hit the pool limit and was cleared, so the same hashes
        // are requestable again
        let again = store.filter_unknown_txs(&hashes[..1], &peer);
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let (store, _, _) = create_store(10);
        let tx = create_test_tx(84, 1, TIP + 5);
        store.submit(&encode(&tx), None);
        store.batch_fetch_txs(1, &HashSet::new(), true);

        store.clear();
        assert_eq!(store.size(), 0);
        assert_eq!(store.unsealed_txs_size(), 0);
        assert!(store.validator().pool_nonce_checker().is_empty());
    }

    #[tokio::test]
    async fn test_sealer_notification_retries() {
        let config = Arc::new(TxPoolConfig {
            pool_limit: 10,
            block_limit: BLOCK_LIMIT,
            ..TxPoolConfig::for_testing()
        });
        let ledger_checker = Arc::new(LedgerNonceChecker::new(BLOCK_LIMIT));
        ledger_checker.initialize(TIP, BTreeMap::new());
        let validator = Arc::new(TxValidator::new(
            Arc::new(PoolNonceChecker::new()),
            ledger_checker,
            config.chain_id.clone(),
            config.group_id.clone(),
        ));
        let sealer = Arc::new(MockSealer::failing(2));
        let store = Arc::new(PoolStore::new(
            config,
            validator,
            Arc::new(MockLedger::new(TIP)),
            sealer.clone(),
            Arc::new(SyncNotifier::new()),
        ));

        let tx = create_test_tx(85, 1, TIP + 5);
        store.submit(&bincode::serialize(&tx).unwrap(), None);

        // two failures, then the size lands
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sealer.last_reported(), Some(1));
    }
}
