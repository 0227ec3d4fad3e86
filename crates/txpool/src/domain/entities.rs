//! Pool entry: a transaction plus the runtime state the pool tracks for it.

use parking_lot::{Mutex, RwLock};
use shared_types::{Hash, NodeId, Transaction, TxSubmitResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// One-shot continuation delivering the terminal submit result.
///
/// Being a `oneshot::Sender`, consuming it enforces the exactly-once
/// delivery invariant at the type level.
pub type TxSubmitCallback = oneshot::Sender<TxSubmitResult>;

/// Sentinel for "not part of any proposal batch".
const NO_BATCH: i64 = -1;

/// A transaction resident in the pool.
///
/// The inner [`Transaction`] is immutable; everything the pool mutates
/// (seal/sync/invalid flags, the peers that know the hash, the proposal
/// binding, the submit callback) lives behind atomics or its own lock so
/// entries can be marked concurrently by scanners holding only the table's
/// read lock.
pub struct PoolTransaction {
    tx: Arc<Transaction>,
    hash: Hash,
    import_time: AtomicU64,
    sealed: AtomicBool,
    synced: AtomicBool,
    invalid: AtomicBool,
    known_by: RwLock<HashSet<NodeId>>,
    submit_callback: Mutex<Option<TxSubmitCallback>>,
    batch_id: AtomicI64,
    batch_hash: Mutex<Option<Hash>>,
}

impl PoolTransaction {
    /// Wrap a decoded transaction, optionally carrying the submitter's
    /// callback (present only for client-submitted transactions).
    pub fn new(tx: Transaction, callback: Option<TxSubmitCallback>) -> Self {
        let hash = tx.hash();
        Self {
            tx: Arc::new(tx),
            hash,
            import_time: AtomicU64::new(0),
            sealed: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
            known_by: RwLock::new(HashSet::new()),
            submit_callback: Mutex::new(callback),
            batch_id: AtomicI64::new(NO_BATCH),
            batch_hash: Mutex::new(None),
        }
    }

    /// The cached transaction hash.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The inner transaction.
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.tx
    }

    /// Millisecond timestamp assigned when the entry entered the pool;
    /// the sort key for time-ordered scans.
    pub fn import_time(&self) -> u64 {
        self.import_time.load(Ordering::Acquire)
    }

    /// Stamp the import time; called once, under the table's write lock.
    pub fn set_import_time(&self, time: u64) {
        self.import_time.store(time, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Flip the sealed flag, returning the previous value so callers can
    /// count 0→1 and 1→0 edges exactly once.
    pub fn set_sealed(&self, sealed: bool) -> bool {
        self.sealed.swap(sealed, Ordering::AcqRel)
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Flip the synced flag, returning the previous value.
    pub fn set_synced(&self, synced: bool) -> bool {
        self.synced.swap(synced, Ordering::AcqRel)
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    pub fn set_invalid(&self, invalid: bool) {
        self.invalid.store(invalid, Ordering::Release);
    }

    /// True when `peer` already holds, or was already told about, this
    /// transaction.
    pub fn is_known_by(&self, peer: &NodeId) -> bool {
        self.known_by.read().contains(peer)
    }

    /// Record that `peer` holds or will be told about this transaction.
    pub fn append_known_node(&self, peer: NodeId) {
        self.known_by.write().insert(peer);
    }

    /// Whether the submitter's callback is still pending; marks the entry
    /// as client-submitted rather than gossip-relayed.
    pub fn has_callback(&self) -> bool {
        self.submit_callback.lock().is_some()
    }

    /// Take the callback out of the entry; each call after the first
    /// returns `None`.
    pub fn take_callback(&self) -> Option<TxSubmitCallback> {
        self.submit_callback.lock().take()
    }

    /// Bind the entry to the proposal being verified.
    pub fn set_batch(&self, batch_id: u64, batch_hash: Hash) {
        self.batch_id.store(batch_id as i64, Ordering::Release);
        *self.batch_hash.lock() = Some(batch_hash);
    }

    /// The proposal this entry is bound to, if any.
    pub fn batch(&self) -> Option<(u64, Hash)> {
        let id = self.batch_id.load(Ordering::Acquire);
        if id == NO_BATCH {
            return None;
        }
        (*self.batch_hash.lock()).map(|hash| (id as u64, hash))
    }
}

impl std::fmt::Debug for PoolTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolTransaction")
            .field("hash", &shared_types::abridged(&self.hash))
            .field("nonce", &self.tx.nonce)
            .field("sealed", &self.is_sealed())
            .field("synced", &self.is_synced())
            .field("invalid", &self.is_invalid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::Ed25519KeyPair;
    use shared_types::U256;

    fn create_test_entry(nonce: u64) -> PoolTransaction {
        let keypair = Ed25519KeyPair::from_seed([0x21; 32]);
        let tx = Transaction::signed(
            &keypair,
            "chain0",
            "group0",
            20,
            U256::from(nonce),
            vec![],
        );
        PoolTransaction::new(tx, None)
    }

    #[test]
    fn test_flags_report_edges() {
        let entry = create_test_entry(1);
        assert!(!entry.set_sealed(true));
        assert!(entry.set_sealed(true));
        assert!(entry.set_sealed(false));

        assert!(!entry.set_synced(true));
        assert!(entry.is_synced());
    }

    #[test]
    fn test_known_by_tracking() {
        let entry = create_test_entry(1);
        let peer = NodeId([7; 32]);
        assert!(!entry.is_known_by(&peer));
        entry.append_known_node(peer);
        assert!(entry.is_known_by(&peer));
    }

    #[test]
    fn test_callback_taken_at_most_once() {
        let (sender, _receiver) = oneshot::channel();
        let keypair = Ed25519KeyPair::from_seed([0x22; 32]);
        let tx = Transaction::signed(&keypair, "chain0", "group0", 20, U256::from(9), vec![]);
        let entry = PoolTransaction::new(tx, Some(sender));

        assert!(entry.has_callback());
        assert!(entry.take_callback().is_some());
        assert!(!entry.has_callback());
        assert!(entry.take_callback().is_none());
    }

    #[test]
    fn test_batch_binding() {
        let entry = create_test_entry(3);
        assert!(entry.batch().is_none());
        entry.set_batch(12, [0xEE; 32]);
        assert_eq!(entry.batch(), Some((12, [0xEE; 32])));
    }
}
