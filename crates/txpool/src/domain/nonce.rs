//! Two-layer nonce uniqueness: the set of nonces currently pending in the
//! pool, and the sliding window of nonces mined over the last
//! `block_limit` blocks.

use parking_lot::Mutex;
use shared_types::{Transaction, TxStatus, U256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Nonces of every transaction currently resident in the pool.
///
/// `check_and_insert` runs under one lock acquisition so two concurrent
/// admissions cannot both claim the same nonce.
#[derive(Debug, Default)]
pub struct PoolNonceChecker {
    nonces: Mutex<HashSet<U256>>,
}

impl PoolNonceChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject when the nonce is already pending.
    pub fn check(&self, tx: &Transaction) -> TxStatus {
        if self.nonces.lock().contains(&tx.nonce) {
            return TxStatus::NonceCheckFail;
        }
        TxStatus::Ok
    }

    /// Atomically claim the nonce for a new entry.
    pub fn check_and_insert(&self, nonce: U256) -> TxStatus {
        if !self.nonces.lock().insert(nonce) {
            return TxStatus::NonceCheckFail;
        }
        TxStatus::Ok
    }

    /// Release the nonce of a removed entry.
    pub fn remove(&self, nonce: &U256) {
        self.nonces.lock().remove(nonce);
    }

    /// Release the nonces of a removed batch.
    pub fn batch_remove(&self, nonces: &[U256]) {
        let mut guard = self.nonces.lock();
        for nonce in nonces {
            guard.remove(nonce);
        }
    }

    /// Drop every pending nonce.
    pub fn clear(&self) {
        self.nonces.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.nonces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.lock().is_empty()
    }

    /// Whether a nonce is currently claimed.
    pub fn contains(&self, nonce: &U256) -> bool {
        self.nonces.lock().contains(nonce)
    }
}

struct LedgerWindow {
    /// Mined nonces per block over the last `block_limit` blocks.
    window: BTreeMap<u64, Vec<U256>>,
    /// Flat lookup over the window; value counts duplicates across blocks.
    mined: HashMap<U256, usize>,
    /// Highest committed block number.
    tip: u64,
}

/// Sliding window of on-chain nonces, advanced each time a block commits.
pub struct LedgerNonceChecker {
    block_limit: u64,
    inner: Mutex<LedgerWindow>,
}

impl LedgerNonceChecker {
    pub fn new(block_limit: u64) -> Self {
        Self {
            block_limit,
            inner: Mutex::new(LedgerWindow {
                window: BTreeMap::new(),
                mined: HashMap::new(),
                tip: 0,
            }),
        }
    }

    /// Seed the window from ledger history and set the current tip.
    pub fn initialize(&self, tip: u64, nonces: BTreeMap<u64, Vec<U256>>) {
        let mut inner = self.inner.lock();
        inner.tip = tip;
        for (block_number, block_nonces) in nonces {
            for nonce in &block_nonces {
                *inner.mined.entry(*nonce).or_insert(0) += 1;
            }
            inner.window.insert(block_number, block_nonces);
        }
        Self::evict_expired(&mut inner, self.block_limit);
    }

    /// Highest committed block number seen so far.
    pub fn tip(&self) -> u64 {
        self.inner.lock().tip
    }

    /// Reject a transaction whose nonce was already mined within the
    /// window, or whose block limit falls outside `(tip, tip + block_limit]`.
    pub fn check(&self, tx: &Transaction) -> TxStatus {
        let inner = self.inner.lock();
        if inner.mined.contains_key(&tx.nonce) {
            return TxStatus::NonceCheckFail;
        }
        if tx.block_limit <= inner.tip || tx.block_limit > inner.tip + self.block_limit {
            return TxStatus::BlockLimitCheckFail;
        }
        TxStatus::Ok
    }

    /// Record the nonces mined in `batch_id`, advance the tip, and evict
    /// the block that slid out of the window.
    pub fn batch_insert(&self, batch_id: u64, nonces: Vec<U256>) {
        let mut inner = self.inner.lock();
        for nonce in &nonces {
            *inner.mined.entry(*nonce).or_insert(0) += 1;
        }
        inner.window.insert(batch_id, nonces);
        if batch_id > inner.tip {
            inner.tip = batch_id;
        }
        Self::evict_expired(&mut inner, self.block_limit);
    }

    fn evict_expired(inner: &mut LedgerWindow, block_limit: u64) {
        let cutoff = inner.tip.saturating_sub(block_limit);
        let expired: Vec<u64> = inner.window.range(..=cutoff).map(|(k, _)| *k).collect();
        for block_number in expired {
            if let Some(block_nonces) = inner.window.remove(&block_number) {
                for nonce in block_nonces {
                    if let Some(count) = inner.mined.get_mut(&nonce) {
                        *count -= 1;
                        if *count == 0 {
                            inner.mined.remove(&nonce);
                        }
                    }
                }
            }
        }
    }

    /// Whether a nonce is mined within the current window.
    pub fn contains(&self, nonce: &U256) -> bool {
        self.inner.lock().mined.contains_key(nonce)
    }
}
